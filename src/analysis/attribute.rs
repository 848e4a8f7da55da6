use syn::{Attribute, LitBool, LitInt, LitStr, Meta};

use crate::model::{CacheStrategy, FunctionConfig};

pub const PRECOMPUTE: &str = "precompute";
pub const INTERCEPTS_LOCATION: &str = "intercepts_location";

/// Whether the attribute path ends in `name` (`precompute`, `precomp_macros::precompute`, ...).
pub fn is_named(attr: &Attribute, name: &str) -> bool {
    attr.path()
        .segments
        .last()
        .is_some_and(|segment| segment.ident == name)
}

pub fn find_precompute(attrs: &[Attribute]) -> Option<&Attribute> {
    attrs.iter().find(|attr| is_named(attr, PRECOMPUTE))
}

/// Reads the `#[precompute(...)]` options, filling gaps from the build-wide defaults.
pub fn parse_config(attr: &Attribute, defaults: &FunctionConfig) -> syn::Result<FunctionConfig> {
    let mut config = defaults.clone();
    match &attr.meta {
        Meta::Path(_) => return Ok(config),
        Meta::NameValue(value) => {
            return Err(syn::Error::new_spanned(
                value,
                "expected `#[precompute]` or `#[precompute(...)]`",
            ));
        }
        Meta::List(_) => {}
    }

    attr.parse_nested_meta(|meta| {
        if meta.path.is_ident("cache") {
            let value = meta.value()?.parse::<LitStr>()?;
            config.cache = CacheStrategy::parse(&value.value()).ok_or_else(|| {
                syn::Error::new(
                    value.span(),
                    format!("unknown cache strategy `{}`", value.value()),
                )
            })?;
        } else if meta.path.is_ident("timeout_ms") {
            config.timeout_ms = meta.value()?.parse::<LitInt>()?.base10_parse()?;
        } else if meta.path.is_ident("warn_threshold_ms") {
            config.warn_threshold_ms = meta.value()?.parse::<LitInt>()?.base10_parse()?;
        } else if meta.path.is_ident("suppress_warnings") {
            config.suppress_warnings = if meta.input.peek(syn::Token![=]) {
                meta.value()?.parse::<LitBool>()?.value
            } else {
                true
            };
        } else {
            let name = meta
                .path
                .get_ident()
                .map_or_else(|| "<path>".to_string(), ToString::to_string);
            return Err(meta.error(format!("unknown precompute option `{name}`")));
        }
        Ok(())
    })?;

    if config.timeout_ms == 0 {
        return Err(syn::Error::new_spanned(attr, "timeout_ms must be greater than zero"));
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> FunctionConfig {
        FunctionConfig {
            cache: CacheStrategy::Persistent,
            timeout_ms: 5000,
            warn_threshold_ms: 1000,
            suppress_warnings: false,
        }
    }

    fn attr(text: &str) -> Attribute {
        let item: syn::ItemFn =
            syn::parse_str(&format!("{text} fn f() {{}}")).expect("item should parse");
        item.attrs.into_iter().next().expect("attribute present")
    }

    #[test]
    fn bare_attribute_uses_defaults() {
        let config = parse_config(&attr("#[precompute]"), &defaults()).expect("valid");
        assert_eq!(config, defaults());
    }

    #[test]
    fn options_override_defaults() {
        let config = parse_config(
            &attr("#[precomp_macros::precompute(cache = \"never\", timeout_ms = 20, suppress_warnings)]"),
            &defaults(),
        )
        .expect("valid");
        assert_eq!(config.cache, CacheStrategy::Never);
        assert_eq!(config.timeout_ms, 20);
        assert_eq!(config.warn_threshold_ms, 1000);
        assert!(config.suppress_warnings);
    }

    #[test]
    fn unknown_options_and_strategies_are_errors() {
        assert!(parse_config(&attr("#[precompute(retries = 3)]"), &defaults()).is_err());
        assert!(parse_config(&attr("#[precompute(cache = \"forever\")]"), &defaults()).is_err());
        assert!(parse_config(&attr("#[precompute(timeout_ms = 0)]"), &defaults()).is_err());
    }

    #[test]
    fn attribute_is_recognised_by_last_segment() {
        assert!(is_named(&attr("#[precomp_macros::precompute]"), PRECOMPUTE));
        assert!(!is_named(&attr("#[inline]"), PRECOMPUTE));
    }
}
