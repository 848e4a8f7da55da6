//! Inert attributes recognised by the `precomp` build step.
//!
//! Both attributes return the annotated item unchanged. They exist so that
//! annotated sources and generated substitute units compile on their own; the
//! build step reads them straight from the syntax tree.

use proc_macro::TokenStream;
use quote::ToTokens;
use syn::meta::ParseNestedMeta;
use syn::parse::Parser;
use syn::{ImplItemFn, LitInt, LitStr};

const CACHE_STRATEGIES: [&str; 3] = ["never", "per_build", "persistent"];

/// Marks an associated function for build-time execution.
///
/// Accepted options: `cache = "never" | "per_build" | "persistent"`,
/// `timeout_ms = N`, `warn_threshold_ms = N` and `suppress_warnings`.
#[proc_macro_attribute]
pub fn precompute(args: TokenStream, item: TokenStream) -> TokenStream {
    let parser = syn::meta::parser(|meta| validate_option(&meta));
    if let Err(err) = parser.parse(args) {
        return with_error(err, item);
    }
    if let Err(err) = syn::parse::<ImplItemFn>(item.clone()) {
        let err = syn::Error::new(
            err.span(),
            "#[precompute] applies to associated functions inside an inherent impl block",
        );
        return with_error(err, item);
    }
    item
}

/// Tags a generated substitute with one originating call site.
#[proc_macro_attribute]
pub fn intercepts_location(args: TokenStream, item: TokenStream) -> TokenStream {
    let parser = syn::meta::parser(|meta| {
        if meta.path.is_ident("file") {
            meta.value()?.parse::<LitStr>()?;
            Ok(())
        } else if meta.path.is_ident("line") || meta.path.is_ident("column") {
            meta.value()?.parse::<LitInt>()?.base10_parse::<u32>()?;
            Ok(())
        } else {
            Err(meta.error("expected `file`, `line` or `column`"))
        }
    });
    match parser.parse(args) {
        Ok(()) => item,
        Err(err) => with_error(err, item),
    }
}

fn validate_option(meta: &ParseNestedMeta<'_>) -> syn::Result<()> {
    if meta.path.is_ident("cache") {
        let value = meta.value()?.parse::<LitStr>()?;
        if !CACHE_STRATEGIES.contains(&value.value().as_str()) {
            return Err(syn::Error::new(
                value.span(),
                "cache must be one of \"never\", \"per_build\" or \"persistent\"",
            ));
        }
        Ok(())
    } else if meta.path.is_ident("timeout_ms") || meta.path.is_ident("warn_threshold_ms") {
        meta.value()?.parse::<LitInt>()?.base10_parse::<u64>()?;
        Ok(())
    } else if meta.path.is_ident("suppress_warnings") {
        if meta.input.peek(syn::Token![=]) {
            meta.value()?.parse::<syn::LitBool>()?;
        }
        Ok(())
    } else {
        Err(meta.error("unknown precompute option"))
    }
}

fn with_error(err: syn::Error, item: TokenStream) -> TokenStream {
    let mut tokens = err.to_compile_error();
    tokens.extend(proc_macro2::TokenStream::from(item).into_token_stream());
    tokens.into()
}
