use proc_macro2::{Literal, TokenStream};
use quote::{format_ident, quote};

use crate::analysis::location::SourceLocation;
use crate::codegen::INTERCEPTS_UNIT;
use crate::codegen::render::{RenderError, render_value};
use crate::model::FunctionDescriptor;
use crate::resolve::ExecutionRequest;

/// `<function>__<signature hash>_<cache key prefix>`
pub fn substitute_name(function: &FunctionDescriptor, cache_key: &str) -> String {
    let key = cache_key.get(..8).unwrap_or(cache_key);
    format!(
        "{}__{}_{key}",
        function.name.trim_start_matches("r#"),
        function.signature_hash()
    )
}

/// Module name of the unit holding substitutes for `function`'s declaring type.
/// Never collides with the intercept table or the root `mod.rs`.
pub fn unit_name(function: &FunctionDescriptor) -> String {
    let mut name = function
        .namespace
        .split("::")
        .filter(|part| !part.is_empty())
        .map(|part| part.trim_start_matches("r#").to_string())
        .chain(std::iter::once(snake_case(&function.type_name)))
        .collect::<Vec<_>>()
        .join("_");
    let reserved = name == INTERCEPTS_UNIT || name == "mod";
    if reserved || syn::parse_str::<syn::Ident>(&name).is_err() {
        name.push('_');
    }
    name
}

fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for ch in name.trim_start_matches("r#").chars() {
        if ch.is_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
            prev_lower = false;
        } else {
            out.push(ch);
            prev_lower = ch.is_lowercase() || ch.is_ascii_digit();
        }
    }
    out
}

/// What a substitute does when called.
#[derive(Debug, Clone, Copy)]
pub enum SubstituteBody<'a> {
    Value(&'a str),
    Panic(&'a str),
}

/// Builds the substitute function item for one request.
pub fn substitute_item(
    request: &ExecutionRequest,
    name: &str,
    body: SubstituteBody<'_>,
) -> Result<TokenStream, RenderError> {
    let function = &request.function;
    let ident = format_ident!("{}", name);
    let ty = function.return_shape.type_tokens();
    let sites = request.invocations.iter().map(|invocation| site_attribute(&invocation.location));
    let call = request
        .invocations
        .first()
        .map_or_else(|| function.qualified_name(), |invocation| invocation.call_text());

    let (doc, output, block, allow) = match body {
        SubstituteBody::Value(text) => {
            let value = render_value(&function.return_shape, text)?;
            let doc = format!(" Precomputed result of `{call}`.");
            if function.is_async {
                (
                    doc,
                    quote!(impl ::core::future::Future<Output = #ty>),
                    quote!(::core::future::ready(#value)),
                    quote!(),
                )
            } else {
                (doc, ty, value, quote!())
            }
        }
        SubstituteBody::Panic(message) => {
            let doc = format!(" `{call}` failed at build time.");
            let message = Literal::string(message);
            let panic = quote!(::core::panic!("{}", #message));
            if function.is_async {
                (
                    doc,
                    quote!(impl ::core::future::Future<Output = #ty>),
                    quote!(::core::future::ready::<#ty>(#panic)),
                    quote!(#[allow(unreachable_code)]),
                )
            } else {
                (doc, ty, panic, quote!())
            }
        }
    };

    Ok(quote! {
        #[doc = #doc]
        #(#sites)*
        #allow
        pub fn #ident() -> #output {
            #block
        }
    })
}

fn site_attribute(location: &SourceLocation) -> TokenStream {
    let file = Literal::string(&location.file);
    let line = Literal::usize_unsuffixed(location.line);
    let column = Literal::usize_unsuffixed(location.column);
    quote! {
        #[::precomp_macros::intercepts_location(file = #file, line = #line, column = #column)]
    }
}
