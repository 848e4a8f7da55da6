//! Turns the worker's `Debug` text back into a Rust expression of the
//! declared return type.

use proc_macro2::{Span, TokenStream};
use quote::{format_ident, quote};
use syn::{Expr, ExprLit, ExprUnary, Lit, UnOp};
use thiserror::Error;

use crate::analysis::shape::ValueShape;

#[derive(Debug, Error)]
#[error("cannot render `{text}` as `{ty}`: {reason}")]
pub struct RenderError {
    pub text: String,
    pub ty: String,
    pub reason: String,
}

pub fn render_value(shape: &ValueShape, text: &str) -> Result<TokenStream, RenderError> {
    let fail = |reason: String| RenderError {
        text: text.to_string(),
        ty: shape.rust_type(),
        reason,
    };
    let expr: Expr = syn::parse_str(text.trim()).map_err(|err| fail(err.to_string()))?;
    render_expr(shape, &expr).map_err(fail)
}

fn render_expr(shape: &ValueShape, expr: &Expr) -> Result<TokenStream, String> {
    let expr = strip_groups(expr);
    match shape {
        ValueShape::Unit => match expr {
            Expr::Tuple(tuple) if tuple.elems.is_empty() => Ok(quote!(())),
            _ => Err("expected `()`".into()),
        },
        ValueShape::Bool => match literal(expr) {
            Some(Lit::Bool(value)) => Ok(quote!(#value)),
            _ => Err("expected a boolean".into()),
        },
        ValueShape::Char => match literal(expr) {
            Some(Lit::Char(value)) => {
                let value = syn::LitChar::new(value.value(), Span::call_site());
                Ok(quote!(#value))
            }
            _ => Err("expected a char".into()),
        },
        ValueShape::Int(name) => render_int(name, expr),
        ValueShape::Float(name) => render_float(name, expr),
        ValueShape::Str => string_literal(expr).map(|value| quote!(#value)),
        ValueShape::String => {
            string_literal(expr).map(|value| quote!(::std::string::String::from(#value)))
        }
        ValueShape::Option(inner) => match expr {
            Expr::Path(path) if path.path.is_ident("None") => {
                Ok(quote!(::core::option::Option::None))
            }
            Expr::Call(call) if call.args.len() == 1 => match &*call.func {
                Expr::Path(path) if path.path.is_ident("Some") => {
                    let value = render_expr(inner, &call.args[0])?;
                    Ok(quote!(::core::option::Option::Some(#value)))
                }
                _ => Err("expected `Some(..)` or `None`".into()),
            },
            _ => Err("expected `Some(..)` or `None`".into()),
        },
        ValueShape::Tuple(items) => match expr {
            Expr::Tuple(tuple) if tuple.elems.len() == items.len() => {
                let values = items
                    .iter()
                    .zip(&tuple.elems)
                    .map(|(shape, expr)| render_expr(shape, expr))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(quote!((#(#values,)*)))
            }
            _ => Err(format!("expected a tuple of {} elements", items.len())),
        },
        ValueShape::Array(inner, len) => {
            let values = elements(inner, expr)?;
            if values.len() != *len {
                return Err(format!("expected {len} elements, found {}", values.len()));
            }
            Ok(quote!([#(#values),*]))
        }
        ValueShape::Vec(inner) => {
            let values = elements(inner, expr)?;
            Ok(quote!(::std::vec![#(#values),*]))
        }
    }
}

fn strip_groups(expr: &Expr) -> &Expr {
    match expr {
        Expr::Paren(paren) => strip_groups(&paren.expr),
        Expr::Group(group) => strip_groups(&group.expr),
        other => other,
    }
}

fn literal(expr: &Expr) -> Option<&Lit> {
    match expr {
        Expr::Lit(ExprLit { lit, .. }) => Some(lit),
        _ => None,
    }
}

/// Splits a leading unary minus from the operand.
fn negation(expr: &Expr) -> (bool, &Expr) {
    match expr {
        Expr::Unary(ExprUnary {
            op: UnOp::Neg(_),
            expr,
            ..
        }) => (true, strip_groups(expr)),
        other => (false, other),
    }
}

fn elements(inner: &ValueShape, expr: &Expr) -> Result<Vec<TokenStream>, String> {
    match expr {
        Expr::Array(array) => array
            .elems
            .iter()
            .map(|elem| render_expr(inner, elem))
            .collect(),
        _ => Err("expected a list".into()),
    }
}

fn string_literal(expr: &Expr) -> Result<syn::LitStr, String> {
    match literal(expr) {
        Some(Lit::Str(value)) => Ok(syn::LitStr::new(&value.value(), Span::call_site())),
        _ => Err("expected a string".into()),
    }
}

fn render_int(name: &str, expr: &Expr) -> Result<TokenStream, String> {
    let (negative, operand) = negation(expr);
    let Some(Lit::Int(int)) = literal(operand) else {
        return Err("expected an integer".into());
    };
    let digits = int.base10_digits();
    let ty = format_ident!("{}", name);
    if negative {
        if name.starts_with('u') {
            return Err("negative value for an unsigned type".into());
        }
        if signed_min_magnitude(name).is_some_and(|min| digits.parse::<u128>() == Ok(min)) {
            return Ok(quote!(#ty::MIN));
        }
    }
    let lit = syn::LitInt::new(&format!("{digits}{name}"), Span::call_site());
    Ok(if negative { quote!(-#lit) } else { quote!(#lit) })
}

fn signed_min_magnitude(name: &str) -> Option<u128> {
    let bits = match name {
        "i8" => 8,
        "i16" => 16,
        "i32" => 32,
        "i64" | "isize" => 64,
        "i128" => 128,
        _ => return None,
    };
    Some(1u128 << (bits - 1))
}

fn render_float(name: &str, expr: &Expr) -> Result<TokenStream, String> {
    let (negative, operand) = negation(expr);
    let ty = format_ident!("{}", name);
    match operand {
        Expr::Path(path) if path.path.is_ident("NaN") => return Ok(quote!(#ty::NAN)),
        Expr::Path(path) if path.path.is_ident("inf") => {
            return Ok(if negative {
                quote!(#ty::NEG_INFINITY)
            } else {
                quote!(#ty::INFINITY)
            });
        }
        _ => {}
    }
    let digits = match literal(operand) {
        Some(Lit::Float(float)) => float.base10_digits().to_string(),
        Some(Lit::Int(int)) => format!("{}.0", int.base10_digits()),
        _ => return Err("expected a float".into()),
    };
    let lit = syn::LitFloat::new(&format!("{digits}{name}"), Span::call_site());
    Ok(if negative { quote!(-#lit) } else { quote!(#lit) })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(shape: &ValueShape, text: &str) -> String {
        render_value(shape, text)
            .expect("value renders")
            .to_string()
            .split_whitespace()
            .collect()
    }

    #[test]
    fn numbers_get_type_suffixes() {
        assert_eq!(render(&ValueShape::Int("u64".into()), "55"), "55u64");
        assert_eq!(render(&ValueShape::Int("i8".into()), "-128"), "i8::MIN");
        assert_eq!(render(&ValueShape::Int("i32".into()), "-4"), "-4i32");
        assert_eq!(render(&ValueShape::Float("f64".into()), "2.5"), "2.5f64");
        assert_eq!(render(&ValueShape::Float("f32".into()), "-inf"), "f32::NEG_INFINITY");
        assert_eq!(render(&ValueShape::Float("f64".into()), "NaN"), "f64::NAN");
    }

    #[test]
    fn containers_use_absolute_paths() {
        let shape = ValueShape::Option(Box::new(ValueShape::Vec(Box::new(ValueShape::String))));
        assert_eq!(
            render(&shape, r#"Some(["a", "b\n"])"#),
            r#"::core::option::Option::Some(::std::vec![::std::string::String::from("a"),::std::string::String::from("b\n")])"#
        );
        let tuple = ValueShape::Tuple(vec![ValueShape::Bool]);
        assert_eq!(render(&tuple, "(true,)"), "(true,)");
        let array = ValueShape::Array(Box::new(ValueShape::Char), 2);
        assert_eq!(render(&array, "['x', 'y']"), "['x','y']");
    }

    #[test]
    fn mismatched_values_are_errors() {
        assert!(render_value(&ValueShape::Int("u8".into()), "-1").is_err());
        assert!(render_value(&ValueShape::Bool, "\"true\"").is_err());
        assert!(render_value(&ValueShape::Array(Box::new(ValueShape::Bool), 3), "[true]").is_err());
    }
}
