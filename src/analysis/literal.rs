use syn::{Expr, ExprLit, ExprUnary, Lit, UnOp};

use crate::model::{LiteralKind, LiteralValue};

/// Canonical literal for `expr`, or `None` when the argument is not a literal.
///
/// Integer and float literals are normalised to base-10 digits with their
/// suffix, strings and chars are re-escaped, and a leading unary minus is
/// accepted on numeric literals.
pub fn extract_literal(expr: &Expr) -> Option<LiteralValue> {
    match expr {
        Expr::Lit(ExprLit { lit, attrs }) if attrs.is_empty() => literal(lit),
        Expr::Paren(paren) => extract_literal(&paren.expr),
        Expr::Group(group) => extract_literal(&group.expr),
        Expr::Unary(ExprUnary {
            op: UnOp::Neg(_),
            expr,
            ..
        }) => {
            let inner = extract_literal(expr)?;
            match inner.kind {
                LiteralKind::Int | LiteralKind::Float if !inner.text.starts_with('-') => {
                    Some(LiteralValue::new(inner.kind, format!("-{}", inner.text)))
                }
                _ => None,
            }
        }
        _ => None,
    }
}

/// Extracts every argument, or reports the index of the first non-literal.
pub fn extract_arguments<'a>(
    args: impl IntoIterator<Item = &'a Expr>,
) -> Result<Vec<LiteralValue>, usize> {
    args.into_iter()
        .enumerate()
        .map(|(idx, arg)| extract_literal(arg).ok_or(idx))
        .collect()
}

fn literal(lit: &Lit) -> Option<LiteralValue> {
    match lit {
        Lit::Int(int) => Some(LiteralValue::new(
            LiteralKind::Int,
            format!("{}{}", int.base10_digits(), int.suffix()),
        )),
        Lit::Float(float) => {
            let digits = float.base10_digits();
            let text = if digits.contains(['.', 'e', 'E']) || !float.suffix().is_empty() {
                format!("{digits}{}", float.suffix())
            } else {
                format!("{digits}.0")
            };
            Some(LiteralValue::new(LiteralKind::Float, text))
        }
        Lit::Bool(value) => Some(LiteralValue::new(LiteralKind::Bool, value.value.to_string())),
        Lit::Char(value) => Some(LiteralValue::new(
            LiteralKind::Char,
            format!("{:?}", value.value()),
        )),
        Lit::Str(value) if value.suffix().is_empty() => Some(LiteralValue::new(
            LiteralKind::Str,
            format!("{:?}", value.value()),
        )),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit(text: &str) -> Option<LiteralValue> {
        let expr: Expr = syn::parse_str(text).expect("expression should parse");
        extract_literal(&expr)
    }

    #[test]
    fn integers_are_normalised_to_base_ten() {
        assert_eq!(lit("0x0A").map(|l| l.text), Some("10".into()));
        assert_eq!(lit("1_000u32").map(|l| l.text), Some("1000u32".into()));
        assert_eq!(lit("-7").map(|l| l.text), Some("-7".into()));
    }

    #[test]
    fn strings_and_chars_are_re_escaped() {
        assert_eq!(lit("r\"a\\b\"").map(|l| l.text), Some("\"a\\\\b\"".into()));
        assert_eq!(lit("'\\x41'").map(|l| l.text), Some("'A'".into()));
    }

    #[test]
    fn non_literals_are_rejected() {
        assert!(lit("n").is_none());
        assert!(lit("1 + 2").is_none());
        assert!(lit("-true").is_none());
        assert!(lit("--3").is_none());
        assert!(lit("b\"bytes\"").is_none());
    }

    #[test]
    fn first_non_literal_argument_is_reported() {
        let call: syn::ExprCall = syn::parse_str("f(1, x, 3)").expect("call should parse");
        assert_eq!(extract_arguments(&call.args), Err(1));
        let call: syn::ExprCall = syn::parse_str("f(1, \"x\")").expect("call should parse");
        assert_eq!(extract_arguments(&call.args).map(|args| args.len()), Ok(2));
    }
}
