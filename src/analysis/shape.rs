use proc_macro2::TokenStream;
use quote::{ToTokens, format_ident, quote};
use syn::{GenericArgument, PathArguments, Type};

pub const INTEGER_TYPES: [&str; 12] = [
    "i8", "i16", "i32", "i64", "i128", "isize", "u8", "u16", "u32", "u64", "u128", "usize",
];
pub const FLOAT_TYPES: [&str; 2] = ["f32", "f64"];

/// Return types whose `Debug` output can be turned back into a Rust expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueShape {
    Unit,
    Bool,
    Char,
    Int(String),
    Float(String),
    Str,
    String,
    Option(Box<ValueShape>),
    Tuple(Vec<ValueShape>),
    Array(Box<ValueShape>, usize),
    Vec(Box<ValueShape>),
}

impl ValueShape {
    pub fn from_type(ty: &Type) -> Option<Self> {
        match ty {
            Type::Paren(paren) => Self::from_type(&paren.elem),
            Type::Group(group) => Self::from_type(&group.elem),
            Type::Tuple(tuple) if tuple.elems.is_empty() => Some(Self::Unit),
            Type::Tuple(tuple) => tuple
                .elems
                .iter()
                .map(Self::from_type)
                .collect::<Option<Vec<_>>>()
                .map(Self::Tuple),
            Type::Array(array) => {
                let len = match &array.len {
                    syn::Expr::Lit(syn::ExprLit {
                        lit: syn::Lit::Int(int),
                        ..
                    }) => int.base10_parse::<usize>().ok()?,
                    _ => return None,
                };
                Some(Self::Array(Box::new(Self::from_type(&array.elem)?), len))
            }
            Type::Reference(reference) if reference.mutability.is_none() => {
                let lifetime_ok = reference
                    .lifetime
                    .as_ref()
                    .is_none_or(|lifetime| lifetime.ident == "static");
                match &*reference.elem {
                    Type::Path(path) if lifetime_ok && path.qself.is_none() => {
                        path.path.is_ident("str").then_some(Self::Str)
                    }
                    _ => None,
                }
            }
            Type::Path(path) if path.qself.is_none() => Self::from_path(&path.path),
            _ => None,
        }
    }

    fn from_path(path: &syn::Path) -> Option<Self> {
        let last = path.segments.last()?;
        let name = last.ident.to_string();
        let prefix = path
            .segments
            .iter()
            .take(path.segments.len() - 1)
            .map(|segment| segment.ident.to_string())
            .collect::<Vec<_>>();
        let prefix_is = |allowed: &[&[&str]]| prefix_matches(&prefix, allowed);

        match &last.arguments {
            PathArguments::None => {
                if !prefix.is_empty() && !prefix_is(&[&["std", "string"], &["alloc", "string"]]) {
                    return None;
                }
                match name.as_str() {
                    "bool" if prefix.is_empty() => Some(Self::Bool),
                    "char" if prefix.is_empty() => Some(Self::Char),
                    "String" => Some(Self::String),
                    other if prefix.is_empty() && INTEGER_TYPES.contains(&other) => {
                        Some(Self::Int(name))
                    }
                    other if prefix.is_empty() && FLOAT_TYPES.contains(&other) => {
                        Some(Self::Float(name))
                    }
                    _ => None,
                }
            }
            PathArguments::AngleBracketed(args) => {
                let mut types = args.args.iter().map(|arg| match arg {
                    GenericArgument::Type(ty) => Some(ty),
                    _ => None,
                });
                let inner = Self::from_type(types.next()??)?;
                if types.next().is_some() {
                    return None;
                }
                match name.as_str() {
                    "Option"
                        if prefix.is_empty()
                            || prefix_is(&[&["std", "option"], &["core", "option"]]) =>
                    {
                        Some(Self::Option(Box::new(inner)))
                    }
                    "Vec" if prefix.is_empty() || prefix_is(&[&["std", "vec"], &["alloc", "vec"]]) => {
                        Some(Self::Vec(Box::new(inner)))
                    }
                    _ => None,
                }
            }
            PathArguments::Parenthesized(_) => None,
        }
    }

    /// Canonical type text, used for cache comparison and reports.
    pub fn rust_type(&self) -> String {
        match self {
            Self::Unit => "()".into(),
            Self::Bool => "bool".into(),
            Self::Char => "char".into(),
            Self::Int(name) | Self::Float(name) => name.clone(),
            Self::Str => "&'static str".into(),
            Self::String => "String".into(),
            Self::Option(inner) => format!("Option<{}>", inner.rust_type()),
            Self::Tuple(items) if items.len() == 1 => format!("({},)", items[0].rust_type()),
            Self::Tuple(items) => format!(
                "({})",
                items
                    .iter()
                    .map(Self::rust_type)
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            Self::Array(inner, len) => format!("[{}; {len}]", inner.rust_type()),
            Self::Vec(inner) => format!("Vec<{}>", inner.rust_type()),
        }
    }

    /// Fully qualified type tokens for generated code.
    pub fn type_tokens(&self) -> TokenStream {
        match self {
            Self::Unit => quote!(()),
            Self::Bool => quote!(bool),
            Self::Char => quote!(char),
            Self::Int(name) | Self::Float(name) => format_ident!("{}", name).into_token_stream(),
            Self::Str => quote!(&'static str),
            Self::String => quote!(::std::string::String),
            Self::Option(inner) => {
                let inner = inner.type_tokens();
                quote!(::core::option::Option<#inner>)
            }
            Self::Tuple(items) => {
                let items = items.iter().map(Self::type_tokens);
                quote!((#(#items,)*))
            }
            Self::Array(inner, len) => {
                let inner = inner.type_tokens();
                let len = proc_macro2::Literal::usize_unsuffixed(*len);
                quote!([#inner; #len])
            }
            Self::Vec(inner) => {
                let inner = inner.type_tokens();
                quote!(::std::vec::Vec<#inner>)
            }
        }
    }
}

fn prefix_matches(prefix: &[String], allowed: &[&[&str]]) -> bool {
    allowed
        .iter()
        .any(|candidate| prefix.iter().map(String::as_str).eq(candidate.iter().copied()))
}
