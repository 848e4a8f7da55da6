use std::collections::HashSet;
use std::sync::Arc;

use quote::ToTokens;
use syn::visit::{self, Visit};
use syn::{Expr, ExprCall, ImplItem, ImplItemFn, Item, ItemImpl, PathArguments, ReturnType};

use super::attribute::{find_precompute, parse_config};
use super::literal::extract_arguments;
use super::location::{LineIndex, SourceLocation};
use super::sanitize::{declaring_source, is_cfg_test};
use super::shape::ValueShape;
use crate::diagnostics::{Diagnostic, DiagnosticId};
use crate::hash::sha1_hex;
use crate::model::{FunctionConfig, FunctionDescriptor, LiteralValue, ParamType, Parameter};

/// What a call path names before it is matched against declarations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallTarget {
    /// Fully resolved module path (`crate::`, `self::`, `super::` or `Self::`).
    Absolute {
        namespace: String,
        type_name: String,
        method: String,
    },
    /// A path that may start from an import (`Table::build`, `geometry::Table::build`).
    Relative {
        prefix: Vec<String>,
        type_name: String,
        method: String,
    },
}

impl CallTarget {
    pub fn type_name(&self) -> &str {
        match self {
            Self::Absolute { type_name, .. } | Self::Relative { type_name, .. } => type_name,
        }
    }

    pub fn method(&self) -> &str {
        match self {
            Self::Absolute { method, .. } | Self::Relative { method, .. } => method,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CallSite {
    pub target: CallTarget,
    /// Namespace of the module that contains the call.
    pub caller_namespace: String,
    /// Canonical literal arguments, or the index of the first non-literal.
    pub arguments: Result<Vec<LiteralValue>, usize>,
    pub location: SourceLocation,
}

#[derive(Debug, Default)]
pub struct FileScan {
    pub functions: Vec<FunctionDescriptor>,
    pub calls: Vec<CallSite>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Parses one file and collects annotated declarations and candidate call sites.
///
/// Parse failures produce a single `PC0001` diagnostic and nothing else.
pub fn scan_source(
    display_path: &str,
    namespace: &[String],
    source: &str,
    defaults: &FunctionConfig,
) -> FileScan {
    let index = LineIndex::new(source);
    let file = match syn::parse_file(source) {
        Ok(file) => file,
        Err(err) => {
            let span = err.span();
            let location = SourceLocation::from_span(display_path, source, &index, span, span);
            return FileScan {
                diagnostics: vec![Diagnostic::new(
                    DiagnosticId::ParseFailure,
                    Some(location),
                    [display_path.to_string(), err.to_string()],
                )],
                ..FileScan::default()
            };
        }
    };

    let mut local_types = HashSet::new();
    collect_types(&file.items, &mut Vec::new(), &mut local_types);

    let mut scanner = Scanner {
        display_path,
        namespace,
        source,
        defaults,
        index,
        file: &file,
        local_types,
        modules: Vec::new(),
        impl_type: None,
        declaring_source: None,
        out: FileScan::default(),
    };
    scanner.visit_file(&file);
    scanner.out.calls.sort_by_key(|call| call.location.span.start());
    scanner.out
}

fn collect_types(items: &[Item], modules: &mut Vec<String>, out: &mut HashSet<Vec<String>>) {
    for item in items {
        let ident = match item {
            Item::Struct(item) if !item.attrs.iter().any(is_cfg_test) => &item.ident,
            Item::Enum(item) if !item.attrs.iter().any(is_cfg_test) => &item.ident,
            Item::Union(item) if !item.attrs.iter().any(is_cfg_test) => &item.ident,
            Item::Mod(module) if !module.attrs.iter().any(is_cfg_test) => {
                if let Some((_, content)) = &module.content {
                    modules.push(module.ident.to_string());
                    collect_types(content, modules, out);
                    modules.pop();
                }
                continue;
            }
            _ => continue,
        };
        let mut path = modules.clone();
        path.push(ident.to_string());
        out.insert(path);
    }
}

struct Scanner<'a> {
    display_path: &'a str,
    namespace: &'a [String],
    source: &'a str,
    defaults: &'a FunctionConfig,
    index: LineIndex,
    file: &'a syn::File,
    local_types: HashSet<Vec<String>>,
    /// Inline modules enclosing the current item.
    modules: Vec<String>,
    /// In-file path of the type of the enclosing `impl`, used for `Self::`.
    impl_type: Option<Vec<String>>,
    declaring_source: Option<Arc<str>>,
    out: FileScan,
}

impl Scanner<'_> {
    fn location(&self, start: proc_macro2::Span, end: proc_macro2::Span) -> SourceLocation {
        SourceLocation::from_span(self.display_path, self.source, &self.index, start, end)
    }

    fn current_module(&self) -> Vec<String> {
        let mut path = self.namespace.to_vec();
        path.extend(self.modules.iter().cloned());
        path
    }

    fn declaring_source(&mut self) -> Arc<str> {
        if let Some(source) = &self.declaring_source {
            return Arc::clone(source);
        }
        let source: Arc<str> = Arc::from(declaring_source(self.file));
        self.declaring_source = Some(Arc::clone(&source));
        source
    }

    fn reject(&mut self, id: DiagnosticId, location: SourceLocation, args: Vec<String>) {
        self.out
            .diagnostics
            .push(Diagnostic::new(id, Some(location), args));
    }

    /// In-file path of an impl's self type, when it names a type defined in this file.
    fn local_self_type(&self, item: &ItemImpl) -> Option<Vec<String>> {
        let syn::Type::Path(path) = &*item.self_ty else {
            return None;
        };
        if path.qself.is_some() || path.path.leading_colon.is_some() {
            return None;
        }
        let mut resolved = self.modules.clone();
        for segment in &path.path.segments {
            match segment.ident.to_string().as_str() {
                "self" => {}
                "super" => {
                    resolved.pop()?;
                }
                "crate" => return None,
                ident => resolved.push(ident.to_string()),
            }
        }
        self.local_types.contains(&resolved).then_some(resolved)
    }

    fn declare(&mut self, item: &ItemImpl, method: &ImplItemFn, attr: &syn::Attribute) {
        let sig = &method.sig;
        let name = sig.ident.to_string();
        let location = self.location(sig.ident.span(), sig.ident.span());

        let config = match parse_config(attr, self.defaults) {
            Ok(config) => config,
            Err(err) => {
                self.reject(DiagnosticId::InvalidAttribute, location, vec![name, err.to_string()]);
                return;
            }
        };

        let generic_self = matches!(
            &*item.self_ty,
            syn::Type::Path(path) if path.path.segments.iter().any(|segment| !segment.arguments.is_none())
        );
        if !item.generics.params.is_empty() || !sig.generics.params.is_empty() || generic_self {
            self.reject(DiagnosticId::GenericFunction, location, vec![name]);
            return;
        }
        if sig.receiver().is_some() {
            self.reject(DiagnosticId::NonStaticFunction, location, vec![name]);
            return;
        }
        if item.trait_.is_some() {
            self.reject(
                DiagnosticId::DeclaringTypeNotFound,
                location,
                vec![name, "trait implementations are not supported".into()],
            );
            return;
        }
        let Some(type_path) = self.local_self_type(item) else {
            let self_ty = item.self_ty.to_token_stream().to_string();
            self.reject(
                DiagnosticId::DeclaringTypeNotFound,
                location,
                vec![name, format!("`{self_ty}` is not a struct or enum defined in this file")],
            );
            return;
        };

        if let Err(reason) = check_signature(sig) {
            self.reject(DiagnosticId::UnsupportedSignature, location, vec![name, reason]);
            return;
        }
        let parameters = match parameters(sig) {
            Ok(parameters) => parameters,
            Err(reason) => {
                self.reject(DiagnosticId::UnsupportedSignature, location, vec![name, reason]);
                return;
            }
        };
        let return_shape = match &sig.output {
            ReturnType::Default => Some(ValueShape::Unit),
            ReturnType::Type(_, ty) => ValueShape::from_type(ty),
        };
        let Some(return_shape) = return_shape else {
            let ty = sig.output.to_token_stream().to_string();
            self.reject(
                DiagnosticId::UnsupportedSignature,
                location,
                vec![name, format!("return type `{ty}` cannot be rendered as a literal")],
            );
            return;
        };

        let mut namespace = self.namespace.to_vec();
        namespace.extend(type_path[..type_path.len() - 1].iter().cloned());
        let type_name = type_path[type_path.len() - 1].clone();

        let descriptor = FunctionDescriptor {
            namespace: namespace.join("::"),
            type_name,
            type_path: type_path.join("::"),
            name,
            parameters,
            return_shape,
            is_async: sig.asyncness.is_some(),
            config,
            content_hash: sha1_hex(&method.block.to_token_stream().to_string()),
            declaring_source: self.declaring_source(),
            location,
        };
        self.out.functions.push(descriptor);
    }

    fn call_target(&self, path: &syn::Path) -> Option<CallTarget> {
        if path.leading_colon.is_some() || path.segments.len() < 2 {
            return None;
        }
        if path
            .segments
            .iter()
            .any(|segment| !matches!(segment.arguments, PathArguments::None))
        {
            return None;
        }
        let segments = path
            .segments
            .iter()
            .map(|segment| segment.ident.to_string())
            .collect::<Vec<_>>();
        let (method, rest) = segments.split_last()?;
        let (type_name, prefix) = rest.split_last()?;

        if type_name == "Self" && prefix.is_empty() {
            let impl_type = self.impl_type.as_ref()?;
            let (type_name, modules) = impl_type.split_last()?;
            let mut namespace = self.namespace.to_vec();
            namespace.extend(modules.iter().cloned());
            return Some(CallTarget::Absolute {
                namespace: namespace.join("::"),
                type_name: type_name.clone(),
                method: method.clone(),
            });
        }

        let absolute = |namespace: Vec<String>| CallTarget::Absolute {
            namespace: namespace.join("::"),
            type_name: type_name.clone(),
            method: method.clone(),
        };
        match prefix.first().map(String::as_str) {
            Some("crate") => Some(absolute(prefix[1..].to_vec())),
            Some("self") => {
                let mut namespace = self.current_module();
                namespace.extend(prefix[1..].iter().cloned());
                Some(absolute(namespace))
            }
            Some("super") => {
                let mut namespace = self.current_module();
                let supers = prefix.iter().take_while(|segment| *segment == "super").count();
                for _ in 0..supers {
                    namespace.pop()?;
                }
                namespace.extend(prefix[supers..].iter().cloned());
                Some(absolute(namespace))
            }
            _ => Some(CallTarget::Relative {
                prefix: prefix.to_vec(),
                type_name: type_name.clone(),
                method: method.clone(),
            }),
        }
    }
}

impl<'ast> Visit<'ast> for Scanner<'_> {
    fn visit_item_mod(&mut self, node: &'ast syn::ItemMod) {
        if node.attrs.iter().any(is_cfg_test) {
            return;
        }
        self.modules.push(node.ident.to_string());
        visit::visit_item_mod(self, node);
        self.modules.pop();
    }

    fn visit_item_fn(&mut self, node: &'ast syn::ItemFn) {
        if node.attrs.iter().any(is_cfg_test) {
            return;
        }
        if find_precompute(&node.attrs).is_some() {
            let location = self.location(node.sig.ident.span(), node.sig.ident.span());
            self.reject(
                DiagnosticId::DeclaringTypeNotFound,
                location,
                vec![
                    node.sig.ident.to_string(),
                    "free functions have no declaring type".into(),
                ],
            );
            return;
        }
        visit::visit_item_fn(self, node);
    }

    fn visit_trait_item_fn(&mut self, node: &'ast syn::TraitItemFn) {
        if find_precompute(&node.attrs).is_some() {
            let location = self.location(node.sig.ident.span(), node.sig.ident.span());
            self.reject(
                DiagnosticId::DeclaringTypeNotFound,
                location,
                vec![
                    node.sig.ident.to_string(),
                    "trait methods are not supported".into(),
                ],
            );
            return;
        }
        visit::visit_trait_item_fn(self, node);
    }

    fn visit_item_impl(&mut self, node: &'ast ItemImpl) {
        if node.attrs.iter().any(is_cfg_test) {
            return;
        }
        let impl_type = self.local_self_type(node);
        let previous = std::mem::replace(&mut self.impl_type, impl_type);
        for item in &node.items {
            match item {
                ImplItem::Fn(method) => {
                    if let Some(attr) = find_precompute(&method.attrs) {
                        self.declare(node, method, attr);
                    } else if !method.attrs.iter().any(is_cfg_test) {
                        self.visit_impl_item_fn(method);
                    }
                }
                other => self.visit_impl_item(other),
            }
        }
        self.impl_type = previous;
    }

    fn visit_expr_call(&mut self, node: &'ast ExprCall) {
        let target = match &*node.func {
            Expr::Path(path) if path.qself.is_none() => self
                .call_target(&path.path)
                .map(|target| (target, &path.path)),
            _ => None,
        };
        if let Some((target, path)) = target {
            let start = path
                .segments
                .first()
                .map_or_else(proc_macro2::Span::call_site, |segment| segment.ident.span());
            let location = self.location(start, node.paren_token.span.close());
            self.out.calls.push(CallSite {
                target,
                caller_namespace: self.current_module().join("::"),
                arguments: extract_arguments(&node.args),
                location,
            });
        }
        visit::visit_expr_call(self, node);
    }
}

fn check_signature(sig: &syn::Signature) -> Result<(), String> {
    if sig.unsafety.is_some() {
        return Err("unsafe functions cannot be executed at build time".into());
    }
    if sig.abi.is_some() || sig.variadic.is_some() {
        return Err("foreign ABIs are not supported".into());
    }
    Ok(())
}

fn parameters(sig: &syn::Signature) -> Result<Vec<Parameter>, String> {
    sig.inputs
        .iter()
        .map(|input| {
            let syn::FnArg::Typed(typed) = input else {
                return Err("unexpected receiver".to_string());
            };
            let name = match &*typed.pat {
                syn::Pat::Ident(ident) => ident.ident.to_string(),
                syn::Pat::Wild(_) => "_".to_string(),
                other => {
                    return Err(format!(
                        "parameter pattern `{}` is not supported",
                        other.to_token_stream()
                    ));
                }
            };
            let ty = param_type(&typed.ty).ok_or_else(|| {
                format!(
                    "parameter `{name}: {}` cannot receive a literal",
                    typed.ty.to_token_stream()
                )
            })?;
            Ok(Parameter { name, ty })
        })
        .collect()
}

fn param_type(ty: &syn::Type) -> Option<ParamType> {
    match ValueShape::from_type(ty)? {
        ValueShape::Int(name) => Some(ParamType::Int(name)),
        ValueShape::Float(name) => Some(ParamType::Float(name)),
        ValueShape::Bool => Some(ParamType::Bool),
        ValueShape::Char => Some(ParamType::Char),
        ValueShape::Str => Some(ParamType::Str),
        ValueShape::String => Some(ParamType::String),
        _ => None,
    }
}
