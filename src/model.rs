use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::analysis::location::SourceLocation;
use crate::analysis::shape::ValueShape;
use crate::hash::short_hash;

/// How results of an annotated function are cached between builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStrategy {
    /// Always execute, never store.
    Never,
    /// Store in memory for the current build only.
    PerBuild,
    /// Store and persist across builds.
    #[default]
    Persistent,
}

impl CacheStrategy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "never" | "none" => Some(Self::Never),
            "per_build" | "perbuild" | "per-build" => Some(Self::PerBuild),
            "persistent" => Some(Self::Persistent),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Never => "never",
            Self::PerBuild => "per_build",
            Self::Persistent => "persistent",
        }
    }

    pub fn uses_cache(self) -> bool {
        !matches!(self, Self::Never)
    }

    pub fn is_persistent(self) -> bool {
        matches!(self, Self::Persistent)
    }
}

impl fmt::Display for CacheStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Per-function configuration taken from the attribute, with build-wide defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionConfig {
    pub cache: CacheStrategy,
    pub timeout_ms: u64,
    pub warn_threshold_ms: u64,
    pub suppress_warnings: bool,
}

/// Parameter types that can receive a literal argument.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ParamType {
    Int(String),
    Float(String),
    Bool,
    Char,
    Str,
    String,
}

impl ParamType {
    /// Canonical type text sent to the worker.
    pub fn type_name(&self) -> String {
        match self {
            Self::Int(name) | Self::Float(name) => name.clone(),
            Self::Bool => "bool".into(),
            Self::Char => "char".into(),
            Self::Str => "&str".into(),
            Self::String => "String".into(),
        }
    }

    pub fn accepts(&self, literal: LiteralKind) -> bool {
        match self {
            Self::Int(_) => literal == LiteralKind::Int,
            Self::Float(_) => literal == LiteralKind::Float,
            Self::Bool => literal == LiteralKind::Bool,
            Self::Char => literal == LiteralKind::Char,
            Self::Str | Self::String => literal == LiteralKind::Str,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    pub ty: ParamType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiteralKind {
    Int,
    Float,
    Bool,
    Char,
    Str,
}

/// A literal argument in canonical Rust source form (`10u8`, `-3`, `"a\n"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LiteralValue {
    pub kind: LiteralKind,
    pub text: String,
}

impl LiteralValue {
    pub fn new(kind: LiteralKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }
}

impl fmt::Display for LiteralValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// An annotated associated function found in the current build.
#[derive(Debug, Clone)]
pub struct FunctionDescriptor {
    /// Module path of the declaring type, without the `crate` prefix.
    pub namespace: String,
    pub type_name: String,
    /// Path of the declaring type relative to its source file (`inner::Table`).
    pub type_path: String,
    pub name: String,
    pub parameters: Vec<Parameter>,
    pub return_shape: ValueShape,
    pub is_async: bool,
    pub config: FunctionConfig,
    pub content_hash: String,
    pub declaring_source: Arc<str>,
    pub location: SourceLocation,
}

impl FunctionDescriptor {
    pub fn qualified_type(&self) -> String {
        if self.namespace.is_empty() {
            self.type_name.clone()
        } else {
            format!("{}::{}", self.namespace, self.type_name)
        }
    }

    pub fn qualified_name(&self) -> String {
        format!("{}::{}", self.qualified_type(), self.name)
    }

    /// Comma separated parameter types.
    pub fn signature(&self) -> String {
        self.parameters
            .iter()
            .map(|param| param.ty.type_name())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Declared return type as compared by the cache.
    pub fn return_type(&self) -> String {
        self.return_shape.rust_type()
    }

    pub fn signature_hash(&self) -> String {
        short_hash(&self.signature(), 8)
    }
}

/// A call expression whose target is an annotated function and whose
/// arguments are all literals.
#[derive(Debug, Clone)]
pub struct InvocationDescriptor {
    pub id: String,
    pub function: Arc<FunctionDescriptor>,
    pub arguments: Vec<LiteralValue>,
    pub location: SourceLocation,
}

impl InvocationDescriptor {
    pub fn new(
        function: Arc<FunctionDescriptor>,
        arguments: Vec<LiteralValue>,
        location: SourceLocation,
    ) -> Self {
        let id = short_hash(&location.token(), 16);
        Self {
            id,
            function,
            arguments,
            location,
        }
    }

    /// Source-like rendering of the call, used in docs and messages.
    pub fn call_text(&self) -> String {
        let args = self
            .arguments
            .iter()
            .map(|arg| arg.text.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "{}::{}({args})",
            self.function.type_name, self.function.name
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_parsing_is_case_insensitive() {
        assert_eq!(CacheStrategy::parse("Persistent"), Some(CacheStrategy::Persistent));
        assert_eq!(CacheStrategy::parse("per-build"), Some(CacheStrategy::PerBuild));
        assert_eq!(CacheStrategy::parse("NEVER"), Some(CacheStrategy::Never));
        assert_eq!(CacheStrategy::parse("sometimes"), None);
    }

    #[test]
    fn parameters_only_accept_matching_literals() {
        let ty = ParamType::Float("f64".into());
        assert!(ty.accepts(LiteralKind::Float));
        assert!(!ty.accepts(LiteralKind::Int));
        assert!(ParamType::String.accepts(LiteralKind::Str));
        assert!(!ParamType::Int("u8".into()).accepts(LiteralKind::Float));
    }
}
