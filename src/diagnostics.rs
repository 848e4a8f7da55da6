use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::analysis::location::SourceLocation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiagnosticId {
    #[serde(rename = "PC0001")]
    ParseFailure,
    #[serde(rename = "PC0002")]
    GenericFunction,
    #[serde(rename = "PC0003")]
    NonStaticFunction,
    #[serde(rename = "PC0004")]
    DeclaringTypeNotFound,
    #[serde(rename = "PC0005")]
    UnsupportedSignature,
    #[serde(rename = "PC0006")]
    InvalidAttribute,
    #[serde(rename = "PC0007")]
    NonLiteralArguments,
    #[serde(rename = "PC0010")]
    ExecutionFailed,
    #[serde(rename = "PC0011")]
    TimeoutSkipped,
    #[serde(rename = "PC0012")]
    TimeoutWarning,
    #[serde(rename = "PC0013")]
    TimeoutFailure,
    #[serde(rename = "PC0020")]
    PerformanceThreshold,
    #[serde(rename = "PC0040")]
    MissingResponse,
    #[serde(rename = "PC0050")]
    WorkerProcessFailed,
}

impl DiagnosticId {
    pub fn code(self) -> &'static str {
        match self {
            Self::ParseFailure => "PC0001",
            Self::GenericFunction => "PC0002",
            Self::NonStaticFunction => "PC0003",
            Self::DeclaringTypeNotFound => "PC0004",
            Self::UnsupportedSignature => "PC0005",
            Self::InvalidAttribute => "PC0006",
            Self::NonLiteralArguments => "PC0007",
            Self::ExecutionFailed => "PC0010",
            Self::TimeoutSkipped => "PC0011",
            Self::TimeoutWarning => "PC0012",
            Self::TimeoutFailure => "PC0013",
            Self::PerformanceThreshold => "PC0020",
            Self::MissingResponse => "PC0040",
            Self::WorkerProcessFailed => "PC0050",
        }
    }

    pub fn severity(self) -> Severity {
        match self {
            Self::NonLiteralArguments | Self::TimeoutSkipped => Severity::Info,
            Self::ExecutionFailed
            | Self::TimeoutFailure
            | Self::MissingResponse
            | Self::WorkerProcessFailed => Severity::Error,
            _ => Severity::Warning,
        }
    }

    /// Critical diagnostics fail the build even when every stage completed.
    pub fn is_critical(self) -> bool {
        matches!(self, Self::TimeoutFailure | Self::WorkerProcessFailed)
    }

    fn template(self) -> &'static str {
        match self {
            Self::ParseFailure => "failed to parse {0}: {1}",
            Self::GenericFunction => "`{0}` is generic and cannot be precomputed",
            Self::NonStaticFunction => "`{0}` takes `self` and cannot be precomputed",
            Self::DeclaringTypeNotFound => "declaring type of `{0}` not found: {1}",
            Self::UnsupportedSignature => "`{0}` has an unsupported signature: {1}",
            Self::InvalidAttribute => "invalid #[precompute] arguments on `{0}`: {1}",
            Self::NonLiteralArguments => {
                "call to `{0}` has a non-literal argument at position {1}; it runs normally"
            }
            Self::ExecutionFailed => "`{0}` failed at build time: {1}",
            Self::TimeoutSkipped => "`{0}` timed out after {1} ms; the call runs normally",
            Self::TimeoutWarning => "`{0}` timed out after {1} ms; the call runs normally",
            Self::TimeoutFailure => "`{0}` timed out after {1} ms",
            Self::PerformanceThreshold => "`{0}` took {1} ms, above the {2} ms threshold",
            Self::MissingResponse => "no worker response for `{0}`; its call sites are left unchanged",
            Self::WorkerProcessFailed => "worker process failed: {0}",
        }
    }
}

impl fmt::Display for DiagnosticId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub id: DiagnosticId,
    pub message_args: Vec<String>,
    pub location: Option<SourceLocation>,
}

impl Diagnostic {
    pub fn new(
        id: DiagnosticId,
        location: Option<SourceLocation>,
        message_args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            id,
            message_args: message_args.into_iter().map(Into::into).collect(),
            location,
        }
    }

    pub fn severity(&self) -> Severity {
        self.id.severity()
    }

    pub fn is_critical(&self) -> bool {
        self.id.is_critical()
    }

    pub fn message(&self) -> String {
        let mut message = self.id.template().to_string();
        for (idx, arg) in self.message_args.iter().enumerate() {
            message = message.replace(&format!("{{{idx}}}"), arg);
        }
        message
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(location) = &self.location {
            write!(f, "{location}: ")?;
        }
        write!(f, "{} {}: {}", self.severity(), self.id, self.message())
    }
}

/// On-disk form of a diagnostic in `precomp-diagnostics.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticRecord {
    pub id: DiagnosticId,
    pub severity: Severity,
    pub message_args: Vec<String>,
    pub file_path: Option<String>,
    pub start_position: usize,
    pub length: usize,
    pub line: usize,
    pub column: usize,
}

impl From<&Diagnostic> for DiagnosticRecord {
    fn from(diagnostic: &Diagnostic) -> Self {
        let location = diagnostic.location.as_ref();
        Self {
            id: diagnostic.id,
            severity: diagnostic.severity(),
            message_args: diagnostic.message_args.clone(),
            file_path: location.map(|loc| loc.file.clone()),
            start_position: location.map_or(0, |loc| loc.span.start()),
            length: location.map_or(0, |loc| loc.span.len()),
            line: location.map_or(0, |loc| loc.line),
            column: location.map_or(0, |loc| loc.column),
        }
    }
}

/// Diagnostics accumulated over one build.
#[derive(Debug, Default, Clone)]
pub struct DiagnosticBag {
    items: Vec<Diagnostic>,
}

impl DiagnosticBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.items.push(diagnostic);
    }

    pub fn report(
        &mut self,
        id: DiagnosticId,
        location: Option<SourceLocation>,
        message_args: impl IntoIterator<Item = impl Into<String>>,
    ) {
        self.push(Diagnostic::new(id, location, message_args));
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter()
    }

    pub fn as_slice(&self) -> &[Diagnostic] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn has_critical(&self) -> bool {
        self.items.iter().any(Diagnostic::is_critical)
    }

    pub fn count(&self, id: DiagnosticId) -> usize {
        self.items.iter().filter(|diag| diag.id == id).count()
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.items
    }

    pub fn write_artifact(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let records = self
            .items
            .iter()
            .map(DiagnosticRecord::from)
            .collect::<Vec<_>>();
        let json =
            serde_json::to_string_pretty(&records).context("failed to serialise diagnostics")?;
        fs::write(path, json)
            .with_context(|| format!("failed to write diagnostics to {}", path.display()))
    }

    pub fn read_artifact(path: &Path) -> Result<Vec<DiagnosticRecord>> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read diagnostics from {}", path.display()))?;
        serde_json::from_str(&text).context("failed to deserialise diagnostics")
    }
}

impl Extend<Diagnostic> for DiagnosticBag {
    fn extend<T: IntoIterator<Item = Diagnostic>>(&mut self, iter: T) {
        self.items.extend(iter);
    }
}
