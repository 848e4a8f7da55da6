//! Finds `#[precompute]` declarations and the literal-argument calls that target them.
//!
//! Files are scanned independently on the rayon pool; every per-file syntax
//! tree stays inside its worker closure and only owned descriptors cross back.
//! Calls are matched to declarations afterwards, once every file is known.

pub mod attribute;
pub mod literal;
pub mod location;
pub mod sanitize;
pub mod scanner;
pub mod shape;

use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::diagnostics::{Diagnostic, DiagnosticId};
use crate::model::{FunctionConfig, FunctionDescriptor, InvocationDescriptor};
use crate::pipeline::CancellationToken;
use scanner::{CallSite, CallTarget, FileScan, scan_source};

#[derive(Debug, Clone)]
pub struct AnalyzedFile {
    pub path: PathBuf,
    /// Project-relative, `/`-separated path.
    pub display_path: String,
    pub source: Arc<str>,
}

#[derive(Debug, Default)]
pub struct AnalysisResult {
    pub functions: Vec<Arc<FunctionDescriptor>>,
    pub invocations: Vec<InvocationDescriptor>,
    pub diagnostics: Vec<Diagnostic>,
    pub files: Vec<AnalyzedFile>,
}

impl AnalysisResult {
    pub fn file(&self, display_path: &str) -> Option<&AnalyzedFile> {
        self.files
            .iter()
            .find(|file| file.display_path == display_path)
    }
}

pub struct Analyzer {
    project_dir: PathBuf,
    defaults: FunctionConfig,
}

impl Analyzer {
    pub fn new(project_dir: impl Into<PathBuf>, defaults: FunctionConfig) -> Self {
        Self {
            project_dir: project_dir.into(),
            defaults,
        }
    }

    /// Reads and analyses `paths` in parallel.
    pub fn analyze(&self, paths: &[PathBuf], cancel: &CancellationToken) -> Result<AnalysisResult> {
        let progress = ProgressBar::new(paths.len() as u64);
        let style = ProgressStyle::with_template("analysing [{elapsed_precise}] {wide_bar} {pos}/{len}")
            .map(|style| style.progress_chars("=> "))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        progress.set_style(style);

        let scanned = paths
            .par_iter()
            .map(|path| -> Result<(AnalyzedFile, FileScan)> {
                cancel.check()?;
                let source = fs::read_to_string(path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                let display_path = display_path(&self.project_dir, path);
                let scan = scan_source(
                    &display_path,
                    &module_namespace(&display_path),
                    &source,
                    &self.defaults,
                );
                progress.inc(1);
                Ok((
                    AnalyzedFile {
                        path: path.clone(),
                        display_path,
                        source: Arc::from(source),
                    },
                    scan,
                ))
            })
            .collect::<Result<Vec<_>>>()?;
        progress.finish_and_clear();

        Ok(resolve_calls(scanned))
    }

    /// Analyses in-memory sources given as `(display path, source)` pairs.
    pub fn analyze_sources<S: AsRef<str> + Sync>(&self, sources: &[(S, S)]) -> AnalysisResult {
        let scanned = sources
            .par_iter()
            .map(|(display_path, source)| {
                let display_path = display_path.as_ref().to_string();
                let scan = scan_source(
                    &display_path,
                    &module_namespace(&display_path),
                    source.as_ref(),
                    &self.defaults,
                );
                (
                    AnalyzedFile {
                        path: self.project_dir.join(&display_path),
                        display_path,
                        source: Arc::from(source.as_ref()),
                    },
                    scan,
                )
            })
            .collect::<Vec<_>>();
        resolve_calls(scanned)
    }
}

fn resolve_calls(scanned: Vec<(AnalyzedFile, FileScan)>) -> AnalysisResult {
    let mut result = AnalysisResult::default();
    let mut calls = Vec::new();

    for (file, scan) in scanned {
        result
            .functions
            .extend(scan.functions.into_iter().map(Arc::new));
        result.diagnostics.extend(scan.diagnostics);
        calls.extend(scan.calls);
        result.files.push(file);
    }

    let mut index: HashMap<(&str, &str), Vec<&Arc<FunctionDescriptor>>> = HashMap::new();
    for function in &result.functions {
        index
            .entry((function.type_name.as_str(), function.name.as_str()))
            .or_default()
            .push(function);
    }

    let mut invocations = Vec::new();
    let mut diagnostics = Vec::new();
    for call in calls {
        let Some(function) = resolve_target(&index, &call) else {
            continue;
        };
        match call.arguments {
            Ok(arguments) => {
                let arity_matches = arguments.len() == function.parameters.len()
                    && arguments
                        .iter()
                        .zip(&function.parameters)
                        .all(|(arg, param)| param.ty.accepts(arg.kind));
                if arity_matches {
                    invocations.push(InvocationDescriptor::new(
                        Arc::clone(function),
                        arguments,
                        call.location,
                    ));
                } else {
                    debug!(
                        call = %call.location,
                        function = %function.qualified_name(),
                        "literal arguments do not match the declared parameters"
                    );
                }
            }
            Err(position) => diagnostics.push(Diagnostic::new(
                DiagnosticId::NonLiteralArguments,
                Some(call.location),
                [function.qualified_name(), (position + 1).to_string()],
            )),
        }
    }

    info!(
        files = result.files.len(),
        functions = result.functions.len(),
        invocations = invocations.len(),
        "analysis complete"
    );
    result.invocations = invocations;
    result.diagnostics.extend(diagnostics);
    result
}

fn resolve_target<'a>(
    index: &HashMap<(&str, &str), Vec<&'a Arc<FunctionDescriptor>>>,
    call: &CallSite,
) -> Option<&'a Arc<FunctionDescriptor>> {
    let candidates = index.get(&(call.target.type_name(), call.target.method()))?;
    let matching = match &call.target {
        CallTarget::Absolute { namespace, .. } => candidates
            .iter()
            .filter(|function| &function.namespace == namespace)
            .copied()
            .collect::<Vec<_>>(),
        CallTarget::Relative { prefix, .. } if prefix.is_empty() => {
            if candidates.len() == 1 {
                candidates.clone()
            } else {
                candidates
                    .iter()
                    .filter(|function| function.namespace == call.caller_namespace)
                    .copied()
                    .collect()
            }
        }
        CallTarget::Relative { prefix, .. } => {
            let prefix = prefix.join("::");
            let nested = if call.caller_namespace.is_empty() {
                prefix.clone()
            } else {
                format!("{}::{prefix}", call.caller_namespace)
            };
            let suffix = format!("::{prefix}");
            let by_path = candidates
                .iter()
                .filter(|function| {
                    function.namespace == prefix || function.namespace.ends_with(&suffix)
                })
                .copied()
                .collect::<Vec<_>>();
            if by_path.len() > 1 {
                by_path
                    .into_iter()
                    .filter(|function| function.namespace == nested)
                    .collect()
            } else {
                by_path
            }
        }
    };

    match matching.as_slice() {
        [function] => Some(*function),
        [] => None,
        _ => {
            debug!(call = %call.location, "ambiguous call target skipped");
            None
        }
    }
}

/// Path of `path` relative to `project_dir`, with `/` separators.
pub fn display_path(project_dir: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(project_dir).unwrap_or(path);
    relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Module path of a source file: the components below `src/`, without
/// `lib`, `main` or `mod` file names.
pub fn module_namespace(display_path: &str) -> Vec<String> {
    let parts = display_path.split('/').collect::<Vec<_>>();
    let start = parts
        .iter()
        .rposition(|part| *part == "src")
        .map_or(parts.len().saturating_sub(1), |idx| idx + 1);
    let mut namespace = parts[start..]
        .iter()
        .map(|part| part.strip_suffix(".rs").unwrap_or(*part).to_string())
        .collect::<Vec<_>>();
    if namespace
        .last()
        .is_some_and(|last| matches!(last.as_str(), "lib" | "main" | "mod"))
    {
        namespace.pop();
    }
    namespace
}
