use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::model::{CacheStrategy, FunctionConfig};

pub const CONFIG_FILE: &str = "precomp.toml";
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_WARN_THRESHOLD_MS: u64 = 1000;
pub const DEFAULT_EDITION: &str = "2021";
pub const DEFAULT_SUBSTITUTE_MODULE: &str = "crate::precomp_generated";
const EDITIONS: [&str; 4] = ["2015", "2018", "2021", "2024"];

/// What happens when an annotated call exceeds its timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeoutBehavior {
    /// Informational diagnostic; the call runs normally.
    Skip,
    /// Warning; the call runs normally.
    #[default]
    Warn,
    /// Critical error that fails the build.
    Fail,
}

impl FromStr for TimeoutBehavior {
    type Err = PipelineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "skip" => Ok(Self::Skip),
            "warn" | "warning" => Ok(Self::Warn),
            "error" | "fail" => Ok(Self::Fail),
            other => Err(PipelineError::InvalidConfig(format!(
                "unknown timeout behavior `{other}` (expected skip, warn or fail)"
            ))),
        }
    }
}

impl fmt::Display for TimeoutBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Skip => "skip",
            Self::Warn => "warn",
            Self::Fail => "fail",
        })
    }
}

/// Hint passed to the worker about the kind of crate being built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectKind {
    #[default]
    Lib,
    Bin,
}

impl FromStr for ProjectKind {
    type Err = PipelineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "lib" | "library" => Ok(Self::Lib),
            "bin" | "binary" => Ok(Self::Bin),
            other => Err(PipelineError::InvalidConfig(format!(
                "unknown project kind `{other}`"
            ))),
        }
    }
}

/// Program and leading arguments used to launch the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Parses `program arg1 arg2`, split on whitespace.
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let program = parts.next()?;
        Some(Self::new(program, parts.map(str::to_string).collect()))
    }

    /// The `precomp-worker` next to the running executable, or the one on `PATH`.
    pub fn locate() -> Self {
        let name = format!("precomp-worker{}", env::consts::EXE_SUFFIX);
        let sibling = env::current_exe().ok().and_then(|exe| {
            let dir = exe.parent()?;
            [dir.join(&name), dir.parent()?.join(&name)]
                .into_iter()
                .find(|candidate| candidate.is_file())
        });
        Self::new(sibling.unwrap_or_else(|| PathBuf::from(name)), Vec::new())
    }
}

impl fmt::Display for WorkerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Optional `precomp.toml` in the project directory.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct FileConfig {
    pub sources: Option<Vec<String>>,
    pub references: Option<Vec<PathBuf>>,
    pub out_dir: Option<PathBuf>,
    pub timeout_ms: Option<u64>,
    pub timeout_behavior: Option<String>,
    pub warn_threshold_ms: Option<u64>,
    pub enabled: Option<bool>,
    pub report: Option<bool>,
    pub cache_dir: Option<PathBuf>,
    pub worker: Option<String>,
    pub edition: Option<String>,
    pub project_kind: Option<String>,
    pub rewrite: Option<bool>,
    pub substitute_module: Option<String>,
    pub format: Option<bool>,
}

impl FileConfig {
    pub fn load(project_dir: &Path) -> Result<Option<Self>> {
        let path = project_dir.join(CONFIG_FILE);
        if !path.is_file() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config = toml::from_str(&text)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(Some(config))
    }
}

/// Build-wide settings, created once and passed to every stage.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Source files or glob patterns, relative to the project directory.
    pub sources: Vec<String>,
    pub references: Vec<PathBuf>,
    pub out_dir: PathBuf,
    pub project_dir: PathBuf,
    pub timeout_ms: u64,
    pub timeout_behavior: TimeoutBehavior,
    pub enabled: bool,
    pub report: bool,
    pub debug: bool,
    pub warn_threshold_ms: u64,
    pub cache_dir: Option<PathBuf>,
    pub worker: Option<WorkerCommand>,
    pub edition: String,
    pub project_kind: ProjectKind,
    pub rewrite: bool,
    pub substitute_module: String,
    /// Run generated code through `rustfmt` when it is available.
    pub format_output: bool,
}

impl GeneratorConfig {
    pub fn new(project_dir: impl Into<PathBuf>, out_dir: impl Into<PathBuf>) -> Self {
        Self {
            sources: vec!["src/**/*.rs".into()],
            references: Vec::new(),
            out_dir: out_dir.into(),
            project_dir: project_dir.into(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            timeout_behavior: TimeoutBehavior::default(),
            enabled: true,
            report: false,
            debug: false,
            warn_threshold_ms: DEFAULT_WARN_THRESHOLD_MS,
            cache_dir: None,
            worker: None,
            edition: DEFAULT_EDITION.into(),
            project_kind: ProjectKind::default(),
            rewrite: true,
            substitute_module: DEFAULT_SUBSTITUTE_MODULE.into(),
            format_output: true,
        }
    }

    /// Defaults, then `precomp.toml`, then the process environment.
    pub fn load(project_dir: impl Into<PathBuf>, out_dir: impl Into<PathBuf>) -> Result<Self> {
        let mut config = Self::new(project_dir, out_dir);
        if let Some(file) = FileConfig::load(&config.project_dir)? {
            config.apply_file(file)?;
        }
        config.apply_env(|key| env::var(key).ok())?;
        Ok(config)
    }

    pub fn apply_file(&mut self, file: FileConfig) -> Result<(), PipelineError> {
        if let Some(sources) = file.sources {
            self.sources = sources;
        }
        if let Some(references) = file.references {
            self.references = references;
        }
        if let Some(out_dir) = file.out_dir {
            self.out_dir = self.project_dir.join(out_dir);
        }
        if let Some(timeout_ms) = file.timeout_ms {
            self.timeout_ms = timeout_ms;
        }
        if let Some(behavior) = file.timeout_behavior {
            self.timeout_behavior = behavior.parse()?;
        }
        if let Some(threshold) = file.warn_threshold_ms {
            self.warn_threshold_ms = threshold;
        }
        if let Some(enabled) = file.enabled {
            self.enabled = enabled;
        }
        if let Some(report) = file.report {
            self.report = report;
        }
        if let Some(cache_dir) = file.cache_dir {
            self.cache_dir = Some(self.project_dir.join(cache_dir));
        }
        if let Some(worker) = file.worker {
            self.worker = WorkerCommand::parse(&worker);
        }
        if let Some(edition) = file.edition {
            self.edition = edition;
        }
        if let Some(kind) = file.project_kind {
            self.project_kind = kind.parse()?;
        }
        if let Some(rewrite) = file.rewrite {
            self.rewrite = rewrite;
        }
        if let Some(module) = file.substitute_module {
            self.substitute_module = module;
        }
        if let Some(format) = file.format {
            self.format_output = format;
        }
        Ok(())
    }

    /// Applies `PRECOMP_*` variables read through `lookup`.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), PipelineError> {
        if let Some(dir) = lookup("PRECOMP_CACHE_DIR").filter(|dir| !dir.is_empty()) {
            self.cache_dir = Some(PathBuf::from(dir));
        }
        if let Some(worker) = lookup("PRECOMP_WORKER") {
            self.worker = WorkerCommand::parse(&worker);
        }
        if let Some(timeout) = lookup("PRECOMP_TIMEOUT_MS") {
            self.timeout_ms = timeout.trim().parse().map_err(|_| {
                PipelineError::InvalidConfig(format!("PRECOMP_TIMEOUT_MS is not a number: {timeout}"))
            })?;
        }
        if let Some(behavior) = lookup("PRECOMP_TIMEOUT_BEHAVIOR") {
            self.timeout_behavior = behavior.parse()?;
        }
        if let Some(enabled) = lookup("PRECOMP_ENABLED") {
            self.enabled = !matches!(
                enabled.trim().to_ascii_lowercase().as_str(),
                "0" | "false" | "no" | "off"
            );
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.timeout_ms == 0 {
            return Err(PipelineError::InvalidConfig(
                "timeout must be greater than zero".into(),
            ));
        }
        if !EDITIONS.contains(&self.edition.as_str()) {
            return Err(PipelineError::InvalidConfig(format!(
                "unsupported edition `{}`",
                self.edition
            )));
        }
        let module_ok = self
            .substitute_module
            .split("::")
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_alphanumeric() || c == '_'));
        if !module_ok {
            return Err(PipelineError::InvalidConfig(format!(
                "substitute module `{}` is not a Rust path",
                self.substitute_module
            )));
        }
        Ok(())
    }

    /// Defaults applied to attributes that leave options out.
    pub fn function_defaults(&self) -> FunctionConfig {
        FunctionConfig {
            cache: CacheStrategy::default(),
            timeout_ms: self.timeout_ms,
            warn_threshold_ms: self.warn_threshold_ms,
            suppress_warnings: false,
        }
    }

    pub fn worker_command(&self) -> WorkerCommand {
        self.worker.clone().unwrap_or_else(WorkerCommand::locate)
    }

    /// Expands `sources` into existing files, sorted and deduplicated.
    pub fn source_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for pattern in &self.sources {
            let full = self.project_dir.join(pattern);
            let full = full.to_string_lossy();
            let matches = glob::glob(&full)
                .with_context(|| format!("invalid source pattern `{pattern}`"))?;
            for entry in matches {
                let path = entry.with_context(|| format!("failed to expand `{pattern}`"))?;
                if path.is_file() {
                    files.push(path);
                }
            }
        }
        files.sort();
        files.dedup();
        Ok(files)
    }

    pub fn work_dir(&self) -> PathBuf {
        self.out_dir.join("work")
    }

    pub fn request_path(&self) -> PathBuf {
        self.work_dir().join("precomp-request.json")
    }

    pub fn response_path(&self) -> PathBuf {
        self.work_dir().join("precomp-response.json")
    }

    pub fn generated_dir(&self) -> PathBuf {
        self.out_dir.join("src")
    }

    pub fn rewritten_dir(&self) -> PathBuf {
        self.out_dir.join("rewritten")
    }

    pub fn diagnostics_path(&self) -> PathBuf {
        self.out_dir.join("precomp-diagnostics.json")
    }

    pub fn report_path(&self) -> PathBuf {
        self.out_dir.join("precomp-report.txt")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_behavior_parsing_accepts_aliases() {
        assert_eq!("Skip".parse::<TimeoutBehavior>().ok(), Some(TimeoutBehavior::Skip));
        assert_eq!("WARNING".parse::<TimeoutBehavior>().ok(), Some(TimeoutBehavior::Warn));
        assert_eq!("error".parse::<TimeoutBehavior>().ok(), Some(TimeoutBehavior::Fail));
        assert!("explode".parse::<TimeoutBehavior>().is_err());
    }

    #[test]
    fn environment_overrides_file_values() -> anyhow::Result<()> {
        let mut config = GeneratorConfig::new("/work/app", "/work/app/target/precomp");
        let file: FileConfig = toml::from_str(
            r#"
            timeout-ms = 250
            timeout-behavior = "skip"
            cache-dir = ".cache"
            "#,
        )?;
        config.apply_file(file)?;
        assert_eq!(config.timeout_ms, 250);
        assert_eq!(config.cache_dir, Some(PathBuf::from("/work/app/.cache")));

        config.apply_env(|key| match key {
            "PRECOMP_TIMEOUT_MS" => Some("900".into()),
            "PRECOMP_ENABLED" => Some("false".into()),
            "PRECOMP_WORKER" => Some("/opt/worker --quiet".into()),
            _ => None,
        })?;
        assert_eq!(config.timeout_ms, 900);
        assert_eq!(config.timeout_behavior, TimeoutBehavior::Skip);
        assert!(!config.enabled);
        assert_eq!(
            config.worker,
            Some(WorkerCommand::new("/opt/worker", vec!["--quiet".into()]))
        );
        Ok(())
    }

    #[test]
    fn unknown_file_keys_are_rejected() {
        assert!(toml::from_str::<FileConfig>("colour = true").is_err());
    }

    #[test]
    fn validation_catches_bad_values() {
        let mut config = GeneratorConfig::new(".", "out");
        assert!(config.validate().is_ok());
        config.substitute_module = "crate::bad path".into();
        assert!(config.validate().is_err());
        config.substitute_module = DEFAULT_SUBSTITUTE_MODULE.into();
        config.edition = "2020".into();
        assert!(config.validate().is_err());
    }
}
