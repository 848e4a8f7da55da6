//! Runs one build: analyse, deduplicate, consult the cache, execute the
//! misses, process responses, generate substitutes and rewrite sources.
//!
//! The cache and the diagnostics artifact are written back whatever happens
//! in between.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use tracing::{error, info};

use crate::analysis::{AnalyzedFile, Analyzer};
use crate::cache::{CacheLookup, CacheManager, CacheStats};
use crate::codegen::{CodeGenerator, GenerationPlan};
use crate::codegen::rewrite::write_rewritten;
use crate::config::GeneratorConfig;
use crate::diagnostics::{Diagnostic, DiagnosticBag, DiagnosticId};
use crate::error::PipelineError;
use crate::execute::{Orchestrator, ResponseMap, fan_out};
use crate::perf::{PerformanceCollector, PerformanceSummary};
use crate::resolve::{ExecutionRequest, deduplicate};
use crate::response::{ProcessingSink, Resolution, ResponseProcessor};
use crate::utils::profiler::{PhaseTiming, Profiler};

fn remove_output_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        fs::remove_dir_all(dir).with_context(|| format!("failed to remove {}", dir.display()))?;
    }
    Ok(())
}

/// Cooperative cancellation, checked at file I/O boundaries.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<(), PipelineError> {
        if self.is_cancelled() {
            Err(PipelineError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Result of a completed build step.
#[derive(Debug, Default)]
pub struct GenerationOutcome {
    pub enabled: bool,
    pub functions: usize,
    pub invocations: usize,
    pub requests: usize,
    pub executed: usize,
    pub diagnostics: Vec<Diagnostic>,
    /// Analysed sources, kept for rendering diagnostics.
    pub files: Vec<AnalyzedFile>,
    pub plan: GenerationPlan,
    pub rewritten: Vec<PathBuf>,
    pub cache_stats: CacheStats,
    pub performance: PerformanceSummary,
    pub timings: Vec<PhaseTiming>,
}

impl GenerationOutcome {
    pub fn has_critical(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_critical)
    }

    pub fn critical(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|diag| diag.is_critical())
    }
}

struct StageOutput {
    functions: usize,
    invocations: usize,
    requests: usize,
    executed: usize,
    files: Vec<AnalyzedFile>,
    plan: GenerationPlan,
    rewritten: Vec<PathBuf>,
}

pub struct Generator {
    config: Arc<GeneratorConfig>,
}

impl Generator {
    pub fn new(config: GeneratorConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    pub fn run(&self, cancel: &CancellationToken) -> Result<GenerationOutcome> {
        if !self.config.enabled {
            info!("precomputation disabled, nothing to do");
            return Ok(GenerationOutcome::default());
        }
        self.config.validate()?;

        let mut cache = CacheManager::open(self.config.cache_dir.as_deref(), &self.config.project_dir)
            .context("failed to open the cache")?;
        let mut diagnostics = DiagnosticBag::new();
        let mut perf = PerformanceCollector::new();
        let mut profiler = Profiler::new();

        let stages = self.run_stages(&mut cache, &mut diagnostics, &mut perf, &mut profiler, cancel);

        let persisted = cache.persist();
        if let Err(err) = &persisted {
            error!("failed to persist cache: {err:#}");
        }
        let flushed = diagnostics.write_artifact(&self.config.diagnostics_path());
        if let Err(err) = &flushed {
            error!("failed to write diagnostics: {err:#}");
        }

        let stages = stages?;
        persisted?;
        flushed?;

        let outcome = GenerationOutcome {
            enabled: true,
            functions: stages.functions,
            invocations: stages.invocations,
            requests: stages.requests,
            executed: stages.executed,
            diagnostics: diagnostics.into_vec(),
            files: stages.files,
            plan: stages.plan,
            rewritten: stages.rewritten,
            cache_stats: cache.stats(),
            performance: perf.summary(),
            timings: profiler.phases().to_vec(),
        };
        info!(
            functions = outcome.functions,
            invocations = outcome.invocations,
            requests = outcome.requests,
            executed = outcome.executed,
            substitutes = outcome.plan.substitute_count(),
            diagnostics = outcome.diagnostics.len(),
            "precomputation finished"
        );
        Ok(outcome)
    }

    fn run_stages(
        &self,
        cache: &mut CacheManager,
        diagnostics: &mut DiagnosticBag,
        perf: &mut PerformanceCollector,
        profiler: &mut Profiler,
        cancel: &CancellationToken,
    ) -> Result<StageOutput> {
        let config = &self.config;
        let paths = profiler.record_phase("discover", || config.source_files())?;
        let analyzer = Analyzer::new(config.project_dir.clone(), config.function_defaults());
        let mut analysis = profiler.record_phase("analyze", || analyzer.analyze(&paths, cancel))?;
        diagnostics.extend(std::mem::take(&mut analysis.diagnostics));

        let requests = profiler.record_phase("resolve", || deduplicate(&analysis.invocations));
        let lookups = profiler.record_phase("cache lookup", || {
            requests
                .iter()
                .map(|request| cache.lookup(request))
                .collect::<Vec<_>>()
        });

        let mut responses = ResponseMap::new();
        let mut misses: Vec<&ExecutionRequest> = Vec::new();
        for (request, lookup) in requests.iter().zip(&lookups) {
            match lookup {
                CacheLookup::Hit(result) => fan_out(&mut responses, request, result),
                _ => misses.push(request),
            }
        }

        let orchestrator = Orchestrator::new(Arc::clone(config));
        let executed = match profiler.record_phase("execute", || orchestrator.execute(&misses, cancel)) {
            Ok(executed) => executed,
            Err(err) => {
                let process_failure = err
                    .downcast_ref::<PipelineError>()
                    .is_some_and(PipelineError::is_process_error);
                if process_failure {
                    diagnostics.report(DiagnosticId::WorkerProcessFailed, None, [format!("{err:#}")]);
                    CodeGenerator::new(Arc::clone(config)).clean()?;
                    remove_output_dir(&config.rewritten_dir())?;
                }
                return Err(err);
            }
        };
        for request in &misses {
            if let Some(result) = executed.get(request.primary_id()) {
                fan_out(&mut responses, request, result);
            }
        }

        let processor = ResponseProcessor::new(Arc::clone(config));
        let resolutions = profiler.record_phase("process", || {
            let mut sink = ProcessingSink {
                cache: &mut *cache,
                diagnostics: &mut *diagnostics,
                perf: &mut *perf,
            };
            requests
                .iter()
                .zip(&lookups)
                .map(|(request, lookup)| processor.process(request, lookup, &responses, &mut sink))
                .collect::<Vec<Resolution>>()
        });

        let resolved = requests.iter().zip(resolutions.iter()).collect::<Vec<_>>();
        let generator = CodeGenerator::new(Arc::clone(config));
        let plan = profiler.record_phase("codegen", || generator.generate(&resolved, diagnostics, cancel))?;

        let rewritten = if config.rewrite {
            profiler.record_phase("rewrite", || -> Result<Vec<PathBuf>> {
                let dir = config.rewritten_dir();
                remove_output_dir(&dir)?;
                write_rewritten(
                    &dir,
                    &analysis.files,
                    &plan.replacements(&config.substitute_module),
                    cancel,
                )
            })?
        } else {
            Vec::new()
        };

        if config.report {
            profiler.record_phase("report", || perf.write_report(&config.report_path()))?;
        }

        Ok(StageOutput {
            functions: analysis.functions.len(),
            invocations: analysis.invocations.len(),
            requests: requests.len(),
            executed: misses.len(),
            files: analysis.files,
            plan,
            rewritten,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_shared_between_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(token.check().is_ok());
        clone.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(PipelineError::Cancelled)));
    }

    #[test]
    fn disabled_generation_touches_nothing() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut config = GeneratorConfig::new(dir.path(), dir.path().join("out"));
        config.enabled = false;
        config.cache_dir = Some(dir.path().join("cache"));
        let outcome = Generator::new(config).run(&CancellationToken::new())?;
        assert!(!outcome.enabled);
        assert!(!dir.path().join("out").exists());
        assert!(!dir.path().join("cache").exists());
        Ok(())
    }
}
