//! Turns worker results into diagnostics, cache updates and metrics.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::cache::{CacheLookup, CacheManager};
use crate::config::{GeneratorConfig, TimeoutBehavior};
use crate::diagnostics::{DiagnosticBag, DiagnosticId};
use crate::execute::ResponseMap;
use crate::execute::protocol::WorkerResult;
use crate::perf::{CacheOutcome, Outcome, PerformanceCollector, PerformanceSample};
use crate::resolve::ExecutionRequest;

/// What the code generator should emit for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// `Debug` text of the returned value.
    Value(String),
    /// Build-time failure; the substitute panics with this message.
    Failure(String),
    /// No substitute; call sites run normally.
    TimedOut,
    /// No response arrived; call sites run normally.
    Missing,
}

impl Resolution {
    pub fn is_intercepted(&self) -> bool {
        matches!(self, Self::Value(_) | Self::Failure(_))
    }
}

/// Mutable build state the processor reports into.
pub struct ProcessingSink<'a> {
    pub cache: &'a mut CacheManager,
    pub diagnostics: &'a mut DiagnosticBag,
    pub perf: &'a mut PerformanceCollector,
}

pub struct ResponseProcessor {
    config: Arc<GeneratorConfig>,
}

impl ResponseProcessor {
    pub fn new(config: Arc<GeneratorConfig>) -> Self {
        Self { config }
    }

    pub fn process(
        &self,
        request: &ExecutionRequest,
        lookup: &CacheLookup,
        responses: &ResponseMap,
        sink: &mut ProcessingSink<'_>,
    ) -> Resolution {
        let function = &request.function;
        let qualified = function.qualified_name();
        let Some(result) = responses.get(request.primary_id()) else {
            warn!(function = %qualified, "no response for request");
            for invocation in &request.invocations {
                sink.diagnostics.report(
                    DiagnosticId::MissingResponse,
                    Some(invocation.location.clone()),
                    [qualified.clone()],
                );
            }
            return Resolution::Missing;
        };

        let executed = lookup.needs_execution();
        let threshold = function.config.warn_threshold_ms;
        let threshold_exceeded = result.success && result.execution_time_ms > threshold;

        let (resolution, outcome) = if result.success {
            if threshold_exceeded && !function.config.suppress_warnings {
                for invocation in &request.invocations {
                    sink.diagnostics.report(
                        DiagnosticId::PerformanceThreshold,
                        Some(invocation.location.clone()),
                        [
                            qualified.clone(),
                            result.execution_time_ms.to_string(),
                            threshold.to_string(),
                        ],
                    );
                }
            }
            (
                Resolution::Value(result.serialized_value.clone()),
                Outcome::Success,
            )
        } else if result.is_timeout() {
            let id = match self.config.timeout_behavior {
                TimeoutBehavior::Skip => DiagnosticId::TimeoutSkipped,
                TimeoutBehavior::Warn => DiagnosticId::TimeoutWarning,
                TimeoutBehavior::Fail => DiagnosticId::TimeoutFailure,
            };
            for invocation in &request.invocations {
                sink.diagnostics.report(
                    id,
                    Some(invocation.location.clone()),
                    [qualified.clone(), function.config.timeout_ms.to_string()],
                );
            }
            (Resolution::TimedOut, Outcome::TimedOut)
        } else {
            let message = failure_message(result);
            for invocation in &request.invocations {
                sink.diagnostics.report(
                    DiagnosticId::ExecutionFailed,
                    Some(invocation.location.clone()),
                    [qualified.clone(), message.clone()],
                );
            }
            (Resolution::Failure(message), Outcome::Failed)
        };

        if executed {
            sink.cache.store(request, result);
        }

        let cache = match lookup {
            CacheLookup::Hit(_) => CacheOutcome::Hit,
            CacheLookup::Bypass => CacheOutcome::Bypass,
            CacheLookup::Miss | CacheLookup::Invalidated(_) => CacheOutcome::Miss,
        };
        debug!(
            function = %qualified,
            %cache,
            %outcome,
            elapsed_ms = result.execution_time_ms,
            "processed response"
        );
        sink.perf.record(PerformanceSample {
            function: qualified,
            invocation_count: request.invocations.len(),
            execution_time_ms: result.execution_time_ms,
            memory_bytes: result.memory_footprint_bytes,
            strategy: function.config.cache,
            cache,
            threshold_exceeded,
            outcome,
        });
        resolution
    }
}

fn failure_message(result: &WorkerResult) -> String {
    match result.error_code {
        Some(code) => format!("{code}: {}", result.error_text()),
        None => result.error_text().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::location::{SourceLocation, Span};
    use crate::analysis::shape::ValueShape;
    use crate::execute::fan_out;
    use crate::execute::protocol::ErrorCode;
    use crate::model::{
        CacheStrategy, FunctionConfig, FunctionDescriptor, InvocationDescriptor, LiteralKind,
        LiteralValue,
    };
    use crate::resolve::deduplicate;

    fn requests(sites: usize) -> Vec<ExecutionRequest> {
        let function = Arc::new(FunctionDescriptor {
            namespace: "calc".into(),
            type_name: "Table".into(),
            type_path: "Table".into(),
            name: "build".into(),
            parameters: Vec::new(),
            return_shape: ValueShape::Int("u32".into()),
            is_async: false,
            config: FunctionConfig {
                cache: CacheStrategy::Persistent,
                timeout_ms: 200,
                warn_threshold_ms: 100,
                suppress_warnings: false,
            },
            content_hash: "hash".into(),
            declaring_source: Arc::from("pub struct Table ;"),
            location: SourceLocation::new("src/calc.rs", 1, 1, Span::new(0, 5)),
        });
        let invocations = (0..sites)
            .map(|line| {
                InvocationDescriptor::new(
                    Arc::clone(&function),
                    vec![LiteralValue::new(LiteralKind::Int, "1")],
                    SourceLocation::new(
                        "src/main.rs",
                        line + 1,
                        5,
                        Span::new(line * 20, line * 20 + 12),
                    ),
                )
            })
            .collect::<Vec<_>>();
        deduplicate(&invocations)
    }

    fn run(
        behavior: TimeoutBehavior,
        result: WorkerResult,
    ) -> anyhow::Result<(Resolution, DiagnosticBag, CacheManager)> {
        let dir = tempfile::tempdir()?;
        let mut config = GeneratorConfig::new(dir.path(), dir.path().join("out"));
        config.timeout_behavior = behavior;
        let processor = ResponseProcessor::new(Arc::new(config));

        let requests = requests(2);
        let request = &requests[0];
        let mut responses = ResponseMap::new();
        fan_out(&mut responses, request, &result.for_invocation(request.primary_id()));

        let mut cache = CacheManager::open(Some(&dir.path().join("cache")), dir.path())?;
        let mut diagnostics = DiagnosticBag::new();
        let mut perf = PerformanceCollector::new();
        let mut sink = ProcessingSink {
            cache: &mut cache,
            diagnostics: &mut diagnostics,
            perf: &mut perf,
        };
        let resolution = processor.process(request, &CacheLookup::Miss, &responses, &mut sink);
        assert_eq!(perf.samples().len(), 1);
        Ok((resolution, diagnostics, cache))
    }

    #[test]
    fn slow_successes_warn_once_per_call_site() -> anyhow::Result<()> {
        let (resolution, diagnostics, cache) =
            run(TimeoutBehavior::Warn, WorkerResult::success("x", "7", 150, 0))?;
        assert_eq!(resolution, Resolution::Value("7".into()));
        assert_eq!(diagnostics.count(DiagnosticId::PerformanceThreshold), 2);
        assert_eq!(cache.len(), 1);
        Ok(())
    }

    #[test]
    fn timeouts_follow_the_configured_behavior() -> anyhow::Result<()> {
        let timeout = || WorkerResult::failure("x", ErrorCode::Timeout, "too slow", 200);
        for (behavior, id) in [
            (TimeoutBehavior::Skip, DiagnosticId::TimeoutSkipped),
            (TimeoutBehavior::Warn, DiagnosticId::TimeoutWarning),
            (TimeoutBehavior::Fail, DiagnosticId::TimeoutFailure),
        ] {
            let (resolution, diagnostics, cache) = run(behavior, timeout())?;
            assert_eq!(resolution, Resolution::TimedOut);
            assert_eq!(diagnostics.count(id), 2);
            assert_eq!(diagnostics.has_critical(), behavior == TimeoutBehavior::Fail);
            assert!(cache.is_empty());
        }
        Ok(())
    }

    #[test]
    fn failures_become_panicking_stubs_and_are_not_cached() -> anyhow::Result<()> {
        let (resolution, diagnostics, cache) = run(
            TimeoutBehavior::Warn,
            WorkerResult::failure("x", ErrorCode::Panic, "division by zero", 1),
        )?;
        assert_eq!(resolution, Resolution::Failure("PANIC: division by zero".into()));
        assert_eq!(diagnostics.count(DiagnosticId::ExecutionFailed), 2);
        assert!(!diagnostics.has_critical());
        assert!(cache.is_empty());
        Ok(())
    }

    #[test]
    fn absent_responses_are_reported() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = GeneratorConfig::new(dir.path(), dir.path().join("out"));
        let processor = ResponseProcessor::new(Arc::new(config));
        let requests = requests(3);
        let request = &requests[0];
        let mut cache = CacheManager::open(Some(dir.path()), dir.path())?;
        let mut diagnostics = DiagnosticBag::new();
        let mut perf = PerformanceCollector::new();
        let mut sink = ProcessingSink {
            cache: &mut cache,
            diagnostics: &mut diagnostics,
            perf: &mut perf,
        };
        let resolution =
            processor.process(request, &CacheLookup::Miss, &ResponseMap::new(), &mut sink);
        assert_eq!(resolution, Resolution::Missing);
        assert_eq!(diagnostics.count(DiagnosticId::MissingResponse), 3);
        Ok(())
    }
}
