use std::fmt::{self, Write as _};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::CacheStrategy;
use crate::version::VERSION;

const SLOWEST_CALLS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheOutcome {
    Hit,
    Miss,
    Bypass,
}

impl fmt::Display for CacheOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Self::Hit => "hit",
            Self::Miss => "miss",
            Self::Bypass => "bypass",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failed,
    TimedOut,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Self::Success => "ok",
            Self::Failed => "failed",
            Self::TimedOut => "timeout",
        })
    }
}

/// Measurements for one execution request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PerformanceSample {
    pub function: String,
    pub invocation_count: usize,
    pub execution_time_ms: u64,
    pub memory_bytes: u64,
    pub strategy: CacheStrategy,
    pub cache: CacheOutcome,
    pub threshold_exceeded: bool,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerformanceSummary {
    pub requests: usize,
    pub call_sites: usize,
    pub executed: usize,
    pub cache_hits: usize,
    pub failures: usize,
    pub threshold_violations: usize,
    pub total_time_ms: u64,
    pub total_memory_bytes: u64,
    pub hit_rate: f64,
    pub slowest: Vec<PerformanceSample>,
}

#[derive(Debug, Default)]
pub struct PerformanceCollector {
    samples: Vec<PerformanceSample>,
}

impl PerformanceCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, sample: PerformanceSample) {
        self.samples.push(sample);
    }

    pub fn samples(&self) -> &[PerformanceSample] {
        &self.samples
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn summary(&self) -> PerformanceSummary {
        let mut summary = PerformanceSummary {
            requests: self.samples.len(),
            ..PerformanceSummary::default()
        };
        for sample in &self.samples {
            summary.call_sites += sample.invocation_count;
            summary.total_time_ms += sample.execution_time_ms;
            summary.total_memory_bytes += sample.memory_bytes;
            match sample.cache {
                CacheOutcome::Hit => summary.cache_hits += 1,
                CacheOutcome::Miss | CacheOutcome::Bypass => summary.executed += 1,
            }
            if sample.outcome != Outcome::Success {
                summary.failures += 1;
            }
            if sample.threshold_exceeded {
                summary.threshold_violations += 1;
            }
        }
        let cacheable = self
            .samples
            .iter()
            .filter(|sample| sample.cache != CacheOutcome::Bypass)
            .count();
        if cacheable > 0 {
            summary.hit_rate = summary.cache_hits as f64 / cacheable as f64;
        }

        let mut slowest = self
            .samples
            .iter()
            .filter(|sample| sample.cache != CacheOutcome::Hit)
            .cloned()
            .collect::<Vec<_>>();
        slowest.sort_by(|a, b| b.execution_time_ms.cmp(&a.execution_time_ms));
        slowest.truncate(SLOWEST_CALLS);
        summary.slowest = slowest;
        summary
    }

    pub fn render_report(&self, generated_at: DateTime<Utc>) -> String {
        let summary = self.summary();
        let mut out = String::new();
        let _ = writeln!(out, "precomp {VERSION} performance report");
        let _ = writeln!(out, "generated {}", generated_at.to_rfc3339());
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "requests: {} ({} call sites), executed: {}, cache hits: {} ({:.1}%)",
            summary.requests,
            summary.call_sites,
            summary.executed,
            summary.cache_hits,
            summary.hit_rate * 100.0
        );
        let _ = writeln!(
            out,
            "total time: {} ms, memory: {} bytes, failures: {}, over threshold: {}",
            summary.total_time_ms,
            summary.total_memory_bytes,
            summary.failures,
            summary.threshold_violations
        );
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "{:<48} {:>6} {:>10} {:>12} {:<10} {:<6} {:<7} {}",
            "function", "calls", "time ms", "bytes", "strategy", "cache", "result", "slow"
        );
        for sample in &self.samples {
            let _ = writeln!(
                out,
                "{:<48} {:>6} {:>10} {:>12} {:<10} {:<6} {:<7} {}",
                sample.function,
                sample.invocation_count,
                sample.execution_time_ms,
                sample.memory_bytes,
                sample.strategy,
                sample.cache,
                sample.outcome,
                if sample.threshold_exceeded { "yes" } else { "" }
            );
        }
        if !summary.slowest.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "slowest executions:");
            for (rank, sample) in summary.slowest.iter().enumerate() {
                let _ = writeln!(
                    out,
                    "  {}. {} - {} ms",
                    rank + 1,
                    sample.function,
                    sample.execution_time_ms
                );
            }
        }
        out
    }

    pub fn write_report(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(path, self.render_report(Utc::now()))
            .with_context(|| format!("failed to write report {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(function: &str, ms: u64, cache: CacheOutcome, outcome: Outcome) -> PerformanceSample {
        PerformanceSample {
            function: function.into(),
            invocation_count: 2,
            execution_time_ms: ms,
            memory_bytes: 64,
            strategy: CacheStrategy::Persistent,
            cache,
            threshold_exceeded: ms > 1000,
            outcome,
        }
    }

    #[test]
    fn summary_counts_hits_and_slowest_calls() {
        let mut collector = PerformanceCollector::new();
        collector.record(sample("a::T::slow", 1500, CacheOutcome::Miss, Outcome::Success));
        collector.record(sample("a::T::cached", 0, CacheOutcome::Hit, Outcome::Success));
        collector.record(sample("a::T::boom", 3, CacheOutcome::Miss, Outcome::Failed));

        let summary = collector.summary();
        assert_eq!(summary.requests, 3);
        assert_eq!(summary.call_sites, 6);
        assert_eq!(summary.executed, 2);
        assert_eq!(summary.failures, 1);
        assert_eq!(summary.threshold_violations, 1);
        assert!((summary.hit_rate - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(summary.slowest[0].function, "a::T::slow");
        assert_eq!(summary.slowest.len(), 2);
    }

    #[test]
    fn report_lists_every_sample() {
        let mut collector = PerformanceCollector::new();
        collector.record(sample("geo::Grid::area", 12, CacheOutcome::Bypass, Outcome::TimedOut));
        let report = collector.render_report(Utc::now());
        assert!(report.contains("geo::Grid::area"));
        assert!(report.contains("timeout"));
        assert!(report.contains("slowest executions"));
    }
}
