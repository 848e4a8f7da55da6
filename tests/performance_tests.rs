use std::time::Duration;

use anyhow::Result;
use precomp::model::CacheStrategy;
use precomp::perf::{CacheOutcome, Outcome, PerformanceCollector, PerformanceSample};

#[test]
fn profiler_records_named_phases() {
    let mut profiler = precomp::utils::profiler::Profiler::new();
    profiler.record_phase("dummy", || std::thread::sleep(Duration::from_millis(1)));
    profiler.push_phase("skipped", Duration::ZERO);
    assert_eq!(profiler.phases().len(), 2);
    assert_eq!(profiler.phases()[0].name, "dummy");
    assert!(profiler.total() >= Duration::from_millis(1));
}

#[test]
fn report_is_written_next_to_the_output() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut collector = PerformanceCollector::new();
    collector.record(PerformanceSample {
        function: "math::Series::fib".into(),
        invocation_count: 3,
        execution_time_ms: 1200,
        memory_bytes: 4096,
        strategy: CacheStrategy::Persistent,
        cache: CacheOutcome::Miss,
        threshold_exceeded: true,
        outcome: Outcome::Success,
    });

    let path = dir.path().join("out").join("precomp-report.txt");
    collector.write_report(&path)?;
    let report = std::fs::read_to_string(&path)?;
    assert!(report.contains("math::Series::fib"));
    assert!(report.contains("over threshold: 1"));
    Ok(())
}

#[test]
fn summaries_serialize_for_tooling() -> Result<()> {
    let mut collector = PerformanceCollector::new();
    collector.record(PerformanceSample {
        function: "math::Series::fib".into(),
        invocation_count: 1,
        execution_time_ms: 40,
        memory_bytes: 0,
        strategy: CacheStrategy::PerBuild,
        cache: CacheOutcome::Miss,
        threshold_exceeded: false,
        outcome: Outcome::Success,
    });

    let json = serde_json::to_value(collector.summary())?;
    assert_eq!(json["executed"], 1);
    assert_eq!(json["slowest"][0]["cache"], "miss");
    assert_eq!(json["slowest"][0]["strategy"], "per_build");
    Ok(())
}
