use std::fs;

use anyhow::Result;
use precomp::analysis::Analyzer;
use precomp::cache::{CacheEntry, CacheFile, CacheLookup, CacheManager, InvalidationReason};
use precomp::execute::protocol::{ErrorCode, WorkerResult};
use precomp::model::{CacheStrategy, FunctionConfig};
use precomp::resolve::{ExecutionRequest, deduplicate};

const FIB: &str = r"
pub struct Series;

impl Series {
    #[precompute]
    pub fn doubled(n: u32) -> u64 {
        (n * 2).into()
    }
}

pub fn twenty() -> u64 {
    Series::doubled(10)
}
";

fn temp_dir() -> tempfile::TempDir {
    tempfile::Builder::new()
        .prefix("precomp-cache-test")
        .tempdir()
        .expect("failed to create temp dir")
}

fn requests(source: &str) -> Vec<ExecutionRequest> {
    let analyzer = Analyzer::new(
        "/work/app",
        FunctionConfig {
            cache: CacheStrategy::Persistent,
            timeout_ms: 5000,
            warn_threshold_ms: 1000,
            suppress_warnings: false,
        },
    );
    let analysis = analyzer.analyze_sources(&[("src/lib.rs", source)]);
    deduplicate(&analysis.invocations)
}

fn executed(request: &ExecutionRequest, value: &str, millis: u64) -> WorkerResult {
    WorkerResult::success(request.primary_id(), value, millis, 128)
}

#[test]
fn persisted_entries_hit_on_the_next_build() -> Result<()> {
    let dir = temp_dir();
    let requests = requests(FIB);
    assert_eq!(requests.len(), 1);
    let request = &requests[0];

    let mut first = CacheManager::open(Some(dir.path()), dir.path())?;
    assert_eq!(first.lookup(request), CacheLookup::Miss);
    first.store(request, &executed(request, "20", 37));
    first.persist()?;

    let mut second = CacheManager::open(Some(dir.path()), dir.path())?;
    match second.lookup(request) {
        CacheLookup::Hit(result) => {
            assert_eq!(result.serialized_value, "20");
            assert_eq!(result.execution_time_ms, 0);
            assert_eq!(result.invocation_id, request.primary_id());
        }
        other => panic!("expected a cache hit, got {other:?}"),
    }
    assert_eq!(second.stats().hits, 1);
    assert_eq!(second.get(&request.cache_key).map(|e| e.execution_time_ms), Some(37));
    Ok(())
}

#[test]
fn body_changes_invalidate_entries() -> Result<()> {
    let dir = temp_dir();
    let before = requests(FIB);
    let mut cache = CacheManager::open(Some(dir.path()), dir.path())?;
    cache.store(&before[0], &executed(&before[0], "20", 1));

    let after = requests(&FIB.replace("(n * 2).into()", "(n * 3).into()"));
    assert_eq!(before[0].cache_key, after[0].cache_key);
    assert_eq!(
        cache.lookup(&after[0]),
        CacheLookup::Invalidated(InvalidationReason::BodyChanged)
    );
    Ok(())
}

#[test]
fn return_type_changes_invalidate_entries() -> Result<()> {
    let dir = temp_dir();
    let before = requests(FIB);
    let mut cache = CacheManager::open(Some(dir.path()), dir.path())?;
    cache.store(&before[0], &executed(&before[0], "20", 1));

    let after = requests(&FIB.replace("-> u64", "-> u128"));
    assert_eq!(
        cache.lookup(&after[0]),
        CacheLookup::Invalidated(InvalidationReason::ReturnTypeChanged)
    );
    assert_eq!(cache.stats().invalidations, 1);
    Ok(())
}

#[test]
fn failed_entries_are_re_executed() -> Result<()> {
    let dir = temp_dir();
    let requests = requests(FIB);
    let request = &requests[0];
    let path = CacheManager::open(Some(dir.path()), dir.path())?.path().to_path_buf();

    let mut file = CacheFile::new("hand-written");
    let failed = WorkerResult::failure(request.primary_id(), ErrorCode::Panic, "boom", 3);
    file.entries.insert(
        request.cache_key.clone(),
        CacheEntry::new(
            request.cache_key.clone(),
            request.function.qualified_name(),
            request.content_hash(),
            request.function.return_type(),
            &failed,
            true,
        ),
    );
    file.write_to_yaml(&path)?;

    let mut cache = CacheManager::open(Some(dir.path()), dir.path())?;
    assert_eq!(cache.len(), 1);
    assert_eq!(
        cache.lookup(request),
        CacheLookup::Invalidated(InvalidationReason::PreviousFailure)
    );
    Ok(())
}

#[test]
fn strategies_control_storage() -> Result<()> {
    let dir = temp_dir();
    let never = requests(&FIB.replace("#[precompute]", "#[precompute(cache = \"never\")]"));
    let per_build = requests(&FIB.replace("#[precompute]", "#[precompute(cache = \"per_build\")]"));

    let mut cache = CacheManager::open(Some(dir.path()), dir.path())?;
    assert_eq!(cache.lookup(&never[0]), CacheLookup::Bypass);
    cache.store(&never[0], &executed(&never[0], "20", 1));
    assert!(cache.is_empty());

    cache.store(&per_build[0], &executed(&per_build[0], "20", 1));
    assert!(matches!(cache.lookup(&per_build[0]), CacheLookup::Hit(_)));
    cache.persist()?;

    let reopened = CacheManager::open(Some(dir.path()), dir.path())?;
    assert!(reopened.is_empty());
    Ok(())
}

#[test]
fn switching_to_per_build_re_executes_persisted_entries() -> Result<()> {
    let dir = temp_dir();
    let persistent = requests(FIB);
    let mut first = CacheManager::open(Some(dir.path()), dir.path())?;
    first.store(&persistent[0], &executed(&persistent[0], "20", 1));
    first.persist()?;

    let per_build = requests(&FIB.replace("#[precompute]", "#[precompute(cache = \"per_build\")]"));
    assert_eq!(persistent[0].cache_key, per_build[0].cache_key);
    let mut second = CacheManager::open(Some(dir.path()), dir.path())?;
    assert_eq!(
        second.lookup(&per_build[0]),
        CacheLookup::Invalidated(InvalidationReason::StrategyChanged)
    );
    second.store(&per_build[0], &executed(&per_build[0], "20", 1));
    assert!(matches!(second.lookup(&per_build[0]), CacheLookup::Hit(_)));
    second.persist()?;

    let mut third = CacheManager::open(Some(dir.path()), dir.path())?;
    assert!(third.is_empty());
    assert_eq!(third.lookup(&per_build[0]), CacheLookup::Miss);
    Ok(())
}

#[test]
fn switching_to_never_drops_persisted_entries() -> Result<()> {
    let dir = temp_dir();
    let persistent = requests(FIB);
    let mut first = CacheManager::open(Some(dir.path()), dir.path())?;
    first.store(&persistent[0], &executed(&persistent[0], "20", 1));
    first.persist()?;

    let never = requests(&FIB.replace("#[precompute]", "#[precompute(cache = \"never\")]"));
    let mut second = CacheManager::open(Some(dir.path()), dir.path())?;
    assert_eq!(second.len(), 1);
    assert_eq!(second.lookup(&never[0]), CacheLookup::Bypass);
    assert!(second.is_empty());
    second.persist()?;

    assert!(CacheManager::open(Some(dir.path()), dir.path())?.is_empty());
    Ok(())
}

#[test]
fn unreadable_cache_files_start_empty() -> Result<()> {
    let dir = temp_dir();
    let path = CacheManager::open(Some(dir.path()), dir.path())?.path().to_path_buf();
    fs::write(&path, "version: [not, a, number")?;

    let mut cache = CacheManager::open(Some(dir.path()), dir.path())?;
    assert!(cache.is_empty());
    let requests = requests(FIB);
    assert_eq!(cache.lookup(&requests[0]), CacheLookup::Miss);
    Ok(())
}

#[test]
fn clearing_removes_every_entry() -> Result<()> {
    let dir = temp_dir();
    let requests = requests(FIB);
    let mut cache = CacheManager::open(Some(dir.path()), dir.path())?;
    cache.store(&requests[0], &executed(&requests[0], "20", 1));
    assert_eq!(cache.clear(), 1);
    cache.persist()?;
    assert!(CacheManager::open(Some(dir.path()), dir.path())?.is_empty());
    Ok(())
}
