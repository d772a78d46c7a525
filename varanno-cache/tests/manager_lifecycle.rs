use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::bail;
use fs2::FileExt;
use pretty_assertions::assert_eq;
use rstest::*;
use tempfile::TempDir;

use varanno_cache::consts::{ARTIFACT_FORMAT_VERSION, LOCK_EXT, TEMP_PREFIX};
use varanno_cache::{
    CacheError, CacheManager, CacheState, ContentionPolicy, LookupOutcome, ReferenceParser,
    ReferenceSource, StopFlag, TsvReferenceParser,
};
use varanno_core::models::{AnnotationRecord, FieldValue, VariantKey};

/// TSV parser that counts its invocations and can be slowed down.
struct CountingParser {
    calls: AtomicUsize,
    delay: Duration,
}

impl CountingParser {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(CountingParser {
            calls: AtomicUsize::new(0),
            delay,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ReferenceParser for CountingParser {
    fn name(&self) -> &str {
        "counting"
    }

    fn parse(&self, path: &Path, stop: &StopFlag) -> anyhow::Result<Vec<AnnotationRecord>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let started = Instant::now();
        while started.elapsed() < self.delay {
            stop.check()?;
            thread::sleep(Duration::from_millis(10));
        }
        TsvReferenceParser.parse(path, stop)
    }
}

/// Slow parser that never looks at its stop flag and records how many
/// copies of itself run at once.
#[derive(Default)]
struct StubbornParser {
    calls: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl ReferenceParser for StubbornParser {
    fn name(&self) -> &str {
        "stubborn"
    }

    fn parse(&self, path: &Path, _stop: &StopFlag) -> anyhow::Result<Vec<AnnotationRecord>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(800));
        self.active.fetch_sub(1, Ordering::SeqCst);
        TsvReferenceParser.parse(path, &StopFlag::new())
    }
}

/// Parser that always fails, counting attempts.
#[derive(Default)]
struct FailingParser {
    calls: AtomicUsize,
}

impl ReferenceParser for FailingParser {
    fn name(&self) -> &str {
        "failing"
    }

    fn parse(&self, _path: &Path, _stop: &StopFlag) -> anyhow::Result<Vec<AnnotationRecord>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        bail!("upstream dump is malformed")
    }
}

struct Workspace {
    _dir: TempDir,
    cache: PathBuf,
    source: PathBuf,
}

impl Workspace {
    fn manager(&self) -> CacheManager {
        CacheManager::builder()
            .with_cache_folder(self.cache.clone())
            .finish()
            .unwrap()
    }

    fn artifact(&self, manager: &CacheManager) -> PathBuf {
        let key = manager.key_for(&ReferenceSource::from_path(&self.source)).unwrap();
        manager.artifact_path(&key)
    }

    fn leftover_temp_files(&self) -> usize {
        fs::read_dir(&self.cache)
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .starts_with(TEMP_PREFIX)
            })
            .count()
    }

    fn lock_files(&self) -> usize {
        fs::read_dir(&self.cache)
            .unwrap()
            .filter(|e| {
                e.as_ref().unwrap().path().extension().and_then(|x| x.to_str()) == Some(LOCK_EXT)
            })
            .count()
    }
}

fn write_reference(path: &Path, rows: &[(&str, u64, &str, &str, &str)]) {
    let mut content = String::from("#chrom\tpos\tref\talt\tclinvar:significance\n");
    for (chrom, pos, r, a, sig) in rows {
        content.push_str(&format!("{}\t{}\t{}\t{}\t{}\n", chrom, pos, r, a, sig));
    }
    fs::write(path, content).unwrap();
}

#[fixture]
fn workspace() -> Workspace {
    let dir = tempfile::tempdir().unwrap();
    let cache = dir.path().join("cache");
    let source = dir.path().join("clinvar.tsv");
    write_reference(
        &source,
        &[
            ("chr1", 100, "A", "G", "pathogenic"),
            ("chr1", 150, "G", "C", "benign"),
            ("chr3", 42, "T", "TA", "uncertain"),
        ],
    );
    Workspace {
        _dir: dir,
        cache,
        source,
    }
}

fn significance(index: &varanno_cache::ReferenceIndex, key: &str) -> Option<FieldValue> {
    index
        .get(&key.parse::<VariantKey>().unwrap())
        .and_then(|r| r.field("clinvar", "significance").cloned())
}

#[rstest]
fn test_cold_lookup_populates_then_hits(workspace: Workspace) {
    let manager = workspace.manager();
    let parser = CountingParser::new(Duration::ZERO);
    let source = ReferenceSource::new(&workspace.source, parser.clone());

    assert_eq!(manager.state(&source).unwrap(), CacheState::Absent);

    let cold = manager.lookup(&source).unwrap();
    assert_eq!(cold.outcome, LookupOutcome::Populated { from: CacheState::Absent });
    assert_eq!(cold.index.len(), 3);
    assert_eq!(manager.state(&source).unwrap(), CacheState::Valid);

    let warm = manager.lookup(&source).unwrap();
    assert_eq!(warm.outcome, LookupOutcome::Hit);
    assert_eq!(parser.calls(), 1);

    // determinism
    assert_eq!(*cold.index, *warm.index);
    assert_eq!(cold.fingerprint, warm.fingerprint);

    let stats = manager.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.populations, 1);
}

#[rstest]
fn test_rebuilt_artifacts_are_byte_identical(workspace: Workspace) {
    let manager = workspace.manager();
    let source = ReferenceSource::from_path(&workspace.source);
    let artifact = workspace.artifact(&manager);

    manager.lookup(&source).unwrap();
    let first = fs::read(&artifact).unwrap();
    manager.force_refresh(&source).unwrap();
    let second = fs::read(&artifact).unwrap();

    // only the creation timestamp in the header may differ
    let payload = |bytes: &[u8]| {
        let header_len = u32::from_le_bytes(bytes[6..10].try_into().unwrap()) as usize;
        bytes[10 + header_len..].to_vec()
    };
    assert_eq!(payload(&first), payload(&second));
}

#[rstest]
fn test_modified_source_invalidates(workspace: Workspace) {
    let manager = workspace.manager();
    let source = ReferenceSource::from_path(&workspace.source);
    manager.lookup(&source).unwrap();

    write_reference(&workspace.source, &[("chr1", 100, "A", "G", "benign")]);
    assert_eq!(manager.state(&source).unwrap(), CacheState::Stale);

    let fresh = manager.lookup(&source).unwrap();
    assert_eq!(fresh.outcome, LookupOutcome::Populated { from: CacheState::Stale });
    assert_eq!(fresh.index.len(), 1);
    assert_eq!(
        significance(&fresh.index, "chr1:100:A:G"),
        Some(FieldValue::Text("benign".into()))
    );
    assert_eq!(manager.lookup(&source).unwrap().outcome, LookupOutcome::Hit);
}

#[rstest]
fn test_concurrent_cold_lookups_parse_once(workspace: Workspace) {
    let manager = workspace.manager();
    let parser = CountingParser::new(Duration::from_millis(200));
    let source = ReferenceSource::new(&workspace.source, parser.clone());

    let outcomes: Vec<LookupOutcome> = thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| scope.spawn(|| manager.lookup(&source).unwrap().outcome))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(parser.calls(), 1);
    let populated = outcomes
        .iter()
        .filter(|o| matches!(o, LookupOutcome::Populated { .. }))
        .count();
    assert_eq!(populated, 1);
    assert_eq!(outcomes.iter().filter(|o| **o == LookupOutcome::Hit).count(), 7);
}

#[rstest]
fn test_unrelated_sources_populate_independently(workspace: Workspace) {
    let manager = workspace.manager();
    let other = workspace.source.with_file_name("gnomad.tsv");
    write_reference(&other, &[("chr2", 200, "C", "T", "benign")]);

    let a = ReferenceSource::from_path(&workspace.source);
    let b = ReferenceSource::from_path(&other);
    let (ra, rb) = thread::scope(|scope| {
        let ha = scope.spawn(|| manager.lookup(&a).unwrap());
        let hb = scope.spawn(|| manager.lookup(&b).unwrap());
        (ha.join().unwrap(), hb.join().unwrap())
    });

    assert_eq!(ra.index.len(), 3);
    assert_eq!(rb.index.len(), 1);
    assert_ne!(manager.key_for(&a).unwrap(), manager.key_for(&b).unwrap());
}

#[rstest]
fn test_truncated_artifact_is_recovered(workspace: Workspace) {
    let manager = workspace.manager();
    let source = ReferenceSource::from_path(&workspace.source);
    let original = manager.lookup(&source).unwrap();

    let artifact = workspace.artifact(&manager);
    let bytes = fs::read(&artifact).unwrap();
    fs::write(&artifact, &bytes[..bytes.len() / 2]).unwrap();

    let recovered = manager.lookup(&source).unwrap();
    assert_eq!(recovered.outcome, LookupOutcome::Recovered);
    assert_eq!(*recovered.index, *original.index);
    assert_eq!(manager.stats().corrupt_recoveries, 1);
    assert_eq!(manager.lookup(&source).unwrap().outcome, LookupOutcome::Hit);
}

#[rstest]
fn test_truncated_artifact_with_failing_parse_reparses_once(workspace: Workspace) {
    let manager = workspace.manager();
    manager.lookup(&ReferenceSource::from_path(&workspace.source)).unwrap();

    let artifact = workspace.artifact(&manager);
    let bytes = fs::read(&artifact).unwrap();
    fs::write(&artifact, &bytes[..bytes.len() - 7]).unwrap();

    let parser = Arc::new(FailingParser::default());
    let source = ReferenceSource::new(&workspace.source, parser.clone());
    let err = manager.lookup(&source).unwrap_err();

    assert!(matches!(err, CacheError::ParseFailure { .. }), "got {:?}", err);
    assert_eq!(parser.calls.load(Ordering::SeqCst), 1);
    assert!(!artifact.exists());
}

#[rstest]
fn test_cold_parse_failure_retries_once(workspace: Workspace) {
    let manager = workspace.manager();
    let parser = Arc::new(FailingParser::default());
    let source = ReferenceSource::new(&workspace.source, parser.clone());

    let err = manager.lookup(&source).unwrap_err();
    assert!(matches!(err, CacheError::ParseFailure { ref reason, .. } if reason.contains("malformed")));
    assert_eq!(parser.calls.load(Ordering::SeqCst), 2);
    assert_eq!(manager.state(&source).unwrap(), CacheState::Absent);
    assert_eq!(manager.stats().parse_failures, 1);
}

#[rstest]
fn test_parse_failure_keeps_previous_artifact(workspace: Workspace) {
    let manager = workspace.manager();
    let good = ReferenceSource::from_path(&workspace.source);
    let first = manager.lookup(&good).unwrap();
    let artifact = workspace.artifact(&manager);
    let before = fs::read(&artifact).unwrap();

    write_reference(&workspace.source, &[("chr9", 9, "A", "T", "benign")]);
    let failing = ReferenceSource::new(&workspace.source, Arc::new(FailingParser::default()));
    assert!(matches!(
        manager.lookup(&failing),
        Err(CacheError::ParseFailure { .. })
    ));

    assert_eq!(fs::read(&artifact).unwrap(), before);
    let header = manager.inspect(&good).unwrap().unwrap();
    assert_eq!(header.fingerprint, first.fingerprint);
    assert_eq!(manager.state(&good).unwrap(), CacheState::Stale);
}

#[rstest]
fn test_force_refresh_reparses_valid_cache(workspace: Workspace) {
    let manager = workspace.manager();
    let parser = CountingParser::new(Duration::ZERO);
    let source = ReferenceSource::new(&workspace.source, parser.clone());

    manager.lookup(&source).unwrap();
    let refreshed = manager.force_refresh(&source).unwrap();
    assert_eq!(refreshed.outcome, LookupOutcome::Populated { from: CacheState::Valid });
    assert_eq!(parser.calls(), 2);
}

#[rstest]
fn test_missing_source_is_unavailable(workspace: Workspace) {
    let manager = workspace.manager();
    let source = ReferenceSource::from_path(workspace.source.with_file_name("absent.tsv"));
    assert!(matches!(
        manager.lookup(&source),
        Err(CacheError::SourceUnavailable { .. })
    ));
}

#[rstest]
fn test_other_artifact_version_is_replaced(workspace: Workspace) {
    let manager = workspace.manager();
    let source = ReferenceSource::from_path(&workspace.source);
    manager.lookup(&source).unwrap();

    let artifact = workspace.artifact(&manager);
    let mut bytes = fs::read(&artifact).unwrap();
    bytes[4..6].copy_from_slice(&(ARTIFACT_FORMAT_VERSION + 1).to_le_bytes());
    fs::write(&artifact, bytes).unwrap();

    assert_eq!(manager.state(&source).unwrap(), CacheState::Stale);
    let lookup = manager.lookup(&source).unwrap();
    assert_eq!(lookup.outcome, LookupOutcome::Populated { from: CacheState::Stale });
}

#[rstest]
fn test_pipeline_versions_use_separate_artifacts(workspace: Workspace) {
    let v1 = workspace.manager();
    let v2 = CacheManager::builder()
        .with_cache_folder(workspace.cache.clone())
        .with_pipeline_version("2")
        .finish()
        .unwrap();
    let source = ReferenceSource::from_path(&workspace.source);

    v1.lookup(&source).unwrap();
    let lookup = v2.lookup(&source).unwrap();
    assert_eq!(lookup.outcome, LookupOutcome::Populated { from: CacheState::Absent });
    assert_eq!(v1.lookup(&source).unwrap().outcome, LookupOutcome::Hit);
    assert_eq!(v1.list_artifacts().unwrap().len(), 2);
}

#[rstest]
fn test_serve_previous_under_contention(workspace: Workspace) {
    let manager = CacheManager::builder()
        .with_cache_folder(workspace.cache.clone())
        .with_contention_policy(ContentionPolicy::ServePrevious)
        .finish()
        .unwrap();
    let fast = ReferenceSource::from_path(&workspace.source);
    let previous = manager.lookup(&fast).unwrap();

    write_reference(&workspace.source, &[("chr1", 100, "A", "G", "benign")]);
    let slow = ReferenceSource::new(&workspace.source, CountingParser::new(Duration::from_millis(500)));

    thread::scope(|scope| {
        let populating = scope.spawn(|| manager.lookup(&slow).unwrap());

        let started = Instant::now();
        while manager.state(&slow).unwrap() != CacheState::Populating {
            assert!(started.elapsed() < Duration::from_secs(5), "population never started");
            thread::sleep(Duration::from_millis(5));
        }

        let served = manager.lookup(&slow).unwrap();
        assert_eq!(served.outcome, LookupOutcome::ServedPrevious);
        assert_eq!(*served.index, *previous.index);

        let fresh = populating.join().unwrap();
        assert_eq!(fresh.outcome, LookupOutcome::Populated { from: CacheState::Stale });
        assert_eq!(fresh.index.len(), 1);
    });

    assert_eq!(manager.stats().served_previous, 1);
}

#[rstest]
fn test_timeout_leaves_no_artifact(workspace: Workspace) {
    let manager = CacheManager::builder()
        .with_cache_folder(workspace.cache.clone())
        .with_populate_timeout(Duration::from_millis(100))
        .finish()
        .unwrap();
    let source = ReferenceSource::new(&workspace.source, CountingParser::new(Duration::from_secs(2)));

    let err = manager.lookup(&source).unwrap_err();
    assert!(matches!(err, CacheError::PopulateTimeout { .. }), "got {:?}", err);
    assert!(!workspace.artifact(&manager).exists());
    assert_eq!(workspace.leftover_temp_files(), 0);
    assert_eq!(manager.state(&source).unwrap(), CacheState::Absent);
}

#[rstest]
fn test_cancelled_population_leaves_no_artifact(workspace: Workspace) {
    let manager = workspace.manager();
    let source = ReferenceSource::from_path(&workspace.source);
    let token = manager.cancel_token();
    token.cancel();

    assert!(matches!(manager.lookup(&source), Err(CacheError::Cancelled(_))));
    assert!(!workspace.artifact(&manager).exists());
    assert_eq!(workspace.leftover_temp_files(), 0);

    token.reset();
    assert!(manager.lookup(&source).is_ok());
}

#[rstest]
fn test_invalidate_and_clear(workspace: Workspace) {
    let manager = workspace.manager();
    let source = ReferenceSource::from_path(&workspace.source);

    manager.lookup(&source).unwrap();
    assert!(manager.invalidate(&source).unwrap());
    assert!(!manager.invalidate(&source).unwrap());
    assert_eq!(manager.state(&source).unwrap(), CacheState::Absent);
    assert!(manager.inspect(&source).unwrap().is_none());

    manager.lookup(&source).unwrap();
    assert_eq!(manager.clear().unwrap(), 1);
    assert!(manager.list_artifacts().unwrap().is_empty());
}

#[rstest]
fn test_cancel_mid_population_keeps_previous_artifact(workspace: Workspace) {
    let manager = workspace.manager();
    let fast = ReferenceSource::from_path(&workspace.source);
    manager.lookup(&fast).unwrap();
    let artifact = workspace.artifact(&manager);
    let before = fs::read(&artifact).unwrap();

    write_reference(&workspace.source, &[("chr1", 100, "A", "G", "benign")]);
    let parser = CountingParser::new(Duration::from_secs(2));
    let slow = ReferenceSource::new(&workspace.source, parser.clone());
    let token = manager.cancel_token();

    let result = thread::scope(|scope| {
        let populating = scope.spawn(|| manager.lookup(&slow));

        let started = Instant::now();
        while manager.state(&slow).unwrap() != CacheState::Populating {
            assert!(started.elapsed() < Duration::from_secs(5), "population never started");
            thread::sleep(Duration::from_millis(5));
        }
        token.cancel();
        populating.join().unwrap()
    });

    assert!(matches!(result, Err(CacheError::Cancelled(_))), "got {:?}", result);
    assert_eq!(parser.calls(), 1);
    assert_eq!(fs::read(&artifact).unwrap(), before);
    assert_eq!(workspace.leftover_temp_files(), 0);
    assert_eq!(manager.state(&fast).unwrap(), CacheState::Stale);

    token.reset();
    let fresh = manager.lookup(&fast).unwrap();
    assert_eq!(fresh.outcome, LookupOutcome::Populated { from: CacheState::Stale });
    assert_eq!(fresh.index.len(), 1);
}

#[rstest]
fn test_timed_out_parse_is_not_restarted_while_running(workspace: Workspace) {
    let manager = CacheManager::builder()
        .with_cache_folder(workspace.cache.clone())
        .with_populate_timeout(Duration::from_millis(100))
        .finish()
        .unwrap();
    let parser = Arc::new(StubbornParser::default());
    let source = ReferenceSource::new(&workspace.source, parser.clone());

    for _ in 0..3 {
        let err = manager.lookup(&source).unwrap_err();
        assert!(matches!(err, CacheError::PopulateTimeout { .. }), "got {:?}", err);
    }
    assert_eq!(parser.calls.load(Ordering::SeqCst), 1);
    assert_eq!(parser.max_active.load(Ordering::SeqCst), 1);

    // once the stray parse exits, the key populates normally
    let started = Instant::now();
    while parser.active.load(Ordering::SeqCst) > 0 {
        assert!(started.elapsed() < Duration::from_secs(5), "parse never finished");
        thread::sleep(Duration::from_millis(10));
    }
    let lookup = manager.lookup(&ReferenceSource::from_path(&workspace.source)).unwrap();
    assert_eq!(lookup.outcome, LookupOutcome::Populated { from: CacheState::Absent });
    assert_eq!(parser.calls.load(Ordering::SeqCst), 1);
}

#[rstest]
fn test_invalidate_and_clear_remove_lock_files(workspace: Workspace) {
    let manager = workspace.manager();
    let source = ReferenceSource::from_path(&workspace.source);

    manager.lookup(&source).unwrap();
    assert_eq!(workspace.lock_files(), 1);
    manager.invalidate(&source).unwrap();
    assert_eq!(workspace.lock_files(), 0);

    manager.lookup(&source).unwrap();
    manager.clear().unwrap();
    assert_eq!(workspace.lock_files(), 0);

    // a failed cold population leaves a lock file but no artifact
    let failing = ReferenceSource::new(&workspace.source, Arc::new(FailingParser::default()));
    assert!(manager.lookup(&failing).is_err());
    assert_eq!(workspace.lock_files(), 1);
    assert_eq!(manager.clear().unwrap(), 0);
    assert_eq!(workspace.lock_files(), 0);
}

#[rstest]
fn test_hits_share_the_artifact_lock(workspace: Workspace) {
    let manager = workspace.manager();
    let source = ReferenceSource::from_path(&workspace.source);
    manager.lookup(&source).unwrap();

    // another reader holding the lock must not stall a hit
    let lock_path = fs::read_dir(&workspace.cache)
        .unwrap()
        .map(|e| e.unwrap().path())
        .find(|p| p.extension().and_then(|x| x.to_str()) == Some(LOCK_EXT))
        .unwrap();
    let reader = fs::File::open(&lock_path).unwrap();
    FileExt::lock_shared(&reader).unwrap();

    let (tx, rx) = crossbeam_channel::bounded(1);
    thread::scope(|scope| {
        let other = workspace.manager();
        let source = &source;
        scope.spawn(move || {
            let _ = tx.send(other.lookup(source).map(|l| l.outcome));
        });
        let outcome = rx.recv_timeout(Duration::from_secs(5));
        // release before the scope joins, so a blocked lookup cannot hang the test
        FileExt::unlock(&reader).unwrap();
        assert_eq!(outcome.unwrap().unwrap(), LookupOutcome::Hit);
    });
}
