//! Cache manager: lookup, validation, population and invalidation of
//! reference artifacts.
//!
//! Every (reference source, pipeline version) pair maps to one artifact file
//! in the cache folder. A lookup fingerprints the source, then either decodes
//! the artifact (when its stored fingerprint matches) or runs the full parse
//! and atomically replaces the artifact.
//!
//! Population for one key is serialized by an in-process per-key mutex plus
//! an advisory file lock next to the artifact; unrelated keys never wait on
//! each other.
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs::{self, File, OpenOptions, create_dir_all};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::anyhow;
use crossbeam_channel::RecvTimeoutError;
use fs2::FileExt;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use varanno_core::models::AnnotationRecord;

use crate::artifact::{self, ArtifactHeader, HeaderProbe};
use crate::consts::{
    ARTIFACT_EXT, DEFAULT_PIPELINE_VERSION, DEFAULT_POPULATE_TIMEOUT_SECS, LOCK_EXT,
};
use crate::error::{CacheError, CodecError, Result};
use crate::fingerprint::{DigestStrategy, SourceFingerprint, source_identity};
use crate::index::ReferenceIndex;
use crate::parser::{ReferenceParser, StopFlag, parser_for_path};
use crate::utils::{expand_folder, get_default_cache_folder, is_safe_version};

/// How often a waiting lookup re-checks cancellation while a parse runs.
const PARSE_POLL_INTERVAL: Duration = Duration::from_millis(25);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Advisory lock taken on an artifact's lock file.
#[derive(Debug, Clone, Copy)]
enum LockMode {
    /// Readers of a valid artifact.
    Shared,
    /// Population, invalidation and removal.
    Exclusive,
}

/// `<artifact>.vca.lock`
fn lock_path_for(artifact_path: &Path) -> PathBuf {
    artifact_path.with_extension(format!("{}.{}", ARTIFACT_EXT, LOCK_EXT))
}

/// Delete a lock file while its lock is still held, then release it.
fn release_lock_file(lock_path: &Path, held: File) {
    if let Err(e) = artifact::remove_artifact(lock_path) {
        debug!("Could not remove lock file {:?}: {}", lock_path, e);
    }
    drop(held);
}

/// Lifecycle state of one cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheState {
    Absent,
    Valid,
    Stale,
    Populating,
}

impl fmt::Display for CacheState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CacheState::Absent => "absent",
            CacheState::Valid => "valid",
            CacheState::Stale => "stale",
            CacheState::Populating => "populating",
        };
        write!(f, "{}", s)
    }
}

/// What a lookup does when another caller is populating the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentionPolicy {
    /// Wait for the population to finish.
    #[default]
    Block,
    /// Return the index this manager last loaded for the key, if it holds one;
    /// otherwise wait.
    ServePrevious,
}

/// How a lookup obtained its index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupOutcome {
    /// Decoded from a valid artifact.
    Hit,
    /// Built by a full parse; `from` is the state the key was in before.
    Populated { from: CacheState },
    /// A corrupt artifact was discarded and rebuilt.
    Recovered,
    /// Served from memory while another caller populated.
    ServedPrevious,
}

impl fmt::Display for LookupOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LookupOutcome::Hit => write!(f, "hit"),
            LookupOutcome::Populated { from } => write!(f, "populated (was {})", from),
            LookupOutcome::Recovered => write!(f, "recovered from corrupt artifact"),
            LookupOutcome::ServedPrevious => write!(f, "served previous index"),
        }
    }
}

/// Result of a successful lookup.
#[derive(Debug, Clone)]
pub struct CacheLookup {
    pub index: Arc<ReferenceIndex>,
    pub fingerprint: SourceFingerprint,
    pub outcome: LookupOutcome,
    pub elapsed: Duration,
}

/// Cache key: one artifact per (source identity, pipeline version).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub source_id: String,
    pub pipeline_version: String,
}

impl CacheKey {
    pub fn artifact_file_name(&self) -> String {
        format!("{}-v{}.{}", self.source_id, self.pipeline_version, ARTIFACT_EXT)
    }
}

/// A reference dump plus the parser that reads it.
#[derive(Clone)]
pub struct ReferenceSource {
    path: PathBuf,
    parser: Arc<dyn ReferenceParser>,
}

impl ReferenceSource {
    pub fn new<P: Into<PathBuf>>(path: P, parser: Arc<dyn ReferenceParser>) -> Self {
        ReferenceSource {
            path: path.into(),
            parser,
        }
    }

    /// Source with a parser chosen from the file extension.
    pub fn from_path<P: Into<PathBuf>>(path: P) -> Self {
        let path = path.into();
        let parser: Arc<dyn ReferenceParser> = Arc::from(parser_for_path(&path));
        ReferenceSource { path, parser }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn parser(&self) -> &dyn ReferenceParser {
        self.parser.as_ref()
    }
}

impl fmt::Debug for ReferenceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReferenceSource")
            .field("path", &self.path)
            .field("parser", &self.parser.name())
            .finish()
    }
}

/// Shared flag that aborts in-flight populations.
///
/// A cancelled population never installs its artifact; the temporary file is
/// removed and the previous artifact, if any, stays current.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn flag(&self) -> &AtomicBool {
        &self.0
    }
}

/// Counters for cache activity.
///
/// Counters use `Relaxed` ordering; they are for reporting only.
#[derive(Debug, Default)]
struct CacheCounters {
    hits: AtomicU64,
    populations: AtomicU64,
    corrupt_recoveries: AtomicU64,
    served_previous: AtomicU64,
    parse_failures: AtomicU64,
}

/// Point-in-time copy of the cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Lookups answered from a valid artifact
    pub hits: u64,
    /// Full parses that installed a new artifact
    pub populations: u64,
    /// Corrupt artifacts discarded and rebuilt
    pub corrupt_recoveries: u64,
    /// Lookups served from memory under contention
    pub served_previous: u64,
    /// Lookups that gave up with a parse failure
    pub parse_failures: u64,
}

impl CacheStats {
    /// Share of lookups that avoided a full parse, as a percentage.
    pub fn hit_rate(&self) -> f64 {
        let fast = self.hits + self.served_previous;
        let total = fast + self.populations;
        if total == 0 {
            0.0
        } else {
            (fast as f64 / total as f64) * 100.0
        }
    }
}

/// Serializable cache configuration, e.g. the `[cache]` table of a config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub cache_folder: Option<PathBuf>,
    pub pipeline_version: String,
    pub contention: ContentionPolicy,
    pub populate_timeout_secs: u64,
    pub digest: DigestStrategy,
}

impl Default for CacheSettings {
    fn default() -> Self {
        CacheSettings {
            cache_folder: None,
            pipeline_version: DEFAULT_PIPELINE_VERSION.to_string(),
            contention: ContentionPolicy::default(),
            populate_timeout_secs: DEFAULT_POPULATE_TIMEOUT_SECS,
            digest: DigestStrategy::default(),
        }
    }
}

/// Builder for constructing a [`CacheManager`] with custom configuration.
///
/// # Examples
///
/// ```rust,no_run
/// use std::path::PathBuf;
/// use std::time::Duration;
/// use varanno_cache::manager::{CacheManager, ContentionPolicy};
///
/// # fn main() -> Result<(), varanno_cache::error::CacheError> {
/// let manager = CacheManager::builder()
///     .with_cache_folder(PathBuf::from("/scratch/varanno"))
///     .with_pipeline_version("3")
///     .with_contention_policy(ContentionPolicy::ServePrevious)
///     .with_populate_timeout(Duration::from_secs(600))
///     .finish()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct CacheManagerBuilder {
    cache_folder: Option<PathBuf>,
    pipeline_version: Option<String>,
    digest: DigestStrategy,
    contention: ContentionPolicy,
    populate_timeout: Option<Duration>,
    cancel: Option<CancelToken>,
}

impl CacheManagerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a settings table; later `with_*` calls override it.
    pub fn with_settings(mut self, settings: &CacheSettings) -> Self {
        if let Some(folder) = &settings.cache_folder {
            self.cache_folder = Some(folder.clone());
        }
        self.pipeline_version = Some(settings.pipeline_version.clone());
        self.digest = settings.digest;
        self.contention = settings.contention;
        self.populate_timeout = Some(Duration::from_secs(settings.populate_timeout_secs));
        self
    }

    pub fn with_cache_folder(mut self, path: PathBuf) -> Self {
        self.cache_folder = Some(path);
        self
    }

    pub fn with_pipeline_version(mut self, version: impl Into<String>) -> Self {
        self.pipeline_version = Some(version.into());
        self
    }

    pub fn with_digest_strategy(mut self, digest: DigestStrategy) -> Self {
        self.digest = digest;
        self
    }

    pub fn with_contention_policy(mut self, policy: ContentionPolicy) -> Self {
        self.contention = policy;
        self
    }

    pub fn with_populate_timeout(mut self, timeout: Duration) -> Self {
        self.populate_timeout = Some(timeout);
        self
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Consumes the builder and creates the manager, creating the cache folder if needed.
    pub fn finish(self) -> Result<CacheManager> {
        let cache_folder = expand_folder(self.cache_folder.unwrap_or_else(get_default_cache_folder));
        create_dir_all(&cache_folder)?;

        let pipeline_version = self
            .pipeline_version
            .unwrap_or_else(|| DEFAULT_PIPELINE_VERSION.to_string());
        if !is_safe_version(&pipeline_version) {
            return Err(CacheError::Config(format!(
                "pipeline version '{}' may only contain letters, digits, '.', '_' and '-'",
                pipeline_version
            )));
        }

        let populate_timeout = self
            .populate_timeout
            .unwrap_or(Duration::from_secs(DEFAULT_POPULATE_TIMEOUT_SECS));
        if populate_timeout.is_zero() {
            return Err(CacheError::Config("populate timeout must be positive".to_string()));
        }

        self.digest.validate()?;

        debug!(
            "Cache folder {:?}, pipeline version {}, timeout {:?}",
            cache_folder, pipeline_version, populate_timeout
        );

        Ok(CacheManager {
            cache_folder,
            pipeline_version,
            digest: self.digest,
            contention: self.contention,
            populate_timeout,
            cancel: self.cancel.unwrap_or_default(),
            key_locks: Mutex::new(HashMap::new()),
            populating: Mutex::new(HashSet::new()),
            loaded: Mutex::new(HashMap::new()),
            abandoned: Mutex::new(HashMap::new()),
            counters: CacheCounters::default(),
        })
    }
}

/// Removes a key from the populating set when dropped.
struct PopulatingMarker<'a> {
    set: &'a Mutex<HashSet<CacheKey>>,
    key: CacheKey,
}

impl<'a> PopulatingMarker<'a> {
    fn new(set: &'a Mutex<HashSet<CacheKey>>, key: &CacheKey) -> Self {
        lock(set).insert(key.clone());
        PopulatingMarker {
            set,
            key: key.clone(),
        }
    }
}

impl Drop for PopulatingMarker<'_> {
    fn drop(&mut self) {
        lock(self.set).remove(&self.key);
    }
}

/// What the artifact on disk is worth for a given fingerprint.
enum Prior {
    Absent,
    Valid,
    Stale,
    Corrupt(String),
}

/// Owner of the cache folder and every artifact in it.
///
/// Share one manager across threads (it is `Sync`); per-key work is
/// serialized internally.
pub struct CacheManager {
    cache_folder: PathBuf,
    pipeline_version: String,
    digest: DigestStrategy,
    contention: ContentionPolicy,
    populate_timeout: Duration,
    cancel: CancelToken,
    key_locks: Mutex<HashMap<CacheKey, Arc<Mutex<()>>>>,
    populating: Mutex<HashSet<CacheKey>>,
    loaded: Mutex<HashMap<CacheKey, (SourceFingerprint, Arc<ReferenceIndex>)>>,
    /// Parse threads that outlived a timeout or cancellation. A key never
    /// starts a new parse while its previous one is still running.
    abandoned: Mutex<HashMap<CacheKey, JoinHandle<()>>>,
    counters: CacheCounters,
}

impl CacheManager {
    /// Create a builder for a manager.
    pub fn builder() -> CacheManagerBuilder {
        CacheManagerBuilder::new()
    }

    pub fn cache_folder(&self) -> &Path {
        &self.cache_folder
    }

    pub fn pipeline_version(&self) -> &str {
        &self.pipeline_version
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            populations: self.counters.populations.load(Ordering::Relaxed),
            corrupt_recoveries: self.counters.corrupt_recoveries.load(Ordering::Relaxed),
            served_previous: self.counters.served_previous.load(Ordering::Relaxed),
            parse_failures: self.counters.parse_failures.load(Ordering::Relaxed),
        }
    }

    pub fn key_for(&self, source: &ReferenceSource) -> Result<CacheKey> {
        Ok(CacheKey {
            source_id: source_identity(source.path())?,
            pipeline_version: self.pipeline_version.clone(),
        })
    }

    pub fn artifact_path(&self, key: &CacheKey) -> PathBuf {
        self.cache_folder.join(key.artifact_file_name())
    }

    pub fn fingerprint(&self, source: &ReferenceSource) -> Result<SourceFingerprint> {
        SourceFingerprint::compute(source.path(), self.digest)
    }

    ///
    /// Get the reference index for a source, from the cache when it is valid
    /// and by a full parse otherwise.
    ///
    /// # Errors
    /// - [`CacheError::SourceUnavailable`] if the source cannot be read
    /// - [`CacheError::ParseFailure`] if the parse fails twice, or once after
    ///   a corrupt artifact was discarded; a previous artifact is left in place
    /// - [`CacheError::PopulateTimeout`] / [`CacheError::Cancelled`]
    pub fn lookup(&self, source: &ReferenceSource) -> Result<CacheLookup> {
        self.resolve(source, false)
    }

    /// Rebuild the artifact from the source even if the current one is valid.
    pub fn force_refresh(&self, source: &ReferenceSource) -> Result<CacheLookup> {
        self.resolve(source, true)
    }

    ///
    /// Remove the artifact for a source.
    ///
    /// # Returns
    /// - whether an artifact was removed
    pub fn invalidate(&self, source: &ReferenceSource) -> Result<bool> {
        let key = self.key_for(source)?;
        let key_lock = self.key_lock(&key);
        let _guard = lock(&key_lock);
        let path = self.artifact_path(&key);
        let file_lock = self.file_lock(&path, LockMode::Exclusive)?;

        lock(&self.loaded).remove(&key);
        let removed = artifact::remove_artifact(&path)?;
        if removed {
            info!("Invalidated cache artifact {:?}", path);
        }
        release_lock_file(&lock_path_for(&path), file_lock);
        Ok(removed)
    }

    /// Current state of a source's cache entry. Never parses or decodes.
    pub fn state(&self, source: &ReferenceSource) -> Result<CacheState> {
        let key = self.key_for(source)?;
        if lock(&self.populating).contains(&key) {
            return Ok(CacheState::Populating);
        }

        let fingerprint = self.fingerprint(source)?;
        Ok(match self.judge(&key, &fingerprint)? {
            Prior::Absent => CacheState::Absent,
            Prior::Valid => CacheState::Valid,
            Prior::Stale | Prior::Corrupt(_) => CacheState::Stale,
        })
    }

    ///
    /// Read the artifact header for a source without decoding any records.
    ///
    /// # Returns
    /// - `None` when there is no artifact
    pub fn inspect(&self, source: &ReferenceSource) -> Result<Option<ArtifactHeader>> {
        let key = self.key_for(source)?;
        let path = self.artifact_path(&key);
        match artifact::probe_header(&path)? {
            HeaderProbe::Missing => Ok(None),
            HeaderProbe::Readable(header) => Ok(Some(header)),
            HeaderProbe::OtherVersion(v) => Err(CacheError::CorruptArtifact {
                path,
                reason: format!("written by artifact format version {}", v),
            }),
            HeaderProbe::Corrupt(reason) => Err(CacheError::CorruptArtifact { path, reason }),
        }
    }

    /// Every artifact file in the cache folder with what its header says.
    pub fn list_artifacts(&self) -> Result<Vec<(PathBuf, HeaderProbe)>> {
        let mut artifacts = Vec::new();
        for entry in fs::read_dir(&self.cache_folder)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some(ARTIFACT_EXT) {
                let probe = artifact::probe_header(&path)?;
                artifacts.push((path, probe));
            }
        }
        artifacts.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(artifacts)
    }

    ///
    /// Remove every artifact in the cache folder, and the lock files next to them.
    ///
    /// # Returns
    /// - the number of artifacts removed
    pub fn clear(&self) -> Result<usize> {
        lock(&self.loaded).clear();
        let mut removed = 0;
        for (path, _) in self.list_artifacts()? {
            let file_lock = self.file_lock(&path, LockMode::Exclusive)?;
            if artifact::remove_artifact(&path)? {
                removed += 1;
            }
            release_lock_file(&lock_path_for(&path), file_lock);
        }

        // lock files whose artifact never got written (failed or timed out populations)
        for entry in fs::read_dir(&self.cache_folder)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some(LOCK_EXT) {
                let file_lock = self.lock_file(&path, LockMode::Exclusive)?;
                release_lock_file(&path, file_lock);
            }
        }

        info!("Removed {} cache artifacts from {:?}", removed, self.cache_folder);
        Ok(removed)
    }

    fn key_lock(&self, key: &CacheKey) -> Arc<Mutex<()>> {
        Arc::clone(lock(&self.key_locks).entry(key.clone()).or_default())
    }

    fn file_lock(&self, artifact_path: &Path, mode: LockMode) -> Result<File> {
        self.lock_file(&lock_path_for(artifact_path), mode)
    }

    fn lock_file(&self, lock_path: &Path, mode: LockMode) -> Result<File> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(lock_path)?;
        match mode {
            LockMode::Shared => FileExt::lock_shared(&file)?,
            LockMode::Exclusive => FileExt::lock_exclusive(&file)?,
        }
        Ok(file)
    }

    fn judge(&self, key: &CacheKey, fingerprint: &SourceFingerprint) -> Result<Prior> {
        Ok(match artifact::probe_header(&self.artifact_path(key))? {
            HeaderProbe::Missing => Prior::Absent,
            HeaderProbe::Readable(header)
                if header.fingerprint == *fingerprint
                    && header.pipeline_version == key.pipeline_version =>
            {
                Prior::Valid
            }
            HeaderProbe::Readable(_) | HeaderProbe::OtherVersion(_) => Prior::Stale,
            HeaderProbe::Corrupt(reason) => Prior::Corrupt(reason),
        })
    }

    fn serve_previous(&self, key: &CacheKey, started: Instant) -> Option<CacheLookup> {
        if !lock(&self.populating).contains(key) {
            return None;
        }
        let (fingerprint, index) = lock(&self.loaded).get(key).cloned()?;
        self.counters.served_previous.fetch_add(1, Ordering::Relaxed);
        info!(
            "Serving previously loaded index for {} while it is repopulated",
            key.source_id
        );
        Some(CacheLookup {
            index,
            fingerprint,
            outcome: LookupOutcome::ServedPrevious,
            elapsed: started.elapsed(),
        })
    }

    fn resolve(&self, source: &ReferenceSource, force: bool) -> Result<CacheLookup> {
        let started = Instant::now();
        let key = self.key_for(source)?;
        let fingerprint = self.fingerprint(source)?;

        let key_lock = self.key_lock(&key);
        let _guard = match self.contention {
            ContentionPolicy::Block => lock(&key_lock),
            ContentionPolicy::ServePrevious => match key_lock.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => {
                    if let Some(lookup) = self.serve_previous(&key, started) {
                        return Ok(lookup);
                    }
                    lock(&key_lock)
                }
            },
        };

        let path = self.artifact_path(&key);

        // readers of a valid artifact only need a shared lock
        if !force {
            let _shared = self.file_lock(&path, LockMode::Shared)?;
            if let (_, Some(index)) = self.load_valid(&key, &path, &fingerprint)? {
                return Ok(self.hit(source, key, fingerprint, index, started));
            }
        }

        let _exclusive = self.file_lock(&path, LockMode::Exclusive)?;
        let prior = if force {
            self.judge(&key, &fingerprint)?
        } else {
            // another process may have populated while we waited for the lock
            match self.load_valid(&key, &path, &fingerprint)? {
                (_, Some(index)) => return Ok(self.hit(source, key, fingerprint, index, started)),
                (prior, None) => prior,
            }
        };

        let (outcome, attempts) = match prior {
            Prior::Corrupt(reason) => {
                warn!("Discarding corrupt cache artifact {:?}: {}", path, reason);
                artifact::remove_artifact(&path)?;
                self.counters.corrupt_recoveries.fetch_add(1, Ordering::Relaxed);
                (LookupOutcome::Recovered, 1)
            }
            Prior::Absent => (LookupOutcome::Populated { from: CacheState::Absent }, 2),
            Prior::Stale => {
                info!(
                    "Cache artifact for {:?} is stale (source digest now {})",
                    source.path(),
                    fingerprint.short_digest()
                );
                (LookupOutcome::Populated { from: CacheState::Stale }, 2)
            }
            Prior::Valid => (LookupOutcome::Populated { from: CacheState::Valid }, 2),
        };

        let index = self.populate(source, &key, &path, &fingerprint, attempts)?;
        Ok(self.finish_lookup(key, fingerprint, index, outcome, started))
    }

    ///
    /// Judge the artifact and decode it when it is valid. A valid header over
    /// an undecodable payload is reported as corrupt.
    ///
    fn load_valid(
        &self,
        key: &CacheKey,
        path: &Path,
        fingerprint: &SourceFingerprint,
    ) -> Result<(Prior, Option<ReferenceIndex>)> {
        let prior = self.judge(key, fingerprint)?;
        if !matches!(prior, Prior::Valid) {
            return Ok((prior, None));
        }
        match artifact::read_artifact(path) {
            Ok((_, records)) => Ok((Prior::Valid, Some(ReferenceIndex::from_sorted(records)))),
            Err(CodecError::CorruptArtifact(reason)) => Ok((Prior::Corrupt(reason), None)),
            Err(CodecError::Io(e)) => Err(e.into()),
        }
    }

    fn hit(
        &self,
        source: &ReferenceSource,
        key: CacheKey,
        fingerprint: SourceFingerprint,
        index: ReferenceIndex,
        started: Instant,
    ) -> CacheLookup {
        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        info!(
            "Cache hit for {:?}: {} records in {:?}",
            source.path(),
            index.len(),
            started.elapsed()
        );
        self.finish_lookup(key, fingerprint, Arc::new(index), LookupOutcome::Hit, started)
    }

    fn finish_lookup(
        &self,
        key: CacheKey,
        fingerprint: SourceFingerprint,
        index: Arc<ReferenceIndex>,
        outcome: LookupOutcome,
        started: Instant,
    ) -> CacheLookup {
        lock(&self.loaded).insert(key, (fingerprint.clone(), Arc::clone(&index)));
        CacheLookup {
            index,
            fingerprint,
            outcome,
            elapsed: started.elapsed(),
        }
    }

    /// Full parse, encode and atomic install. Caller holds the key locks.
    fn populate(
        &self,
        source: &ReferenceSource,
        key: &CacheKey,
        path: &Path,
        fingerprint: &SourceFingerprint,
        attempts: u32,
    ) -> Result<Arc<ReferenceIndex>> {
        let _marker = PopulatingMarker::new(&self.populating, key);
        let deadline = Instant::now() + self.populate_timeout;

        let mut last_reason = String::new();
        for attempt in 1..=attempts {
            let parse_started = Instant::now();
            info!(
                "Parsing {:?} with the {} parser (attempt {}/{})",
                source.path(),
                source.parser().name(),
                attempt,
                attempts
            );

            let records = match self.parse_until(source, key, deadline)? {
                Ok(records) => records,
                Err(e) => {
                    last_reason = format!("{:#}", e);
                    warn!("Parse of {:?} failed: {}", source.path(), last_reason);
                    continue;
                }
            };

            let index = ReferenceIndex::from_records(records);
            info!(
                "Parsed {} records from {:?} in {:?}",
                index.len(),
                source.path(),
                parse_started.elapsed()
            );

            let header = ArtifactHeader::new(&key.pipeline_version, fingerprint.clone(), index.len() as u64);
            let bytes = artifact::encode_artifact(&header, index.records())?;
            if Instant::now() > deadline {
                return Err(CacheError::PopulateTimeout {
                    path: source.path().to_path_buf(),
                    timeout: self.populate_timeout,
                });
            }
            artifact::write_atomic(path, &bytes, self.cancel.flag())?;

            self.counters.populations.fetch_add(1, Ordering::Relaxed);
            info!("Wrote cache artifact {:?} ({} bytes)", path, bytes.len());
            return Ok(Arc::new(index));
        }

        self.counters.parse_failures.fetch_add(1, Ordering::Relaxed);
        Err(CacheError::ParseFailure {
            path: source.path().to_path_buf(),
            reason: last_reason,
        })
    }

    ///
    /// Run the parser on its own thread and wait for it until `deadline`.
    ///
    /// The outer result carries fatal conditions (timeout, cancellation); the
    /// inner one the parser's own verdict. On timeout or cancellation the
    /// parser is told to stop and its thread is parked in `abandoned`; the
    /// next parse for the key waits for it first.
    fn parse_until(
        &self,
        source: &ReferenceSource,
        key: &CacheKey,
        deadline: Instant,
    ) -> Result<anyhow::Result<Vec<AnnotationRecord>>> {
        self.wait_for_abandoned(source, key, deadline)?;

        let (tx, rx) = crossbeam_channel::bounded(1);
        let parser = Arc::clone(&source.parser);
        let path = source.path.clone();
        let stop = StopFlag::new();
        let thread_stop = stop.clone();
        let handle = thread::Builder::new()
            .name(format!("varanno-parse-{}", parser.name()))
            .spawn(move || {
                let _ = tx.send(parser.parse(&path, &thread_stop));
            })?;

        loop {
            if let Some(err) = self.interrupted(source, deadline) {
                stop.stop();
                lock(&self.abandoned).insert(key.clone(), handle);
                return Err(err);
            }

            let wait = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(wait.min(PARSE_POLL_INTERVAL)) {
                Ok(result) => {
                    let _ = handle.join();
                    return Ok(result);
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    let _ = handle.join();
                    return Ok(Err(anyhow!("parser thread for {:?} panicked", source.path)));
                }
            }
        }
    }

    /// Cancellation or an expired deadline, as the error to report.
    fn interrupted(&self, source: &ReferenceSource, deadline: Instant) -> Option<CacheError> {
        if self.cancel.is_cancelled() {
            return Some(CacheError::Cancelled(source.path.clone()));
        }
        if Instant::now() >= deadline {
            return Some(CacheError::PopulateTimeout {
                path: source.path.clone(),
                timeout: self.populate_timeout,
            });
        }
        None
    }

    /// Block until a parse abandoned earlier for `key` has exited.
    fn wait_for_abandoned(
        &self,
        source: &ReferenceSource,
        key: &CacheKey,
        deadline: Instant,
    ) -> Result<()> {
        let Some(handle) = lock(&self.abandoned).remove(key) else {
            return Ok(());
        };
        debug!("Waiting for an earlier parse of {:?} to stop", source.path);

        while !handle.is_finished() {
            if let Some(err) = self.interrupted(source, deadline) {
                warn!(
                    "An earlier parse of {:?} is still running; not starting another",
                    source.path
                );
                lock(&self.abandoned).insert(key.clone(), handle);
                return Err(err);
            }
            thread::sleep(PARSE_POLL_INTERVAL);
        }
        let _ = handle.join();
        Ok(())
    }
}
