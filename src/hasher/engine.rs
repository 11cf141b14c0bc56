//! Parallel batch hashing.
//!
//! # Overview
//!
//! [`HashEngine::compute_hashes`] hashes every eligible file of a batch on a
//! bounded rayon pool. Each worker streams one file at a time from the
//! [`StorageReader`], retries transient failures with the engine's
//! [`RetryPolicy`], and reports progress once per finished file (success or
//! final failure) through the batch's [`ProgressCallback`].
//!
//! A single bad file never fails the batch: it is recorded in the
//! [`HashReport`] and the other files carry on. The batch itself fails only
//! when it was cancelled or when every attempted file failed.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rayon::prelude::*;

use super::algorithm::{self, ContentHasher, HashAlgorithm, DEFAULT_BUFFER_SIZE};
use super::retry::RetryPolicy;
use super::{HashError, HashFailure, HashReport};
use crate::catalog::RemoteFile;
use crate::progress::{OperationControl, ProgressCallback};
use crate::storage::{StorageError, StorageReader};

/// Files larger than this are skipped by default (100 MiB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Default retry budget per file.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Throughput assumed by [`HashEngine::estimate_duration`] (50 MiB/s).
const ESTIMATED_BYTES_PER_SEC: f64 = 50.0 * 1024.0 * 1024.0;

/// Fixed cost assumed per file (open, metadata round trip).
const ESTIMATED_PER_FILE: Duration = Duration::from_millis(20);

/// Per-batch hashing options.
#[derive(Clone)]
pub struct HashBatchConfig {
    /// Worker threads (0 uses the available parallelism)
    pub worker_count: usize,
    /// Retries per file for transient failures
    pub max_retries: u32,
    /// Rehash files that already carry a hash
    pub force: bool,
    /// Skip files larger than this many bytes
    pub max_file_size: Option<u64>,
    /// Optional progress callback
    pub progress_callback: Option<Arc<dyn ProgressCallback>>,
    /// Optional pause/cancel handle
    pub control: Option<OperationControl>,
}

impl fmt::Debug for HashBatchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashBatchConfig")
            .field("worker_count", &self.worker_count)
            .field("max_retries", &self.max_retries)
            .field("force", &self.force)
            .field("max_file_size", &self.max_file_size)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<callback>"),
            )
            .field("control", &self.control.is_some())
            .finish()
    }
}

impl Default for HashBatchConfig {
    fn default() -> Self {
        Self {
            worker_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            force: false,
            max_file_size: Some(DEFAULT_MAX_FILE_SIZE),
            progress_callback: None,
            control: None,
        }
    }
}

impl HashBatchConfig {
    #[must_use]
    pub fn with_worker_count(mut self, workers: usize) -> Self {
        self.worker_count = workers;
        self
    }

    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    #[must_use]
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    #[must_use]
    pub fn with_max_file_size(mut self, max: Option<u64>) -> Self {
        self.max_file_size = max;
        self
    }

    #[must_use]
    pub fn with_progress_callback(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    #[must_use]
    pub fn with_control(mut self, control: OperationControl) -> Self {
        self.control = Some(control);
        self
    }

    /// Worker count with 0 resolved to the available parallelism.
    #[must_use]
    pub fn effective_workers(&self) -> usize {
        if self.worker_count > 0 {
            self.worker_count
        } else {
            std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get)
        }
    }

    fn is_cancelled(&self) -> bool {
        self.control.as_ref().is_some_and(OperationControl::is_cancelled)
    }
}

/// Why a file was left out of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Skip {
    AlreadyHashed,
    NotHashable,
    TooLarge,
}

/// Hashes catalog files read through a [`StorageReader`].
pub struct HashEngine {
    storage: Arc<dyn StorageReader>,
    hasher: Arc<dyn ContentHasher>,
    retry: RetryPolicy,
}

impl fmt::Debug for HashEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashEngine")
            .field("algorithm", &self.hasher.algorithm_name())
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl HashEngine {
    /// Create an engine for `algorithm` with the default buffer and retry policy.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageReader>, algorithm: HashAlgorithm) -> Self {
        Self::with_hasher(storage, algorithm.hasher(DEFAULT_BUFFER_SIZE))
    }

    /// Create an engine around a custom hasher.
    #[must_use]
    pub fn with_hasher(storage: Arc<dyn StorageReader>, hasher: Arc<dyn ContentHasher>) -> Self {
        Self {
            storage,
            hasher,
            retry: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    #[must_use]
    pub fn algorithm_name(&self) -> &'static str {
        self.hasher.algorithm_name()
    }

    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    fn hash_once(&self, file_id: &str) -> Result<String, StorageError> {
        let mut reader = self.storage.open_content(file_id)?;
        self.hasher
            .compute(&mut *reader)
            .map_err(|e| StorageError::from_io(file_id, &e))
    }

    fn classify(file: &RemoteFile, config: &HashBatchConfig) -> Option<Skip> {
        if !file.is_hashable() {
            Some(Skip::NotHashable)
        } else if !config.force && file.is_hash_calculated() {
            Some(Skip::AlreadyHashed)
        } else if config.max_file_size.is_some_and(|max| file.size > max) {
            Some(Skip::TooLarge)
        } else {
            None
        }
    }

    /// Hash one file, retrying transient failures up to `max_retries` times.
    ///
    /// # Errors
    ///
    /// [`HashError::NotHashable`] for folders, provider-native documents and
    /// empty files; otherwise the final storage error.
    pub fn compute_single(&self, file: &RemoteFile, max_retries: u32) -> Result<String, HashError> {
        if !file.is_hashable() {
            let reason = if file.is_folder() {
                "folder"
            } else if file.size == 0 {
                "empty file"
            } else {
                "no downloadable content"
            };
            return Err(HashError::NotHashable {
                file_id: file.id.clone(),
                reason: reason.to_string(),
            });
        }
        self.retry
            .run(&file.id, max_retries, None, |_| self.hash_once(&file.id))
            .0
    }

    /// Hash every eligible file in `files`, writing digests back in place.
    ///
    /// Files that already carry a hash (unless `force`), non-hashable files
    /// and files above `max_file_size` are skipped and counted in the report.
    /// Digests computed before a cancellation are still written back.
    ///
    /// # Errors
    ///
    /// - [`HashError::Cancelled`] if the batch's control was cancelled
    /// - [`HashError::NothingProcessed`] if every attempted file failed
    /// - [`HashError::Pool`] if the worker pool could not be built
    pub fn compute_hashes(
        &self,
        files: &mut [RemoteFile],
        config: &HashBatchConfig,
    ) -> Result<HashReport, HashError> {
        let started = Instant::now();
        let mut report = HashReport::default();

        let mut eligible = Vec::new();
        for (index, file) in files.iter().enumerate() {
            match Self::classify(file, config) {
                None => eligible.push(index),
                Some(Skip::AlreadyHashed) => report.skipped_already_hashed += 1,
                Some(Skip::NotHashable) => report.skipped_not_hashable += 1,
                Some(Skip::TooLarge) => {
                    log::debug!("Skipping {} ({} bytes): above size limit", file.id, file.size);
                    report.skipped_too_large += 1;
                }
            }
        }
        report.eligible = eligible.len();
        let total = eligible.len() as u64;

        if let Some(callback) = &config.progress_callback {
            callback.on_phase_start("hashing", total);
        }
        if eligible.is_empty() {
            log::debug!("Hashing: nothing to do ({} skipped)", report.skipped());
            report.duration = started.elapsed();
            return Ok(report);
        }

        let workers = config.effective_workers();
        log::info!(
            "Hashing {} files with {} workers ({})",
            eligible.len(),
            workers,
            self.hasher.algorithm_name()
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(|e| HashError::Pool(e.to_string()))?;

        let processed = AtomicU64::new(0);
        let snapshot: &[RemoteFile] = files;
        let results: Vec<(usize, Result<String, HashError>, u32)> = pool.install(|| {
            eligible
                .par_iter()
                .map(|&index| {
                    let file = &snapshot[index];
                    let (result, attempts) = self.retry.run(
                        &file.id,
                        config.max_retries,
                        config.control.as_ref(),
                        |_| self.hash_once(&file.id),
                    );
                    if matches!(result, Err(HashError::Cancelled)) {
                        log::trace!("Hashing: skipped {} after cancellation", file.id);
                        return (index, result, attempts);
                    }

                    let done = processed.fetch_add(1, Ordering::SeqCst) + 1;
                    if let Err(e) = &result {
                        log::warn!("Failed to hash {}: {e}", file.id);
                        if let Some(callback) = &config.progress_callback {
                            callback.on_item_failed(&file.id, &e.to_string());
                        }
                    }
                    if let Some(callback) = &config.progress_callback {
                        callback.on_progress(done, total);
                    }
                    (index, result, attempts)
                })
                .collect()
        });

        let mut cancelled = false;
        for (index, result, attempts) in results {
            let file = &mut files[index];
            match result {
                Ok(digest) => {
                    report.hashed += 1;
                    report.bytes_hashed += file.size;
                    file.set_hash(digest);
                }
                Err(HashError::Cancelled) => cancelled = true,
                Err(e) => report.failures.push(HashFailure::new(&file.id, attempts, &e)),
            }
        }
        report.failures.sort_by(|a, b| a.file_id.cmp(&b.file_id));
        report.duration = started.elapsed();

        if let Some(callback) = &config.progress_callback {
            callback.on_phase_end("hashing");
        }

        if cancelled || config.is_cancelled() {
            log::info!(
                "Hashing cancelled after {} of {} files",
                report.hashed + report.failed(),
                report.eligible
            );
            return Err(HashError::Cancelled);
        }
        if report.hashed == 0 {
            return Err(HashError::NothingProcessed {
                failed: report.failed(),
            });
        }

        log::info!(
            "Hashing complete: {} hashed, {} failed, {} skipped in {:.2?}",
            report.hashed,
            report.failed(),
            report.skipped(),
            report.duration
        );
        Ok(report)
    }

    /// Rough wall-time estimate for hashing `files` on one worker.
    #[must_use]
    pub fn estimate_duration(files: &[RemoteFile]) -> Duration {
        let hashable: Vec<_> = files.iter().filter(|f| f.is_hashable()).collect();
        let bytes: u64 = hashable.iter().map(|f| f.size).sum();
        let transfer = Duration::from_secs_f64(bytes as f64 / ESTIMATED_BYTES_PER_SEC);
        transfer + ESTIMATED_PER_FILE * u32::try_from(hashable.len()).unwrap_or(u32::MAX)
    }

    /// Whether `digest` has the shape of this engine's digests.
    #[must_use]
    pub fn validate_digest(&self, digest: &str) -> bool {
        algorithm::validate_digest(self.hasher.as_ref(), digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FailureMode, MemoryStorage};
    use chrono::Utc;
    use std::sync::Mutex;
    use std::thread;

    fn setup(count: usize) -> (Arc<MemoryStorage>, Vec<RemoteFile>) {
        let storage = Arc::new(MemoryStorage::new());
        let files = (0..count)
            .map(|i| {
                let id = format!("f{i}");
                let content = format!("content-{}", i % 3);
                storage.insert(id.clone(), content.clone().into_bytes());
                RemoteFile::new(id, format!("{i}.txt"), content.len() as u64, "text/plain", Utc::now())
            })
            .collect();
        (storage, files)
    }

    fn engine(storage: Arc<MemoryStorage>) -> HashEngine {
        HashEngine::new(storage, HashAlgorithm::Sha256).with_retry_policy(RetryPolicy::immediate())
    }

    #[test]
    fn test_hashes_all_files() {
        let (storage, mut files) = setup(6);
        let report = engine(storage)
            .compute_hashes(&mut files, &HashBatchConfig::default().with_worker_count(3))
            .unwrap();
        assert_eq!(report.hashed, 6);
        assert!(files.iter().all(RemoteFile::is_hash_calculated));
        assert_eq!(files[0].hash(), files[3].hash());
        assert_ne!(files[0].hash(), files[1].hash());
    }

    #[test]
    fn test_skips_already_hashed_unless_forced() {
        let (storage, mut files) = setup(2);
        files[0].set_hash("preset");
        let engine = engine(storage);

        let report = engine
            .compute_hashes(&mut files, &HashBatchConfig::default())
            .unwrap();
        assert_eq!(report.skipped_already_hashed, 1);
        assert_eq!(files[0].hash(), Some("preset"));

        let report = engine
            .compute_hashes(&mut files, &HashBatchConfig::default().with_force(true))
            .unwrap();
        assert_eq!(report.hashed, 2);
        assert_ne!(files[0].hash(), Some("preset"));
    }

    #[test]
    fn test_skips_unhashable_and_large_files() {
        let (storage, mut files) = setup(1);
        files.push(RemoteFile::new("empty", "e", 0, "text/plain", Utc::now()));
        files.push(RemoteFile::new("big", "b", 500, "text/plain", Utc::now()));

        let report = engine(storage)
            .compute_hashes(&mut files, &HashBatchConfig::default().with_max_file_size(Some(100)))
            .unwrap();
        assert_eq!(report.hashed, 1);
        assert_eq!(report.skipped_not_hashable, 1);
        assert_eq!(report.skipped_too_large, 1);
        assert!(report.failures.is_empty());
    }

    #[test]
    fn test_transient_failure_recovers() {
        let (storage, mut files) = setup(3);
        storage.fail("f1", FailureMode::TransientOpen { times: 2 });
        storage.fail(
            "f2",
            FailureMode::TransientRead {
                times: 1,
                after_bytes: 2,
            },
        );
        let report = engine(Arc::clone(&storage))
            .compute_hashes(&mut files, &HashBatchConfig::default().with_max_retries(3))
            .unwrap();
        assert_eq!(report.hashed, 3);
        assert_eq!(storage.open_count("f1"), 3);
        assert_eq!(storage.open_count("f2"), 2);
    }

    #[test]
    fn test_permanent_failure_is_recorded_not_retried() {
        let (storage, mut files) = setup(3);
        storage.fail("f1", FailureMode::Permanent);
        let report = engine(Arc::clone(&storage))
            .compute_hashes(&mut files, &HashBatchConfig::default())
            .unwrap();
        assert_eq!(report.hashed, 2);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.failures[0].file_id, "f1");
        assert!(!report.failures[0].transient);
        assert_eq!(storage.open_count("f1"), 1);
        assert!(!files[1].is_hash_calculated());
    }

    #[test]
    fn test_all_failed_is_nothing_processed() {
        let (storage, mut files) = setup(2);
        storage.fail("f0", FailureMode::AlwaysTransient);
        storage.fail("f1", FailureMode::NotFound);
        let err = engine(storage)
            .compute_hashes(&mut files, &HashBatchConfig::default().with_max_retries(1))
            .unwrap_err();
        assert_eq!(err, HashError::NothingProcessed { failed: 2 });
    }

    #[test]
    fn test_progress_counts_every_file_once() {
        let (storage, mut files) = setup(8);
        storage.fail("f5", FailureMode::Permanent);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback = move |done: u64, total: u64| sink.lock().unwrap().push((done, total));

        engine(storage)
            .compute_hashes(
                &mut files,
                &HashBatchConfig::default()
                    .with_worker_count(4)
                    .with_progress_callback(Arc::new(callback)),
            )
            .unwrap();

        let mut values: Vec<u64> = seen.lock().unwrap().iter().map(|(d, _)| *d).collect();
        values.sort_unstable();
        assert_eq!(values, (1..=8).collect::<Vec<_>>());
        assert!(seen.lock().unwrap().iter().all(|(_, t)| *t == 8));
    }

    #[test]
    fn test_cancelled_batch_returns_cancelled() {
        let (storage, mut files) = setup(4);
        let control = OperationControl::new();
        control.cancel();
        let err = engine(storage)
            .compute_hashes(&mut files, &HashBatchConfig::default().with_control(control))
            .unwrap_err();
        assert_eq!(err, HashError::Cancelled);
        assert!(files.iter().all(|f| !f.is_hash_calculated()));
    }

    #[test]
    fn test_paused_batch_waits_for_resume() {
        let (storage, files) = setup(4);
        let control = OperationControl::new();
        control.pause();
        let seen = Arc::new(AtomicU64::new(0));
        let sink = Arc::clone(&seen);
        let callback = move |_: u64, _: u64| {
            sink.fetch_add(1, Ordering::SeqCst);
        };
        let config = HashBatchConfig::default()
            .with_worker_count(2)
            .with_control(control.clone())
            .with_progress_callback(Arc::new(callback));

        let engine = engine(storage);
        let handle = thread::spawn(move || {
            let mut files = files;
            engine.compute_hashes(&mut files, &config).map(|r| r.hashed)
        });

        thread::sleep(Duration::from_millis(50));
        assert_eq!(seen.load(Ordering::SeqCst), 0);
        control.resume();
        assert_eq!(handle.join().unwrap().unwrap(), 4);
    }

    #[test]
    fn test_compute_single_is_idempotent() {
        let (storage, files) = setup(1);
        let engine = engine(storage);
        let first = engine.compute_single(&files[0], 0).unwrap();
        let second = engine.compute_single(&files[0], 0).unwrap();
        assert_eq!(first, second);
        assert!(engine.validate_digest(&first));
    }

    #[test]
    fn test_compute_single_rejects_folders() {
        let (storage, _) = setup(0);
        let folder = RemoteFile::new("d", "d", 1, crate::catalog::FOLDER_MIME_TYPE, Utc::now());
        assert!(matches!(
            engine(storage).compute_single(&folder, 3),
            Err(HashError::NotHashable { .. })
        ));
    }

    #[test]
    fn test_estimate_duration() {
        let files = vec![RemoteFile::new("a", "a", 50 * 1024 * 1024, "video/mp4", Utc::now())];
        let estimate = HashEngine::estimate_duration(&files);
        assert!(estimate >= Duration::from_secs(1));
        assert!(estimate < Duration::from_secs(2));
        assert_eq!(HashEngine::estimate_duration(&[]), Duration::ZERO);
    }
}
