//! Content hashing of catalog files.
//!
//! This module provides functionality for:
//! - Pluggable digest algorithms ([`ContentHasher`], [`HashAlgorithm`])
//! - Bounded exponential backoff for transient read errors ([`RetryPolicy`])
//! - Parallel batch hashing on a bounded rayon pool ([`HashEngine`])
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use chrono::Utc;
//! use drivedupe::catalog::RemoteFile;
//! use drivedupe::hasher::{HashAlgorithm, HashBatchConfig, HashEngine};
//! use drivedupe::storage::MemoryStorage;
//!
//! let storage = MemoryStorage::new();
//! storage.insert("a", b"same bytes".to_vec());
//! storage.insert("b", b"same bytes".to_vec());
//!
//! let engine = HashEngine::new(Arc::new(storage), HashAlgorithm::Sha256);
//! let mut files = vec![
//!     RemoteFile::new("a", "a.txt", 10, "text/plain", Utc::now()),
//!     RemoteFile::new("b", "b.txt", 10, "text/plain", Utc::now()),
//! ];
//!
//! let report = engine
//!     .compute_hashes(&mut files, &HashBatchConfig::default().with_worker_count(2))
//!     .unwrap();
//! assert_eq!(report.hashed, 2);
//! assert_eq!(files[0].hash(), files[1].hash());
//! ```

pub mod algorithm;
pub mod engine;
pub mod retry;

use std::time::Duration;

use serde::Serialize;

pub use algorithm::{
    digests_equal, supported_algorithms, validate_digest, Blake3Hasher, ContentHasher,
    HashAlgorithm, Sha256Hasher, UnknownAlgorithm, DEFAULT_BUFFER_SIZE,
};
pub use engine::{HashBatchConfig, HashEngine, DEFAULT_MAX_FILE_SIZE};
pub use retry::RetryPolicy;

use crate::storage::StorageError;

/// Errors that can occur while hashing.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum HashError {
    /// A non-retryable storage failure.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A transient failure persisted through every retry.
    #[error("Gave up on {file_id} after {attempts} attempts: {last}")]
    RetriesExhausted {
        file_id: String,
        attempts: u32,
        last: StorageError,
    },

    /// The file has no byte content that can be hashed.
    #[error("File {file_id} cannot be hashed: {reason}")]
    NotHashable { file_id: String, reason: String },

    /// The operation was cancelled.
    #[error("Hashing was cancelled")]
    Cancelled,

    /// Every attempted file failed.
    #[error("No file could be hashed ({failed} failed)")]
    NothingProcessed { failed: usize },

    /// The worker pool could not be created.
    #[error("Failed to build hashing worker pool: {0}")]
    Pool(String),
}

impl HashError {
    /// Whether the failure came from a transient storage error.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RetriesExhausted { .. })
            || matches!(self, Self::Storage(e) if e.is_retryable())
    }
}

/// A file that could not be hashed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HashFailure {
    pub file_id: String,
    pub attempts: u32,
    pub message: String,
    pub transient: bool,
}

impl HashFailure {
    fn new(file_id: &str, attempts: u32, error: &HashError) -> Self {
        Self {
            file_id: file_id.to_string(),
            attempts,
            message: error.to_string(),
            transient: error.is_transient(),
        }
    }
}

/// Outcome of one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HashReport {
    /// Files that were eligible for hashing in this batch
    pub eligible: usize,
    /// Files hashed successfully
    pub hashed: usize,
    /// Skipped because they already carried a hash
    pub skipped_already_hashed: usize,
    /// Skipped because they have no hashable content
    pub skipped_not_hashable: usize,
    /// Skipped because they exceed the size limit
    pub skipped_too_large: usize,
    /// Bytes read from storage for successful files
    pub bytes_hashed: u64,
    /// Per-file failures, ordered by file ID
    pub failures: Vec<HashFailure>,
    /// Wall time of the batch
    pub duration: Duration,
}

impl HashReport {
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    /// Skipped files of every kind.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.skipped_already_hashed + self.skipped_not_hashable + self.skipped_too_large
    }

    /// Some, but not all, eligible files failed.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        self.failed() > 0 && self.hashed > 0
    }

    /// Hashing throughput in bytes per second.
    #[must_use]
    pub fn throughput(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs <= 0.0 {
            0.0
        } else {
            self.bytes_hashed as f64 / secs
        }
    }
}
