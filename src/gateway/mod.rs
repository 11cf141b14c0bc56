//! Persistence gateway contract.
//!
//! The core never owns storage for catalog files, duplicate groups or
//! progress records. It reads and writes them through a
//! [`PersistenceGateway`], and treats every read as a snapshot that may be
//! stale by the time it writes back.
//!
//! [`MemoryGateway`] is a complete in-process implementation used by the CLI
//! and the tests. Implementations backed by a database are expected to serve
//! [`PersistenceGateway::files_without_hash`] and
//! [`PersistenceGateway::files_by_hash`] from an index.

pub mod memory;

pub use memory::MemoryGateway;

use crate::catalog::RemoteFile;
use crate::duplicates::DuplicateGroup;
use crate::progress::{OperationId, Progress};

/// Errors reported by a gateway implementation.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The backing store could not be reached.
    #[error("Persistence backend unavailable: {0}")]
    Unavailable(String),

    /// A record was rejected by the backing store.
    #[error("Record rejected for {key}: {reason}")]
    Rejected { key: String, reason: String },
}

/// Storage for catalog files, duplicate groups and progress records.
///
/// Records are keyed by their identity: file ID, group hash, operation ID.
/// Upserts overwrite whole records.
pub trait PersistenceGateway: Send + Sync {
    /// Insert or replace a batch of files.
    fn upsert_files(&self, files: &[RemoteFile]) -> Result<(), GatewayError>;

    fn file(&self, file_id: &str) -> Result<Option<RemoteFile>, GatewayError>;

    /// Every catalogued file.
    fn files(&self) -> Result<Vec<RemoteFile>, GatewayError>;

    /// Files that still need a content hash.
    fn files_without_hash(&self) -> Result<Vec<RemoteFile>, GatewayError>;

    fn files_by_hash(&self, hash: &str) -> Result<Vec<RemoteFile>, GatewayError>;

    /// Files whose parent set contains `folder_id`.
    fn files_in_folder(&self, folder_id: &str) -> Result<Vec<RemoteFile>, GatewayError>;

    fn upsert_group(&self, group: &DuplicateGroup) -> Result<(), GatewayError>;

    fn group(&self, hash: &str) -> Result<Option<DuplicateGroup>, GatewayError>;

    fn groups(&self) -> Result<Vec<DuplicateGroup>, GatewayError>;

    /// Remove a group. Returns whether it existed.
    fn delete_group(&self, hash: &str) -> Result<bool, GatewayError>;

    fn upsert_progress(&self, progress: &Progress) -> Result<(), GatewayError>;

    fn progress(&self, id: OperationId) -> Result<Option<Progress>, GatewayError>;

    fn progress_records(&self) -> Result<Vec<Progress>, GatewayError>;
}
