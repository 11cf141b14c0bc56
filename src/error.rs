//! Crate-wide error taxonomy, exit codes and structured error output.

use serde::Serialize;

use crate::duplicates::GroupError;
use crate::gateway::GatewayError;
use crate::hasher::HashError;
use crate::progress::TrackerError;
use crate::storage::StorageError;

/// Every failure the core can surface to a caller.
///
/// Module errors convert into this type, so service entry points can use `?`
/// across the storage, hashing, grouping, tracking and persistence layers.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DedupeError {
    /// A retryable read or network failure.
    #[error("Transient I/O error: {0}")]
    TransientIo(String),

    /// A read failure that retrying will not fix (missing file, permissions).
    #[error("I/O error: {0}")]
    PermanentIo(String),

    /// An illegal lifecycle transition.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A bad argument.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The operation already finished.
    #[error("Already finished: {0}")]
    AlreadyTerminal(String),

    /// Catalog data contradicts itself.
    #[error("Data integrity problem: {0}")]
    DataIntegrity(String),

    /// No such operation or record.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The operation was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// The persistence gateway failed.
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

impl DedupeError {
    /// Whether retrying the same call may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientIo(_) | Self::Gateway(GatewayError::Unavailable(_)))
    }
}

impl From<StorageError> for DedupeError {
    fn from(err: StorageError) -> Self {
        if err.is_retryable() {
            Self::TransientIo(err.to_string())
        } else {
            Self::PermanentIo(err.to_string())
        }
    }
}

impl From<HashError> for DedupeError {
    fn from(err: HashError) -> Self {
        match err {
            HashError::Storage(e) => e.into(),
            HashError::RetriesExhausted { .. } => Self::TransientIo(err.to_string()),
            HashError::NotHashable { .. } => Self::InvalidInput(err.to_string()),
            HashError::Cancelled => Self::Cancelled,
            HashError::NothingProcessed { .. } | HashError::Pool(_) => {
                Self::PermanentIo(err.to_string())
            }
        }
    }
}

impl From<TrackerError> for DedupeError {
    fn from(err: TrackerError) -> Self {
        match err {
            TrackerError::NotFound(_) => Self::NotFound(err.to_string()),
            TrackerError::InvalidInput(_) => Self::InvalidInput(err.to_string()),
            TrackerError::InvalidState { .. } => Self::InvalidState(err.to_string()),
            TrackerError::AlreadyTerminal { .. } => Self::AlreadyTerminal(err.to_string()),
        }
    }
}

impl From<GroupError> for DedupeError {
    fn from(err: GroupError) -> Self {
        match err {
            GroupError::HashMismatch { .. } | GroupError::MergeMismatch { .. } => {
                Self::DataIntegrity(err.to_string())
            }
            GroupError::DuplicateMember(_) => Self::InvalidInput(err.to_string()),
        }
    }
}

/// Process exit codes.
///
/// - 0: Success (completed normally, duplicates found)
/// - 1: General error (unexpected failure)
/// - 2: No duplicates found (completed normally, no duplicates)
/// - 3: Partial success (completed, but some files could not be hashed)
/// - 130: Interrupted by user (Ctrl+C)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitCode {
    /// Success: run completed and duplicates were found.
    Success = 0,
    /// General error: an unexpected error occurred.
    GeneralError = 1,
    /// No duplicates: run completed but no duplicates were found.
    NoDuplicates = 2,
    /// Partial success: run completed but some files failed.
    PartialSuccess = 3,
    /// Interrupted: run was cancelled by the user (Ctrl+C).
    Interrupted = 130,
}

impl ExitCode {
    /// Get the numeric exit code.
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Get the machine-readable code prefix.
    #[must_use]
    pub fn code_prefix(self) -> &'static str {
        match self {
            Self::Success => "DD000",
            Self::GeneralError => "DD001",
            Self::NoDuplicates => "DD002",
            Self::PartialSuccess => "DD003",
            Self::Interrupted => "DD130",
        }
    }

    /// Exit code for an application error.
    ///
    /// A cancelled run maps to [`ExitCode::Interrupted`], anything else to
    /// [`ExitCode::GeneralError`].
    #[must_use]
    pub fn for_error(err: &anyhow::Error) -> Self {
        match err.downcast_ref::<DedupeError>() {
            Some(DedupeError::Cancelled) => Self::Interrupted,
            _ => Self::GeneralError,
        }
    }
}

/// Structured error information for JSON output.
#[derive(Debug, Serialize)]
pub struct StructuredError {
    /// The error code (e.g., "DD001")
    pub code: String,
    /// The exit code number
    pub exit_code: i32,
    /// Human-readable error message
    pub message: String,
    /// Whether the run was interrupted
    pub interrupted: bool,
}

impl StructuredError {
    /// Create a new structured error from an anyhow error and an exit code.
    #[must_use]
    pub fn new(err: &anyhow::Error, exit_code: ExitCode) -> Self {
        Self {
            code: exit_code.code_prefix().to_string(),
            exit_code: exit_code.as_i32(),
            message: format!("{err:#}"),
            interrupted: exit_code == ExitCode::Interrupted,
        }
    }
}
