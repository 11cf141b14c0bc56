//! Storage reader capability.
//!
//! The hash engine never talks to a concrete provider client. It reads file
//! content through the [`StorageReader`] trait, keyed by the catalog's opaque
//! file ID, and classifies failures with [`StorageError`] so it can decide
//! whether a retry makes sense.
//!
//! # Adapters
//!
//! - [`LocalStorage`]: serves a local directory tree (used by the CLI)
//! - [`MemoryStorage`]: in-memory content with scriptable failures (used by tests)

pub mod local;
pub mod memory;

use std::io::{self, Read};

pub use local::LocalStorage;
pub use memory::{FailureMode, MemoryStorage};

/// Read access to file content in remote storage.
///
/// Implementations must be shareable across hashing workers.
pub trait StorageReader: Send + Sync {
    /// Open a byte stream over the content of `file_id`.
    ///
    /// Errors raised while reading the returned stream are classified by the
    /// caller with [`StorageError::from_io`].
    fn open_content(&self, file_id: &str) -> Result<Box<dyn Read + Send>, StorageError>;
}

impl<S: StorageReader + ?Sized> StorageReader for std::sync::Arc<S> {
    fn open_content(&self, file_id: &str) -> Result<Box<dyn Read + Send>, StorageError> {
        (**self).open_content(file_id)
    }
}

/// Errors returned by a [`StorageReader`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// A failure that may succeed if retried (timeouts, dropped connections).
    #[error("Transient storage error for {file_id}: {message}")]
    Transient {
        /// File being read
        file_id: String,
        /// Provider or I/O message
        message: String,
    },

    /// The file no longer exists.
    #[error("File not found: {0}")]
    NotFound(String),

    /// The account may not read this file.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Any other failure that will not go away on retry.
    #[error("Storage error for {file_id}: {message}")]
    Permanent {
        /// File being read
        file_id: String,
        /// Provider or I/O message
        message: String,
    },
}

impl StorageError {
    /// Shorthand for a [`StorageError::Transient`].
    #[must_use]
    pub fn transient(file_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            file_id: file_id.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a [`StorageError::Permanent`].
    #[must_use]
    pub fn permanent(file_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Permanent {
            file_id: file_id.into(),
            message: message.into(),
        }
    }

    /// Whether retrying the same read could succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Classify an I/O error raised while opening or reading `file_id`.
    ///
    /// Missing files and permission problems keep their own variants. Data
    /// and argument errors are permanent. Everything else (interrupted reads,
    /// timeouts, resets, unexpected EOF) is treated as transient.
    #[must_use]
    pub fn from_io(file_id: &str, error: &io::Error) -> Self {
        use io::ErrorKind;

        match error.kind() {
            ErrorKind::NotFound => Self::NotFound(file_id.to_string()),
            ErrorKind::PermissionDenied => Self::PermissionDenied(file_id.to_string()),
            ErrorKind::InvalidInput
            | ErrorKind::InvalidData
            | ErrorKind::Unsupported
            | ErrorKind::IsADirectory => Self::permanent(file_id, error.to_string()),
            _ => Self::transient(file_id, error.to_string()),
        }
    }

    /// The file ID this error refers to.
    #[must_use]
    pub fn file_id(&self) -> &str {
        match self {
            Self::Transient { file_id, .. } | Self::Permanent { file_id, .. } => file_id,
            Self::NotFound(id) | Self::PermissionDenied(id) => id,
        }
    }
}
