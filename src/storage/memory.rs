//! In-memory storage with scriptable failures.
//!
//! Used by tests and benchmarks to drive the hash engine through retry,
//! cancellation and partial-failure paths without a real provider.

use std::collections::HashMap;
use std::io::{self, Cursor, Read};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use super::{StorageError, StorageReader};

/// How reads of a given file should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// The next `times` opens fail with a transient error, then opens succeed.
    TransientOpen {
        /// Number of failing opens
        times: u32,
    },
    /// The next `times` streams fail after `after_bytes` bytes.
    TransientRead {
        /// Number of failing streams
        times: u32,
        /// Bytes delivered before the error
        after_bytes: usize,
    },
    /// Every open fails with a transient error.
    AlwaysTransient,
    /// Every open fails with a permanent error.
    Permanent,
    /// Every open reports the file as missing.
    NotFound,
    /// Every open is denied.
    PermissionDenied,
}

#[derive(Debug, Default)]
struct AccessLog {
    failures: HashMap<String, FailureMode>,
    opens: HashMap<String, u32>,
}

/// A [`StorageReader`] backed by a map of file ID to bytes.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    contents: RwLock<HashMap<String, Vec<u8>>>,
    access: Mutex<AccessLog>,
    read_delay: Option<Duration>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long on every open, to simulate a slow provider.
    #[must_use]
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = Some(delay);
        self
    }

    /// Store (or replace) the content of a file.
    pub fn insert(&self, file_id: impl Into<String>, content: impl Into<Vec<u8>>) {
        if let Ok(mut contents) = self.contents.write() {
            contents.insert(file_id.into(), content.into());
        }
    }

    /// Script failures for a file. Replaces any previous script.
    pub fn fail(&self, file_id: impl Into<String>, mode: FailureMode) {
        if let Ok(mut access) = self.access.lock() {
            access.failures.insert(file_id.into(), mode);
        }
    }

    /// How many times `open_content` was called for a file.
    #[must_use]
    pub fn open_count(&self, file_id: &str) -> u32 {
        self.access
            .lock()
            .map(|a| a.opens.get(file_id).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Record an open and decide whether (and how) it fails.
    fn next_failure(&self, file_id: &str) -> Option<FailureMode> {
        let mut access = self.access.lock().ok()?;
        *access.opens.entry(file_id.to_string()).or_insert(0) += 1;

        let mode = access.failures.get(file_id).copied()?;
        let remaining = match mode {
            FailureMode::TransientOpen { times } | FailureMode::TransientRead { times, .. } => {
                times
            }
            _ => return Some(mode),
        };
        if remaining == 0 {
            access.failures.remove(file_id);
            return None;
        }

        let next = match mode {
            FailureMode::TransientOpen { .. } => FailureMode::TransientOpen {
                times: remaining - 1,
            },
            FailureMode::TransientRead { after_bytes, .. } => FailureMode::TransientRead {
                times: remaining - 1,
                after_bytes,
            },
            other => other,
        };
        access.failures.insert(file_id.to_string(), next);
        Some(mode)
    }
}

impl StorageReader for MemoryStorage {
    fn open_content(&self, file_id: &str) -> Result<Box<dyn Read + Send>, StorageError> {
        if let Some(delay) = self.read_delay {
            std::thread::sleep(delay);
        }

        let failure = self.next_failure(file_id);
        match failure {
            Some(FailureMode::TransientOpen { .. } | FailureMode::AlwaysTransient) => {
                return Err(StorageError::transient(file_id, "simulated timeout"));
            }
            Some(FailureMode::Permanent) => {
                return Err(StorageError::permanent(file_id, "simulated corruption"));
            }
            Some(FailureMode::NotFound) => return Err(StorageError::NotFound(file_id.to_string())),
            Some(FailureMode::PermissionDenied) => {
                return Err(StorageError::PermissionDenied(file_id.to_string()));
            }
            Some(FailureMode::TransientRead { .. }) | None => {}
        }

        let content = self
            .contents
            .read()
            .ok()
            .and_then(|c| c.get(file_id).cloned())
            .ok_or_else(|| StorageError::NotFound(file_id.to_string()))?;

        match failure {
            Some(FailureMode::TransientRead { after_bytes, .. }) => Ok(Box::new(FailingReader {
                inner: Cursor::new(content),
                remaining: after_bytes,
            })),
            _ => Ok(Box::new(Cursor::new(content))),
        }
    }
}

/// Delivers `remaining` bytes, then errors with a timeout.
struct FailingReader {
    inner: Cursor<Vec<u8>>,
    remaining: usize,
}

impl Read for FailingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "simulated connection drop",
            ));
        }
        let limit = buf.len().min(self.remaining);
        let n = self.inner.read(&mut buf[..limit])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "simulated connection drop",
            ));
        }
        self.remaining -= n;
        Ok(n)
    }
}
