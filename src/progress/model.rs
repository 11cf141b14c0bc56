//! Progress records and the operation state machine.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::TrackerError;

/// Well-known operation type tags. Any other string is accepted too.
pub mod operation_types {
    pub const FILE_SCAN: &str = "file_scan";
    pub const DUPLICATE_SEARCH: &str = "duplicate_search";
    pub const FOLDER_COMPARISON: &str = "folder_comparison";
    pub const HASH_CALCULATION: &str = "hash_calculation";
}

/// Numeric identity of a tracked operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(pub u64);

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl OperationStatus {
    /// Completed, failed and cancelled operations never change state again.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Running or paused.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A lifecycle transition request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Start,
    Pause,
    Resume,
    Cancel,
    Complete,
    Fail(String),
}

impl Transition {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Cancel => "cancel",
            Self::Complete => "complete",
            Self::Fail(_) => "fail",
        }
    }

    fn target(&self, from: OperationStatus) -> Option<OperationStatus> {
        use OperationStatus::{Cancelled, Completed, Failed, Paused, Pending, Running};

        match (self, from) {
            (Self::Start, Pending) => Some(Running),
            (Self::Pause, Running) => Some(Paused),
            (Self::Resume, Paused) => Some(Running),
            (Self::Cancel, Running | Paused) => Some(Cancelled),
            (Self::Complete, Running) => Some(Completed),
            (Self::Fail(_), Running) => Some(Failed),
            _ => None,
        }
    }
}

/// A metadata value attached to an operation.
///
/// Serialized untagged: strings, integers, floats, booleans and nested maps
/// map directly onto their JSON counterparts. Integers are tried before
/// floats, so `10` stays an [`MetadataValue::Integer`] after a round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Map(BTreeMap<String, MetadataValue>),
}

impl MetadataValue {
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<bool> for MetadataValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for MetadataValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<i32> for MetadataValue {
    fn from(v: i32) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<u64> for MetadataValue {
    fn from(v: u64) -> Self {
        Self::Integer(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<usize> for MetadataValue {
    fn from(v: usize) -> Self {
        Self::Integer(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<f64> for MetadataValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<BTreeMap<String, MetadataValue>> for MetadataValue {
    fn from(v: BTreeMap<String, MetadataValue>) -> Self {
        Self::Map(v)
    }
}

/// One timestamped line in an operation log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// Full state of one tracked operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub id: OperationId,
    pub operation_type: String,
    pub status: OperationStatus,
    pub processed_items: u64,
    pub total_items: u64,
    pub current_step: String,
    /// Set only when the operation failed
    pub error_message: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub metadata: BTreeMap<String, MetadataValue>,
    #[serde(default)]
    pub logs: Vec<LogEntry>,
}

impl Progress {
    /// A fresh record in the `pending` state.
    #[must_use]
    pub fn new(id: OperationId, operation_type: impl Into<String>, total_items: u64) -> Self {
        let now = Utc::now();
        Self {
            id,
            operation_type: operation_type.into(),
            status: OperationStatus::Pending,
            processed_items: 0,
            total_items,
            current_step: String::new(),
            error_message: None,
            start_time: now,
            end_time: None,
            last_updated: now,
            metadata: BTreeMap::new(),
            logs: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply a lifecycle transition.
    ///
    /// # Errors
    ///
    /// [`TrackerError::InvalidState`] for any transition the current status
    /// does not allow, finished operations included. The record is left
    /// untouched on error.
    pub fn apply(&mut self, transition: Transition) -> Result<(), TrackerError> {
        let Some(target) = transition.target(self.status) else {
            return Err(TrackerError::InvalidState {
                id: self.id,
                action: transition.name(),
                status: self.status,
            });
        };

        let now = Utc::now();
        match transition {
            Transition::Start => self.start_time = now,
            Transition::Complete => {
                self.processed_items = self.processed_items.max(self.total_items);
            }
            Transition::Fail(message) => self.error_message = Some(message),
            Transition::Pause | Transition::Resume | Transition::Cancel => {}
        }
        if target.is_terminal() {
            self.end_time = Some(now);
        }
        self.status = target;
        self.last_updated = now;
        Ok(())
    }

    /// Record progress. Lower values than the recorded one are clamped.
    ///
    /// # Errors
    ///
    /// [`TrackerError::AlreadyTerminal`] on a finished operation,
    /// [`TrackerError::InvalidState`] on one that never started.
    pub fn record_progress(&mut self, processed: u64, step: &str) -> Result<(), TrackerError> {
        if self.is_terminal() {
            return Err(TrackerError::AlreadyTerminal {
                id: self.id,
                status: self.status,
            });
        }
        if !self.status.is_active() {
            return Err(TrackerError::InvalidState {
                id: self.id,
                action: "update",
                status: self.status,
            });
        }
        self.processed_items = self.processed_items.max(processed);
        if !step.is_empty() {
            self.current_step = step.to_string();
        }
        self.last_updated = Utc::now();
        Ok(())
    }

    /// Completion percentage in `[0, 100]`.
    #[must_use]
    pub fn percentage(&self) -> f64 {
        if self.total_items == 0 {
            return if self.status == OperationStatus::Completed {
                100.0
            } else {
                0.0
            };
        }
        let pct = self.processed_items as f64 * 100.0 / self.total_items as f64;
        pct.clamp(0.0, 100.0)
    }

    /// Time since the operation started, up to its end if it has one.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        let end = self.end_time.unwrap_or_else(Utc::now);
        (end - self.start_time).to_std().unwrap_or_default()
    }

    /// Remaining time estimate from the average rate so far.
    ///
    /// `None` when nothing was processed yet, when the rate is zero, or when
    /// the operation is not running or paused.
    #[must_use]
    pub fn eta(&self) -> Option<Duration> {
        if !self.status.is_active() || self.processed_items == 0 {
            return None;
        }
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed <= 0.0 {
            return None;
        }
        let rate = self.processed_items as f64 / elapsed;
        if rate <= 0.0 {
            return None;
        }
        let remaining = self.total_items.saturating_sub(self.processed_items) as f64;
        // Estimates beyond Duration::MAX are reported as unknown
        Duration::try_from_secs_f64(remaining / rate).ok()
    }

    /// Time since the last recorded change.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        (Utc::now() - self.last_updated).to_std().unwrap_or_default()
    }

    pub fn append_log(&mut self, message: impl Into<String>) {
        self.logs.push(LogEntry {
            timestamp: Utc::now(),
            message: message.into(),
        });
    }
}
