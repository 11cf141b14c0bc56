//! Operation tracking and progress reporting.
//!
//! Long-running work (hashing, duplicate searches) is registered with an
//! [`OperationTracker`], which owns each operation's [`Progress`] record and
//! lifecycle:
//!
//! ```text
//! pending --start--> running --pause--> paused --resume--> running
//! running --complete--> completed
//! running/paused --cancel--> cancelled
//! running --fail--> failed
//! ```
//!
//! Workers never mutate progress records directly. They report through a
//! [`ProgressCallback`] (usually a [`TrackerReporter`]) and observe pause and
//! cancel requests through an [`OperationControl`].
//!
//! # Example
//!
//! ```
//! use drivedupe::progress::{OperationTracker, OperationStatus, operation_types};
//!
//! let tracker = OperationTracker::default();
//! let id = tracker.start(operation_types::HASH_CALCULATION, 4).unwrap();
//! let stream = tracker.subscribe(id).unwrap();
//!
//! tracker.update(id, 2, "hashing").unwrap();
//! tracker.complete(id).unwrap();
//!
//! let last = stream.iter().last().unwrap();
//! assert_eq!(last.status, OperationStatus::Completed);
//! assert_eq!(last.processed_items, 4);
//! ```

pub mod bar;
pub mod control;
pub mod model;
pub mod stream;
pub mod throttle;
pub mod tracker;

pub use bar::TerminalProgress;
pub use control::OperationControl;
pub use model::{
    operation_types, LogEntry, MetadataValue, OperationId, OperationStatus, Progress, Transition,
};
pub use stream::{ProgressUpdate, Subscription};
pub use throttle::{NotificationThrottle, ThrottleConfig};
pub use tracker::{OperationStats, OperationTracker, TrackerConfig, TrackerReporter};

/// Receives progress from hashing and grouping workers.
///
/// Methods may be called concurrently from several worker threads, and
/// `on_progress` values from different workers can arrive out of order.
pub trait ProgressCallback: Send + Sync {
    /// Called once before work starts with the number of items to process.
    fn on_phase_start(&self, _phase: &str, _total: u64) {}

    /// Called after each processed item with the running count.
    fn on_progress(&self, processed: u64, total: u64);

    /// Called when an item failed for good (after any retries).
    fn on_item_failed(&self, _item_id: &str, _error: &str) {}

    /// Called once after the last item.
    fn on_phase_end(&self, _phase: &str) {}
}

impl<F> ProgressCallback for F
where
    F: Fn(u64, u64) + Send + Sync,
{
    fn on_progress(&self, processed: u64, total: u64) {
        self(processed, total);
    }
}

/// Errors returned by the [`OperationTracker`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TrackerError {
    /// No operation with this ID is tracked.
    #[error("Operation {0} not found")]
    NotFound(OperationId),

    /// An argument was out of range.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The requested transition is not allowed from the current state.
    #[error("Cannot {action} operation {id} while it is {status}")]
    InvalidState {
        id: OperationId,
        action: &'static str,
        status: OperationStatus,
    },

    /// The operation already finished and can no longer change.
    #[error("Operation {id} already {status}")]
    AlreadyTerminal {
        id: OperationId,
        status: OperationStatus,
    },
}
