//! Progress update streams.
//!
//! Each subscriber gets its own bounded crossbeam channel. The producer keeps
//! a clone of the receiving end so that, when the buffer is full, it can pop
//! the oldest queued update and push the new one without ever blocking.
//! Liveness is tracked with a weak token because the producer's own receiver
//! keeps the channel connected.

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use serde::Serialize;

use super::model::{OperationId, OperationStatus, Progress};

/// A point-in-time view of an operation, as delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressUpdate {
    pub id: OperationId,
    pub operation_type: String,
    pub status: OperationStatus,
    pub processed_items: u64,
    pub total_items: u64,
    pub percentage: f64,
    pub current_step: String,
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ProgressUpdate {
    #[must_use]
    pub fn from_progress(progress: &Progress) -> Self {
        Self {
            id: progress.id,
            operation_type: progress.operation_type.clone(),
            status: progress.status,
            processed_items: progress.processed_items,
            total_items: progress.total_items,
            percentage: progress.percentage(),
            current_step: progress.current_step.clone(),
            error_message: progress.error_message.clone(),
            timestamp: progress.last_updated,
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Producer side of one subscription, owned by the tracker.
#[derive(Debug)]
pub(crate) struct Subscriber {
    sender: Sender<ProgressUpdate>,
    evict: Receiver<ProgressUpdate>,
    alive: Weak<()>,
}

impl Subscriber {
    pub(crate) fn is_alive(&self) -> bool {
        self.alive.strong_count() > 0
    }

    /// Queue an update, dropping the oldest one if the buffer is full.
    ///
    /// Returns `false` once the subscription has been dropped.
    pub(crate) fn deliver(&self, update: ProgressUpdate) -> bool {
        if !self.is_alive() {
            return false;
        }

        let mut pending = update;
        loop {
            match self.sender.try_send(pending) {
                Ok(()) => return true,
                Err(TrySendError::Full(rejected)) => {
                    let _ = self.evict.try_recv();
                    pending = rejected;
                }
                Err(TrySendError::Disconnected(_)) => return false,
            }
        }
    }
}

/// Consumer side of a progress stream.
///
/// The stream ends (iteration stops, `recv` returns `None`) after the
/// operation reaches a terminal state and all queued updates were read.
#[derive(Debug)]
pub struct Subscription {
    id: OperationId,
    receiver: Receiver<ProgressUpdate>,
    _alive: Arc<()>,
}

/// Create a linked subscriber/subscription pair with the given capacity.
pub(crate) fn channel(id: OperationId, capacity: usize) -> (Subscriber, Subscription) {
    let (sender, receiver) = bounded(capacity.max(1));
    let alive = Arc::new(());
    let subscriber = Subscriber {
        sender,
        evict: receiver.clone(),
        alive: Arc::downgrade(&alive),
    };
    let subscription = Subscription {
        id,
        receiver,
        _alive: alive,
    };
    (subscriber, subscription)
}

impl Subscription {
    /// The operation this stream follows.
    #[must_use]
    pub fn operation_id(&self) -> OperationId {
        self.id
    }

    /// Block until the next update, or `None` once the stream has ended.
    #[must_use]
    pub fn recv(&self) -> Option<ProgressUpdate> {
        self.receiver.recv().ok()
    }

    /// Wait up to `timeout` for the next update.
    ///
    /// `Ok(None)` means the timeout elapsed; `Err(())` means the stream ended.
    #[allow(clippy::result_unit_err)]
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<ProgressUpdate>, ()> {
        match self.receiver.recv_timeout(timeout) {
            Ok(update) => Ok(Some(update)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(()),
        }
    }

    /// Non-blocking read of the next queued update.
    #[must_use]
    pub fn try_recv(&self) -> Option<ProgressUpdate> {
        self.receiver.try_recv().ok()
    }

    /// Drain everything currently queued.
    #[must_use]
    pub fn drain(&self) -> Vec<ProgressUpdate> {
        self.receiver.try_iter().collect()
    }

    /// Blocking iterator that ends with the stream.
    pub fn iter(&self) -> impl Iterator<Item = ProgressUpdate> + '_ {
        self.receiver.iter()
    }
}
