//! Cooperative pause and cancel signalling for worker threads.
//!
//! The tracker owns the lifecycle; workers only hold an [`OperationControl`]
//! and check it between units of work. Pausing blocks a worker at its next
//! checkpoint until the operation is resumed or cancelled.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signal {
    Run,
    Pause,
    Cancel,
}

#[derive(Debug)]
struct Shared {
    signal: Mutex<Signal>,
    changed: Condvar,
}

/// Shared handle for cooperative pause/cancel.
///
/// Cloning is cheap; all clones observe the same signal.
#[derive(Debug, Clone)]
pub struct OperationControl {
    shared: Arc<Shared>,
}

impl Default for OperationControl {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationControl {
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                signal: Mutex::new(Signal::Run),
                changed: Condvar::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Signal> {
        self.shared
            .signal
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn set(&self, next: Signal) {
        let mut signal = self.lock();
        // Cancellation is sticky.
        if *signal != Signal::Cancel {
            *signal = next;
        }
        self.shared.changed.notify_all();
    }

    pub fn pause(&self) {
        self.set(Signal::Pause);
    }

    pub fn resume(&self) {
        self.set(Signal::Run);
    }

    pub fn cancel(&self) {
        self.set(Signal::Cancel);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.lock() == Signal::Cancel
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        *self.lock() == Signal::Pause
    }

    /// Block while paused. Returns `false` if the operation was cancelled.
    #[must_use]
    pub fn checkpoint(&self) -> bool {
        let mut signal = self.lock();
        while *signal == Signal::Pause {
            signal = self
                .shared
                .changed
                .wait(signal)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
        *signal != Signal::Cancel
    }

    /// Sleep for `duration`, waking early on cancellation.
    ///
    /// Returns `false` if the operation was cancelled before or during the
    /// sleep. Pausing does not shorten the sleep.
    #[must_use]
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut signal = self.lock();
        loop {
            if *signal == Signal::Cancel {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            signal = self
                .shared
                .changed
                .wait_timeout(signal, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }
    }
}
