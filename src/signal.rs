//! Ctrl+C handling.
//!
//! A [`ShutdownHandler`] owns a shared flag and a list of watched
//! [`OperationTracker`]s. When an interrupt arrives the flag is set and every
//! running or paused operation on the watched trackers is cancelled, which
//! wakes paused workers and interrupts retry backoff. The binary then exits
//! with code 130.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use drivedupe::progress::OperationTracker;
//! use drivedupe::signal::install_handler;
//!
//! let tracker = Arc::new(OperationTracker::default());
//! let handler = install_handler().expect("signal handler");
//! handler.watch(&tracker);
//! ```

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};

use crate::progress::{OperationId, OperationTracker};

/// Exit code for an interrupted run (128 + SIGINT).
pub const EXIT_CODE_INTERRUPTED: i32 = 130;

/// Shared shutdown state.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandler {
    flag: Arc<AtomicBool>,
    trackers: Arc<Mutex<Vec<Weak<OperationTracker>>>>,
}

impl ShutdownHandler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_shutdown_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Cancel active operations on `tracker` when shutdown is requested.
    ///
    /// Only a weak reference is kept.
    pub fn watch(&self, tracker: &Arc<OperationTracker>) {
        let mut trackers = self.trackers.lock().unwrap_or_else(PoisonError::into_inner);
        trackers.retain(|t| t.strong_count() > 0);
        trackers.push(Arc::downgrade(tracker));
    }

    /// Set the flag and cancel every active watched operation.
    ///
    /// Returns the IDs that were cancelled.
    pub fn request_shutdown(&self) -> Vec<OperationId> {
        self.flag.store(true, Ordering::SeqCst);
        let trackers: Vec<Arc<OperationTracker>> = self
            .trackers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        let cancelled: Vec<OperationId> = trackers
            .iter()
            .flat_map(|tracker| tracker.cancel_active())
            .collect();
        if !cancelled.is_empty() {
            log::info!("Cancelled {} running operations", cancelled.len());
        }
        cancelled
    }

    /// The flag, for components that poll it (directory walking).
    #[must_use]
    pub fn get_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }

    /// Clear the flag and forget watched trackers.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
        self.trackers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Error type for signal handler installation.
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    #[error("Failed to install signal handler: {0}")]
    InstallFailed(#[from] ctrlc::Error),
}

static GLOBAL_HANDLER: OnceLock<ShutdownHandler> = OnceLock::new();

/// Install the process-wide Ctrl+C handler.
///
/// Later calls return the same handler, reset. If another component already
/// owns the Ctrl+C hook, an unhooked handler is returned; it still works for
/// [`ShutdownHandler::request_shutdown`].
///
/// # Errors
///
/// Never fails in practice; the fallback covers installation conflicts.
pub fn install_handler() -> Result<ShutdownHandler, SignalError> {
    if let Some(handler) = GLOBAL_HANDLER.get() {
        handler.reset();
        return Ok(handler.clone());
    }

    let handler = ShutdownHandler::new();
    let hooked = handler.clone();
    match ctrlc::set_handler(move || {
        let _ = writeln!(std::io::stderr(), "\nInterrupted. Cancelling operations...");
        let _ = std::io::stderr().flush();
        log::info!("Shutdown signal received");
        hooked.request_shutdown();
    }) {
        Ok(()) => {
            let _ = GLOBAL_HANDLER.set(handler.clone());
            Ok(handler)
        }
        Err(e) => {
            log::debug!("Ctrl+C handler already registered ({e}), using unhooked handler");
            let fallback = GLOBAL_HANDLER.get_or_init(ShutdownHandler::new);
            fallback.reset();
            Ok(fallback.clone())
        }
    }
}
