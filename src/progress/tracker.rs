//! The operation tracker.
//!
//! Each operation lives in its own slot behind an `RwLock`, so updates to
//! different operations never contend. The ID map is only locked long enough
//! to look up or insert a slot. Notifications are sent while the slot's write
//! lock is held, which keeps `processed_items` non-decreasing in every stream.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;

use super::control::OperationControl;
use super::model::{LogEntry, MetadataValue, OperationId, OperationStatus, Progress, Transition};
use super::stream::{self, ProgressUpdate, Subscriber, Subscription};
use super::throttle::{NotificationThrottle, ThrottleConfig};
use super::{ProgressCallback, TrackerError};
use crate::gateway::PersistenceGateway;

/// Tracker settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackerConfig {
    /// Notification throttling applied to progress updates
    pub throttle: ThrottleConfig,
    /// Queued updates per subscriber before the oldest is dropped
    pub subscriber_buffer: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            throttle: ThrottleConfig::default(),
            subscriber_buffer: 64,
        }
    }
}

impl TrackerConfig {
    #[must_use]
    pub fn with_throttle(mut self, throttle: ThrottleConfig) -> Self {
        self.throttle = throttle;
        self
    }

    #[must_use]
    pub fn with_subscriber_buffer(mut self, capacity: usize) -> Self {
        self.subscriber_buffer = capacity.max(1);
        self
    }
}

/// Aggregate counts over every tracked operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OperationStats {
    pub total: usize,
    pub by_status: BTreeMap<OperationStatus, usize>,
    pub by_type: BTreeMap<String, usize>,
    /// Mean wall time of completed operations
    pub average_completion_time: Option<Duration>,
}

impl OperationStats {
    #[must_use]
    pub fn count(&self, status: OperationStatus) -> usize {
        self.by_status.get(&status).copied().unwrap_or(0)
    }

    /// Completed operations as a percentage of finished ones.
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        let completed = self.count(OperationStatus::Completed);
        let finished = completed
            + self.count(OperationStatus::Failed)
            + self.count(OperationStatus::Cancelled);
        if finished == 0 {
            0.0
        } else {
            (completed as f64 / finished as f64) * 100.0
        }
    }
}

struct SlotState {
    progress: Progress,
    subscribers: Vec<Subscriber>,
    throttle: NotificationThrottle,
}

struct OperationSlot {
    state: RwLock<SlotState>,
    control: OperationControl,
}

impl OperationSlot {
    fn read(&self) -> RwLockReadGuard<'_, SlotState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, SlotState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Owns the lifecycle, progress and subscribers of every operation.
pub struct OperationTracker {
    operations: RwLock<HashMap<OperationId, Arc<OperationSlot>>>,
    next_id: AtomicU64,
    config: TrackerConfig,
    gateway: Option<Arc<dyn PersistenceGateway>>,
}

impl fmt::Debug for OperationTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationTracker")
            .field("operations", &self.len())
            .field("config", &self.config)
            .field("gateway", &self.gateway.as_ref().map(|_| "<gateway>"))
            .finish()
    }
}

impl Default for OperationTracker {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

impl OperationTracker {
    #[must_use]
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            operations: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            config,
            gateway: None,
        }
    }

    /// Persist every transition and delivered notification through `gateway`.
    #[must_use]
    pub fn with_gateway(mut self, gateway: Arc<dyn PersistenceGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    #[must_use]
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Number of tracked operations, finished ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.operations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, id: OperationId) -> Result<Arc<OperationSlot>, TrackerError> {
        self.operations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
            .ok_or(TrackerError::NotFound(id))
    }

    fn slots(&self) -> Vec<Arc<OperationSlot>> {
        self.operations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    fn snapshots_where(&self, keep: impl Fn(&Progress) -> bool) -> Vec<Progress> {
        let mut out: Vec<Progress> = self
            .slots()
            .iter()
            .filter_map(|slot| {
                let state = slot.read();
                keep(&state.progress).then(|| state.progress.clone())
            })
            .collect();
        out.sort_by_key(|p| p.id);
        out
    }

    fn persist(&self, progress: &Progress) {
        if let Some(gateway) = &self.gateway {
            if let Err(e) = gateway.upsert_progress(progress) {
                log::warn!("Failed to persist operation {}: {e}", progress.id);
            }
        }
    }

    /// Send the current state to subscribers and the gateway.
    ///
    /// Unforced notifications go through the throttle first.
    fn dispatch(&self, state: &mut SlotState, forced: bool) {
        let percentage = state.progress.percentage();
        let now = Instant::now();
        if forced {
            state.throttle.force(percentage, now);
        } else if !state.throttle.allow(percentage, now) {
            return;
        }

        let update = ProgressUpdate::from_progress(&state.progress);
        state
            .subscribers
            .retain(|subscriber| subscriber.deliver(update.clone()));
        self.persist(&state.progress);
    }

    /// Register a new operation and move it to `running`.
    ///
    /// # Errors
    ///
    /// [`TrackerError::InvalidInput`] when `total_items` is negative.
    pub fn start(&self, operation_type: &str, total_items: i64) -> Result<OperationId, TrackerError> {
        let total = u64::try_from(total_items).map_err(|_| {
            TrackerError::InvalidInput(format!("total_items must be >= 0, got {total_items}"))
        })?;

        let id = OperationId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut progress = Progress::new(id, operation_type, total);
        progress.apply(Transition::Start)?;

        let mut throttle = NotificationThrottle::new(self.config.throttle);
        throttle.force(progress.percentage(), Instant::now());
        self.persist(&progress);

        let slot = Arc::new(OperationSlot {
            state: RwLock::new(SlotState {
                progress,
                subscribers: Vec::new(),
                throttle,
            }),
            control: OperationControl::new(),
        });
        self.operations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, slot);

        log::info!("Started operation {id} ({operation_type}, {total} items)");
        Ok(id)
    }

    fn transition(&self, id: OperationId, transition: Transition) -> Result<(), TrackerError> {
        let slot = self.slot(id)?;
        let mut state = slot.write();
        state.progress.apply(transition)?;

        let status = state.progress.status;
        match status {
            OperationStatus::Paused => slot.control.pause(),
            OperationStatus::Running => slot.control.resume(),
            OperationStatus::Cancelled | OperationStatus::Failed => slot.control.cancel(),
            OperationStatus::Pending | OperationStatus::Completed => {}
        }
        log::debug!("Operation {id} is now {status}");

        self.dispatch(&mut state, true);
        if status.is_terminal() {
            // Dropping the senders ends every stream once it is drained.
            state.subscribers.clear();
        }
        Ok(())
    }

    /// Record progress on a running or paused operation.
    ///
    /// Values lower than the recorded count are clamped, so readers only ever
    /// see `processed_items` grow. An empty `step` keeps the previous label.
    ///
    /// # Errors
    ///
    /// [`TrackerError::NotFound`], or [`TrackerError::AlreadyTerminal`] once
    /// the operation has finished (nothing changes in that case).
    pub fn update(&self, id: OperationId, processed: u64, step: &str) -> Result<(), TrackerError> {
        let slot = self.slot(id)?;
        let mut state = slot.write();
        state.progress.record_progress(processed, step)?;
        self.dispatch(&mut state, false);
        Ok(())
    }

    /// Change the expected item count of an unfinished operation.
    ///
    /// # Errors
    ///
    /// [`TrackerError::NotFound`] or [`TrackerError::AlreadyTerminal`].
    pub fn set_total(&self, id: OperationId, total: u64) -> Result<(), TrackerError> {
        let slot = self.slot(id)?;
        let mut state = slot.write();
        if state.progress.is_terminal() {
            return Err(TrackerError::AlreadyTerminal {
                id,
                status: state.progress.status,
            });
        }
        state.progress.total_items = total;
        state.progress.last_updated = Utc::now();
        self.dispatch(&mut state, true);
        Ok(())
    }

    /// Pause a running operation. Workers block at their next checkpoint.
    ///
    /// # Errors
    ///
    /// [`TrackerError::InvalidState`] unless the operation is running.
    pub fn pause(&self, id: OperationId) -> Result<(), TrackerError> {
        self.transition(id, Transition::Pause)
    }

    /// Resume a paused operation.
    ///
    /// # Errors
    ///
    /// [`TrackerError::InvalidState`] unless the operation is paused.
    pub fn resume(&self, id: OperationId) -> Result<(), TrackerError> {
        self.transition(id, Transition::Resume)
    }

    /// Cancel a running or paused operation.
    ///
    /// # Errors
    ///
    /// [`TrackerError::InvalidState`] if it is pending or already finished.
    pub fn cancel(&self, id: OperationId) -> Result<(), TrackerError> {
        self.transition(id, Transition::Cancel)
    }

    /// Mark a running operation completed. Raises `processed` to `total`.
    ///
    /// # Errors
    ///
    /// [`TrackerError::InvalidState`] unless the operation is running.
    pub fn complete(&self, id: OperationId) -> Result<(), TrackerError> {
        self.transition(id, Transition::Complete)
    }

    /// Mark a running operation failed.
    ///
    /// # Errors
    ///
    /// [`TrackerError::InvalidState`] unless the operation is running.
    pub fn fail(&self, id: OperationId, message: impl Into<String>) -> Result<(), TrackerError> {
        self.transition(id, Transition::Fail(message.into()))
    }

    /// Cancel every running or paused operation. Returns the cancelled IDs.
    pub fn cancel_active(&self) -> Vec<OperationId> {
        let active: Vec<_> = self
            .snapshots_where(|p| p.status.is_active())
            .into_iter()
            .map(|p| p.id)
            .collect();
        active
            .into_iter()
            .filter(|id| self.cancel(*id).is_ok())
            .collect()
    }

    /// Snapshot of one operation.
    ///
    /// # Errors
    ///
    /// [`TrackerError::NotFound`].
    pub fn get(&self, id: OperationId) -> Result<Progress, TrackerError> {
        Ok(self.slot(id)?.read().progress.clone())
    }

    /// Completion percentage in `[0, 100]`.
    ///
    /// # Errors
    ///
    /// [`TrackerError::NotFound`].
    pub fn percentage(&self, id: OperationId) -> Result<f64, TrackerError> {
        Ok(self.slot(id)?.read().progress.percentage())
    }

    /// Estimated time to completion, when one can be computed.
    ///
    /// # Errors
    ///
    /// [`TrackerError::NotFound`].
    pub fn eta(&self, id: OperationId) -> Result<Option<Duration>, TrackerError> {
        Ok(self.slot(id)?.read().progress.eta())
    }

    /// Worker-side pause/cancel handle for an operation.
    ///
    /// # Errors
    ///
    /// [`TrackerError::NotFound`].
    pub fn control(&self, id: OperationId) -> Result<OperationControl, TrackerError> {
        Ok(self.slot(id)?.control.clone())
    }

    /// Follow an operation's updates.
    ///
    /// The stream starts with the current state. For an operation that has
    /// already finished it yields that one update and ends.
    ///
    /// # Errors
    ///
    /// [`TrackerError::NotFound`].
    pub fn subscribe(&self, id: OperationId) -> Result<Subscription, TrackerError> {
        let slot = self.slot(id)?;
        let mut state = slot.write();
        let (subscriber, subscription) = stream::channel(id, self.config.subscriber_buffer);
        subscriber.deliver(ProgressUpdate::from_progress(&state.progress));
        if !state.progress.is_terminal() {
            state.subscribers.retain(Subscriber::is_alive);
            state.subscribers.push(subscriber);
        }
        Ok(subscription)
    }

    /// Live subscriber count. Dropped subscriptions are pruned here.
    ///
    /// # Errors
    ///
    /// [`TrackerError::NotFound`].
    pub fn subscriber_count(&self, id: OperationId) -> Result<usize, TrackerError> {
        let slot = self.slot(id)?;
        let mut state = slot.write();
        state.subscribers.retain(Subscriber::is_alive);
        Ok(state.subscribers.len())
    }

    /// Attach a metadata value. Allowed in every state.
    ///
    /// # Errors
    ///
    /// [`TrackerError::NotFound`].
    pub fn set_metadata(
        &self,
        id: OperationId,
        key: impl Into<String>,
        value: impl Into<MetadataValue>,
    ) -> Result<(), TrackerError> {
        let slot = self.slot(id)?;
        let mut state = slot.write();
        state.progress.metadata.insert(key.into(), value.into());
        state.progress.last_updated = Utc::now();
        self.persist(&state.progress);
        Ok(())
    }

    /// All metadata of an operation.
    ///
    /// # Errors
    ///
    /// [`TrackerError::NotFound`].
    pub fn metadata(&self, id: OperationId) -> Result<BTreeMap<String, MetadataValue>, TrackerError> {
        Ok(self.slot(id)?.read().progress.metadata.clone())
    }

    /// One metadata value.
    ///
    /// # Errors
    ///
    /// [`TrackerError::NotFound`].
    pub fn metadata_value(
        &self,
        id: OperationId,
        key: &str,
    ) -> Result<Option<MetadataValue>, TrackerError> {
        Ok(self.slot(id)?.read().progress.metadata.get(key).cloned())
    }

    /// Append a line to the operation log. Allowed in every state.
    ///
    /// # Errors
    ///
    /// [`TrackerError::NotFound`].
    pub fn append_log(&self, id: OperationId, message: impl Into<String>) -> Result<(), TrackerError> {
        let slot = self.slot(id)?;
        let mut state = slot.write();
        state.progress.append_log(message);
        self.persist(&state.progress);
        Ok(())
    }

    /// The operation log, oldest first.
    ///
    /// # Errors
    ///
    /// [`TrackerError::NotFound`].
    pub fn logs(&self, id: OperationId) -> Result<Vec<LogEntry>, TrackerError> {
        Ok(self.slot(id)?.read().progress.logs.clone())
    }

    /// Operations that have not finished yet.
    #[must_use]
    pub fn active_operations(&self) -> Vec<Progress> {
        self.snapshots_where(|p| !p.is_terminal())
    }

    #[must_use]
    pub fn operations_by_type(&self, operation_type: &str) -> Vec<Progress> {
        self.snapshots_where(|p| p.operation_type == operation_type)
    }

    /// The `limit` most recently started operations, newest first.
    #[must_use]
    pub fn recent_operations(&self, limit: usize) -> Vec<Progress> {
        let mut all = self.snapshots_where(|_| true);
        all.sort_by(|a, b| b.start_time.cmp(&a.start_time).then(b.id.cmp(&a.id)));
        all.truncate(limit);
        all
    }

    /// Running operations with no update for at least `timeout`.
    #[must_use]
    pub fn stuck_operations(&self, timeout: Duration) -> Vec<Progress> {
        self.snapshots_where(|p| p.status == OperationStatus::Running && p.idle_for() >= timeout)
    }

    /// Running or paused operations started at least `duration` ago.
    #[must_use]
    pub fn long_running_operations(&self, duration: Duration) -> Vec<Progress> {
        self.snapshots_where(|p| p.status.is_active() && p.elapsed() >= duration)
    }

    #[must_use]
    pub fn statistics(&self) -> OperationStats {
        let all = self.snapshots_where(|_| true);
        let mut stats = OperationStats {
            total: all.len(),
            ..OperationStats::default()
        };

        let mut completed_time = Duration::ZERO;
        let mut completed = 0u32;
        for progress in &all {
            *stats.by_status.entry(progress.status).or_insert(0) += 1;
            *stats
                .by_type
                .entry(progress.operation_type.clone())
                .or_insert(0) += 1;
            if progress.status == OperationStatus::Completed {
                completed_time += progress.elapsed();
                completed += 1;
            }
        }
        if completed > 0 {
            stats.average_completion_time = Some(completed_time / completed);
        }
        stats
    }

    /// Forget finished operations that ended at least `older_than` ago.
    ///
    /// Returns how many were removed. Persisted records are left alone.
    pub fn purge_finished(&self, older_than: Duration) -> usize {
        let expired: Vec<_> = self
            .snapshots_where(|p| {
                p.end_time.is_some_and(|end| {
                    (Utc::now() - end).to_std().unwrap_or_default() >= older_than
                })
            })
            .into_iter()
            .map(|p| p.id)
            .collect();

        let mut operations = self
            .operations
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let removed = expired
            .iter()
            .filter(|id| operations.remove(id).is_some())
            .count();
        if removed > 0 {
            log::debug!("Purged {removed} finished operations");
        }
        removed
    }
}

/// Forwards worker progress into the tracker.
///
/// Failed items are appended to the operation log. Updates that arrive after
/// the operation finished are dropped.
pub struct TrackerReporter {
    tracker: Arc<OperationTracker>,
    id: OperationId,
    step: String,
}

impl TrackerReporter {
    #[must_use]
    pub fn new(tracker: Arc<OperationTracker>, id: OperationId, step: impl Into<String>) -> Self {
        Self {
            tracker,
            id,
            step: step.into(),
        }
    }
}

impl fmt::Debug for TrackerReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackerReporter")
            .field("id", &self.id)
            .field("step", &self.step)
            .finish_non_exhaustive()
    }
}

impl ProgressCallback for TrackerReporter {
    fn on_phase_start(&self, phase: &str, total: u64) {
        if let Err(e) = self.tracker.set_total(self.id, total) {
            log::debug!("Cannot set total for {phase} on operation {}: {e}", self.id);
        }
    }

    fn on_progress(&self, processed: u64, _total: u64) {
        if let Err(e) = self.tracker.update(self.id, processed, &self.step) {
            log::trace!("Dropped progress for operation {}: {e}", self.id);
        }
    }

    fn on_item_failed(&self, item_id: &str, error: &str) {
        if let Err(e) = self.tracker.append_log(self.id, format!("{item_id}: {error}")) {
            log::debug!("Cannot log failure on operation {}: {e}", self.id);
        }
    }
}
