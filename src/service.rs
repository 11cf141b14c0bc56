//! Tracked hashing and grouping runs.
//!
//! [`DedupeService`] ties the pieces together: it reads a snapshot of the
//! catalog from the [`PersistenceGateway`], starts an operation on the
//! [`OperationTracker`], runs the [`HashEngine`] or [`Grouper`] with a
//! [`TrackerReporter`] attached, and writes the results back.
//!
//! Every entry point takes a [`Scope`]. The synchronous variants return when
//! the operation has finished; the `spawn_*` variants return the operation ID
//! at once and run the work on a background thread, so callers can subscribe,
//! pause or cancel while it runs.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use chrono::Utc;
//! use drivedupe::catalog::RemoteFile;
//! use drivedupe::gateway::{MemoryGateway, PersistenceGateway};
//! use drivedupe::hasher::{HashAlgorithm, HashEngine, RetryPolicy};
//! use drivedupe::progress::OperationTracker;
//! use drivedupe::service::{DedupeService, Scope, ServiceSettings};
//! use drivedupe::storage::MemoryStorage;
//!
//! let storage = Arc::new(MemoryStorage::new());
//! storage.insert("a", b"same".to_vec());
//! storage.insert("b", b"same".to_vec());
//!
//! let gateway = Arc::new(MemoryGateway::new());
//! gateway.upsert_files(&[
//!     RemoteFile::new("a", "a.txt", 4, "text/plain", Utc::now()),
//!     RemoteFile::new("b", "b.txt", 4, "text/plain", Utc::now()),
//! ]).unwrap();
//!
//! let engine = HashEngine::new(storage, HashAlgorithm::Sha256)
//!     .with_retry_policy(RetryPolicy::immediate());
//! let service = DedupeService::new(
//!     gateway,
//!     Arc::new(OperationTracker::default()),
//!     Arc::new(engine),
//!     ServiceSettings::default(),
//! );
//!
//! service.hash_scope(&Scope::All, false).unwrap();
//! let found = service.find_duplicates(&Scope::All).unwrap();
//! assert_eq!(found.outcome.groups.len(), 1);
//! ```

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use serde::Serialize;

use crate::catalog::RemoteFile;
use crate::duplicates::{
    ComparisonResult, DuplicateGroup, FileFilter, Grouper, GrouperConfig, GroupingOutcome,
};
use crate::error::DedupeError;
use crate::gateway::PersistenceGateway;
use crate::hasher::{HashBatchConfig, HashEngine, HashError, HashReport, DEFAULT_MAX_FILE_SIZE};
use crate::progress::{
    operation_types, OperationControl, OperationId, OperationStatus, OperationTracker,
    ProgressCallback, TrackerReporter,
};

/// Which catalog files an entry point works on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// Every catalogued file
    All,
    /// Files whose parent set contains this folder ID
    Folder(String),
    /// An explicit set of file IDs
    Files(Vec<String>),
}

impl Scope {
    /// Whether `group` has at least one member inside this scope.
    #[must_use]
    pub fn covers_group(&self, group: &DuplicateGroup) -> bool {
        match self {
            Self::All => true,
            Self::Folder(folder) => group.has_file_in_folder(folder),
            Self::Files(ids) => ids.iter().any(|id| group.contains(id)),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::Folder(folder) => write!(f, "folder:{folder}"),
            Self::Files(ids) => write!(f, "files:{}", ids.len()),
        }
    }
}

/// Tuning shared by every run of a service.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    /// Hashing worker threads (0 uses the available parallelism)
    pub worker_count: usize,
    /// Retries per file for transient failures
    pub max_retries: u32,
    /// Skip files larger than this many bytes
    pub max_file_size: Option<u64>,
    /// Filter applied before grouping
    pub filter: FileFilter,
    /// Smallest group kept
    pub min_group_size: usize,
    /// Keep only the N groups with the most wasted space
    pub max_results: Option<usize>,
    /// Grouping progress interval
    pub progress_interval: usize,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        let hashing = HashBatchConfig::default();
        let grouping = GrouperConfig::default();
        Self {
            worker_count: hashing.worker_count,
            max_retries: hashing.max_retries,
            max_file_size: Some(DEFAULT_MAX_FILE_SIZE),
            filter: grouping.filter,
            min_group_size: grouping.min_group_size,
            max_results: grouping.max_results,
            progress_interval: grouping.progress_interval,
        }
    }
}

impl ServiceSettings {
    #[must_use]
    pub fn with_worker_count(mut self, workers: usize) -> Self {
        self.worker_count = workers;
        self
    }

    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    #[must_use]
    pub fn with_max_file_size(mut self, max: Option<u64>) -> Self {
        self.max_file_size = max;
        self
    }

    #[must_use]
    pub fn with_filter(mut self, filter: FileFilter) -> Self {
        self.filter = filter;
        self
    }

    #[must_use]
    pub fn with_min_group_size(mut self, size: usize) -> Self {
        self.min_group_size = size.max(2);
        self
    }

    #[must_use]
    pub fn with_max_results(mut self, max: Option<usize>) -> Self {
        self.max_results = max;
        self
    }
}

/// Result of a finished hashing run.
#[derive(Debug, Clone, Serialize)]
pub struct HashOutcome {
    pub operation_id: OperationId,
    pub report: HashReport,
}

/// Result of a finished duplicate search.
#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    pub operation_id: OperationId,
    pub outcome: GroupingOutcome,
    /// Stored groups removed because a full search no longer found them
    pub stale_removed: usize,
}

/// Result of a finished folder comparison.
#[derive(Debug, Clone, Serialize)]
pub struct ComparisonOutcome {
    pub operation_id: OperationId,
    pub result: ComparisonResult,
}

/// Result of [`DedupeService::refresh_groups`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    /// Groups rebuilt from current catalog data and stored again
    pub updated: usize,
    /// Groups deleted because fewer than two members remain
    pub removed: usize,
}

/// A run executing on a background thread.
#[derive(Debug)]
pub struct BackgroundOperation<T> {
    id: OperationId,
    handle: JoinHandle<Result<T, DedupeError>>,
}

impl<T> BackgroundOperation<T> {
    #[must_use]
    pub fn id(&self) -> OperationId {
        self.id
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the run to end.
    ///
    /// # Errors
    ///
    /// Whatever the run returned, or [`DedupeError::InvalidState`] if the
    /// worker thread panicked.
    pub fn join(self) -> Result<T, DedupeError> {
        self.handle.join().map_err(|_| {
            DedupeError::InvalidState(format!("worker for operation {} panicked", self.id))
        })?
    }
}

/// Entry points for tracked hashing and duplicate search.
pub struct DedupeService {
    gateway: Arc<dyn PersistenceGateway>,
    tracker: Arc<OperationTracker>,
    engine: Arc<HashEngine>,
    settings: ServiceSettings,
}

impl fmt::Debug for DedupeService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DedupeService")
            .field("tracker", &self.tracker)
            .field("algorithm", &self.engine.algorithm_name())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl DedupeService {
    #[must_use]
    pub fn new(
        gateway: Arc<dyn PersistenceGateway>,
        tracker: Arc<OperationTracker>,
        engine: Arc<HashEngine>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            gateway,
            tracker,
            engine,
            settings,
        }
    }

    #[must_use]
    pub fn tracker(&self) -> &Arc<OperationTracker> {
        &self.tracker
    }

    #[must_use]
    pub fn gateway(&self) -> &Arc<dyn PersistenceGateway> {
        &self.gateway
    }

    #[must_use]
    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    /// Hash the files in `scope` and store the digests.
    ///
    /// Files that already carry a hash are skipped unless `force`. Files that
    /// fail after their retries are logged on the operation and counted in
    /// the `failed_files` metadata; the operation still completes.
    ///
    /// # Errors
    ///
    /// - [`DedupeError::InvalidInput`] / [`DedupeError::NotFound`] for a bad scope
    /// - [`DedupeError::Cancelled`] if the operation was cancelled (digests
    ///   computed before that point are stored)
    /// - the hashing error if no file could be hashed (the operation is failed)
    pub fn hash_scope(&self, scope: &Scope, force: bool) -> Result<HashOutcome, DedupeError> {
        let (id, files) = self.prepare_hash(scope, force)?;
        self.run_hash(id, files, force)
    }

    /// Start [`hash_scope`](Self::hash_scope) on a background thread.
    ///
    /// The scope is resolved and the operation registered before this
    /// returns, so the ID can be used right away.
    ///
    /// # Errors
    ///
    /// Scope resolution errors, or [`DedupeError::InvalidState`] if the
    /// thread could not be spawned.
    pub fn spawn_hash_scope(
        self: &Arc<Self>,
        scope: Scope,
        force: bool,
    ) -> Result<BackgroundOperation<HashOutcome>, DedupeError> {
        let (id, files) = self.prepare_hash(&scope, force)?;
        let service = Arc::clone(self);
        self.spawn(id, "hash", move || service.run_hash(id, files, force))
    }

    /// Group the hashed files in `scope` and store the groups.
    ///
    /// A search over [`Scope::All`] without a result limit also deletes stored
    /// groups it no longer finds. Integrity warnings are appended to the
    /// operation log.
    ///
    /// # Errors
    ///
    /// Scope resolution errors, [`DedupeError::Cancelled`], or a gateway
    /// failure while storing groups (the operation is failed).
    pub fn find_duplicates(&self, scope: &Scope) -> Result<SearchOutcome, DedupeError> {
        let (id, files) = self.prepare(scope, operation_types::DUPLICATE_SEARCH, false)?;
        self.run_search(id, scope, files)
    }

    /// Start [`find_duplicates`](Self::find_duplicates) on a background thread.
    ///
    /// # Errors
    ///
    /// Same as [`spawn_hash_scope`](Self::spawn_hash_scope).
    pub fn spawn_find_duplicates(
        self: &Arc<Self>,
        scope: Scope,
    ) -> Result<BackgroundOperation<SearchOutcome>, DedupeError> {
        let (id, files) = self.prepare(&scope, operation_types::DUPLICATE_SEARCH, false)?;
        let service = Arc::clone(self);
        self.spawn(id, "search", move || service.run_search(id, &scope, files))
    }

    /// Find the files in folder `target` that duplicate a file in `source`.
    ///
    /// Only direct children of each folder take part, and only hashed files
    /// can match, so hash both folders first. The result is recorded in the
    /// operation metadata.
    ///
    /// # Errors
    ///
    /// - [`DedupeError::InvalidInput`] if a folder ID is empty or both are the same
    /// - [`DedupeError::Cancelled`] if the operation was cancelled
    /// - gateway failures while listing the folders
    pub fn compare_folders(
        &self,
        source: &str,
        target: &str,
    ) -> Result<ComparisonOutcome, DedupeError> {
        let (id, source_files, target_files) = self.prepare_comparison(source, target)?;
        self.run_comparison(id, source, target, &source_files, &target_files)
    }

    /// Start [`compare_folders`](Self::compare_folders) on a background thread.
    ///
    /// # Errors
    ///
    /// Same as [`spawn_hash_scope`](Self::spawn_hash_scope).
    pub fn spawn_compare_folders(
        self: &Arc<Self>,
        source: String,
        target: String,
    ) -> Result<BackgroundOperation<ComparisonOutcome>, DedupeError> {
        let (id, source_files, target_files) = self.prepare_comparison(&source, &target)?;
        let service = Arc::clone(self);
        self.spawn(id, "compare", move || {
            service.run_comparison(id, &source, &target, &source_files, &target_files)
        })
    }

    /// Rebuild the stored groups touching `scope` from current catalog data.
    ///
    /// Members whose hash changed move out of the group; groups left with
    /// fewer than `min_group_size` members are deleted.
    ///
    /// # Errors
    ///
    /// Gateway failures.
    pub fn refresh_groups(&self, scope: &Scope) -> Result<RefreshReport, DedupeError> {
        let min_size = self.settings.min_group_size.max(2);
        let mut report = RefreshReport::default();

        for stored in self.gateway.groups()? {
            if !scope.covers_group(&stored) {
                continue;
            }
            let members = self.gateway.files_by_hash(stored.hash())?;
            let rebuilt = DuplicateGroup::from_files(stored.hash(), members)?;
            if rebuilt.count() >= min_size {
                self.gateway.upsert_group(&rebuilt)?;
                report.updated += 1;
            } else if self.gateway.delete_group(stored.hash())? {
                log::debug!("Removed group {} ({} members left)", stored.hash(), rebuilt.count());
                report.removed += 1;
            }
        }

        log::info!(
            "Refreshed groups for {scope}: {} updated, {} removed",
            report.updated,
            report.removed
        );
        Ok(report)
    }

    fn resolve(&self, scope: &Scope, unhashed_only: bool) -> Result<Vec<RemoteFile>, DedupeError> {
        match scope {
            Scope::All if unhashed_only => Ok(self.gateway.files_without_hash()?),
            Scope::All => Ok(self.gateway.files()?),
            Scope::Folder(folder) => Ok(self.gateway.files_in_folder(folder)?),
            Scope::Files(ids) => {
                if ids.is_empty() {
                    return Err(DedupeError::InvalidInput("empty file scope".to_string()));
                }
                let mut seen = BTreeSet::new();
                let mut files = Vec::with_capacity(ids.len());
                for id in ids {
                    if !seen.insert(id.as_str()) {
                        continue;
                    }
                    let file = self
                        .gateway
                        .file(id)?
                        .ok_or_else(|| DedupeError::NotFound(format!("file {id}")))?;
                    files.push(file);
                }
                Ok(files)
            }
        }
    }

    fn prepare(
        &self,
        scope: &Scope,
        operation_type: &str,
        unhashed_only: bool,
    ) -> Result<(OperationId, Vec<RemoteFile>), DedupeError> {
        let files = self.resolve(scope, unhashed_only)?;
        let total = i64::try_from(files.len()).unwrap_or(i64::MAX);
        let id = self.tracker.start(operation_type, total)?;
        self.tracker.set_metadata(id, "scope", scope.to_string())?;
        log::debug!("Operation {id} ({operation_type}) covers {} files in {scope}", files.len());
        Ok((id, files))
    }

    fn prepare_hash(
        &self,
        scope: &Scope,
        force: bool,
    ) -> Result<(OperationId, Vec<RemoteFile>), DedupeError> {
        let (id, files) = self.prepare(scope, operation_types::HASH_CALCULATION, !force)?;
        self.tracker
            .set_metadata(id, "algorithm", self.engine.algorithm_name())?;
        Ok((id, files))
    }

    fn prepare_comparison(
        &self,
        source: &str,
        target: &str,
    ) -> Result<(OperationId, Vec<RemoteFile>, Vec<RemoteFile>), DedupeError> {
        if source.is_empty() || target.is_empty() {
            return Err(DedupeError::InvalidInput("empty folder ID".to_string()));
        }
        if source == target {
            return Err(DedupeError::InvalidInput(format!(
                "cannot compare folder {source} with itself"
            )));
        }
        let list = |folder: &str| -> Result<Vec<RemoteFile>, DedupeError> {
            let mut files = self.gateway.files_in_folder(folder)?;
            files.retain(|f| !f.is_folder());
            Ok(files)
        };
        let source_files = list(source)?;
        let target_files = list(target)?;

        let total = i64::try_from(source_files.len() + target_files.len()).unwrap_or(i64::MAX);
        let id = self.tracker.start(operation_types::FOLDER_COMPARISON, total)?;
        self.tracker.set_metadata(id, "source_folder", source)?;
        self.tracker.set_metadata(id, "target_folder", target)?;
        log::debug!(
            "Operation {id} compares {} files in {target} against {} files in {source}",
            target_files.len(),
            source_files.len()
        );
        Ok((id, source_files, target_files))
    }

    fn spawn<T, F>(
        &self,
        id: OperationId,
        kind: &str,
        work: F,
    ) -> Result<BackgroundOperation<T>, DedupeError>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, DedupeError> + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name(format!("drivedupe-{kind}-{id}"))
            .spawn(work)
            .map_err(|e| {
                let message = format!("failed to spawn worker: {e}");
                if let Err(err) = self.tracker.fail(id, message.clone()) {
                    log::debug!("Cannot fail operation {id}: {err}");
                }
                DedupeError::InvalidState(message)
            })?;
        Ok(BackgroundOperation { id, handle })
    }

    fn control(&self, id: OperationId) -> Result<OperationControl, DedupeError> {
        Ok(self.tracker.control(id)?)
    }

    fn run_hash(
        &self,
        id: OperationId,
        mut files: Vec<RemoteFile>,
        force: bool,
    ) -> Result<HashOutcome, DedupeError> {
        let control = self.control(id)?;
        let reporter = TrackerReporter::new(Arc::clone(&self.tracker), id, "hashing");
        let config = HashBatchConfig::default()
            .with_worker_count(self.settings.worker_count)
            .with_max_retries(self.settings.max_retries)
            .with_max_file_size(self.settings.max_file_size)
            .with_force(force)
            .with_progress_callback(Arc::new(reporter))
            .with_control(control.clone());

        let before: Vec<Option<String>> = files
            .iter()
            .map(|f| f.hash().map(str::to_string))
            .collect();
        let result = self.engine.compute_hashes(&mut files, &config);

        let changed: Vec<RemoteFile> = files
            .into_iter()
            .zip(before)
            .filter(|(file, old)| file.hash() != old.as_deref())
            .map(|(file, _)| file)
            .collect();
        if !changed.is_empty() {
            if let Err(e) = self.gateway.upsert_files(&changed) {
                let message = format!("failed to store {} digests: {e}", changed.len());
                self.fail(id, &message);
                return Err(e.into());
            }
        }

        match result {
            Ok(report) => {
                self.record_hash_report(id, &report)?;
                self.finish(id, &control)?;
                Ok(HashOutcome {
                    operation_id: id,
                    report,
                })
            }
            Err(HashError::Cancelled) => {
                self.tracker
                    .set_metadata(id, "hashed_files", changed.len())?;
                self.mark_cancelled(id);
                Err(DedupeError::Cancelled)
            }
            Err(e) => {
                if let HashError::NothingProcessed { failed } = e {
                    self.tracker.set_metadata(id, "failed_files", failed)?;
                }
                self.fail(id, &e.to_string());
                Err(e.into())
            }
        }
    }

    fn record_hash_report(&self, id: OperationId, report: &HashReport) -> Result<(), DedupeError> {
        self.tracker.set_metadata(id, "hashed_files", report.hashed)?;
        self.tracker.set_metadata(id, "failed_files", report.failed())?;
        self.tracker.set_metadata(id, "skipped_files", report.skipped())?;
        self.tracker.set_metadata(id, "bytes_hashed", report.bytes_hashed)?;
        if report.is_partial() {
            log::warn!(
                "Operation {id}: {} of {} files could not be hashed",
                report.failed(),
                report.eligible
            );
        }
        Ok(())
    }

    fn run_search(
        &self,
        id: OperationId,
        scope: &Scope,
        files: Vec<RemoteFile>,
    ) -> Result<SearchOutcome, DedupeError> {
        let control = self.control(id)?;
        let reporter = TrackerReporter::new(Arc::clone(&self.tracker), id, "grouping");
        let grouper = Grouper::new(
            GrouperConfig::default()
                .with_filter(self.settings.filter.clone())
                .with_min_group_size(self.settings.min_group_size)
                .with_max_results(self.settings.max_results)
                .with_progress_interval(self.settings.progress_interval)
                .with_progress_callback(Arc::new(reporter)),
        );
        let outcome = grouper.group(files);

        if !control.checkpoint() {
            self.mark_cancelled(id);
            return Err(DedupeError::Cancelled);
        }

        for warning in &outcome.warnings {
            self.tracker
                .append_log(id, format!("Data integrity: {warning}"))?;
        }

        let stale_removed = match self.store_groups(scope, &outcome.groups) {
            Ok(removed) => removed,
            Err(e) => {
                self.fail(id, &format!("failed to store groups: {e}"));
                return Err(e);
            }
        };

        let stats = &outcome.stats;
        self.tracker.set_metadata(id, "groups", stats.groups)?;
        self.tracker
            .set_metadata(id, "duplicate_files", stats.duplicate_files)?;
        self.tracker.set_metadata(id, "wasted_space", stats.wasted_space)?;
        self.tracker
            .set_metadata(id, "integrity_warnings", stats.integrity_warnings)?;
        self.tracker.set_metadata(id, "filtered_out", stats.filtered_out)?;

        self.finish(id, &control)?;
        Ok(SearchOutcome {
            operation_id: id,
            outcome,
            stale_removed,
        })
    }

    fn run_comparison(
        &self,
        id: OperationId,
        source: &str,
        target: &str,
        source_files: &[RemoteFile],
        target_files: &[RemoteFile],
    ) -> Result<ComparisonOutcome, DedupeError> {
        let control = self.control(id)?;
        let reporter = TrackerReporter::new(Arc::clone(&self.tracker), id, "comparing");
        let total = (source_files.len() + target_files.len()) as u64;
        reporter.on_progress(source_files.len() as u64, total);
        if !control.checkpoint() {
            self.mark_cancelled(id);
            return Err(DedupeError::Cancelled);
        }

        let result = ComparisonResult::compare(source, target, source_files, target_files);
        reporter.on_progress(total, total);

        let unhashed = source_files
            .iter()
            .chain(target_files)
            .filter(|f| !f.is_hash_calculated())
            .count();
        if unhashed > 0 {
            self.tracker.append_log(
                id,
                format!("{unhashed} files have no hash and were not compared"),
            )?;
        }

        self.tracker
            .set_metadata(id, "duplicate_files", result.duplicate_count())?;
        self.tracker.set_metadata(id, "wasted_space", result.wasted_space())?;
        self.tracker
            .set_metadata(id, "duplication_percentage", result.duplication_percentage)?;
        self.tracker
            .set_metadata(id, "can_delete_target", result.can_delete_target)?;
        self.tracker.set_metadata(id, "unhashed_files", unhashed)?;

        self.finish(id, &control)?;
        log::info!(
            "Compared {target} against {source}: {} of {} files duplicated ({:.1}%), delete target: {}",
            result.duplicate_count(),
            result.target_file_count,
            result.duplication_percentage,
            result.can_delete_target
        );
        Ok(ComparisonOutcome {
            operation_id: id,
            result,
        })
    }

    /// Store `groups` one after another. Returns the number of stale groups
    /// deleted.
    fn store_groups(&self, scope: &Scope, groups: &[DuplicateGroup]) -> Result<usize, DedupeError> {
        for group in groups {
            self.gateway.upsert_group(group)?;
        }
        if *scope != Scope::All || self.settings.max_results.is_some() {
            return Ok(0);
        }

        let current: HashSet<&str> = groups.iter().map(DuplicateGroup::hash).collect();
        let mut removed = 0;
        for stored in self.gateway.groups()? {
            if !current.contains(stored.hash()) && self.gateway.delete_group(stored.hash())? {
                removed += 1;
            }
        }
        if removed > 0 {
            log::debug!("Removed {removed} stale groups");
        }
        Ok(removed)
    }

    /// Complete the operation once it is not paused.
    fn finish(&self, id: OperationId, control: &OperationControl) -> Result<(), DedupeError> {
        if !control.checkpoint() {
            self.mark_cancelled(id);
            return Err(DedupeError::Cancelled);
        }
        match self.tracker.complete(id) {
            Ok(()) => Ok(()),
            Err(_) if self.status(id) == Some(OperationStatus::Cancelled) => {
                Err(DedupeError::Cancelled)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn status(&self, id: OperationId) -> Option<OperationStatus> {
        self.tracker.get(id).ok().map(|p| p.status)
    }

    fn mark_cancelled(&self, id: OperationId) {
        if self.status(id).is_some_and(|s| s.is_active()) {
            if let Err(e) = self.tracker.cancel(id) {
                log::debug!("Cannot cancel operation {id}: {e}");
            }
        }
    }

    fn fail(&self, id: OperationId, message: &str) {
        log::warn!("Operation {id} failed: {message}");
        if let Err(e) = self.tracker.fail(id, message) {
            log::debug!("Cannot fail operation {id}: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MemoryGateway;
    use crate::hasher::{HashAlgorithm, RetryPolicy};
    use crate::progress::MetadataValue;
    use crate::storage::{FailureMode, MemoryStorage};
    use chrono::{Duration as ChronoDuration, Utc};

    struct Fixture {
        storage: Arc<MemoryStorage>,
        gateway: Arc<MemoryGateway>,
        service: Arc<DedupeService>,
    }

    fn fixture(files: &[(&str, &str, &[u8])]) -> Fixture {
        let storage = Arc::new(MemoryStorage::new());
        let gateway = Arc::new(MemoryGateway::new());
        let base = Utc::now() - ChronoDuration::days(10);
        let mut records = Vec::new();
        for (i, (id, folder, content)) in files.iter().enumerate() {
            storage.insert(*id, content.to_vec());
            records.push(
                RemoteFile::new(
                    *id,
                    format!("{id}.bin"),
                    content.len() as u64,
                    "application/octet-stream",
                    base + ChronoDuration::hours(i as i64),
                )
                .with_parent(*folder),
            );
        }
        gateway.upsert_files(&records).unwrap();

        let engine = HashEngine::new(storage.clone(), HashAlgorithm::Sha256)
            .with_retry_policy(RetryPolicy::immediate());
        let service = Arc::new(DedupeService::new(
            gateway.clone(),
            Arc::new(OperationTracker::default()),
            Arc::new(engine),
            ServiceSettings::default().with_worker_count(2),
        ));
        Fixture {
            storage,
            gateway,
            service,
        }
    }

    fn meta(service: &DedupeService, id: OperationId, key: &str) -> Option<i64> {
        service
            .tracker()
            .metadata_value(id, key)
            .unwrap()
            .as_ref()
            .and_then(MetadataValue::as_i64)
    }

    #[test]
    fn test_hash_scope_stores_digests() {
        let fx = fixture(&[("a", "root", b"one"), ("b", "root", b"one"), ("c", "root", b"two")]);
        let outcome = fx.service.hash_scope(&Scope::All, false).unwrap();

        assert_eq!(outcome.report.hashed, 3);
        assert!(fx.gateway.files_without_hash().unwrap().is_empty());
        let progress = fx.service.tracker().get(outcome.operation_id).unwrap();
        assert_eq!(progress.status, OperationStatus::Completed);
        assert_eq!(progress.processed_items, 3);
        assert_eq!(meta(&fx.service, outcome.operation_id, "hashed_files"), Some(3));
    }

    #[test]
    fn test_second_run_skips_hashed_files() {
        let fx = fixture(&[("a", "root", b"one")]);
        fx.service.hash_scope(&Scope::All, false).unwrap();
        let again = fx.service.hash_scope(&Scope::All, false).unwrap();
        assert_eq!(again.report.eligible, 0);
        assert_eq!(fx.storage.open_count("a"), 1);
    }

    #[test]
    fn test_partial_failure_completes_with_log() {
        let fx = fixture(&[("a", "root", b"one"), ("b", "root", b"two")]);
        fx.storage.fail("b", FailureMode::PermissionDenied);

        let outcome = fx.service.hash_scope(&Scope::All, false).unwrap();
        let id = outcome.operation_id;
        assert_eq!(fx.service.tracker().get(id).unwrap().status, OperationStatus::Completed);
        assert_eq!(meta(&fx.service, id, "failed_files"), Some(1));
        assert!(!fx.service.tracker().logs(id).unwrap().is_empty());
    }

    #[test]
    fn test_total_failure_fails_operation() {
        let fx = fixture(&[("a", "root", b"one")]);
        fx.storage.fail("a", FailureMode::Permanent);

        let err = fx.service.hash_scope(&Scope::All, false).unwrap_err();
        assert!(matches!(err, DedupeError::PermanentIo(_)));
        let op = fx.service.tracker().operations_by_type(operation_types::HASH_CALCULATION);
        assert_eq!(op[0].status, OperationStatus::Failed);
        assert!(op[0].error_message.is_some());
    }

    #[test]
    fn test_unknown_file_in_scope() {
        let fx = fixture(&[("a", "root", b"one")]);
        let err = fx
            .service
            .hash_scope(&Scope::Files(vec!["a".into(), "zz".into()]), false)
            .unwrap_err();
        assert!(matches!(err, DedupeError::NotFound(_)));
        assert!(fx.service.tracker().is_empty());

        let err = fx.service.hash_scope(&Scope::Files(Vec::new()), false).unwrap_err();
        assert!(matches!(err, DedupeError::InvalidInput(_)));
    }

    #[test]
    fn test_find_duplicates_stores_groups() {
        let fx = fixture(&[
            ("a", "root", b"same"),
            ("b", "docs", b"same"),
            ("c", "root", b"other"),
        ]);
        fx.service.hash_scope(&Scope::All, false).unwrap();
        let found = fx.service.find_duplicates(&Scope::All).unwrap();

        assert_eq!(found.outcome.groups.len(), 1);
        assert_eq!(fx.gateway.groups().unwrap().len(), 1);
        let id = found.operation_id;
        assert_eq!(fx.service.tracker().get(id).unwrap().status, OperationStatus::Completed);
        assert_eq!(meta(&fx.service, id, "groups"), Some(1));
        assert_eq!(meta(&fx.service, id, "wasted_space"), Some(4));
    }

    #[test]
    fn test_folder_scope_limits_search() {
        let fx = fixture(&[
            ("a", "root", b"same"),
            ("b", "docs", b"same"),
            ("c", "docs", b"pair"),
            ("d", "docs", b"pair"),
        ]);
        fx.service.hash_scope(&Scope::All, false).unwrap();
        let found = fx
            .service
            .find_duplicates(&Scope::Folder("docs".into()))
            .unwrap();
        assert_eq!(found.outcome.groups.len(), 1);
        assert!(found.outcome.groups[0].contains("c"));
    }

    #[test]
    fn test_full_search_removes_stale_groups() {
        let fx = fixture(&[("a", "root", b"same"), ("b", "root", b"same")]);
        fx.service.hash_scope(&Scope::All, false).unwrap();
        fx.service.find_duplicates(&Scope::All).unwrap();

        let mut b = fx.gateway.file("b").unwrap().unwrap();
        b.set_hash("f".repeat(64));
        fx.gateway.upsert_files(&[b]).unwrap();

        let found = fx.service.find_duplicates(&Scope::All).unwrap();
        assert!(found.outcome.groups.is_empty());
        assert_eq!(found.stale_removed, 1);
        assert!(fx.gateway.groups().unwrap().is_empty());
    }

    #[test]
    fn test_refresh_groups_drops_shrunken_group() {
        let fx = fixture(&[
            ("a", "root", b"same"),
            ("b", "root", b"same"),
            ("c", "root", b"pair"),
            ("d", "root", b"pair"),
        ]);
        fx.service.hash_scope(&Scope::All, false).unwrap();
        fx.service.find_duplicates(&Scope::All).unwrap();

        let mut b = fx.gateway.file("b").unwrap().unwrap();
        b.set_hash("e".repeat(64));
        fx.gateway.upsert_files(&[b]).unwrap();

        let report = fx.service.refresh_groups(&Scope::All).unwrap();
        assert_eq!(report, RefreshReport { updated: 1, removed: 1 });
        assert_eq!(fx.gateway.groups().unwrap().len(), 1);
    }

    #[test]
    fn test_compare_folders_reports_overlap() {
        let fx = fixture(&[
            ("s1", "photos", b"sunset"),
            ("s2", "photos", b"beach"),
            ("t1", "backup", b"sunset"),
            ("t2", "backup", b"beach"),
            ("t3", "backup", b"receipt"),
        ]);
        fx.service.hash_scope(&Scope::All, false).unwrap();

        let outcome = fx.service.compare_folders("photos", "backup").unwrap();
        let result = &outcome.result;
        assert_eq!(result.duplicate_ids(), ["t1", "t2"]);
        assert_eq!(result.wasted_space(), 11);
        assert_eq!(result.unique_files_in_target(), 1);
        assert_eq!(result.unique_size_in_target(), 7);
        assert!(!result.can_delete_target);

        let id = outcome.operation_id;
        let progress = fx.service.tracker().get(id).unwrap();
        assert_eq!(progress.operation_type, operation_types::FOLDER_COMPARISON);
        assert_eq!(progress.status, OperationStatus::Completed);
        assert_eq!(progress.processed_items, 5);
        assert_eq!(meta(&fx.service, id, "duplicate_files"), Some(2));
        assert_eq!(meta(&fx.service, id, "wasted_space"), Some(11));
        assert_eq!(
            fx.service.tracker().metadata_value(id, "can_delete_target").unwrap(),
            Some(MetadataValue::Bool(false))
        );
    }

    #[test]
    fn test_compare_folders_recommends_deleting_copy() {
        let fx = fixture(&[
            ("s1", "photos", b"sunset"),
            ("t1", "backup", b"sunset"),
            ("t2", "backup", b"sunset"),
        ]);
        fx.service.hash_scope(&Scope::All, false).unwrap();

        let outcome = fx.service.compare_folders("photos", "backup").unwrap();
        assert!(outcome.result.can_delete_target);
        assert_eq!(
            fx.service
                .tracker()
                .metadata_value(outcome.operation_id, "can_delete_target")
                .unwrap(),
            Some(MetadataValue::Bool(true))
        );

        // Reversed, the lone photo is covered by the backup copies
        let reversed = fx.service.compare_folders("backup", "photos").unwrap();
        assert!(reversed.result.can_delete_target);
        assert_eq!(reversed.result.wasted_space(), 6);
    }

    #[test]
    fn test_compare_folders_logs_unhashed_files() {
        let fx = fixture(&[("s1", "photos", b"sunset"), ("t1", "backup", b"sunset")]);

        let outcome = fx.service.compare_folders("photos", "backup").unwrap();
        assert!(!outcome.result.has_duplicates());
        assert!(!outcome.result.can_delete_target);
        assert_eq!(meta(&fx.service, outcome.operation_id, "unhashed_files"), Some(2));
        assert_eq!(fx.service.tracker().logs(outcome.operation_id).unwrap().len(), 1);
    }

    #[test]
    fn test_compare_folder_with_itself_is_rejected() {
        let fx = fixture(&[("s1", "photos", b"sunset")]);
        let err = fx.service.compare_folders("photos", "photos").unwrap_err();
        assert!(matches!(err, DedupeError::InvalidInput(_)));
        let err = fx.service.compare_folders("", "photos").unwrap_err();
        assert!(matches!(err, DedupeError::InvalidInput(_)));
        assert!(fx.service.tracker().is_empty());
    }

    #[test]
    fn test_spawned_hash_can_be_cancelled() {
        let storage =
            Arc::new(MemoryStorage::new().with_read_delay(std::time::Duration::from_millis(20)));
        let gateway = Arc::new(MemoryGateway::new());
        let mut records = Vec::new();
        for i in 0..40 {
            let id = format!("f{i:02}");
            storage.insert(id.clone(), vec![i as u8; 8]);
            records.push(RemoteFile::new(id.clone(), id, 8, "text/plain", Utc::now()));
        }
        gateway.upsert_files(&records).unwrap();
        let engine = HashEngine::new(storage, HashAlgorithm::Blake3)
            .with_retry_policy(RetryPolicy::immediate());
        let service = Arc::new(DedupeService::new(
            gateway.clone(),
            Arc::new(OperationTracker::default()),
            Arc::new(engine),
            ServiceSettings::default().with_worker_count(1),
        ));

        let run = service.spawn_hash_scope(Scope::All, false).unwrap();
        let id = run.id();
        service.tracker().cancel(id).unwrap();

        assert_eq!(run.join().unwrap_err(), DedupeError::Cancelled);
        assert_eq!(service.tracker().get(id).unwrap().status, OperationStatus::Cancelled);
    }

    #[test]
    fn test_spawned_search_returns_outcome() {
        let fx = fixture(&[("a", "root", b"same"), ("b", "root", b"same")]);
        fx.service.hash_scope(&Scope::All, false).unwrap();
        let run = fx.service.spawn_find_duplicates(Scope::All).unwrap();
        let id = run.id();
        let found = run.join().unwrap();
        assert_eq!(found.operation_id, id);
        assert_eq!(found.outcome.groups.len(), 1);
    }
}
