//! Hash-based duplicate grouping.
//!
//! The grouper takes catalog records that already carry content hashes,
//! applies the configured [`FileFilter`], partitions the survivors by hash
//! and keeps every partition large enough to be a duplicate group.
//!
//! Files that share a hash but disagree on size point at corrupt catalog
//! data. They are still grouped by hash, and each such group is reported as
//! an [`IntegrityWarning`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use super::filter::FileFilter;
use super::groups::DuplicateGroup;
use crate::catalog::RemoteFile;
use crate::progress::ProgressCallback;

/// Configuration for [`Grouper`].
#[derive(Clone)]
pub struct GrouperConfig {
    /// Filter applied before grouping
    pub filter: FileFilter,
    /// Smallest group kept (never below 2)
    pub min_group_size: usize,
    /// Keep only the N groups with the most wasted space
    pub max_results: Option<usize>,
    /// Report progress every N files (and on the last one)
    pub progress_interval: usize,
    /// Optional progress callback
    pub progress_callback: Option<Arc<dyn ProgressCallback>>,
}

impl fmt::Debug for GrouperConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GrouperConfig")
            .field("filter", &self.filter)
            .field("min_group_size", &self.min_group_size)
            .field("max_results", &self.max_results)
            .field("progress_interval", &self.progress_interval)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<callback>"),
            )
            .finish()
    }
}

impl Default for GrouperConfig {
    fn default() -> Self {
        Self {
            filter: FileFilter::default(),
            min_group_size: 2,
            max_results: None,
            progress_interval: 100,
            progress_callback: None,
        }
    }
}

impl GrouperConfig {
    #[must_use]
    pub fn with_filter(mut self, filter: FileFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Set the smallest group kept. Values below 2 are raised to 2.
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

    #[must_use]
    pub fn with_progress_interval(mut self, interval: usize) -> Self {
        self.progress_interval = interval.max(1);
        self
    }

    #[must_use]
    pub fn with_progress_callback(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress_callback = Some(callback);
        self
    }
}

/// Files that share a hash but not a size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrityWarning {
    pub hash: String,
    /// `(file id, size)` of every member, ordered by ID
    pub members: Vec<(String, u64)>,
}

impl fmt::Display for IntegrityWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let members: Vec<String> = self
            .members
            .iter()
            .map(|(id, size)| format!("{id}={size}"))
            .collect();
        write!(
            f,
            "hash {} shared by files of different sizes: {}",
            self.hash,
            members.join(", ")
        )
    }
}

/// Statistics from one grouping pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GroupingStats {
    /// Files handed to the grouper
    pub input_files: usize,
    /// Files rejected by the filter
    pub filtered_out: usize,
    /// Files that passed the filter and carry a hash
    pub hashed_candidates: usize,
    /// Groups returned
    pub groups: usize,
    /// Redundant copies across returned groups (members minus one per group)
    pub duplicate_files: usize,
    /// Bytes reclaimable across returned groups
    pub wasted_space: u64,
    /// Groups with members of differing sizes
    pub integrity_warnings: usize,
}

impl GroupingStats {
    /// Percentage of hashed candidates that are redundant copies.
    #[must_use]
    pub fn duplicate_rate(&self) -> f64 {
        if self.hashed_candidates == 0 {
            0.0
        } else {
            (self.duplicate_files as f64 / self.hashed_candidates as f64) * 100.0
        }
    }
}

/// Result of [`Grouper::group`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct GroupingOutcome {
    /// Groups sorted by wasted space (descending), then hash
    pub groups: Vec<DuplicateGroup>,
    pub stats: GroupingStats,
    pub warnings: Vec<IntegrityWarning>,
}

/// Partitions hashed files into duplicate groups.
#[derive(Debug, Clone, Default)]
pub struct Grouper {
    config: GrouperConfig,
}

impl Grouper {
    #[must_use]
    pub fn new(config: GrouperConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &GrouperConfig {
        &self.config
    }

    fn report(&self, processed: usize, total: usize) {
        if let Some(callback) = &self.config.progress_callback {
            callback.on_progress(processed as u64, total as u64);
        }
    }

    /// Group files by content hash.
    ///
    /// Files without a hash, files rejected by the filter and groups smaller
    /// than `min_group_size` are dropped.
    #[must_use]
    pub fn group(&self, files: Vec<RemoteFile>) -> GroupingOutcome {
        let total = files.len();
        let interval = self.config.progress_interval.max(1);
        let mut stats = GroupingStats {
            input_files: total,
            ..GroupingStats::default()
        };

        if let Some(callback) = &self.config.progress_callback {
            callback.on_phase_start("grouping", total as u64);
        }

        let mut by_hash: HashMap<String, DuplicateGroup> = HashMap::new();
        for (index, file) in files.into_iter().enumerate() {
            let processed = index + 1;
            if processed % interval == 0 || processed == total {
                self.report(processed, total);
            }

            if !self.config.filter.matches(&file) {
                stats.filtered_out += 1;
                continue;
            }
            let Some(hash) = file.hash().map(str::to_string) else {
                continue;
            };
            stats.hashed_candidates += 1;

            let group = by_hash
                .entry(hash.clone())
                .or_insert_with(|| DuplicateGroup::new(hash));
            if let Err(e) = group.add_file(file) {
                log::debug!("Skipping file during grouping: {e}");
            }
        }

        let min_size = self.config.min_group_size.max(2);
        let mut warnings = Vec::new();
        let mut groups: Vec<DuplicateGroup> = by_hash
            .into_values()
            .filter(|group| group.count() >= min_size)
            .inspect(|group| {
                if group.has_size_mismatch() {
                    let warning = IntegrityWarning {
                        hash: group.hash().to_string(),
                        members: group.files().map(|f| (f.id.clone(), f.size)).collect(),
                    };
                    log::warn!("Data integrity: {warning}");
                    warnings.push(warning);
                }
            })
            .collect();

        groups.sort_by(|a, b| {
            b.wasted_space()
                .cmp(&a.wasted_space())
                .then_with(|| a.hash().cmp(b.hash()))
        });
        if let Some(max) = self.config.max_results {
            groups.truncate(max);
        }
        warnings.sort_by(|a, b| a.hash.cmp(&b.hash));

        stats.groups = groups.len();
        stats.duplicate_files = groups.iter().map(|g| g.count() - 1).sum();
        stats.wasted_space = groups.iter().map(DuplicateGroup::wasted_space).sum();
        stats.integrity_warnings = warnings.len();

        if let Some(callback) = &self.config.progress_callback {
            callback.on_phase_end("grouping");
        }

        log::info!(
            "Grouping complete: {} files -> {} groups, {} redundant copies, {} bytes reclaimable",
            stats.input_files,
            stats.groups,
            stats.duplicate_files,
            stats.wasted_space
        );

        GroupingOutcome {
            groups,
            stats,
            warnings,
        }
    }
}
