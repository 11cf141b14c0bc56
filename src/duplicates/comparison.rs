//! Folder-to-folder comparison.
//!
//! [`ComparisonResult::compare`] looks for files in a target folder whose
//! content hash also appears in a source folder. Such target files are
//! redundant copies; when every target file is one, the whole target folder
//! can go.
//!
//! # Example
//!
//! ```
//! use drivedupe::catalog::RemoteFile;
//! use drivedupe::duplicates::ComparisonResult;
//! use chrono::Utc;
//!
//! let hashed = |id: &str, hash: &str| {
//!     let mut file = RemoteFile::new(id, id, 100, "image/jpeg", Utc::now());
//!     file.set_hash(hash);
//!     file
//! };
//! let source = vec![hashed("s1", "aa"), hashed("s2", "bb")];
//! let target = vec![hashed("t1", "aa"), hashed("t2", "cc")];
//!
//! let result = ComparisonResult::compare("photos", "backup", &source, &target);
//! assert_eq!(result.duplicate_ids(), ["t1"]);
//! assert_eq!(result.wasted_space(), 100);
//! assert_eq!(result.unique_files_in_target(), 1);
//! assert!(!result.can_delete_target);
//! ```

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use crate::catalog::RemoteFile;

/// Wasted space above which a comparison counts as a significant saving.
pub const SIGNIFICANT_SAVINGS: u64 = 100 * 1024 * 1024;

/// Outcome of comparing a target folder against a source folder.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonResult {
    pub source_folder: String,
    pub target_folder: String,
    pub source_file_count: usize,
    pub target_file_count: usize,
    pub source_total_size: u64,
    pub target_total_size: u64,
    /// Target files whose hash also appears in the source folder
    pub duplicate_files: Vec<RemoteFile>,
    /// Combined size of `duplicate_files`
    pub duplicate_size: u64,
    /// Share of target files that are duplicates, 0 to 100
    pub duplication_percentage: f64,
    /// True only when every target file is a duplicate
    pub can_delete_target: bool,
}

impl ComparisonResult {
    /// Compare `target` against `source`.
    ///
    /// Files without a hash never match; they still count towards the folder
    /// totals, so a target folder holding unhashed files is never reported
    /// as deletable.
    #[must_use]
    pub fn compare(
        source_folder: impl Into<String>,
        target_folder: impl Into<String>,
        source: &[RemoteFile],
        target: &[RemoteFile],
    ) -> Self {
        let source_hashes: HashSet<&str> = source.iter().filter_map(RemoteFile::hash).collect();
        let duplicate_files: Vec<RemoteFile> = target
            .iter()
            .filter(|f| f.hash().is_some_and(|h| source_hashes.contains(h)))
            .cloned()
            .collect();

        let mut result = Self {
            source_folder: source_folder.into(),
            target_folder: target_folder.into(),
            source_file_count: source.len(),
            target_file_count: target.len(),
            source_total_size: source.iter().map(|f| f.size).sum(),
            target_total_size: target.iter().map(|f| f.size).sum(),
            duplicate_size: duplicate_files.iter().map(|f| f.size).sum(),
            duplicate_files,
            duplication_percentage: 0.0,
            can_delete_target: false,
        };
        result.recalculate();
        result
    }

    fn recalculate(&mut self) {
        if self.target_file_count == 0 {
            self.duplication_percentage = 0.0;
            self.can_delete_target = false;
            return;
        }
        self.duplication_percentage =
            self.duplicate_files.len() as f64 / self.target_file_count as f64 * 100.0;
        self.can_delete_target = self.duplication_percentage >= 100.0;
    }

    #[must_use]
    pub fn duplicate_count(&self) -> usize {
        self.duplicate_files.len()
    }

    #[must_use]
    pub fn has_duplicates(&self) -> bool {
        !self.duplicate_files.is_empty()
    }

    /// Bytes freed by deleting the duplicate target files.
    #[must_use]
    pub fn wasted_space(&self) -> u64 {
        self.duplicate_size
    }

    #[must_use]
    pub fn unique_files_in_target(&self) -> usize {
        self.target_file_count.saturating_sub(self.duplicate_files.len())
    }

    #[must_use]
    pub fn unique_size_in_target(&self) -> u64 {
        self.target_total_size.saturating_sub(self.duplicate_size)
    }

    #[must_use]
    pub fn is_significant_savings(&self) -> bool {
        self.duplicate_size > SIGNIFICANT_SAVINGS
    }

    #[must_use]
    pub fn duplicate_ids(&self) -> Vec<&str> {
        self.duplicate_files.iter().map(|f| f.id.as_str()).collect()
    }

    /// Duplicate target files keyed by hash.
    #[must_use]
    pub fn duplicates_by_hash(&self) -> BTreeMap<&str, Vec<&RemoteFile>> {
        let mut by_hash: BTreeMap<&str, Vec<&RemoteFile>> = BTreeMap::new();
        for file in &self.duplicate_files {
            if let Some(hash) = file.hash() {
                by_hash.entry(hash).or_default().push(file);
            }
        }
        by_hash
    }
}
