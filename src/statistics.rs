//! Catalog statistics.
//!
//! [`FileStatistics`] breaks a set of catalog records down by content
//! category, size bucket, modification month and extension. The CLI prints
//! it next to the duplicate report.
//!
//! # Example
//!
//! ```
//! use drivedupe::catalog::{FileCategory, RemoteFile};
//! use drivedupe::statistics::FileStatistics;
//! use chrono::Utc;
//!
//! let files = [
//!     RemoteFile::new("1", "a.jpg", 3000, "image/jpeg", Utc::now()),
//!     RemoteFile::new("2", "b.jpg", 1000, "image/jpeg", Utc::now()),
//!     RemoteFile::new("3", "notes.txt", 500, "text/plain", Utc::now()),
//! ];
//! let stats = FileStatistics::from_files(&files);
//! assert_eq!(stats.total_files, 3);
//! assert_eq!(stats.largest_category(), Some(FileCategory::Image));
//! assert_eq!(stats.top_extensions[0].extension, "jpg");
//! ```

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::catalog::{FileCategory, RemoteFile, SizeCategory};

/// Number of extensions kept in [`FileStatistics::top_extensions`].
pub const TOP_EXTENSIONS: usize = 10;

/// File count and combined size of one bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub files: usize,
    pub size: u64,
}

impl Totals {
    fn add(&mut self, size: u64) {
        self.files += 1;
        self.size = self.size.saturating_add(size);
    }
}

/// How many files carry one extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtensionStats {
    /// Lowercased, without the dot
    pub extension: String,
    pub count: usize,
    pub total_size: u64,
}

impl ExtensionStats {
    #[must_use]
    pub fn average_size(&self) -> u64 {
        if self.count == 0 {
            0
        } else {
            self.total_size / self.count as u64
        }
    }
}

/// Breakdown of a set of catalog records. Folders are skipped.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FileStatistics {
    pub total_files: usize,
    pub total_size: u64,
    pub by_category: BTreeMap<FileCategory, Totals>,
    pub by_size: BTreeMap<SizeCategory, Totals>,
    /// Keyed by modification month, `YYYY-MM`
    pub by_month: BTreeMap<String, Totals>,
    /// Most common extensions, by count then name
    pub top_extensions: Vec<ExtensionStats>,
}

impl FileStatistics {
    #[must_use]
    pub fn from_files<'a>(files: impl IntoIterator<Item = &'a RemoteFile>) -> Self {
        let mut stats = Self::default();
        let mut extensions: HashMap<String, ExtensionStats> = HashMap::new();

        for file in files {
            if file.is_folder() {
                continue;
            }
            stats.total_files += 1;
            stats.total_size = stats.total_size.saturating_add(file.size);
            stats.by_category.entry(file.category()).or_default().add(file.size);
            stats.by_size.entry(file.size_category()).or_default().add(file.size);
            stats
                .by_month
                .entry(file.modified.format("%Y-%m").to_string())
                .or_default()
                .add(file.size);

            if let Some(ext) = file.extension() {
                let ext = ext.to_lowercase();
                let entry = extensions.entry(ext.clone()).or_insert_with(|| ExtensionStats {
                    extension: ext,
                    count: 0,
                    total_size: 0,
                });
                entry.count += 1;
                entry.total_size = entry.total_size.saturating_add(file.size);
            }
        }

        let mut top: Vec<ExtensionStats> = extensions.into_values().collect();
        top.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.extension.cmp(&b.extension)));
        top.truncate(TOP_EXTENSIONS);
        stats.top_extensions = top;
        stats
    }

    #[must_use]
    pub fn average_file_size(&self) -> u64 {
        if self.total_files == 0 {
            0
        } else {
            self.total_size / self.total_files as u64
        }
    }

    /// Category holding the most bytes. Ties go to the earlier category.
    #[must_use]
    pub fn largest_category(&self) -> Option<FileCategory> {
        self.by_category
            .iter()
            .filter(|(_, totals)| totals.size > 0)
            .fold(None, |best: Option<(FileCategory, u64)>, (category, totals)| match best {
                Some((_, size)) if size >= totals.size => best,
                _ => Some((*category, totals.size)),
            })
            .map(|(category, _)| category)
    }
}
