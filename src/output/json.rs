//! JSON output formatter.
//!
//! # Output Schema
//!
//! ```json
//! {
//!   "duplicates": [
//!     {
//!       "hash": "9f86d0…",
//!       "size": 1024,
//!       "wasted_space": 2048,
//!       "keep": "/docs/a.txt",
//!       "files": ["/docs/a.txt", "/docs/b.txt", "/docs/c.txt"]
//!     }
//!   ],
//!   "failures": [
//!     { "file_id": "x", "attempts": 4, "message": "…", "transient": true }
//!   ],
//!   "warnings": [],
//!   "statistics": {
//!     "total_files": 100,
//!     "total_size": 5242880,
//!     "by_category": { "image": { "files": 60, "size": 4194304 } },
//!     "by_size": { "small": { "files": 90, "size": 1048576 } },
//!     "by_month": { "2024-06": { "files": 100, "size": 5242880 } },
//!     "top_extensions": [{ "extension": "jpg", "count": 60, "total_size": 4194304 }]
//!   },
//!   "summary": {
//!     "algorithm": "sha256",
//!     "total_files": 100,
//!     "hashed_files": 97,
//!     "failed_files": 1,
//!     "skipped_files": 2,
//!     "bytes_hashed": 1048576,
//!     "duplicate_groups": 5,
//!     "duplicate_files": 10,
//!     "reclaimable_space": 51200,
//!     "integrity_warnings": 0,
//!     "hash_duration_ms": 1234,
//!     "exit_code": 3,
//!     "exit_code_name": "DD003"
//!   }
//! }
//! ```

use std::io::Write;

use serde::Serialize;

use super::{member_size, ScanReport};
use crate::duplicates::{DuplicateGroup, IntegrityWarning};
use crate::hasher::HashFailure;
use crate::statistics::FileStatistics;

/// A single duplicate group in JSON format.
#[derive(Debug, Clone, Serialize)]
pub struct JsonDuplicateGroup {
    /// Content digest as lowercase hex
    pub hash: String,
    /// Size of one copy in bytes
    pub size: u64,
    pub wasted_space: u64,
    /// Path of the copy recommended for keeping
    pub keep: Option<String>,
    /// Paths of every member, ordered by file ID
    pub files: Vec<String>,
}

impl JsonDuplicateGroup {
    #[must_use]
    pub fn from_duplicate_group(group: &DuplicateGroup) -> Self {
        Self {
            hash: group.hash().to_string(),
            size: member_size(group),
            wasted_space: group.wasted_space(),
            keep: group.recommended().map(|f| f.path.clone()),
            files: group.files().map(|f| f.path.clone()).collect(),
        }
    }
}

/// Summary statistics in JSON format.
#[derive(Debug, Clone, Serialize)]
pub struct JsonSummary {
    pub algorithm: String,
    pub total_files: usize,
    pub hashed_files: usize,
    pub failed_files: usize,
    pub skipped_files: usize,
    pub bytes_hashed: u64,
    pub duplicate_groups: usize,
    /// Duplicate files, not counting one kept copy per group
    pub duplicate_files: usize,
    /// Bytes freed by keeping one copy per group
    pub reclaimable_space: u64,
    pub integrity_warnings: usize,
    pub hash_duration_ms: u64,
    pub exit_code: i32,
    /// Machine-readable exit code name (e.g., "DD000")
    pub exit_code_name: String,
}

impl JsonSummary {
    #[must_use]
    pub fn from_report(report: &ScanReport) -> Self {
        let stats = &report.outcome.stats;
        let exit_code = report.exit_code();
        Self {
            algorithm: report.algorithm.clone(),
            total_files: report.statistics.total_files,
            hashed_files: report.hash.hashed,
            failed_files: report.hash.failed(),
            skipped_files: report.hash.skipped(),
            bytes_hashed: report.hash.bytes_hashed,
            duplicate_groups: stats.groups,
            duplicate_files: stats.duplicate_files,
            reclaimable_space: stats.wasted_space,
            integrity_warnings: stats.integrity_warnings,
            hash_duration_ms: u64::try_from(report.hash.duration.as_millis()).unwrap_or(u64::MAX),
            exit_code: exit_code.as_i32(),
            exit_code_name: exit_code.code_prefix().to_string(),
        }
    }
}

/// Complete JSON output structure.
#[derive(Debug, Clone, Serialize)]
pub struct JsonOutput {
    pub duplicates: Vec<JsonDuplicateGroup>,
    pub failures: Vec<HashFailure>,
    pub warnings: Vec<IntegrityWarning>,
    pub statistics: FileStatistics,
    pub summary: JsonSummary,
}

impl JsonOutput {
    #[must_use]
    pub fn new(report: &ScanReport) -> Self {
        Self {
            duplicates: report
                .outcome
                .groups
                .iter()
                .map(JsonDuplicateGroup::from_duplicate_group)
                .collect(),
            failures: report.hash.failures.clone(),
            warnings: report.outcome.warnings.clone(),
            statistics: report.statistics.clone(),
            summary: JsonSummary::from_report(report),
        }
    }

    /// Serialize to compact JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Serialize to pretty-printed JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Write JSON followed by a newline.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn write_to<W: Write>(&self, writer: &mut W, pretty: bool) -> Result<(), JsonOutputError> {
        let json = if pretty {
            self.to_json_pretty()?
        } else {
            self.to_json()?
        };
        writer.write_all(json.as_bytes())?;
        writer.write_all(b"\n")?;
        Ok(())
    }
}

/// Errors while writing JSON output.
#[derive(Debug, thiserror::Error)]
pub enum JsonOutputError {
    #[error("JSON serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to write output: {0}")]
    Io(#[from] std::io::Error),
}
