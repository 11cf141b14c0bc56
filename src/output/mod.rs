//! Report formatters for a finished scan.
//!
//! A [`ScanReport`] collects the catalog statistics, the hashing report and
//! the grouping outcome of one CLI run. [`text::TextOutput`] renders it for people,
//! [`json::JsonOutput`] for scripts.

pub mod json;
pub mod text;

pub use json::JsonOutput;
pub use text::TextOutput;

use crate::duplicates::{DuplicateGroup, GroupingOutcome};
use crate::error::ExitCode;
use crate::hasher::HashReport;
use crate::statistics::FileStatistics;

/// Everything a formatter needs about one scan.
#[derive(Debug, Clone)]
pub struct ScanReport {
    /// Digest algorithm name
    pub algorithm: String,
    /// Breakdown of the catalogued files
    pub statistics: FileStatistics,
    pub hash: HashReport,
    pub outcome: GroupingOutcome,
}

impl ScanReport {
    /// Exit code for this result.
    ///
    /// Hash failures take precedence over an empty result.
    #[must_use]
    pub fn exit_code(&self) -> ExitCode {
        if self.hash.failed() > 0 {
            ExitCode::PartialSuccess
        } else if self.outcome.groups.is_empty() {
            ExitCode::NoDuplicates
        } else {
            ExitCode::Success
        }
    }
}

/// Size shared by the group members (the smallest, if they disagree).
pub(crate) fn member_size(group: &DuplicateGroup) -> u64 {
    group.files().map(|f| f.size).min().unwrap_or(0)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_precedence() {
        assert_eq!(fixtures::report(false).exit_code(), ExitCode::Success);
        assert_eq!(fixtures::report(true).exit_code(), ExitCode::PartialSuccess);

        let mut empty = fixtures::report(false);
        empty.outcome = GroupingOutcome::default();
        assert_eq!(empty.exit_code(), ExitCode::NoDuplicates);
    }
}
