//! Duplicate detection module.
//!
//! This module provides functionality for:
//! - Pre-grouping filters ([`FileFilter`])
//! - Hash-based grouping with integrity checks ([`Grouper`])
//! - Duplicate group management and keep recommendations ([`DuplicateGroup`])
//! - Folder-to-folder comparison ([`ComparisonResult`])

pub mod comparison;
pub mod filter;
pub mod grouper;
pub mod groups;

pub use comparison::ComparisonResult;
pub use filter::FileFilter;
pub use grouper::{Grouper, GrouperConfig, GroupingOutcome, GroupingStats, IntegrityWarning};
pub use groups::{recommend, DuplicateGroup, GroupError};
