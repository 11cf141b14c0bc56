//! Pre-grouping file filters.
//!
//! Every criterion is a pure predicate and criteria combine with AND.
//! Mime types and extensions form one criterion: a file passes when it
//! matches any listed mime type or any listed extension.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::RemoteFile;

/// Cumulative filter applied before grouping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileFilter {
    /// Minimum size in bytes
    pub min_size: Option<u64>,
    /// Exact mime types or `type/*` prefixes
    pub mime_types: Vec<String>,
    /// Extensions without the dot, matched case-insensitively
    pub extensions: Vec<String>,
    /// Inclusive lower bound on modification time
    pub modified_after: Option<DateTime<Utc>>,
    /// Inclusive upper bound on modification time
    pub modified_before: Option<DateTime<Utc>>,
}

impl FileFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_min_size(mut self, bytes: u64) -> Self {
        self.min_size = Some(bytes);
        self
    }

    #[must_use]
    pub fn with_mime_type(mut self, mime: impl Into<String>) -> Self {
        self.mime_types.push(mime.into());
        self
    }

    #[must_use]
    pub fn with_extension(mut self, ext: impl AsRef<str>) -> Self {
        self.extensions
            .push(ext.as_ref().trim_start_matches('.').to_ascii_lowercase());
        self
    }

    /// Keep files modified within `[from, to]`.
    #[must_use]
    pub fn with_modified_between(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.modified_after = Some(from);
        self.modified_before = Some(to);
        self
    }

    /// Whether `file` passes every configured criterion.
    ///
    /// Empty files never pass.
    #[must_use]
    pub fn matches(&self, file: &RemoteFile) -> bool {
        file.size > 0
            && self.passes_size(file)
            && self.passes_type(file)
            && self.passes_date(file)
    }

    fn passes_size(&self, file: &RemoteFile) -> bool {
        self.min_size.map_or(true, |min| file.size >= min)
    }

    fn passes_type(&self, file: &RemoteFile) -> bool {
        if self.mime_types.is_empty() && self.extensions.is_empty() {
            return true;
        }
        let mime_ok = self
            .mime_types
            .iter()
            .any(|pattern| mime_matches(pattern, &file.mime_type));
        let ext_ok = file.extension().is_some_and(|ext| {
            self.extensions
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(ext))
        });
        mime_ok || ext_ok
    }

    fn passes_date(&self, file: &RemoteFile) -> bool {
        self.modified_after.map_or(true, |from| file.modified >= from)
            && self.modified_before.map_or(true, |to| file.modified <= to)
    }
}

/// Match a mime type against an exact type or a `type/*` wildcard.
fn mime_matches(pattern: &str, mime: &str) -> bool {
    match pattern.strip_suffix("/*") {
        Some(prefix) => mime
            .split_once('/')
            .is_some_and(|(kind, _)| kind.eq_ignore_ascii_case(prefix)),
        None => pattern.eq_ignore_ascii_case(mime),
    }
}
