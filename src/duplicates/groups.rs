//! Duplicate groups.
//!
//! # Overview
//!
//! A [`DuplicateGroup`] collects every catalog file that shares one content
//! hash. Membership is a set keyed by file ID, and every derived figure
//! (count, total size, wasted space) is computed from the members on demand,
//! so the numbers can never drift from the membership.
//!
//! # Example
//!
//! ```
//! use drivedupe::catalog::RemoteFile;
//! use drivedupe::duplicates::DuplicateGroup;
//! use chrono::Utc;
//!
//! let mut a = RemoteFile::new("a", "a.jpg", 1000, "image/jpeg", Utc::now());
//! let mut b = RemoteFile::new("b", "b.jpg", 1000, "image/jpeg", Utc::now());
//! a.set_hash("cafe");
//! b.set_hash("cafe");
//!
//! let group = DuplicateGroup::from_files("cafe", [a, b]).unwrap();
//! assert_eq!(group.count(), 2);
//! assert_eq!(group.total_size(), 2000);
//! assert_eq!(group.wasted_space(), 1000);
//! assert!(group.is_valid());
//! ```

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::RemoteFile;

/// Errors from group membership changes.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum GroupError {
    /// The file's hash is missing or differs from the group's.
    #[error("File {file_id} has hash {found:?}, group expects {expected}")]
    HashMismatch {
        file_id: String,
        expected: String,
        found: Option<String>,
    },

    /// A file with this ID is already a member.
    #[error("File {0} is already in the group")]
    DuplicateMember(String),

    /// Only groups with the same hash can be merged.
    #[error("Cannot merge group {other} into group {expected}")]
    MergeMismatch { expected: String, other: String },
}

/// Files sharing one content hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    hash: String,
    members: BTreeMap<String, RemoteFile>,
    last_updated: DateTime<Utc>,
}

impl DuplicateGroup {
    /// Create an empty group for `hash`.
    #[must_use]
    pub fn new(hash: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            members: BTreeMap::new(),
            last_updated: Utc::now(),
        }
    }

    /// Create a group from files that all carry `hash`.
    ///
    /// # Errors
    ///
    /// Fails on the first file with a different hash or a repeated ID.
    pub fn from_files(
        hash: impl Into<String>,
        files: impl IntoIterator<Item = RemoteFile>,
    ) -> Result<Self, GroupError> {
        let mut group = Self::new(hash);
        for file in files {
            group.add_file(file)?;
        }
        Ok(group)
    }

    /// The shared content hash.
    #[must_use]
    pub fn hash(&self) -> &str {
        &self.hash
    }

    #[must_use]
    pub fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    /// Add a member.
    ///
    /// # Errors
    ///
    /// [`GroupError::HashMismatch`] if the file's hash differs from the
    /// group's, [`GroupError::DuplicateMember`] if the ID is already present.
    pub fn add_file(&mut self, file: RemoteFile) -> Result<(), GroupError> {
        if file.hash() != Some(self.hash.as_str()) {
            return Err(GroupError::HashMismatch {
                file_id: file.id.clone(),
                expected: self.hash.clone(),
                found: file.hash().map(str::to_string),
            });
        }
        if self.members.contains_key(&file.id) {
            return Err(GroupError::DuplicateMember(file.id));
        }
        self.members.insert(file.id.clone(), file);
        self.last_updated = Utc::now();
        Ok(())
    }

    /// Remove a member by ID, returning it if it was present.
    pub fn remove_file(&mut self, file_id: &str) -> Option<RemoteFile> {
        let removed = self.members.remove(file_id);
        if removed.is_some() {
            self.last_updated = Utc::now();
        }
        removed
    }

    /// Set-union with another group of the same hash.
    ///
    /// Members already present keep their current record.
    ///
    /// # Errors
    ///
    /// [`GroupError::MergeMismatch`] when the hashes differ. Nothing changes.
    pub fn merge(&mut self, other: DuplicateGroup) -> Result<(), GroupError> {
        if other.hash != self.hash {
            return Err(GroupError::MergeMismatch {
                expected: self.hash.clone(),
                other: other.hash,
            });
        }
        for (id, file) in other.members {
            self.members.entry(id).or_insert(file);
        }
        self.last_updated = Utc::now();
        Ok(())
    }

    #[must_use]
    pub fn contains(&self, file_id: &str) -> bool {
        self.members.contains_key(file_id)
    }

    #[must_use]
    pub fn file(&self, file_id: &str) -> Option<&RemoteFile> {
        self.members.get(file_id)
    }

    /// Members ordered by file ID.
    pub fn files(&self) -> impl Iterator<Item = &RemoteFile> {
        self.members.values()
    }

    /// Member IDs in ascending order.
    #[must_use]
    pub fn file_ids(&self) -> Vec<&str> {
        self.members.keys().map(String::as_str).collect()
    }

    /// Every member except `file_id`.
    #[must_use]
    pub fn files_except(&self, file_id: &str) -> Vec<&RemoteFile> {
        self.files().filter(|f| f.id != file_id).collect()
    }

    #[must_use]
    pub fn has_file_in_folder(&self, folder_id: &str) -> bool {
        self.files().any(|f| f.is_in_folder(folder_id))
    }

    #[must_use]
    pub fn files_in_folder(&self, folder_id: &str) -> Vec<&RemoteFile> {
        self.files().filter(|f| f.is_in_folder(folder_id)).collect()
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.files().map(|f| f.size).sum()
    }

    /// Bytes that deleting all but the smallest copy would free.
    #[must_use]
    pub fn wasted_space(&self) -> u64 {
        let smallest = self.files().map(|f| f.size).min().unwrap_or(0);
        self.total_size().saturating_sub(smallest)
    }

    /// A group is only meaningful with two or more members.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.count() > 1
    }

    /// Whether members disagree on size despite sharing a hash.
    #[must_use]
    pub fn has_size_mismatch(&self) -> bool {
        let mut sizes = self.files().map(|f| f.size);
        match sizes.next() {
            Some(first) => sizes.any(|s| s != first),
            None => false,
        }
    }

    /// Member with the earliest modification time.
    #[must_use]
    pub fn oldest(&self) -> Option<&RemoteFile> {
        self.files().min_by(|a, b| a.modified.cmp(&b.modified).then(a.id.cmp(&b.id)))
    }

    /// Member with the latest modification time.
    #[must_use]
    pub fn newest(&self) -> Option<&RemoteFile> {
        self.files().max_by(|a, b| a.modified.cmp(&b.modified).then(b.id.cmp(&a.id)))
    }

    /// The copy to keep. See [`recommend`].
    #[must_use]
    pub fn recommended(&self) -> Option<&RemoteFile> {
        recommend(self)
    }

    /// Every member except the recommended one.
    #[must_use]
    pub fn deletion_candidates(&self) -> Vec<&RemoteFile> {
        match self.recommended() {
            Some(keep) => self.files_except(&keep.id),
            None => Vec::new(),
        }
    }
}

/// Pick the copy to keep: earliest modification time, then the shallowest
/// path (unknown paths sort last), then the smallest file ID.
#[must_use]
pub fn recommend(group: &DuplicateGroup) -> Option<&RemoteFile> {
    group.files().min_by(|a, b| keep_order(a, b))
}

fn keep_order(a: &RemoteFile, b: &RemoteFile) -> Ordering {
    let depth = |f: &RemoteFile| f.path_depth().unwrap_or(usize::MAX);
    a.modified
        .cmp(&b.modified)
        .then_with(|| depth(a).cmp(&depth(b)))
        .then_with(|| a.id.cmp(&b.id))
}
