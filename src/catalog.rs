//! File catalog records.
//!
//! A [`RemoteFile`] is the canonical record of one file in the remote storage
//! account together with its hash state. The catalog itself has no behavior
//! beyond keeping its own invariants:
//!
//! - a non-empty hash always implies `hash_calculated == true`
//!   ([`RemoteFile::set_hash`] is the only way to set either)
//! - a zero-size file is never eligible for duplicate grouping
//!
//! # Example
//!
//! ```
//! use drivedupe::catalog::RemoteFile;
//! use chrono::Utc;
//!
//! let mut file = RemoteFile::new("1a2b", "photo.jpg", 2048, "image/jpeg", Utc::now());
//! assert!(!file.is_hash_calculated());
//!
//! file.set_hash("9f86d081884c7d65");
//! assert!(file.is_hash_calculated());
//! assert_eq!(file.extension(), Some("jpg"));
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Mime type the provider uses for folders.
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// Provider-native document types that have no downloadable byte content.
pub const NATIVE_DOCUMENT_MIME_TYPES: &[&str] = &[
    "application/vnd.google-apps.document",
    "application/vnd.google-apps.spreadsheet",
    "application/vnd.google-apps.presentation",
    "application/vnd.google-apps.form",
    "application/vnd.google-apps.drawing",
    "application/vnd.google-apps.script",
    "application/vnd.google-apps.site",
    "application/vnd.google-apps.jam",
    "application/vnd.google-apps.shortcut",
];

const DOCUMENT_MIME_TYPES: &[&str] = &[
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/vnd.ms-powerpoint",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
];

const MIB: u64 = 1024 * 1024;
const GIB: u64 = MIB * 1024;

/// Broad content category derived from the mime type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileCategory {
    Folder,
    Image,
    Video,
    Audio,
    Document,
    Text,
    Other,
}

impl FileCategory {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Folder => "folder",
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Document => "document",
            Self::Text => "text",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for FileCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Size bucket used for statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeCategory {
    /// Under 1 MiB
    Small,
    /// 1 MiB up to 100 MiB
    Medium,
    /// 100 MiB up to 1 GiB
    Large,
    /// 1 GiB and above
    VeryLarge,
}

/// A file as known to the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteFile {
    /// Opaque provider-assigned identifier
    pub id: String,
    /// Display name, including extension
    pub name: String,
    /// Size in bytes
    pub size: u64,
    /// Provider-reported mime type
    pub mime_type: String,
    /// Lowercase hex content digest, once computed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    hash: Option<String>,
    #[serde(default)]
    hash_calculated: bool,
    /// Parent folder IDs, in insertion order, without repeats
    #[serde(default)]
    parents: Vec<String>,
    /// Denormalized full path (`/` separated); empty when unknown
    #[serde(default)]
    pub path: String,
    /// Last modification time reported by the provider
    pub modified: DateTime<Utc>,
    /// When this record was last changed locally
    pub last_updated: DateTime<Utc>,
}

impl RemoteFile {
    /// Create a catalog record without hash, parents or path.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        size: u64,
        mime_type: impl Into<String>,
        modified: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            size,
            mime_type: mime_type.into(),
            hash: None,
            hash_calculated: false,
            parents: Vec::new(),
            path: String::new(),
            modified,
            last_updated: Utc::now(),
        }
    }

    /// Builder-style variant of [`RemoteFile::set_path`].
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.set_path(path);
        self
    }

    /// Builder-style variant of [`RemoteFile::add_parent`].
    #[must_use]
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.add_parent(parent_id);
        self
    }

    /// The content digest, if one has been computed.
    #[must_use]
    pub fn hash(&self) -> Option<&str> {
        self.hash.as_deref()
    }

    /// Record a computed digest and mark the file as hashed.
    ///
    /// An empty digest clears the hash instead, so the flag never claims a
    /// hash that isn't there.
    pub fn set_hash(&mut self, hash: impl Into<String>) {
        let hash = hash.into();
        if hash.is_empty() {
            self.clear_hash();
            return;
        }
        self.hash = Some(hash);
        self.hash_calculated = true;
        self.touch();
    }

    /// Drop the digest, e.g. after the content changed upstream.
    pub fn clear_hash(&mut self) {
        self.hash = None;
        self.hash_calculated = false;
        self.touch();
    }

    /// True when a non-empty digest has been recorded.
    #[must_use]
    pub fn is_hash_calculated(&self) -> bool {
        self.hash_calculated && self.hash.as_deref().is_some_and(|h| !h.is_empty())
    }

    /// Parent folder IDs in the order they were added.
    #[must_use]
    pub fn parents(&self) -> &[String] {
        &self.parents
    }

    /// Add a parent folder. Adding a parent twice is a no-op.
    pub fn add_parent(&mut self, parent_id: impl Into<String>) {
        let parent_id = parent_id.into();
        if self.parents.iter().any(|p| *p == parent_id) {
            return;
        }
        self.parents.push(parent_id);
        self.touch();
    }

    /// Whether the file sits directly in the given folder.
    #[must_use]
    pub fn is_in_folder(&self, folder_id: &str) -> bool {
        self.parents.iter().any(|p| p == folder_id)
    }

    /// Replace the denormalized path.
    pub fn set_path(&mut self, path: impl Into<String>) {
        self.path = path.into();
        self.touch();
    }

    /// Number of non-empty path segments, or `None` when the path is unknown.
    #[must_use]
    pub fn path_depth(&self) -> Option<usize> {
        if self.path.trim_matches('/').is_empty() {
            return None;
        }
        Some(self.path.split('/').filter(|s| !s.is_empty()).count())
    }

    /// Extension after the last `.` in the name, without the dot.
    #[must_use]
    pub fn extension(&self) -> Option<&str> {
        let (stem, ext) = self.name.rsplit_once('.')?;
        if ext.is_empty() || stem.is_empty() {
            None
        } else {
            Some(ext)
        }
    }

    /// Whether this record describes a folder.
    #[must_use]
    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME_TYPE
    }

    /// Whether this file has byte content worth hashing.
    ///
    /// Folders, provider-native documents and empty files are excluded.
    #[must_use]
    pub fn is_hashable(&self) -> bool {
        self.size > 0
            && !self.is_folder()
            && !NATIVE_DOCUMENT_MIME_TYPES.contains(&self.mime_type.as_str())
    }

    #[must_use]
    pub fn category(&self) -> FileCategory {
        let mime = self.mime_type.as_str();
        if self.is_folder() {
            FileCategory::Folder
        } else if mime.starts_with("image") {
            FileCategory::Image
        } else if mime.starts_with("video") {
            FileCategory::Video
        } else if mime.starts_with("audio") {
            FileCategory::Audio
        } else if DOCUMENT_MIME_TYPES.contains(&mime) {
            FileCategory::Document
        } else if mime.starts_with("text") {
            FileCategory::Text
        } else {
            FileCategory::Other
        }
    }

    #[must_use]
    pub fn size_category(&self) -> SizeCategory {
        match self.size {
            s if s < MIB => SizeCategory::Small,
            s if s < 100 * MIB => SizeCategory::Medium,
            s if s < GIB => SizeCategory::Large,
            _ => SizeCategory::VeryLarge,
        }
    }

    fn touch(&mut self) {
        self.last_updated = Utc::now();
    }
}
