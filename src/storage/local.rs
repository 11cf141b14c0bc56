//! Local directory adapter.
//!
//! Serves a directory tree as if it were a remote storage account. File IDs
//! are `/`-separated paths relative to the root, parents are the relative
//! directory path (`root` for top-level files) and mime types are guessed
//! from the extension.

use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use walkdir::WalkDir;

use super::{StorageError, StorageReader};
use crate::catalog::RemoteFile;
use crate::progress::ProgressCallback;

/// Parent ID given to files directly under the root directory.
pub const ROOT_FOLDER_ID: &str = "root";

/// Files catalogued between two progress reports.
pub const DEFAULT_CATALOG_PROGRESS_INTERVAL: usize = 100;

/// A [`StorageReader`] over a local directory.
#[derive(Clone)]
pub struct LocalStorage {
    root: PathBuf,
    follow_symlinks: bool,
    shutdown_flag: Option<Arc<AtomicBool>>,
    progress_interval: usize,
    progress_callback: Option<Arc<dyn ProgressCallback>>,
}

impl fmt::Debug for LocalStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalStorage")
            .field("root", &self.root)
            .field("follow_symlinks", &self.follow_symlinks)
            .field("shutdown_flag", &self.shutdown_flag.is_some())
            .field("progress_interval", &self.progress_interval)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<callback>"),
            )
            .finish()
    }
}

impl LocalStorage {
    /// Create an adapter rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            follow_symlinks: false,
            shutdown_flag: None,
            progress_interval: DEFAULT_CATALOG_PROGRESS_INTERVAL,
            progress_callback: None,
        }
    }

    /// Follow symbolic links while building the catalog.
    #[must_use]
    pub fn with_follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    /// Stop walking early once the flag is set.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }

    /// Report the running file count every `interval` files while walking.
    #[must_use]
    pub fn with_progress_interval(mut self, interval: usize) -> Self {
        self.progress_interval = interval.max(1);
        self
    }

    /// Receive walk progress and unreadable entries during [`catalog`](Self::catalog).
    #[must_use]
    pub fn with_progress_callback(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag
            .as_ref()
            .is_some_and(|f| f.load(Ordering::SeqCst))
    }

    /// Walk the root and build one catalog record per regular file.
    ///
    /// Entries that cannot be read are logged and skipped. Output is sorted
    /// by file ID so repeated scans produce the same catalog.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] when the root does not exist and
    /// [`StorageError::Permanent`] when it is not a directory.
    pub fn catalog(&self) -> Result<Vec<RemoteFile>, StorageError> {
        let root_display = self.root.display().to_string();
        let metadata = std::fs::metadata(&self.root)
            .map_err(|e| StorageError::from_io(&root_display, &e))?;
        if !metadata.is_dir() {
            return Err(StorageError::permanent(root_display, "not a directory"));
        }

        if let Some(callback) = &self.progress_callback {
            callback.on_phase_start("catalog", 0);
        }
        let interval = self.progress_interval.max(1);

        let mut files = Vec::new();
        let walker = WalkDir::new(&self.root)
            .follow_links(self.follow_symlinks)
            .sort_by_file_name();

        for entry in walker {
            if self.is_shutdown_requested() {
                log::debug!("Catalog walk interrupted");
                break;
            }

            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    log::warn!("Skipping unreadable entry: {e}");
                    let path = e.path().map(|p| p.display().to_string()).unwrap_or_default();
                    self.report_failure(&path, &e.to_string());
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(e) => {
                    log::warn!("Cannot stat {}: {e}", entry.path().display());
                    self.report_failure(&entry.path().display().to_string(), &e.to_string());
                    continue;
                }
            };
            let Some(id) = self.relative_id(entry.path()) else {
                continue;
            };

            let modified: DateTime<Utc> = metadata
                .modified()
                .unwrap_or(std::time::UNIX_EPOCH)
                .into();
            let name = entry.file_name().to_string_lossy().into_owned();
            let parent = id
                .rsplit_once('/')
                .map_or(ROOT_FOLDER_ID, |(dir, _)| dir)
                .to_string();

            let file = RemoteFile::new(
                id.clone(),
                name.clone(),
                metadata.len(),
                guess_mime_type(&name),
                modified,
            )
            .with_parent(parent)
            .with_path(format!("/{id}"));

            log::trace!("Catalogued {id} ({} bytes)", file.size);
            files.push(file);
            if files.len() % interval == 0 {
                self.report_progress(files.len());
            }
        }

        if files.len() % interval != 0 {
            self.report_progress(files.len());
        }
        if let Some(callback) = &self.progress_callback {
            callback.on_phase_end("catalog");
        }
        log::debug!("Catalogued {} files under {}", files.len(), root_display);
        Ok(files)
    }

    fn report_progress(&self, count: usize) {
        if let Some(callback) = &self.progress_callback {
            callback.on_progress(count as u64, 0);
        }
    }

    fn report_failure(&self, path: &str, error: &str) {
        if let Some(callback) = &self.progress_callback {
            callback.on_item_failed(path, error);
        }
    }

    fn relative_id(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<_> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("/"))
        }
    }

    fn resolve(&self, file_id: &str) -> Result<PathBuf, StorageError> {
        let rel = Path::new(file_id);
        let escapes = rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if file_id.is_empty() || escapes {
            return Err(StorageError::permanent(file_id, "invalid file id"));
        }
        Ok(self.root.join(rel))
    }
}

impl StorageReader for LocalStorage {
    fn open_content(&self, file_id: &str) -> Result<Box<dyn Read + Send>, StorageError> {
        let path = self.resolve(file_id)?;
        let file = File::open(&path).map_err(|e| StorageError::from_io(file_id, &e))?;
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Best-effort mime type from a file name's extension.
#[must_use]
pub fn guess_mime_type(name: &str) -> &'static str {
    let ext = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "mp4" => "video/mp4",
        "mkv" => "video/x-matroska",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        "mp3" => "audio/mpeg",
        "flac" => "audio/flac",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "txt" | "log" => "text/plain",
        "md" => "text/markdown",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "json" => "application/json",
        "zip" => "application/zip",
        _ => "application/octet-stream",
    }
}
