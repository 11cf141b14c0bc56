//! In-process gateway backed by ordered maps.
//!
//! A secondary hash index keeps `files_by_hash` and `files_without_hash`
//! proportional to the result size instead of the catalog size.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{GatewayError, PersistenceGateway};
use crate::catalog::RemoteFile;
use crate::duplicates::DuplicateGroup;
use crate::progress::{OperationId, Progress};

#[derive(Debug, Default)]
struct Tables {
    files: BTreeMap<String, RemoteFile>,
    by_hash: BTreeMap<String, BTreeSet<String>>,
    unhashed: BTreeSet<String>,
    groups: BTreeMap<String, DuplicateGroup>,
    progress: BTreeMap<OperationId, Progress>,
}

impl Tables {
    fn unindex(&mut self, file_id: &str) {
        let Some(old) = self.files.get(file_id) else {
            return;
        };
        match old.hash().map(str::to_string) {
            Some(hash) => {
                if let Some(ids) = self.by_hash.get_mut(&hash) {
                    ids.remove(file_id);
                    if ids.is_empty() {
                        self.by_hash.remove(&hash);
                    }
                }
            }
            None => {
                self.unhashed.remove(file_id);
            }
        }
    }

    fn index(&mut self, file: &RemoteFile) {
        match file.hash() {
            Some(hash) => {
                self.by_hash
                    .entry(hash.to_string())
                    .or_default()
                    .insert(file.id.clone());
            }
            None => {
                self.unhashed.insert(file.id.clone());
            }
        }
    }

    fn collect<'a>(&self, ids: impl IntoIterator<Item = &'a String>) -> Vec<RemoteFile> {
        ids.into_iter()
            .filter_map(|id| self.files.get(id).cloned())
            .collect()
    }
}

/// A [`PersistenceGateway`] that keeps everything in memory.
#[derive(Debug, Default)]
pub struct MemoryGateway {
    tables: RwLock<Tables>,
}

impl MemoryGateway {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of catalogued files.
    #[must_use]
    pub fn file_count(&self) -> usize {
        self.read().files.len()
    }
}

impl PersistenceGateway for MemoryGateway {
    fn upsert_files(&self, files: &[RemoteFile]) -> Result<(), GatewayError> {
        let mut tables = self.write();
        for file in files {
            tables.unindex(&file.id);
            tables.index(file);
            tables.files.insert(file.id.clone(), file.clone());
        }
        Ok(())
    }

    fn file(&self, file_id: &str) -> Result<Option<RemoteFile>, GatewayError> {
        Ok(self.read().files.get(file_id).cloned())
    }

    fn files(&self) -> Result<Vec<RemoteFile>, GatewayError> {
        Ok(self.read().files.values().cloned().collect())
    }

    fn files_without_hash(&self) -> Result<Vec<RemoteFile>, GatewayError> {
        let tables = self.read();
        Ok(tables.collect(&tables.unhashed))
    }

    fn files_by_hash(&self, hash: &str) -> Result<Vec<RemoteFile>, GatewayError> {
        let tables = self.read();
        Ok(tables
            .by_hash
            .get(hash)
            .map(|ids| tables.collect(ids))
            .unwrap_or_default())
    }

    fn files_in_folder(&self, folder_id: &str) -> Result<Vec<RemoteFile>, GatewayError> {
        Ok(self
            .read()
            .files
            .values()
            .filter(|f| f.is_in_folder(folder_id))
            .cloned()
            .collect())
    }

    fn upsert_group(&self, group: &DuplicateGroup) -> Result<(), GatewayError> {
        self.write()
            .groups
            .insert(group.hash().to_string(), group.clone());
        Ok(())
    }

    fn group(&self, hash: &str) -> Result<Option<DuplicateGroup>, GatewayError> {
        Ok(self.read().groups.get(hash).cloned())
    }

    fn groups(&self) -> Result<Vec<DuplicateGroup>, GatewayError> {
        Ok(self.read().groups.values().cloned().collect())
    }

    fn delete_group(&self, hash: &str) -> Result<bool, GatewayError> {
        Ok(self.write().groups.remove(hash).is_some())
    }

    fn upsert_progress(&self, progress: &Progress) -> Result<(), GatewayError> {
        self.write().progress.insert(progress.id, progress.clone());
        Ok(())
    }

    fn progress(&self, id: OperationId) -> Result<Option<Progress>, GatewayError> {
        Ok(self.read().progress.get(&id).cloned())
    }

    fn progress_records(&self) -> Result<Vec<Progress>, GatewayError> {
        Ok(self.read().progress.values().cloned().collect())
    }
}
