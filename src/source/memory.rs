//! In-memory file source
//!
//! Holds a path -> (mtime, text) map. Reads of chosen paths can be made to fail a
//! fixed number of times, or always, to exercise retry and `read_failed` handling.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, RwLock};

use super::{is_under, FileSource, RemoteEntry, SourceError};

#[derive(Debug, Default)]
pub struct MemorySource {
    files: RwLock<BTreeMap<String, (i64, String)>>,
    /// path -> remaining injected failures (`None` = fail forever)
    failures: Mutex<HashMap<String, Option<u32>>>,
    reads: Mutex<HashMap<String, usize>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a file
    pub fn insert(&self, path: &str, mtime: i64, text: &str) {
        if let Ok(mut files) = self.files.write() {
            files.insert(path.to_string(), (mtime, text.to_string()));
        }
    }

    pub fn remove(&self, path: &str) {
        if let Ok(mut files) = self.files.write() {
            files.remove(path);
        }
    }

    /// Make the next `times` reads of `path` fail with a transient error
    pub fn fail_reads(&self, path: &str, times: u32) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.insert(path.to_string(), Some(times));
        }
    }

    /// Make every read of `path` fail until [`MemorySource::heal`] is called
    pub fn fail_always(&self, path: &str) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.insert(path.to_string(), None);
        }
    }

    pub fn heal(&self, path: &str) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.remove(path);
        }
    }

    /// Number of read attempts made for `path`
    pub fn read_count(&self, path: &str) -> usize {
        self.reads
            .lock()
            .map(|reads| reads.get(path).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Total read attempts across all paths
    pub fn total_reads(&self) -> usize {
        self.reads
            .lock()
            .map(|reads| reads.values().sum())
            .unwrap_or(0)
    }

    fn take_failure(&self, path: &str) -> bool {
        let Ok(mut failures) = self.failures.lock() else {
            return false;
        };
        match failures.get_mut(path) {
            Some(None) => true,
            Some(Some(0)) => {
                failures.remove(path);
                false
            }
            Some(Some(remaining)) => {
                *remaining -= 1;
                true
            }
            None => false,
        }
    }
}

impl FileSource for MemorySource {
    fn list(&self, root: &str) -> Result<Vec<RemoteEntry>, SourceError> {
        let files = self
            .files
            .read()
            .map_err(|_| SourceError::Transient {
                path: root.to_string(),
                reason: "file map lock poisoned".to_string(),
            })?;
        Ok(files
            .iter()
            .filter(|(path, _)| is_under(path, root))
            .map(|(path, (mtime, _))| RemoteEntry {
                path: path.clone(),
                mtime: *mtime,
            })
            .collect())
    }

    fn read(&self, path: &str) -> Result<String, SourceError> {
        if let Ok(mut reads) = self.reads.lock() {
            *reads.entry(path.to_string()).or_insert(0) += 1;
        }
        if self.take_failure(path) {
            return Err(SourceError::Transient {
                path: path.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        let files = self
            .files
            .read()
            .map_err(|_| SourceError::Transient {
                path: path.to_string(),
                reason: "file map lock poisoned".to_string(),
            })?;
        files
            .get(path)
            .map(|(_, text)| text.clone())
            .ok_or_else(|| SourceError::NotFound(path.to_string()))
    }
}
