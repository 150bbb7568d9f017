//! Local-mirror file source
//!
//! Remote paths are joined onto a base directory, so `/prod/jobs/a.sas` under base
//! `/mnt/sas` is read from `/mnt/sas/prod/jobs/a.sas`. Without a base directory the
//! remote path is used as a local path directly.

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::debug;

use super::{FileSource, RemoteEntry, SourceError};

#[derive(Debug, Clone, Default)]
pub struct LocalSource {
    base_dir: Option<PathBuf>,
}

impl LocalSource {
    pub fn new(base_dir: Option<PathBuf>) -> Self {
        Self { base_dir }
    }

    fn local_path(&self, remote: &str) -> PathBuf {
        match &self.base_dir {
            Some(base) => base.join(remote.trim_start_matches('/')),
            None => PathBuf::from(remote),
        }
    }
}

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with('.'))
}

fn mtime_secs(path: &Path, metadata: &std::fs::Metadata) -> Result<i64, SourceError> {
    let modified = metadata.modified().map_err(|source| SourceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(match modified.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(before) => -(before.duration().as_secs() as i64),
    })
}

impl FileSource for LocalSource {
    /// Walk the mirrored root
    ///
    /// # Guarantees
    /// - hidden files and directories (leading `.`) are skipped
    /// - symlinks are not followed
    /// - entries come back in sorted path order
    fn list(&self, root: &str) -> Result<Vec<RemoteEntry>, SourceError> {
        let local_root = self.local_path(root);
        if !local_root.is_dir() {
            return Err(SourceError::NotFound(root.to_string()));
        }

        let mut entries = Vec::new();
        for entry in walkdir::WalkDir::new(&local_root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !is_hidden(e))
        {
            let entry = entry.map_err(|e| SourceError::Io {
                path: e.path().map_or_else(|| local_root.clone(), Path::to_path_buf),
                source: e
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("directory walk failed")),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }

            let Ok(relative) = entry.path().strip_prefix(&local_root) else {
                continue;
            };
            let relative: Vec<String> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            let prefix = root.trim_end_matches('/');
            let path = format!("{}/{}", prefix, relative.join("/"));

            let metadata = entry.metadata().map_err(|e| SourceError::Io {
                path: entry.path().to_path_buf(),
                source: e
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("metadata unavailable")),
            })?;
            entries.push(RemoteEntry {
                path,
                mtime: mtime_secs(entry.path(), &metadata)?,
            });
        }

        debug!(root, files = entries.len(), "Listed root");
        Ok(entries)
    }

    /// Read a file, replacing invalid UTF-8 (SAS sources are often Latin-1)
    fn read(&self, path: &str) -> Result<String, SourceError> {
        let local = self.local_path(path);
        let bytes = std::fs::read(&local).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                SourceError::NotFound(path.to_string())
            } else {
                SourceError::Io {
                    path: local.clone(),
                    source,
                }
            }
        })?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}
