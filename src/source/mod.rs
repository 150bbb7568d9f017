//! Remote file source abstraction
//!
//! The scanner only ever lists a root and reads a file. Everything about how the
//! remote tree is reached lives behind [`FileSource`].

pub mod local;
pub mod memory;
pub mod retry;

use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub use local::LocalSource;
pub use memory::MemorySource;
pub use retry::{read_with_retry, RetryPolicy};

/// One file in a root listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteEntry {
    /// Root-qualified path with `/` separators
    pub path: String,
    /// Modification time, seconds since the Unix epoch
    pub mtime: i64,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Read of {path} timed out after {after:?}")]
    Timeout { path: String, after: Duration },

    #[error("Transient failure reading {path}: {reason}")]
    Transient { path: String, reason: String },
}

impl SourceError {
    /// Whether another attempt could succeed
    pub fn is_retryable(&self) -> bool {
        !matches!(self, SourceError::NotFound(_))
    }
}

/// Access to the remote SAS tree
pub trait FileSource: Send + Sync {
    /// Recursive listing of every file under `root`
    fn list(&self, root: &str) -> Result<Vec<RemoteEntry>, SourceError>;

    /// Full text of one file
    fn read(&self, path: &str) -> Result<String, SourceError>;
}

/// True when `path` lies under `root` (both `/`-separated, root normalized)
pub fn is_under(path: &str, root: &str) -> bool {
    if root == "/" {
        return path.starts_with('/');
    }
    path.strip_prefix(root)
        .is_some_and(|rest| rest.starts_with('/'))
}
