//! Bounded, timed retries for remote reads

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use super::{FileSource, SourceError};
use crate::config::RemoteConfig;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Per-attempt timeout
    pub timeout: Duration,
    /// Retries after the first attempt
    pub retries: u32,
    /// Base delay; attempt `n` waits `backoff * n`
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(remote: &RemoteConfig) -> Self {
        Self {
            timeout: remote.read_timeout(),
            retries: remote.retries,
            backoff: remote.retry_backoff(),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RemoteConfig::default())
    }
}

/// One read bounded by `timeout`
///
/// The read runs on its own thread. A read that outlives the timeout is
/// abandoned; its thread finishes in the background and its result is dropped.
fn read_once(
    source: &Arc<dyn FileSource>,
    path: &str,
    timeout: Duration,
) -> Result<String, SourceError> {
    let (tx, rx) = mpsc::channel();
    let worker_source = Arc::clone(source);
    let worker_path = path.to_string();
    std::thread::Builder::new()
        .name("sasmap-read".to_string())
        .spawn(move || {
            let _ = tx.send(worker_source.read(&worker_path));
        })
        .map_err(|e| SourceError::Transient {
            path: path.to_string(),
            reason: format!("cannot spawn reader: {}", e),
        })?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(mpsc::RecvTimeoutError::Timeout) => Err(SourceError::Timeout {
            path: path.to_string(),
            after: timeout,
        }),
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(SourceError::Transient {
            path: path.to_string(),
            reason: "reader exited without a result".to_string(),
        }),
    }
}

/// Read `path`, retrying retryable failures up to `policy.retries` times
///
/// Returns the last error once retries are exhausted. Non-retryable errors
/// (file gone) return immediately.
pub fn read_with_retry(
    source: &Arc<dyn FileSource>,
    path: &str,
    policy: &RetryPolicy,
) -> Result<String, SourceError> {
    let max_attempts = policy.retries + 1;
    let mut attempt = 0;
    loop {
        attempt += 1;
        match read_once(source, path, policy.timeout) {
            Ok(text) => return Ok(text),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) if attempt >= max_attempts => {
                warn!(path, attempts = attempt, error = %e, "Read retries exhausted");
                return Err(e);
            }
            Err(e) => {
                let delay = policy.backoff * attempt;
                warn!(
                    path,
                    attempt,
                    max = max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying read after error"
                );
                std::thread::sleep(delay);
            }
        }
    }
}
