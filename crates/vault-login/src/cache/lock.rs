//! Cross-process advisory lock on `<cache path>.lock`.
//!
//! flock semantics: the OS drops the lock when the process exits, so a
//! killed helper never leaves the cache locked.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::time::{Duration, Instant};

use fs2::FileExt;

use crate::error::{LoginResult, VaultLoginError};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Held exclusive lock; released on drop.
#[derive(Debug)]
pub(crate) struct CacheLock {
    file: File,
}

impl CacheLock {
    /// Poll for the exclusive lock until `timeout` elapses.
    pub(crate) async fn acquire(path: &Path, timeout: Duration) -> LoginResult<Self> {
        super::io::ensure_parent(path).await?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| VaultLoginError::Cache {
                message: format!("failed to open cache lock {}: {}", path.display(), e),
            })?;

        let deadline = Instant::now() + timeout;
        loop {
            match FileExt::try_lock_exclusive(&file) {
                Ok(()) => return Ok(Self { file }),
                Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {}
                Err(e) => {
                    return Err(VaultLoginError::Cache {
                        message: format!(
                            "failed to acquire cache lock {}: {}",
                            path.display(),
                            e
                        ),
                    })
                }
            }

            if Instant::now() >= deadline {
                return Err(VaultLoginError::Cache {
                    message: format!(
                        "timed out after {}ms waiting for cache lock {}",
                        timeout.as_millis(),
                        path.display()
                    ),
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
