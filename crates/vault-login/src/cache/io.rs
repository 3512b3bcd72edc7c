//! Filesystem access for the cache: atomic writes and sidecar paths.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::{LoginResult, VaultLoginError};

/// `<path><suffix>`, e.g. `credentials.cache` → `credentials.cache.lock`.
pub(crate) fn sidecar(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

pub(crate) async fn ensure_parent(path: &Path) -> LoginResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| VaultLoginError::Cache {
                message: format!("failed to create cache directory: {}", e),
            })?;
    }
    Ok(())
}

/// Read a file, `None` if it does not exist.
pub(crate) async fn read_optional(path: &Path) -> LoginResult<Option<Vec<u8>>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(VaultLoginError::Cache {
            message: format!("failed to read {}: {}", path.display(), e),
        }),
    }
}

/// Replace `path` with `content` via `<path>.tmp` and rename (owner-only on unix).
pub(crate) async fn write_atomic(path: &Path, content: &[u8]) -> LoginResult<()> {
    ensure_parent(path).await?;
    let temp_path = sidecar(path, ".tmp");

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options
        .open(&temp_path)
        .await
        .map_err(|e| VaultLoginError::Cache {
            message: format!("failed to open temp file: {}", e),
        })?;
    file.write_all(content)
        .await
        .map_err(|e| VaultLoginError::Cache {
            message: format!("failed to write temp file: {}", e),
        })?;
    file.sync_all().await.map_err(|e| VaultLoginError::Cache {
        message: format!("failed to sync temp file: {}", e),
    })?;
    drop(file);

    fs::rename(&temp_path, path)
        .await
        .map_err(|e| VaultLoginError::Cache {
            message: format!("failed to rename temp file: {}", e),
        })?;

    Ok(())
}

pub(crate) async fn remove_if_exists(path: &Path) -> LoginResult<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(VaultLoginError::Cache {
            message: format!("failed to remove {}: {}", path.display(), e),
        }),
    }
}
