//! Encrypted, lock-protected credential cache shared by helper processes.
//!
//! # Cache Structure
//!
//! ```text
//! ~/.cache/docker-credential-vault-login/
//!   credentials.cache        # encrypted CacheFile (see cache/crypto.rs)
//!   credentials.cache.key    # random key material (absent with a passphrase)
//!   credentials.cache.salt   # Argon2id salt (only with a passphrase)
//!   credentials.cache.lock   # advisory lock, held per read-modify-write
//! ```
//!
//! Every failure on the read path is a Miss: a locked, missing, corrupt or
//! undecryptable cache just means the caller logs in again.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::error::{LoginResult, VaultLoginError};
use crate::types::{AccessToken, RegistrySecret};

mod crypto;
mod io;
mod keys;
mod lock;

pub use keys::Fingerprint;

use keys::KeySource;
use lock::CacheLock;

/// Token and secret obtained by one successful login.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    pub token: AccessToken,
    pub secret: RegistrySecret,
    pub fetched_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(fingerprint: Fingerprint, token: AccessToken, secret: RegistrySecret) -> Self {
        Self {
            fetched_at: token.obtained_at,
            fingerprint,
            token,
            secret,
        }
    }

    /// When the entry stops being served: `refresh_fraction` of the lease.
    ///
    /// `None` if that instant is past the representable range; such an entry
    /// never goes stale by time.
    pub fn stale_at(&self, refresh_fraction: f64) -> Option<DateTime<Utc>> {
        // Float to int casts saturate.
        let usable_ms = (self.token.lease_duration_secs as f64 * refresh_fraction * 1000.0) as i64;
        self.fetched_at
            .checked_add_signed(chrono::Duration::try_milliseconds(usable_ms)?)
    }

    pub fn is_stale(&self, now: DateTime<Utc>, refresh_fraction: f64) -> bool {
        if self.token.lease_duration_secs == 0 {
            return true;
        }
        matches!(self.stale_at(refresh_fraction), Some(at) if now >= at)
    }
}

/// Decrypted cache file contents.
#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    entries: BTreeMap<Fingerprint, CacheEntry>,
}

impl CacheFile {
    fn new() -> Self {
        Self {
            version: crypto::FORMAT_VERSION as u32,
            entries: BTreeMap::new(),
        }
    }
}

/// Credential cache at one file path.
#[derive(Debug, Clone)]
pub struct CredentialCache {
    path: PathBuf,
    lock_path: PathBuf,
    key: KeySource,
    lock_timeout: Duration,
    refresh_fraction: f64,
}

impl CredentialCache {
    pub fn new(config: &CacheConfig) -> Self {
        let key = match &config.passphrase {
            Some(p) => KeySource::Passphrase {
                passphrase: p.clone(),
                salt: io::sidecar(&config.path, ".salt"),
            },
            None => KeySource::KeyFile(io::sidecar(&config.path, ".key")),
        };
        Self {
            lock_path: io::sidecar(&config.path, ".lock"),
            path: config.path.clone(),
            key,
            lock_timeout: config.lock_timeout,
            refresh_fraction: config.refresh_fraction,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fresh entry for `fingerprint`, or `None` on any kind of miss.
    pub async fn lookup(&self, fingerprint: &Fingerprint) -> Option<CacheEntry> {
        match self.lookup_inner(fingerprint).await {
            Ok(Some(entry)) if entry.is_stale(Utc::now(), self.refresh_fraction) => {
                debug!(%fingerprint, stale_at = ?entry.stale_at(self.refresh_fraction), "cache entry stale");
                None
            }
            Ok(Some(entry)) => {
                debug!(%fingerprint, "cache hit");
                Some(entry)
            }
            Ok(None) => {
                debug!(%fingerprint, "cache miss");
                None
            }
            Err(e) => {
                warn!(error = %e, "cache unreadable, treating as miss");
                None
            }
        }
    }

    async fn lookup_inner(&self, fingerprint: &Fingerprint) -> LoginResult<Option<CacheEntry>> {
        let _lock = CacheLock::acquire(&self.lock_path, self.lock_timeout).await?;
        let Some(key) = self.key.load().await? else {
            return Ok(None);
        };
        Ok(self
            .read_file(&key)
            .await?
            .and_then(|mut file| file.entries.remove(fingerprint)))
    }

    /// Insert or replace the entry for `entry.fingerprint`.
    ///
    /// Entries for other fingerprints are preserved. An entry without a lease
    /// would never be served and is not written.
    pub async fn store(&self, entry: &CacheEntry) -> LoginResult<()> {
        if entry.token.lease_duration_secs == 0 {
            debug!(fingerprint = %entry.fingerprint, "token has no lease, not caching");
            return Ok(());
        }

        let _lock = CacheLock::acquire(&self.lock_path, self.lock_timeout).await?;
        let key = self.key.load_or_create().await?;
        let mut file = match self.read_file(&key).await {
            Ok(Some(file)) => file,
            Ok(None) => CacheFile::new(),
            Err(e) => {
                debug!(error = %e, "discarding unreadable cache file");
                CacheFile::new()
            }
        };

        let now = Utc::now();
        let refresh_fraction = self.refresh_fraction;
        file.entries
            .retain(|_, existing| !existing.is_stale(now, refresh_fraction));
        file.entries
            .insert(entry.fingerprint.clone(), entry.clone());

        self.write_file(&key, &file).await?;
        debug!(fingerprint = %entry.fingerprint, entries = file.entries.len(), "cache entry stored");
        Ok(())
    }

    /// Drop the entry for `fingerprint`, if any.
    pub async fn invalidate(&self, fingerprint: &Fingerprint) -> LoginResult<()> {
        let _lock = CacheLock::acquire(&self.lock_path, self.lock_timeout).await?;
        let Some(key) = self.key.load().await.ok().flatten() else {
            return io::remove_if_exists(&self.path).await;
        };

        match self.read_file(&key).await {
            Ok(Some(mut file)) => {
                if file.entries.remove(fingerprint).is_some() {
                    self.write_file(&key, &file).await?;
                    debug!(%fingerprint, "cache entry invalidated");
                }
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(_) => io::remove_if_exists(&self.path).await,
        }
    }

    /// Remove every entry.
    pub async fn clear(&self) -> LoginResult<()> {
        let _lock = CacheLock::acquire(&self.lock_path, self.lock_timeout).await?;
        io::remove_if_exists(&self.path).await?;
        io::remove_if_exists(&io::sidecar(&self.path, ".tmp")).await?;
        debug!(path = %self.path.display(), "cache cleared");
        Ok(())
    }

    /// Caller must hold the lock.
    async fn read_file(&self, key: &[u8; keys::KEY_LEN]) -> LoginResult<Option<CacheFile>> {
        let Some(container) = io::read_optional(&self.path).await? else {
            return Ok(None);
        };
        let plaintext = crypto::open(key, &container)?;
        let file: CacheFile =
            serde_json::from_slice(&plaintext).map_err(|e| VaultLoginError::Cache {
                message: format!("failed to parse cache file: {}", e),
            })?;
        if file.version != crypto::FORMAT_VERSION as u32 {
            return Err(VaultLoginError::Cache {
                message: format!("unsupported cache file version {}", file.version),
            });
        }
        Ok(Some(file))
    }

    /// Caller must hold the lock.
    async fn write_file(&self, key: &[u8; keys::KEY_LEN], file: &CacheFile) -> LoginResult<()> {
        let plaintext = serde_json::to_vec(file).map_err(|e| VaultLoginError::Cache {
            message: format!("failed to serialize cache file: {}", e),
        })?;
        let container = crypto::seal(key, &plaintext)?;
        io::write_atomic(&self.path, &container).await
    }
}
