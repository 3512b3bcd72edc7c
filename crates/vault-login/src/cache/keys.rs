//! Cache slot and encryption key derivation.

use std::fmt;
use std::path::{Path, PathBuf};

use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{LoginResult, VaultLoginError};
use crate::types::AuthMethod;

use super::io;

const KEY_DOMAIN: &[u8] = b"docker-credential-vault-login/cache-key/v1\0";
pub(crate) const KEY_LEN: usize = 32;
const SALT_LEN: usize = 16;

const ARGON2_MEMORY_KIB: u32 = 19 * 1024;
const ARGON2_ITERATIONS: u32 = 2;
const ARGON2_PARALLELISM: u32 = 1;

/// Stable identifier of one cache slot.
///
/// Hex SHA-256 over backend address, secret path, method kind, mount path
/// and role, each length-prefixed so that no two inputs collide.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn compute(vault_addr: &str, secret_path: &str, method: &AuthMethod) -> Self {
        let mut hasher = Sha256::new();
        for part in [
            vault_addr.trim_end_matches('/'),
            secret_path.trim_matches('/'),
            method.kind(),
            method.mount_path().trim_matches('/'),
            method.role(),
        ] {
            hasher.update((part.len() as u64).to_be_bytes());
            hasher.update(part.as_bytes());
        }
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where the cache encryption key comes from.
#[derive(Clone)]
pub(crate) enum KeySource {
    /// Passphrase stretched with Argon2id; the random salt lives in `salt`.
    Passphrase { passphrase: String, salt: PathBuf },
    /// Random key material in a file.
    KeyFile(PathBuf),
}

impl fmt::Debug for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passphrase { salt, .. } => f
                .debug_struct("Passphrase")
                .field("passphrase", &"[REDACTED]")
                .field("salt", salt)
                .finish(),
            Self::KeyFile(path) => f.debug_tuple("KeyFile").field(path).finish(),
        }
    }
}

pub(crate) fn derive_key(material: &[u8]) -> [u8; KEY_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(KEY_DOMAIN);
    hasher.update(material);
    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(&hasher.finalize());
    key
}

/// Argon2id over `passphrase`. Cheap enough to run on every invocation.
pub(crate) fn derive_passphrase_key(passphrase: &str, salt: &[u8]) -> LoginResult<[u8; KEY_LEN]> {
    let params = Params::new(
        ARGON2_MEMORY_KIB,
        ARGON2_ITERATIONS,
        ARGON2_PARALLELISM,
        Some(KEY_LEN),
    )
    .map_err(kdf_error)?;
    let mut key = [0u8; KEY_LEN];
    Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
        .hash_password_into(passphrase.as_bytes(), salt, &mut key)
        .map_err(kdf_error)?;
    Ok(key)
}

fn kdf_error(e: argon2::Error) -> VaultLoginError {
    VaultLoginError::Cache {
        message: format!("failed to derive cache key: {}", e),
    }
}

impl KeySource {
    /// Key for reading. `None` if the key or salt file does not exist yet.
    pub(crate) async fn load(&self) -> LoginResult<Option<[u8; KEY_LEN]>> {
        match self {
            Self::Passphrase { passphrase, salt } => match read_exact(salt, SALT_LEN).await? {
                None => Ok(None),
                Some(salt) => derive_passphrase_key(passphrase, &salt).map(Some),
            },
            Self::KeyFile(path) => Ok(read_exact(path, KEY_LEN)
                .await?
                .map(|material| derive_key(&material))),
        }
    }

    /// Key for writing; a missing or unusable key or salt file is replaced.
    ///
    /// Must be called with the cache lock held.
    pub(crate) async fn load_or_create(&self) -> LoginResult<[u8; KEY_LEN]> {
        if let Ok(Some(key)) = self.load().await {
            return Ok(key);
        }
        match self {
            Self::Passphrase { passphrase, salt } => {
                let fresh = create_random_file(salt, SALT_LEN).await?;
                derive_passphrase_key(passphrase, &fresh)
            }
            Self::KeyFile(path) => {
                let material = create_random_file(path, KEY_LEN).await?;
                Ok(derive_key(&material))
            }
        }
    }
}

async fn read_exact(path: &Path, len: usize) -> LoginResult<Option<Vec<u8>>> {
    match io::read_optional(path).await? {
        None => Ok(None),
        Some(bytes) if bytes.len() == len => Ok(Some(bytes)),
        Some(bytes) => Err(VaultLoginError::Cache {
            message: format!(
                "{} has {} bytes, expected {}",
                path.display(),
                bytes.len(),
                len
            ),
        }),
    }
}

async fn create_random_file(path: &Path, len: usize) -> LoginResult<Vec<u8>> {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    io::write_atomic(path, &bytes).await?;
    tracing::debug!(path = %path.display(), "created cache key material");
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DEFAULT_MOUNT_PATH;

    fn iam(role: &str) -> AuthMethod {
        AuthMethod::Iam {
            mount_path: DEFAULT_MOUNT_PATH.into(),
            role: role.into(),
            server_id: None,
        }
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let a = Fingerprint::compute("http://vault:8200", "secret/docker", &iam("web"));
        let b = Fingerprint::compute("http://vault:8200/", "/secret/docker/", &iam("web"));
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_fingerprint_separates_inputs() {
        let base = Fingerprint::compute("http://vault:8200", "secret/docker", &iam("web"));
        assert_ne!(
            base,
            Fingerprint::compute("http://vault:8200", "secret/docker", &iam("api"))
        );
        assert_ne!(
            base,
            Fingerprint::compute("http://vault:8200", "secret/other", &iam("web"))
        );

        let ec2 = AuthMethod::Ec2 {
            mount_path: DEFAULT_MOUNT_PATH.into(),
            role: "web".into(),
            nonce: None,
        };
        assert_ne!(
            base,
            Fingerprint::compute("http://vault:8200", "secret/docker", &ec2)
        );
    }

    #[test]
    fn test_passphrase_key_depends_on_salt() {
        let salt = [7u8; SALT_LEN];
        let key = derive_passphrase_key("hunter2", &salt).unwrap();
        assert_eq!(key, derive_passphrase_key("hunter2", &salt).unwrap());
        assert_ne!(key, derive_passphrase_key("hunter3", &salt).unwrap());
        assert_ne!(key, derive_passphrase_key("hunter2", &[8u8; SALT_LEN]).unwrap());
        assert_ne!(key, derive_key(b"hunter2"));
    }

    #[tokio::test]
    async fn test_passphrase_salt_created_once() {
        let dir = tempfile::tempdir().unwrap();
        let salt = dir.path().join("cache.salt");
        let source = KeySource::Passphrase {
            passphrase: "hunter2".into(),
            salt: salt.clone(),
        };

        assert!(source.load().await.unwrap().is_none());
        let created = source.load_or_create().await.unwrap();
        assert_eq!(std::fs::read(&salt).unwrap().len(), SALT_LEN);
        assert_eq!(source.load().await.unwrap(), Some(created));
        assert_eq!(source.load_or_create().await.unwrap(), created);

        let rendered = format!("{:?}", source);
        assert!(!rendered.contains("hunter2"));
    }

    #[tokio::test]
    async fn test_key_file_created_once() {
        let dir = tempfile::tempdir().unwrap();
        let source = KeySource::KeyFile(dir.path().join("cache.key"));

        assert!(source.load().await.unwrap().is_none());
        let created = source.load_or_create().await.unwrap();
        let loaded = source.load().await.unwrap().unwrap();
        assert_eq!(created, loaded);
        assert_eq!(source.load_or_create().await.unwrap(), created);
    }

    #[tokio::test]
    async fn test_truncated_key_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.key");
        std::fs::write(&path, b"short").unwrap();
        let source = KeySource::KeyFile(path.clone());

        assert!(source.load().await.is_err());
        source.load_or_create().await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap().len(), KEY_LEN);
    }
}
