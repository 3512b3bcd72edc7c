//! Encrypted container for the cache file.
//!
//! ```text
//! "DCVLCACHE" | version (1 byte) | nonce (12 bytes) | AES-256-GCM ciphertext
//! ```
//!
//! The magic and version bytes are authenticated as associated data.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;

use crate::error::{LoginResult, VaultLoginError};

use super::keys::KEY_LEN;

const MAGIC: &[u8] = b"DCVLCACHE";
pub(crate) const FORMAT_VERSION: u8 = 1;
const NONCE_LEN: usize = 12;
const HEADER_LEN: usize = MAGIC.len() + 1;

fn header() -> Vec<u8> {
    let mut header = Vec::with_capacity(HEADER_LEN);
    header.extend_from_slice(MAGIC);
    header.push(FORMAT_VERSION);
    header
}

fn cipher(key: &[u8; KEY_LEN]) -> Aes256Gcm {
    Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key))
}

pub(crate) fn seal(key: &[u8; KEY_LEN], plaintext: &[u8]) -> LoginResult<Vec<u8>> {
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);

    let header = header();
    let ciphertext = cipher(key)
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad: &header,
            },
        )
        .map_err(|_| VaultLoginError::Cache {
            message: "failed to encrypt cache file".to_string(),
        })?;

    let mut out = header;
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

pub(crate) fn open(key: &[u8; KEY_LEN], container: &[u8]) -> LoginResult<Vec<u8>> {
    if container.len() < HEADER_LEN + NONCE_LEN || !container.starts_with(MAGIC) {
        return Err(VaultLoginError::Cache {
            message: "not a cache file".to_string(),
        });
    }
    let (header, rest) = container.split_at(HEADER_LEN);
    if header[MAGIC.len()] != FORMAT_VERSION {
        return Err(VaultLoginError::Cache {
            message: format!("unsupported cache format version {}", header[MAGIC.len()]),
        });
    }
    let (nonce, ciphertext) = rest.split_at(NONCE_LEN);

    cipher(key)
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad: header,
            },
        )
        .map_err(|_| VaultLoginError::Cache {
            message: "failed to decrypt cache file".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::keys::derive_key;

    #[test]
    fn test_seal_then_open() {
        let key = derive_key(b"k");
        let sealed = seal(&key, b"{\"version\":1}").unwrap();
        assert!(sealed.starts_with(b"DCVLCACHE\x01"));
        assert_eq!(open(&key, &sealed).unwrap(), b"{\"version\":1}");
    }

    #[test]
    fn test_nonce_differs_per_write() {
        let key = derive_key(b"k");
        assert_ne!(seal(&key, b"x").unwrap(), seal(&key, b"x").unwrap());
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = seal(&derive_key(b"k"), b"secret").unwrap();
        assert!(open(&derive_key(b"other"), &sealed).is_err());
    }

    #[test]
    fn test_tampered_header_fails() {
        let key = derive_key(b"k");
        let mut sealed = seal(&key, b"secret").unwrap();
        sealed[MAGIC.len()] = 2;
        assert!(open(&key, &sealed).is_err());

        let mut sealed = seal(&key, b"secret").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xff;
        assert!(open(&key, &sealed).is_err());
    }

    #[test]
    fn test_garbage_is_rejected() {
        let key = derive_key(b"k");
        assert!(open(&key, b"").is_err());
        assert!(open(&key, b"{\"plain\": \"json\"}").is_err());
    }
}
