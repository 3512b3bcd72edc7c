//! Core data types shared by the login engine.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LoginResult, VaultLoginError};

/// Default mount path of the backend's AWS auth method.
pub const DEFAULT_MOUNT_PATH: &str = "auth/aws";

/// Longest lease taken at face value (ten years).
pub const MAX_LEASE_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// How this host proves its AWS identity to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMethod {
    /// Signed `sts:GetCallerIdentity` request made with ambient AWS credentials.
    Iam {
        mount_path: String,
        role: String,
        /// Value of the `X-Vault-AWS-IAM-Server-ID` header, if the backend requires one.
        server_id: Option<String>,
    },

    /// PKCS7-signed EC2 instance identity document.
    Ec2 {
        mount_path: String,
        role: String,
        /// Client nonce for reauthentication.
        nonce: Option<String>,
    },
}

impl AuthMethod {
    pub fn role(&self) -> &str {
        match self {
            Self::Iam { role, .. } | Self::Ec2 { role, .. } => role,
        }
    }

    pub fn mount_path(&self) -> &str {
        match self {
            Self::Iam { mount_path, .. } | Self::Ec2 { mount_path, .. } => mount_path,
        }
    }

    /// Short name used in logs, errors and the cache fingerprint.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Iam { .. } => "iam",
            Self::Ec2 { .. } => "ec2",
        }
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, role {})", self.kind(), self.mount_path(), self.role())
    }
}

/// Backend access token with its lease.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    /// Opaque token value (sent as `X-Vault-Token`).
    pub value: String,

    /// Whether the backend allows renewal.
    pub renewable: bool,

    /// When the token was issued to us.
    pub obtained_at: DateTime<Utc>,

    /// Lease duration declared by the backend.
    pub lease_duration_secs: u64,
}

impl AccessToken {
    /// Instant after which the backend no longer honors the token.
    ///
    /// `None` when the lease reaches past what a timestamp can represent.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let secs = i64::try_from(self.lease_duration_secs).ok()?;
        self.obtained_at
            .checked_add_signed(Duration::try_seconds(secs)?)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"<redacted>")
            .field("renewable", &self.renewable)
            .field("obtained_at", &self.obtained_at)
            .field("lease_duration_secs", &self.lease_duration_secs)
            .finish()
    }
}

/// Username/password pair handed to Docker.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryCredentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for RegistryCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Decoded `data` payload of the registry secret.
///
/// Either a single `{username, password}` pair used for every registry, or a
/// map of registry hostname to such a pair.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrySecret {
    path: String,
    data: BTreeMap<String, serde_json::Value>,
}

impl RegistrySecret {
    /// Decode the secret payload read from `path`, rejecting payloads that
    /// hold no credential set at all.
    pub fn from_data(
        path: &str,
        data: BTreeMap<String, serde_json::Value>,
    ) -> LoginResult<Self> {
        let secret = Self {
            path: path.to_string(),
            data,
        };
        if secret.default_credentials().is_some() {
            return Ok(secret);
        }
        if secret.data.contains_key("username") || secret.data.contains_key("password") {
            return Err(VaultLoginError::SecretFormat {
                path: path.to_string(),
                message: "both 'username' and 'password' must be non-empty strings".to_string(),
            });
        }
        if secret.data.values().any(|v| credentials_from_value(v).is_some()) {
            return Ok(secret);
        }
        Err(VaultLoginError::SecretFormat {
            path: path.to_string(),
            message: "no 'username' and 'password' fields found".to_string(),
        })
    }

    /// Path the secret was read from.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Raw secret data.
    pub fn data(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.data
    }

    /// Credentials for `server_url`.
    ///
    /// Top-level credentials win; otherwise the entry keyed by the registry
    /// hostname is used.
    pub fn credentials_for(&self, server_url: &str) -> LoginResult<RegistryCredentials> {
        if let Some(creds) = self.default_credentials() {
            return Ok(creds);
        }

        let host = normalize_server(server_url);
        self.data
            .iter()
            .find(|(key, _)| normalize_server(key) == host)
            .and_then(|(_, value)| credentials_from_value(value))
            .ok_or_else(|| VaultLoginError::SecretFormat {
                path: self.path.clone(),
                message: format!("no credentials stored for registry {:?}", host),
            })
    }

    fn default_credentials(&self) -> Option<RegistryCredentials> {
        pair(self.data.get("username"), self.data.get("password"))
    }
}

impl fmt::Debug for RegistrySecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrySecret")
            .field("path", &self.path)
            .field("keys", &self.data.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn credentials_from_value(value: &serde_json::Value) -> Option<RegistryCredentials> {
    let obj = value.as_object()?;
    pair(obj.get("username"), obj.get("password"))
}

fn pair(
    username: Option<&serde_json::Value>,
    password: Option<&serde_json::Value>,
) -> Option<RegistryCredentials> {
    let username = username?.as_str().filter(|s| !s.is_empty())?;
    let password = password?.as_str().filter(|s| !s.is_empty())?;
    Some(RegistryCredentials {
        username: username.to_string(),
        password: password.to_string(),
    })
}

/// Reduce a Docker server URL to a lowercase host[:port].
///
/// `https://Registry.example.com/v2/` and `registry.example.com` both become
/// `registry.example.com`.
pub fn normalize_server(server: &str) -> String {
    let trimmed = server.trim();
    let parsed = if trimmed.contains("://") {
        url::Url::parse(trimmed).ok()
    } else {
        url::Url::parse(&format!("https://{}", trimmed)).ok()
    };

    match parsed.as_ref().and_then(|u| u.host_str().map(|h| (h, u.port()))) {
        Some((host, Some(port))) => format!("{}:{}", host.to_ascii_lowercase(), port),
        Some((host, None)) => host.to_ascii_lowercase(),
        None => trimmed.trim_end_matches('/').to_ascii_lowercase(),
    }
}
