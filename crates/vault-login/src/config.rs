//! Helper configuration.
//!
//! Every setting is resolved once per process into a [`HelperConfig`], from
//! environment variables first and the config file second. Nothing else in
//! the crate reads the process environment.
//!
//! # Environment
//!
//! | Variable | Description |
//! |----------|-------------|
//! | `DCVL_CONFIG_FILE` | Config file path (default: `/etc/docker-credential-vault-login/config.json`) |
//! | `DCVL_SECRET` | Path of the secret holding the registry credentials |
//! | `DCVL_AUTH_TYPE` | `iam` or `ec2` |
//! | `DCVL_ROLE` | Backend role to log in as |
//! | `DCVL_MOUNT_PATH` | Mount path of the AWS auth method (default: `auth/aws`) |
//! | `VAULT_ADDR` | Backend address (default: `https://127.0.0.1:8200`) |
//! | `DCVL_DISABLE_CACHE` | Disable the credential cache |
//! | `DCVL_CACHE_FILE` | Cache file path |
//! | `DCVL_CACHE_PASSPHRASE` | Passphrase the cache key is derived from |

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use serde_yaml::{Mapping, Value};

use crate::error::{LoginResult, VaultLoginError};
use crate::types::{AuthMethod, DEFAULT_MOUNT_PATH};

pub const ENV_CONFIG_FILE: &str = "DCVL_CONFIG_FILE";
pub const ENV_SECRET_PATH: &str = "DCVL_SECRET";
pub const ENV_AUTH_TYPE: &str = "DCVL_AUTH_TYPE";
pub const ENV_ROLE: &str = "DCVL_ROLE";
pub const ENV_MOUNT_PATH: &str = "DCVL_MOUNT_PATH";
pub const ENV_VAULT_ADDR: &str = "VAULT_ADDR";
pub const ENV_DISABLE_CACHE: &str = "DCVL_DISABLE_CACHE";
pub const ENV_CACHE_FILE: &str = "DCVL_CACHE_FILE";
pub const ENV_CACHE_PASSPHRASE: &str = "DCVL_CACHE_PASSPHRASE";

pub const DEFAULT_CONFIG_FILE: &str = "/etc/docker-credential-vault-login/config.json";
pub const DEFAULT_VAULT_ADDR: &str = "https://127.0.0.1:8200";

const MISSING_SECRET_MESSAGE: &str = "The path to the secret where your Docker credentials are stored must be specified via either (1) the DCVL_SECRET environment variable or (2) the field 'auto_auth.config.secret' of the config file.";

/// On-disk config file (YAML or JSON).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub vault: VaultSection,

    #[serde(default)]
    pub auto_auth: AutoAuthSection,

    #[serde(default)]
    pub cache: CacheSection,

    #[serde(default)]
    pub retry: RetrySection,

    /// Directory for the helper's log files.
    #[serde(default)]
    pub log_dir: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VaultSection {
    #[serde(default)]
    pub address: Option<String>,

    /// Backend request timeout in seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Instance metadata / STS timeout in seconds.
    #[serde(default)]
    pub metadata_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AutoAuthSection {
    #[serde(default)]
    pub method: Option<MethodSection>,
}

/// `auto_auth.method`. The `config` block stays loosely typed until
/// [`HelperConfig::resolve`] turns it into an [`AuthMethod`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MethodSection {
    #[serde(default, rename = "type")]
    pub method_type: Option<String>,

    #[serde(default)]
    pub mount_path: Option<String>,

    #[serde(default)]
    pub config: Mapping,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheSection {
    #[serde(default)]
    pub disabled: Option<bool>,

    #[serde(default)]
    pub path: Option<String>,

    #[serde(default)]
    pub passphrase: Option<String>,

    #[serde(default)]
    pub lock_timeout_ms: Option<u64>,

    /// Fraction of the lease after which a cached token is refreshed.
    #[serde(default)]
    pub refresh_fraction: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RetrySection {
    #[serde(default)]
    pub max_attempts: Option<u32>,

    #[serde(default)]
    pub base_delay_ms: Option<u64>,
}

impl ConfigFile {
    /// Parse YAML or JSON config text.
    pub fn parse(text: &str) -> LoginResult<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text)
            .map_err(|e| VaultLoginError::config(format!("error parsing config file: {}", e)))
    }

    /// Load a config file from disk.
    pub fn load(path: &Path) -> LoginResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            VaultLoginError::config(format!(
                "error reading config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::parse(&text)
    }

    /// Load the config file named by `DCVL_CONFIG_FILE`, or the default file.
    ///
    /// A missing default file is an empty config; a missing file that was
    /// named explicitly is an error.
    pub fn locate(env: impl Fn(&str) -> Option<String>) -> LoginResult<Self> {
        match non_empty(env(ENV_CONFIG_FILE)) {
            Some(path) => Self::load(&expand_tilde(&path)?),
            None => {
                let path = Path::new(DEFAULT_CONFIG_FILE);
                if path.exists() {
                    Self::load(path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    fn method_config(&self) -> Option<&Mapping> {
        self.auto_auth.method.as_ref().map(|m| &m.config)
    }
}

/// Credential cache settings.
#[derive(Clone)]
pub struct CacheConfig {
    pub enabled: bool,
    pub path: PathBuf,
    pub passphrase: Option<String>,
    pub lock_timeout: Duration,
    pub refresh_fraction: f64,
}

impl CacheConfig {
    pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(3);
    pub const DEFAULT_REFRESH_FRACTION: f64 = 0.9;

    /// Enabled cache at `path` with default settings.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            enabled: true,
            path: path.into(),
            passphrase: None,
            lock_timeout: Self::DEFAULT_LOCK_TIMEOUT,
            refresh_fraction: Self::DEFAULT_REFRESH_FRACTION,
        }
    }

    /// Disabled cache.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::at(PathBuf::new())
        }
    }
}

impl fmt::Debug for CacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheConfig")
            .field("enabled", &self.enabled)
            .field("path", &self.path)
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .field("lock_timeout", &self.lock_timeout)
            .field("refresh_fraction", &self.refresh_fraction)
            .finish()
    }
}

/// Bounded retry policy for transient backend failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts per network step, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

/// Fully resolved helper configuration.
#[derive(Debug, Clone)]
pub struct HelperConfig {
    /// Backend base address, without trailing slash.
    pub vault_addr: String,
    pub secret_path: String,
    pub method: AuthMethod,
    pub timeout: Duration,
    pub metadata_timeout: Duration,
    pub cache: CacheConfig,
    pub retry: RetryPolicy,
}

impl HelperConfig {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
    pub const DEFAULT_METADATA_TIMEOUT: Duration = Duration::from_secs(3);

    /// Config with defaults for everything but the essentials.
    pub fn new(
        vault_addr: impl Into<String>,
        secret_path: impl Into<String>,
        method: AuthMethod,
    ) -> Self {
        Self {
            vault_addr: vault_addr.into().trim_end_matches('/').to_string(),
            secret_path: secret_path.into(),
            method,
            timeout: Self::DEFAULT_TIMEOUT,
            metadata_timeout: Self::DEFAULT_METADATA_TIMEOUT,
            cache: CacheConfig::disabled(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Resolve from the process environment and the config file it points to.
    pub fn from_env() -> LoginResult<Self> {
        let env = |key: &str| std::env::var(key).ok();
        let file = ConfigFile::locate(env)?;
        Self::resolve(&file, env)
    }

    /// Resolve from a config file and an environment lookup.
    ///
    /// The secret path is resolved first so a missing secret is reported
    /// before anything else.
    pub fn resolve(file: &ConfigFile, env: impl Fn(&str) -> Option<String>) -> LoginResult<Self> {
        let empty = Mapping::new();
        let method_config = file.method_config().unwrap_or(&empty);

        let secret_path = resolve_secret_path(method_config, env(ENV_SECRET_PATH))?;
        let method = resolve_method(file, method_config, &env)?;

        let vault_addr = non_empty(env(ENV_VAULT_ADDR))
            .or_else(|| non_empty(file.vault.address.clone()))
            .unwrap_or_else(|| DEFAULT_VAULT_ADDR.to_string());

        let timeout = file
            .vault
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(Self::DEFAULT_TIMEOUT);
        let metadata_timeout = file
            .vault
            .metadata_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(Self::DEFAULT_METADATA_TIMEOUT);

        let cache = resolve_cache(file, &env)?;

        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_attempts: file.retry.max_attempts.unwrap_or(defaults.max_attempts).max(1),
            base_delay: file
                .retry
                .base_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.base_delay),
        };

        Ok(Self {
            vault_addr: vault_addr.trim_end_matches('/').to_string(),
            secret_path,
            method,
            timeout,
            metadata_timeout,
            cache,
            retry,
        })
    }
}

/// Resolve the secret path: `DCVL_SECRET` first, then
/// `auto_auth.method.config.secret`.
pub fn resolve_secret_path(
    method_config: &Mapping,
    env_value: Option<String>,
) -> LoginResult<String> {
    if let Some(secret) = non_empty(env_value) {
        return Ok(secret);
    }

    match string_field(method_config, "secret")? {
        None => Err(VaultLoginError::config(MISSING_SECRET_MESSAGE)),
        Some(secret) if secret.is_empty() => Err(VaultLoginError::config(
            "field 'auto_auth.method.config.secret' is empty",
        )),
        Some(secret) => Ok(secret),
    }
}

fn resolve_method(
    file: &ConfigFile,
    method_config: &Mapping,
    env: &impl Fn(&str) -> Option<String>,
) -> LoginResult<AuthMethod> {
    let section = file.auto_auth.method.as_ref();

    if let Some(kind) = section.and_then(|m| m.method_type.as_deref()) {
        if !kind.eq_ignore_ascii_case("aws") {
            return Err(VaultLoginError::config(format!(
                "unsupported auth method type {:?} in field 'auto_auth.method.type': only \"aws\" is supported",
                kind
            )));
        }
    }

    let auth_type = match non_empty(env(ENV_AUTH_TYPE)) {
        Some(t) => t,
        None => string_field(method_config, "type")?.ok_or_else(|| {
            VaultLoginError::config(format!(
                "The AWS authentication type must be specified via either (1) the {} environment variable or (2) the field 'auto_auth.method.config.type' of the config file.",
                ENV_AUTH_TYPE
            ))
        })?,
    };

    let role = match non_empty(env(ENV_ROLE)) {
        Some(r) => r,
        None => string_field(method_config, "role")?
            .filter(|r| !r.is_empty())
            .ok_or_else(|| {
                VaultLoginError::config(format!(
                    "The backend role must be specified via either (1) the {} environment variable or (2) the field 'auto_auth.method.config.role' of the config file.",
                    ENV_ROLE
                ))
            })?,
    };

    let mount_path = non_empty(env(ENV_MOUNT_PATH))
        .or_else(|| section.and_then(|m| non_empty(m.mount_path.clone())))
        .unwrap_or_else(|| DEFAULT_MOUNT_PATH.to_string())
        .trim_matches('/')
        .to_string();

    match auth_type.to_ascii_lowercase().as_str() {
        "iam" => Ok(AuthMethod::Iam {
            mount_path,
            role,
            server_id: string_field(method_config, "header_value")?.filter(|v| !v.is_empty()),
        }),
        "ec2" => Ok(AuthMethod::Ec2 {
            mount_path,
            role,
            nonce: string_field(method_config, "nonce")?.filter(|v| !v.is_empty()),
        }),
        other => Err(VaultLoginError::config(format!(
            "field 'auto_auth.method.config.type' must be either \"iam\" or \"ec2\", got {:?}",
            other
        ))),
    }
}

/// Resolve cache settings on their own (no secret path or method needed).
pub fn resolve_cache(
    file: &ConfigFile,
    env: &impl Fn(&str) -> Option<String>,
) -> LoginResult<CacheConfig> {
    let disabled = non_empty(env(ENV_DISABLE_CACHE))
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .or(file.cache.disabled)
        .unwrap_or(false);
    if disabled {
        return Ok(CacheConfig::disabled());
    }

    let path = match non_empty(env(ENV_CACHE_FILE)).or_else(|| non_empty(file.cache.path.clone()))
    {
        Some(p) => expand_tilde(&p)?,
        None => match default_cache_path() {
            Some(p) => p,
            None => {
                tracing::warn!("could not determine a cache directory; caching disabled");
                return Ok(CacheConfig::disabled());
            }
        },
    };

    let refresh_fraction = file
        .cache
        .refresh_fraction
        .unwrap_or(CacheConfig::DEFAULT_REFRESH_FRACTION);
    if !(refresh_fraction > 0.0 && refresh_fraction <= 1.0) {
        return Err(VaultLoginError::config(format!(
            "field 'cache.refresh_fraction' must be in (0, 1], got {}",
            refresh_fraction
        )));
    }

    Ok(CacheConfig {
        enabled: true,
        path,
        passphrase: non_empty(env(ENV_CACHE_PASSPHRASE))
            .or_else(|| non_empty(file.cache.passphrase.clone())),
        lock_timeout: file
            .cache
            .lock_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(CacheConfig::DEFAULT_LOCK_TIMEOUT),
        refresh_fraction,
    })
}

/// Default cache file location.
pub fn default_cache_path() -> Option<PathBuf> {
    let base = dirs::cache_dir().or_else(dirs::home_dir)?;
    Some(
        base.join("docker-credential-vault-login")
            .join("credentials.cache"),
    )
}

/// Expand a leading `~` to the current user's home directory.
pub fn expand_tilde(path: &str) -> LoginResult<PathBuf> {
    if path == "~" || path.starts_with("~/") {
        let home = dirs::home_dir().ok_or_else(|| {
            VaultLoginError::config("cannot determine home directory".to_string())
        })?;
        return Ok(match path.strip_prefix("~/") {
            Some(rest) => home.join(rest),
            None => home,
        });
    }
    if path.starts_with('~') {
        return Err(VaultLoginError::config(
            "cannot expand user-specific home dir",
        ));
    }
    Ok(PathBuf::from(path))
}

fn string_field(map: &Mapping, key: &str) -> LoginResult<Option<String>> {
    match map.get(key) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(VaultLoginError::config(format!(
            "field 'auto_auth.method.config.{}' could not be converted to string",
            key
        ))),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}
