//! Login orchestration: cache lookup, then identity proof → login → secret read.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::cache::{CacheEntry, CredentialCache, Fingerprint};
use crate::client::VaultClient;
use crate::config::{HelperConfig, RetryPolicy};
use crate::error::LoginResult;
use crate::proof::{AwsIdentityProvider, IdentityProvider};
use crate::types::{RegistryCredentials, RegistrySecret};

const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Registry credentials for the configured secret, cached across processes.
pub struct CredentialHelper {
    config: HelperConfig,
    client: VaultClient,
    cache: Option<CredentialCache>,
    identity: Box<dyn IdentityProvider>,
    fingerprint: Fingerprint,
}

impl CredentialHelper {
    /// Helper using the host's AWS context for identity proofs.
    pub fn new(config: HelperConfig) -> LoginResult<Self> {
        let identity = AwsIdentityProvider::new(config.timeout, config.metadata_timeout);
        Self::with_identity_provider(config, identity)
    }

    pub fn with_identity_provider(
        config: HelperConfig,
        identity: impl IdentityProvider + 'static,
    ) -> LoginResult<Self> {
        let client = VaultClient::from_config(&config)?;
        let cache = config
            .cache
            .enabled
            .then(|| CredentialCache::new(&config.cache));
        let fingerprint =
            Fingerprint::compute(&config.vault_addr, &config.secret_path, &config.method);

        Ok(Self {
            config,
            client,
            cache,
            identity: Box::new(identity),
            fingerprint,
        })
    }

    pub fn config(&self) -> &HelperConfig {
        &self.config
    }

    pub fn cache(&self) -> Option<&CredentialCache> {
        self.cache.as_ref()
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// The registry secret, from cache when fresh, otherwise by logging in.
    pub async fn get_secret(&self) -> LoginResult<RegistrySecret> {
        if let Some(cache) = &self.cache {
            if let Some(entry) = cache.lookup(&self.fingerprint).await {
                return Ok(entry.secret);
            }
        }

        let entry = match self.authenticate().await {
            Ok(entry) => entry,
            Err(e) => {
                if e.invalidates_cache() {
                    self.invalidate_cached().await;
                }
                return Err(e);
            }
        };

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.store(&entry).await {
                warn!(error = %e, "failed to cache credentials");
            }
        }
        Ok(entry.secret)
    }

    /// Credentials for the registry at `server_url`.
    pub async fn get_credentials(&self, server_url: &str) -> LoginResult<RegistryCredentials> {
        self.get_secret().await?.credentials_for(server_url)
    }

    async fn authenticate(&self) -> LoginResult<CacheEntry> {
        let method = &self.config.method;
        let proof = self.identity.build(method).await?;
        debug!(method = proof.kind(), role = method.role(), "built identity proof");

        let token = with_retry(self.config.retry, "login", || {
            self.client.login(method.mount_path(), method.role(), &proof)
        })
        .await?;
        info!(
            method = method.kind(),
            role = method.role(),
            lease_secs = token.lease_duration_secs,
            "logged in"
        );

        let secret = with_retry(self.config.retry, "read secret", || {
            self.client.fetch_secret(&token, &self.config.secret_path)
        })
        .await?;

        Ok(CacheEntry::new(self.fingerprint.clone(), token, secret))
    }

    async fn invalidate_cached(&self) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.invalidate(&self.fingerprint).await {
                warn!(error = %e, "failed to invalidate cached credentials");
            }
        }
    }
}

/// Run `op` until it succeeds, fails permanently, or the attempts run out.
async fn with_retry<T, F, Fut>(policy: RetryPolicy, step: &'static str, mut op: F) -> LoginResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = LoginResult<T>>,
{
    use rand::Rng;

    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                let base_backoff = policy
                    .base_delay
                    .saturating_mul(1u32 << (attempt - 1).min(16))
                    .min(MAX_BACKOFF);
                let jittered_ms =
                    rand::thread_rng().gen_range(0..=base_backoff.as_millis() as u64);
                let backoff = Duration::from_millis(jittered_ms);

                warn!(
                    error = %e,
                    step,
                    retry = attempt,
                    max_attempts = policy.max_attempts,
                    backoff_ms = backoff.as_millis(),
                    "retrying request"
                );

                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
