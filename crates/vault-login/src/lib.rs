//! AWS-authenticated registry credentials from a secrets backend.
//!
//! This crate is the engine behind `docker-credential-vault-login`:
//!
//! - IAM (signed `sts:GetCallerIdentity`) and EC2 (PKCS7 identity document) login proofs
//! - Backend login and secret read over HTTP
//! - Encrypted credential cache shared by concurrent helper processes
//! - Bounded retry of transient backend failures
//!
//! # Quick Start
//!
//! ```no_run
//! use vault_login::{CredentialHelper, HelperConfig};
//!
//! # async fn example() -> anyhow::Result<()> {
//! // Resolve configuration from environment and config file
//! let config = HelperConfig::from_env()?;
//! let helper = CredentialHelper::new(config)?;
//!
//! let creds = helper.get_credentials("registry.example.com").await?;
//! println!("logging in as {}", creds.username);
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! | Environment Variable | Description |
//! |---------------------|-------------|
//! | `DCVL_SECRET` | Secret path holding the registry credentials |
//! | `DCVL_AUTH_TYPE` | `iam` or `ec2` |
//! | `DCVL_ROLE` | Backend role |
//! | `VAULT_ADDR` | Backend address (default: `https://127.0.0.1:8200`) |
//! | `DCVL_DISABLE_CACHE` | Disable the credential cache |
//!
//! See [`config`] for the full list and the config file format.

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod login;
pub mod proof;
pub mod types;

// Re-export main types
pub use cache::{CacheEntry, CredentialCache, Fingerprint};
pub use client::VaultClient;
pub use config::{CacheConfig, ConfigFile, HelperConfig, RetryPolicy};
pub use error::{ErrorKind, LoginResult, VaultLoginError};
pub use login::CredentialHelper;
pub use proof::{
    AwsCredentials, AwsIdentityProvider, Ec2Proof, IamProof, IdentityProof, IdentityProvider,
    StaticIdentityProvider,
};
pub use types::{AccessToken, AuthMethod, RegistryCredentials, RegistrySecret};
