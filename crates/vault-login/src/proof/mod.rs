//! Identity proofs: what this host shows the backend to prove its AWS identity.
//!
//! [`IdentityProvider`] is the seam between the login flow and AWS. The
//! production [`AwsIdentityProvider`] resolves credentials through the
//! standard AWS chain (environment, profile files, instance profile) and
//! talks to the instance metadata service; [`StaticIdentityProvider`] signs
//! with fixed credentials and never touches the network.

use std::time::Duration;

use async_trait::async_trait;
use aws_credential_types::provider::ProvideCredentials;
use chrono::Utc;
use tracing::debug;

use crate::error::{LoginResult, VaultLoginError};
use crate::types::AuthMethod;

pub mod ec2;
pub mod iam;
pub mod sigv4;

pub use ec2::Ec2Proof;
pub use iam::IamProof;
pub use sigv4::AwsCredentials;

/// Login payload for one authentication attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityProof {
    Iam(IamProof),
    Ec2(Ec2Proof),
}

impl IdentityProof {
    pub fn role(&self) -> &str {
        match self {
            Self::Iam(p) => &p.role,
            Self::Ec2(p) => &p.role,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Iam(_) => "iam",
            Self::Ec2(_) => "ec2",
        }
    }
}

/// Builds identity proofs for an [`AuthMethod`].
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn build(&self, method: &AuthMethod) -> LoginResult<IdentityProof>;
}

/// Identity from the host's real AWS context.
#[derive(Debug, Clone)]
pub struct AwsIdentityProvider {
    credentials_timeout: Duration,
    metadata_timeout: Duration,
}

impl AwsIdentityProvider {
    pub fn new(credentials_timeout: Duration, metadata_timeout: Duration) -> Self {
        Self {
            credentials_timeout,
            metadata_timeout,
        }
    }

    async fn resolve_credentials(&self) -> LoginResult<AwsCredentials> {
        let sdk_config = tokio::time::timeout(
            self.credentials_timeout,
            aws_config::defaults(aws_config::BehaviorVersion::latest()).load(),
        )
        .await
        .map_err(|_| VaultLoginError::CredentialResolution {
            message: format!(
                "AWS configuration not loaded within {}s",
                self.credentials_timeout.as_secs()
            ),
        })?;
        let provider =
            sdk_config
                .credentials_provider()
                .ok_or_else(|| VaultLoginError::CredentialResolution {
                    message: "no AWS credentials provider available".to_string(),
                })?;

        let credentials = tokio::time::timeout(
            self.credentials_timeout,
            provider.provide_credentials(),
        )
        .await
        .map_err(|_| VaultLoginError::CredentialResolution {
            message: format!(
                "no credentials within {}s",
                self.credentials_timeout.as_secs()
            ),
        })?
        .map_err(|e| VaultLoginError::CredentialResolution {
            message: e.to_string(),
        })?;

        debug!(
            access_key_id = %credentials.access_key_id(),
            "resolved AWS credentials"
        );
        Ok(AwsCredentials::new(
            credentials.access_key_id(),
            credentials.secret_access_key(),
            credentials.session_token().map(String::from),
        ))
    }
}

#[async_trait]
impl IdentityProvider for AwsIdentityProvider {
    async fn build(&self, method: &AuthMethod) -> LoginResult<IdentityProof> {
        match method {
            AuthMethod::Iam {
                role, server_id, ..
            } => {
                let credentials = self.resolve_credentials().await?;
                let proof = IamProof::sign(role, &credentials, server_id.as_deref(), Utc::now())?;
                Ok(IdentityProof::Iam(proof))
            }
            AuthMethod::Ec2 { role, nonce, .. } => {
                let pkcs7 = ec2::fetch_pkcs7(self.metadata_timeout).await?;
                Ok(IdentityProof::Ec2(Ec2Proof::new(
                    role,
                    &pkcs7,
                    nonce.as_deref(),
                )))
            }
        }
    }
}

/// Identity from explicitly supplied AWS material.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentityProvider {
    credentials: Option<AwsCredentials>,
    pkcs7: Option<String>,
}

impl StaticIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sign IAM proofs with these credentials.
    pub fn with_credentials(mut self, credentials: AwsCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Use this PKCS7 document for EC2 proofs.
    pub fn with_pkcs7(mut self, pkcs7: impl Into<String>) -> Self {
        self.pkcs7 = Some(pkcs7.into());
        self
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn build(&self, method: &AuthMethod) -> LoginResult<IdentityProof> {
        match method {
            AuthMethod::Iam {
                role, server_id, ..
            } => {
                let credentials =
                    self.credentials
                        .as_ref()
                        .ok_or_else(|| VaultLoginError::CredentialResolution {
                            message: "no static AWS credentials configured".to_string(),
                        })?;
                let proof = IamProof::sign(role, credentials, server_id.as_deref(), Utc::now())?;
                Ok(IdentityProof::Iam(proof))
            }
            AuthMethod::Ec2 { role, nonce, .. } => {
                let pkcs7 =
                    self.pkcs7
                        .as_deref()
                        .ok_or_else(|| VaultLoginError::MetadataUnavailable {
                            message: "no static PKCS7 document configured".to_string(),
                        })?;
                Ok(IdentityProof::Ec2(Ec2Proof::new(role, pkcs7, nonce.as_deref())))
            }
        }
    }
}
