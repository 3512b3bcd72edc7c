//! Backend client: AWS login and registry secret reads.
//!
//! Public API: no status code knowledge. All HTTP/status mapping in http.rs.

use std::time::Duration;

use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::debug;

use crate::config::HelperConfig;
use crate::error::{LoginResult, VaultLoginError};
use crate::proof::IdentityProof;
use crate::types::{AccessToken, RegistrySecret, MAX_LEASE_SECS};

mod helpers;
mod http;

use helpers::api_url;
use http::HttpBackend;

const USER_AGENT_VALUE: &str = concat!("vault-login/", env!("CARGO_PKG_VERSION"));

/// Client for one backend address.
#[derive(Debug, Clone)]
pub struct VaultClient {
    http: HttpBackend,
}

impl VaultClient {
    pub fn new(address: &str, timeout: Duration) -> LoginResult<Self> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(default_headers)
            .build()
            .map_err(|e| VaultLoginError::config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http: HttpBackend {
                client,
                base_url: address.trim_end_matches('/').to_string(),
            },
        })
    }

    pub fn from_config(config: &HelperConfig) -> LoginResult<Self> {
        Self::new(&config.vault_addr, config.timeout)
    }

    pub fn address(&self) -> &str {
        &self.http.base_url
    }

    /// Exchange an identity proof for an access token.
    ///
    /// The proof must be for `role`, and IAM proofs are checked locally before
    /// anything is sent.
    pub async fn login(
        &self,
        mount_path: &str,
        role: &str,
        proof: &IdentityProof,
    ) -> LoginResult<AccessToken> {
        if proof.role() != role {
            return Err(VaultLoginError::MalformedProof {
                message: format!(
                    "proof is for role {:?}, login requested for {:?}",
                    proof.role(),
                    role
                ),
            });
        }

        let payload = match proof {
            IdentityProof::Iam(p) => {
                p.validate()?;
                serde_json::to_value(p)
            }
            IdentityProof::Ec2(p) => serde_json::to_value(p),
        }
        .map_err(|e| VaultLoginError::MalformedProof {
            message: format!("failed to encode login payload: {}", e),
        })?;

        let url = api_url(&self.http.base_url, &format!("{}/login", mount_path.trim_matches('/')));
        let auth = self.http.login(&url, &payload, role, proof.kind()).await?;
        debug!(
            role,
            method = proof.kind(),
            renewable = auth.renewable,
            lease_secs = auth.lease_duration,
            "login succeeded"
        );

        Ok(AccessToken {
            value: auth.client_token,
            renewable: auth.renewable,
            obtained_at: Utc::now(),
            lease_duration_secs: auth.lease_duration.min(MAX_LEASE_SECS),
        })
    }

    /// Read the registry secret at `secret_path` with `token`.
    pub async fn fetch_secret(
        &self,
        token: &AccessToken,
        secret_path: &str,
    ) -> LoginResult<RegistrySecret> {
        if token.value.is_empty() {
            return Err(VaultLoginError::MissingToken {
                message: "access token is empty".to_string(),
            });
        }

        let url = api_url(&self.http.base_url, secret_path);
        let data = self.http.read_secret(&url, &token.value, secret_path).await?;
        RegistrySecret::from_data(secret_path, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proof::{AwsCredentials, Ec2Proof, IamProof};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> VaultClient {
        VaultClient::new(&server.uri(), Duration::from_secs(5)).unwrap()
    }

    fn iam_proof(role: &str) -> IdentityProof {
        let creds = AwsCredentials::new("AKIDEXAMPLE", "secret", None);
        IdentityProof::Iam(IamProof::sign(role, &creds, None, Utc::now()).unwrap())
    }

    fn token(value: &str) -> AccessToken {
        AccessToken {
            value: value.to_string(),
            renewable: false,
            obtained_at: Utc::now(),
            lease_duration_secs: 3600,
        }
    }

    #[tokio::test]
    async fn test_login_returns_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/auth/aws/login"))
            .and(body_partial_json(serde_json::json!({"role": "web"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "auth": {"client_token": "s.abc", "renewable": true, "lease_duration": 2764800}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let token = client(&server)
            .login("auth/aws", "web", &iam_proof("web"))
            .await
            .unwrap();
        assert_eq!(token.value, "s.abc");
        assert!(token.renewable);
        assert_eq!(token.lease_duration_secs, 2764800);
    }

    #[tokio::test]
    async fn test_login_clamps_huge_lease() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/auth/aws/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "auth": {"client_token": "s.abc", "lease_duration": 10_000_000_000_000u64}
            })))
            .mount(&server)
            .await;

        let token = client(&server)
            .login("auth/aws", "web", &iam_proof("web"))
            .await
            .unwrap();
        assert_eq!(token.lease_duration_secs, MAX_LEASE_SECS);
        assert!(token.expires_at().is_some());
    }

    #[tokio::test]
    async fn test_login_uses_custom_mount_path() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/auth/aws-east/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "auth": {"client_token": "s.abc"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let token = client(&server)
            .login("/auth/aws-east/", "web", &iam_proof("web"))
            .await
            .unwrap();
        assert_eq!(token.lease_duration_secs, 0);
        assert!(!token.renewable);
    }

    #[tokio::test]
    async fn test_login_unknown_role() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "errors": ["* entry for role \"web\" not found"]
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .login("auth/aws", "web", &iam_proof("web"))
            .await
            .unwrap_err();
        assert!(matches!(err, VaultLoginError::RoleNotConfigured { .. }));
        assert!(err.invalidates_cache());
    }

    #[tokio::test]
    async fn test_login_rejected_proof() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("* client nonce mismatch\n"))
            .mount(&server)
            .await;

        let proof = IdentityProof::Ec2(Ec2Proof::new("app", "abc", None));
        let err = client(&server)
            .login("auth/aws", "app", &proof)
            .await
            .unwrap_err();
        match err {
            VaultLoginError::SignatureMismatch {
                role,
                method,
                message,
            } => {
                assert_eq!(role, "app");
                assert_eq!(method, "ec2");
                assert_eq!(message, "* client nonce mismatch");
            }
            other => panic!("expected SignatureMismatch, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_login_server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = client(&server)
            .login("auth/aws", "web", &iam_proof("web"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_login_without_client_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"auth": null})))
            .mount(&server)
            .await;

        let err = client(&server)
            .login("auth/aws", "web", &iam_proof("web"))
            .await
            .unwrap_err();
        assert!(matches!(err, VaultLoginError::InvalidResponse { .. }));
    }

    #[tokio::test]
    async fn test_login_role_mismatch_not_sent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let err = client(&server)
            .login("auth/aws", "api", &iam_proof("web"))
            .await
            .unwrap_err();
        assert!(matches!(err, VaultLoginError::MalformedProof { .. }));
    }

    #[tokio::test]
    async fn test_fetch_secret() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/secret/docker/creds"))
            .and(header("X-Vault-Token", "s.abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {"username": "frodo", "password": "baggins"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let secret = client(&server)
            .fetch_secret(&token("s.abc"), "secret/docker/creds")
            .await
            .unwrap();
        let creds = secret.credentials_for("registry.example.com").unwrap();
        assert_eq!(creds.username, "frodo");
        assert_eq!(creds.password, "baggins");
    }

    #[tokio::test]
    async fn test_fetch_secret_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({"errors": []})))
            .mount(&server)
            .await;

        let err = client(&server)
            .fetch_secret(&token("s.abc"), "secret/docker/creds")
            .await
            .unwrap_err();
        assert!(matches!(err, VaultLoginError::SecretNotFound { ref path } if path == "secret/docker/creds"));
    }

    #[tokio::test]
    async fn test_fetch_secret_forbidden() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
                "errors": ["permission denied"]
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .fetch_secret(&token("s.abc"), "secret/docker/creds")
            .await
            .unwrap_err();
        assert!(matches!(err, VaultLoginError::PermissionDenied { .. }));
    }

    #[tokio::test]
    async fn test_fetch_secret_malformed_payload() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {"user": "frodo", "pass": "baggins"}
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .fetch_secret(&token("s.abc"), "secret/docker/creds")
            .await
            .unwrap_err();
        assert!(matches!(err, VaultLoginError::SecretFormat { .. }));
    }

    #[tokio::test]
    async fn test_fetch_secret_empty_token_not_sent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let err = client(&server)
            .fetch_secret(&token(""), "secret/docker/creds")
            .await
            .unwrap_err();
        assert!(matches!(err, VaultLoginError::MissingToken { .. }));
    }
}
