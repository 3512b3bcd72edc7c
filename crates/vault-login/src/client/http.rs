//! Backend requests and what their HTTP statuses mean.
//!
//! Status codes are turned into `VaultLoginError`s here and nowhere else;
//! the client facade only sees decoded payloads or typed errors.

use std::collections::BTreeMap;

use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use crate::error::{LoginResult, VaultLoginError};

use super::helpers::{is_unknown_role, parse_error_body};

pub(crate) const TOKEN_HEADER: &str = "X-Vault-Token";

/// `auth` block of a successful login response.
#[derive(Debug, Deserialize)]
pub(crate) struct AuthPayload {
    #[serde(default)]
    pub client_token: String,

    #[serde(default)]
    pub renewable: bool,

    #[serde(default)]
    pub lease_duration: u64,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(default)]
    auth: Option<AuthPayload>,
}

#[derive(Debug, Deserialize)]
struct SecretResponse {
    #[serde(default)]
    data: Option<BTreeMap<String, serde_json::Value>>,
}

/// HTTP backend for making requests (holds reqwest client and base URL).
#[derive(Debug, Clone)]
pub(crate) struct HttpBackend {
    pub(crate) client: reqwest::Client,
    pub(crate) base_url: String,
}

impl HttpBackend {
    /// POST a login payload; 400s are classified using `role`/`method` for context.
    pub(crate) async fn login(
        &self,
        url: &str,
        payload: &serde_json::Value,
        role: &str,
        method: &str,
    ) -> LoginResult<AuthPayload> {
        debug!(url = %url, role, method, "posting login request");
        let response = self.client.post(url).json(payload).send().await?;
        let status = response.status();

        if status.is_success() {
            let body: LoginResponse =
                response
                    .json()
                    .await
                    .map_err(|e| VaultLoginError::InvalidResponse {
                        message: format!("failed to parse login response: {}", e),
                    })?;
            return match body.auth {
                Some(auth) if !auth.client_token.is_empty() => Ok(auth),
                _ => Err(VaultLoginError::InvalidResponse {
                    message: "login response carries no client token".to_string(),
                }),
            };
        }

        let message = parse_error_body(&response.text().await.unwrap_or_default());
        match status {
            StatusCode::BAD_REQUEST if is_unknown_role(&message) => {
                Err(VaultLoginError::RoleNotConfigured {
                    role: role.to_string(),
                    method: method.to_string(),
                    message,
                })
            }
            StatusCode::BAD_REQUEST => Err(VaultLoginError::SignatureMismatch {
                role: role.to_string(),
                method: method.to_string(),
                message,
            }),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(VaultLoginError::PermissionDenied { message })
            }
            _ => Err(unexpected(status, message)),
        }
    }

    /// GET a secret with `token`.
    pub(crate) async fn read_secret(
        &self,
        url: &str,
        token: &str,
        path: &str,
    ) -> LoginResult<BTreeMap<String, serde_json::Value>> {
        debug!(url = %url, "reading secret");
        let response = self
            .client
            .get(url)
            .header(TOKEN_HEADER, token)
            .send()
            .await?;
        let status = response.status();

        if status.is_success() {
            let body: SecretResponse =
                response
                    .json()
                    .await
                    .map_err(|e| VaultLoginError::InvalidResponse {
                        message: format!("failed to parse secret response: {}", e),
                    })?;
            return body.data.ok_or_else(|| VaultLoginError::SecretFormat {
                path: path.to_string(),
                message: "response has no data".to_string(),
            });
        }

        let message = parse_error_body(&response.text().await.unwrap_or_default());
        match status {
            StatusCode::BAD_REQUEST => Err(VaultLoginError::MissingToken { message }),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(VaultLoginError::PermissionDenied { message })
            }
            StatusCode::NOT_FOUND => Err(VaultLoginError::SecretNotFound {
                path: path.to_string(),
            }),
            _ => Err(unexpected(status, message)),
        }
    }
}

/// 429 and 5xx are worth retrying; anything else is a protocol surprise.
fn unexpected(status: StatusCode, message: String) -> VaultLoginError {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        VaultLoginError::Transient {
            message: format!("HTTP {}: {}", status.as_u16(), message),
        }
    } else {
        VaultLoginError::Backend {
            status: status.as_u16(),
            message,
        }
    }
}
