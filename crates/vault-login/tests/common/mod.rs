//! In-process fake backend: AWS login (IAM or EC2) plus one secret endpoint.
//!
//! Login answers follow the backend: unknown roles get `* entry for role ..
//! not found`, a PKCS7 mismatch gets `* client nonce mismatch`, any malformed
//! IAM proof gets a bare 400. Tokens are random UUIDs; the secret endpoint
//! rejects requests without a token (400) or with a non-UUID token (500).

#![allow(dead_code)]

use std::path::Path;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde_json::{json, Value};
use vault_login::{
    AuthMethod, AwsCredentials, CacheConfig, HelperConfig, RetryPolicy, StaticIdentityProvider,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

pub const LOGIN_PATH: &str = "/v1/auth/aws/login";
pub const SECRET_PATH: &str = "secret/docker/creds";
pub const PKCS7: &str = "MIAGCSqGSIb3DQEHAqCAMIACAQExCzAJBgUrDgMCGgUAMIAG\nCSqGSIb3DQEHAaCAJIAEggGmewog\n";

fn bad_request(message: &str) -> ResponseTemplate {
    if message.is_empty() {
        ResponseTemplate::new(400)
    } else {
        ResponseTemplate::new(400).set_body_json(json!({ "errors": [message] }))
    }
}

fn issue_token(lease_secs: u64) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "auth": {
            "client_token": uuid::Uuid::new_v4().to_string(),
            "renewable": true,
            "lease_duration": lease_secs,
        }
    }))
}

fn decode(field: &Value) -> Option<String> {
    let bytes = BASE64.decode(field.as_str()?).ok()?;
    String::from_utf8(bytes).ok()
}

fn role_matches(payload: &Value, role: &str) -> Result<(), ResponseTemplate> {
    let requested = payload["role"].as_str().unwrap_or_default();
    if requested.to_lowercase() == role.to_lowercase() {
        Ok(())
    } else {
        Err(bad_request(&format!(
            "* entry for role {:?} not found",
            requested
        )))
    }
}

struct IamLogin {
    role: String,
    lease_secs: u64,
}

impl IamLogin {
    fn check(&self, payload: &Value) -> Result<(), ResponseTemplate> {
        role_matches(payload, &self.role)?;

        let method = payload["iam_http_request_method"].as_str().unwrap_or_default();
        if method.to_lowercase() != "post" {
            return Err(bad_request(""));
        }
        match decode(&payload["iam_request_url"]) {
            Some(url) if url.trim_end_matches('/') == "https://sts.amazonaws.com" => {}
            _ => return Err(bad_request("")),
        }
        match decode(&payload["iam_request_body"]) {
            Some(body) if body == "Action=GetCallerIdentity&Version=2011-06-15" => {}
            _ => return Err(bad_request("")),
        }
        let headers = decode(&payload["iam_request_headers"])
            .and_then(|h| serde_json::from_str::<std::collections::HashMap<String, Vec<String>>>(&h).ok())
            .ok_or_else(|| bad_request(""))?;
        if !headers.contains_key("Authorization") {
            return Err(bad_request(""));
        }
        Ok(())
    }
}

impl Respond for IamLogin {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let Ok(payload) = serde_json::from_slice::<Value>(&request.body) else {
            return ResponseTemplate::new(500);
        };
        match self.check(&payload) {
            Ok(()) => issue_token(self.lease_secs),
            Err(rejection) => rejection,
        }
    }
}

struct Ec2Login {
    role: String,
    pkcs7: String,
    lease_secs: u64,
}

impl Respond for Ec2Login {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let Ok(payload) = serde_json::from_slice::<Value>(&request.body) else {
            return ResponseTemplate::new(500);
        };
        if let Err(rejection) = role_matches(&payload, &self.role) {
            return rejection;
        }
        if self.pkcs7.replace('\n', "") != payload["pkcs7"].as_str().unwrap_or_default() {
            return bad_request("* client nonce mismatch");
        }
        issue_token(self.lease_secs)
    }
}

struct SecretRead {
    data: Value,
}

impl Respond for SecretRead {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let token = request
            .headers
            .get("X-Vault-Token")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if token.is_empty() {
            return ResponseTemplate::new(400);
        }
        if uuid::Uuid::parse_str(token).is_err() {
            return ResponseTemplate::new(500);
        }
        ResponseTemplate::new(200).set_body_json(json!({ "data": self.data }))
    }
}

/// Fake backend listening on a random local port.
pub struct FakeBackend {
    pub server: MockServer,
}

impl FakeBackend {
    /// Backend with the IAM method configured for `role`.
    pub async fn iam(role: &str, secret: Value) -> Self {
        Self::iam_with_lease(role, secret, 3600).await
    }

    pub async fn iam_with_lease(role: &str, secret: Value, lease_secs: u64) -> Self {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(LOGIN_PATH))
            .respond_with(IamLogin {
                role: role.to_string(),
                lease_secs,
            })
            .mount(&server)
            .await;
        Self::mount_secret(&server, secret).await;
        Self { server }
    }

    /// Backend with the EC2 method configured for `role` and `pkcs7`.
    pub async fn ec2(role: &str, pkcs7: &str, secret: Value) -> Self {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(LOGIN_PATH))
            .respond_with(Ec2Login {
                role: role.to_string(),
                pkcs7: pkcs7.to_string(),
                lease_secs: 3600,
            })
            .mount(&server)
            .await;
        Self::mount_secret(&server, secret).await;
        Self { server }
    }

    async fn mount_secret(server: &MockServer, data: Value) {
        Mock::given(method("GET"))
            .and(path(format!("/v1/{}", SECRET_PATH)))
            .respond_with(SecretRead { data })
            .mount(server)
            .await;
    }

    /// Answer the next `times` requests to `request_path` with `status`.
    pub async fn fail_next(&self, request_path: &str, status: u16, times: u64) {
        Mock::given(path(request_path))
            .respond_with(ResponseTemplate::new(status))
            .up_to_n_times(times)
            .with_priority(1)
            .mount(&self.server)
            .await;
    }

    pub fn uri(&self) -> String {
        self.server.uri()
    }

    pub async fn hits(&self, request_path: &str) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path() == request_path)
            .count()
    }

    pub async fn login_hits(&self) -> usize {
        self.hits(LOGIN_PATH).await
    }
}

pub fn iam_method(role: &str) -> AuthMethod {
    AuthMethod::Iam {
        mount_path: "auth/aws".into(),
        role: role.into(),
        server_id: None,
    }
}

pub fn ec2_method(role: &str) -> AuthMethod {
    AuthMethod::Ec2 {
        mount_path: "auth/aws".into(),
        role: role.into(),
        nonce: None,
    }
}

pub fn static_identity() -> StaticIdentityProvider {
    StaticIdentityProvider::new()
        .with_credentials(AwsCredentials::new(
            "AKIDEXAMPLE",
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            Some("session-token".into()),
        ))
        .with_pkcs7(PKCS7)
}

/// Config against `backend` with fast retries and, if given, a cache file in `cache_dir`.
pub fn helper_config(
    backend: &FakeBackend,
    method: AuthMethod,
    cache_dir: Option<&Path>,
) -> HelperConfig {
    let config = HelperConfig::new(backend.uri(), SECRET_PATH, method).with_retry(RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(5),
    });
    match cache_dir {
        Some(dir) => config.with_cache(CacheConfig::at(dir.join("credentials.cache"))),
        None => config,
    }
}
