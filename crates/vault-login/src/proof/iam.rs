//! IAM identity proof: a signed, unsent `sts:GetCallerIdentity` request.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{LoginResult, VaultLoginError};

use super::sigv4::{self, AwsCredentials, SigningScope};

pub const STS_URL: &str = "https://sts.amazonaws.com/";
pub const STS_BODY: &str = "Action=GetCallerIdentity&Version=2011-06-15";
const STS_REGION: &str = "us-east-1";
const STS_SERVICE: &str = "sts";
const CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=utf-8";
const SERVER_ID_HEADER: &str = "X-Vault-AWS-IAM-Server-ID";

/// Login payload of the IAM method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IamProof {
    pub role: String,

    #[serde(rename = "iam_http_request_method")]
    pub http_method: String,

    /// Base64 of the request URL.
    #[serde(rename = "iam_request_url")]
    pub request_url: String,

    /// Base64 of the request body.
    #[serde(rename = "iam_request_body")]
    pub request_body: String,

    /// Base64 of the JSON header map (name → list of values).
    #[serde(rename = "iam_request_headers")]
    pub request_headers: String,
}

impl IamProof {
    /// Sign a GetCallerIdentity request with `credentials` and wrap it as a proof.
    pub fn sign(
        role: &str,
        credentials: &AwsCredentials,
        server_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> LoginResult<Self> {
        let mut headers = vec![("Content-Type", CONTENT_TYPE)];
        if let Some(id) = server_id {
            headers.push((SERVER_ID_HEADER, id));
        }

        let signed = sigv4::sign(
            "POST",
            STS_URL,
            &headers,
            STS_BODY,
            credentials,
            SigningScope {
                region: STS_REGION,
                service: STS_SERVICE,
                time: now,
            },
        )?;

        let headers_json =
            serde_json::to_vec(&signed.headers).map_err(|e| VaultLoginError::Signing {
                message: format!("failed to encode request headers: {}", e),
            })?;

        Ok(Self {
            role: role.to_string(),
            http_method: signed.method,
            request_url: BASE64.encode(signed.url.as_bytes()),
            request_body: BASE64.encode(signed.body.as_bytes()),
            request_headers: BASE64.encode(headers_json),
        })
    }

    /// Reject proofs the backend is certain to refuse.
    ///
    /// The URL must decode to the global STS endpoint (one trailing slash
    /// allowed), the body to the GetCallerIdentity query, and the headers to a
    /// JSON map that includes `Authorization`.
    pub fn validate(&self) -> LoginResult<()> {
        if !self.http_method.eq_ignore_ascii_case("POST") {
            return Err(malformed(format!(
                "request method must be POST, got {:?}",
                self.http_method
            )));
        }

        let url = decode_text("iam_request_url", &self.request_url)?;
        if url.strip_suffix('/').unwrap_or(&url) != STS_URL.trim_end_matches('/') {
            return Err(malformed(format!(
                "request URL must be {:?}, got {:?}",
                STS_URL.trim_end_matches('/'),
                url
            )));
        }

        let body = decode_text("iam_request_body", &self.request_body)?;
        if body != STS_BODY {
            return Err(malformed(format!(
                "request body must be {:?}, got {:?}",
                STS_BODY, body
            )));
        }

        let headers = decode_text("iam_request_headers", &self.request_headers)?;
        let headers: BTreeMap<String, Vec<String>> = serde_json::from_str(&headers)
            .map_err(|e| malformed(format!("request headers are not a JSON header map: {}", e)))?;
        if !headers.contains_key("Authorization") {
            return Err(malformed("request headers have no Authorization header"));
        }

        Ok(())
    }
}

fn decode_text(field: &str, value: &str) -> LoginResult<String> {
    let bytes = BASE64
        .decode(value)
        .map_err(|e| malformed(format!("field {:?} is not valid base64: {}", field, e)))?;
    String::from_utf8(bytes).map_err(|_| malformed(format!("field {:?} is not UTF-8", field)))
}

fn malformed(message: impl Into<String>) -> VaultLoginError {
    VaultLoginError::MalformedProof {
        message: message.into(),
    }
}
