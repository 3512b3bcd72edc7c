//! AWS Signature Version 4 signing of the STS identity request.
//!
//! Signing itself is `aws-sigv4`; this module turns its output into the
//! header map the backend expects (canonical header names, list values).

use std::collections::BTreeMap;
use std::time::SystemTime;

use aws_credential_types::Credentials;
use aws_sigv4::http_request::{self, SignableBody, SignableRequest, SigningSettings};
use aws_sigv4::sign::v4;
use aws_smithy_runtime_api::client::identity::Identity;
use chrono::{DateTime, Utc};

use crate::error::{LoginResult, VaultLoginError};

const PROVIDER_NAME: &str = "docker-credential-vault-login";

/// Static AWS credentials used to sign a request.
#[derive(Clone, PartialEq, Eq)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl AwsCredentials {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: Option<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token,
        }
    }

    fn identity(&self) -> Identity {
        Credentials::new(
            &self.access_key_id,
            &self.secret_access_key,
            self.session_token.clone(),
            None,
            PROVIDER_NAME,
        )
        .into()
    }
}

impl std::fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Region, service and time a request is signed for.
#[derive(Debug, Clone, Copy)]
pub struct SigningScope<'a> {
    pub region: &'a str,
    pub service: &'a str,
    pub time: DateTime<Utc>,
}

/// A request after signing.
///
/// `headers` holds every header that must be sent, `Authorization` included,
/// under canonical names (`X-Amz-Date`). `Host` is implied by the URL.
#[derive(Debug, Clone)]
pub struct SignedRequest {
    pub method: String,
    pub url: String,
    pub body: String,
    pub headers: BTreeMap<String, Vec<String>>,
    pub signature: String,
}

/// Sign `method url` with `headers` and `body`.
pub fn sign(
    method: &str,
    url: &str,
    headers: &[(&str, &str)],
    body: &str,
    credentials: &AwsCredentials,
    scope: SigningScope<'_>,
) -> LoginResult<SignedRequest> {
    let identity = credentials.identity();
    let params: http_request::SigningParams<'_> = v4::SigningParams::builder()
        .identity(&identity)
        .region(scope.region)
        .name(scope.service)
        .time(SystemTime::from(scope.time))
        .settings(SigningSettings::default())
        .build()
        .map_err(signing_error)?
        .into();

    let signable = SignableRequest::new(
        method,
        url,
        headers.iter().copied(),
        SignableBody::Bytes(body.as_bytes()),
    )
    .map_err(signing_error)?;
    let (instructions, signature) = http_request::sign(signable, &params)
        .map_err(signing_error)?
        .into_parts();

    let mut out: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in headers.iter().copied().chain(instructions.headers()) {
        out.entry(canonical_header_name(name))
            .or_default()
            .push(value.to_string());
    }

    Ok(SignedRequest {
        method: method.to_string(),
        url: url.to_string(),
        body: body.to_string(),
        headers: out,
        signature,
    })
}

fn signing_error(e: impl std::fmt::Display) -> VaultLoginError {
    VaultLoginError::Signing {
        message: e.to_string(),
    }
}

/// `x-amz-date` → `X-Amz-Date`.
fn canonical_header_name(name: &str) -> String {
    name.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => {
                    first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}
