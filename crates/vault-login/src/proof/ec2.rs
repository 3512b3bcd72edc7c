//! EC2 identity proof: the PKCS7 signature of the instance identity document.

use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use crate::error::{LoginResult, VaultLoginError};

const PKCS7_PATH: &str = "/latest/dynamic/instance-identity/pkcs7";

/// Login payload of the EC2 method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ec2Proof {
    pub role: String,

    /// PKCS7 signature with embedded newlines removed.
    pub pkcs7: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

impl Ec2Proof {
    pub fn new(role: &str, pkcs7: &str, nonce: Option<&str>) -> Self {
        Self {
            role: role.to_string(),
            pkcs7: strip_newlines(pkcs7),
            nonce: nonce.map(String::from),
        }
    }
}

/// Strip the line breaks IMDS puts into the base64 PKCS7 body.
pub fn strip_newlines(pkcs7: &str) -> String {
    pkcs7.replace('\n', "")
}

/// Fetch the PKCS7 document from the instance metadata service (IMDSv2).
///
/// Bounded by `timeout` end to end; off EC2 this fails fast instead of
/// hanging Docker.
pub(crate) async fn fetch_pkcs7(timeout: Duration) -> LoginResult<String> {
    let client = aws_config::imds::Client::builder()
        .connect_timeout(timeout)
        .read_timeout(timeout)
        .max_attempts(2)
        .build();

    debug!(path = PKCS7_PATH, "requesting instance identity document");
    let document = tokio::time::timeout(timeout, client.get(PKCS7_PATH))
        .await
        .map_err(|_| VaultLoginError::MetadataUnavailable {
            message: format!("no response within {}s", timeout.as_secs_f32()),
        })?
        .map_err(|e| VaultLoginError::MetadataUnavailable {
            message: e.to_string(),
        })?;

    let pkcs7: &str = document.as_ref();
    if pkcs7.trim().is_empty() {
        return Err(VaultLoginError::MetadataUnavailable {
            message: "instance metadata returned an empty PKCS7 document".to_string(),
        });
    }
    Ok(pkcs7.to_string())
}
