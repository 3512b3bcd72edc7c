//! Error types for the login engine.

/// Coarse error category, used by callers that only care about the class of
/// failure (exit codes, cache invalidation, retry decisions).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad or missing configuration; raised before any network call.
    Configuration,
    /// Local AWS identity could not be established.
    Identity,
    /// The identity proof was refused (locally or by the backend).
    Rejected,
    /// Network failure or backend 5xx; retried with backoff.
    Transient,
    /// The secret could not be read or decoded.
    Secret,
    /// Local cache failure. Never fatal.
    Cache,
    /// The backend answered with something we did not expect.
    Protocol,
}

/// Login errors.
#[derive(Debug, thiserror::Error)]
pub enum VaultLoginError {
    /// Missing or invalid configuration. The message is shown verbatim.
    #[error("{message}")]
    Configuration { message: String },

    /// No AWS credentials discoverable through the default chain.
    #[error("failed to resolve AWS credentials: {message}")]
    CredentialResolution { message: String },

    /// EC2 instance metadata endpoint unreachable or not on EC2.
    #[error("EC2 instance metadata unavailable: {message}")]
    MetadataUnavailable { message: String },

    /// Signing the STS request failed.
    #[error("failed to sign sts:GetCallerIdentity request: {message}")]
    Signing { message: String },

    /// The identity proof would certainly be rejected by the backend.
    #[error("malformed identity proof: {message}")]
    MalformedProof { message: String },

    /// The backend has no such role configured for AWS authentication.
    #[error("role {role:?} is not configured for {method} authentication: {message}")]
    RoleNotConfigured {
        role: String,
        method: String,
        message: String,
    },

    /// The backend did not accept the identity proof.
    #[error("{method} login as role {role:?} rejected: {message}")]
    SignatureMismatch {
        role: String,
        method: String,
        message: String,
    },

    /// Network failure or backend 5xx.
    #[error("transient error: {message}")]
    Transient { message: String },

    /// A secret read was attempted without a token.
    #[error("no backend token attached to request: {message}")]
    MissingToken { message: String },

    /// Secret does not exist at the configured path.
    #[error("secret not found at path {path:?}")]
    SecretNotFound { path: String },

    /// The token is not permitted to perform the operation.
    #[error("permission denied: {message}")]
    PermissionDenied { message: String },

    /// The secret exists but does not hold registry credentials.
    #[error("secret at path {path:?} is malformed: {message}")]
    SecretFormat { path: String, message: String },

    /// Cache failure (lock, decrypt, write).
    #[error("cache error: {message}")]
    Cache { message: String },

    /// Response body could not be decoded.
    #[error("invalid response: {message}")]
    InvalidResponse { message: String },

    /// Unexpected HTTP status from the backend.
    #[error("backend returned HTTP {status}: {message}")]
    Backend { status: u16, message: String },
}

impl VaultLoginError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Error category.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration { .. } => ErrorKind::Configuration,

            Self::CredentialResolution { .. }
            | Self::MetadataUnavailable { .. }
            | Self::Signing { .. } => ErrorKind::Identity,

            Self::MalformedProof { .. }
            | Self::RoleNotConfigured { .. }
            | Self::SignatureMismatch { .. } => ErrorKind::Rejected,

            Self::Transient { .. } => ErrorKind::Transient,

            Self::MissingToken { .. }
            | Self::SecretNotFound { .. }
            | Self::PermissionDenied { .. }
            | Self::SecretFormat { .. } => ErrorKind::Secret,

            Self::Cache { .. } => ErrorKind::Cache,

            Self::InvalidResponse { .. } | Self::Backend { .. } => ErrorKind::Protocol,
        }
    }

    /// Exit code for CLI.
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::Configuration => 1,
            ErrorKind::Identity => 2,
            ErrorKind::Rejected => 3,
            ErrorKind::Secret => 4,
            ErrorKind::Transient => 5,
            ErrorKind::Cache | ErrorKind::Protocol => 6,
        }
    }

    /// Whether the error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Whether the error means the cached identity for this configuration
    /// can no longer be trusted.
    pub fn invalidates_cache(&self) -> bool {
        matches!(
            self,
            Self::RoleNotConfigured { .. }
                | Self::SignatureMismatch { .. }
                | Self::PermissionDenied { .. }
        )
    }
}

impl From<reqwest::Error> for VaultLoginError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transient {
            message: err.to_string(),
        }
    }
}

/// Result type for login operations.
pub type LoginResult<T> = Result<T, VaultLoginError>;
