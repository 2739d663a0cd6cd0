//! Error taxonomy for the service.
//!
//! Caller mistakes (`InvalidName`, `InvalidSecretFormat`, every `AuthError`)
//! are kept apart from server faults (`ReadFailed`, `WriteFailed`,
//! `Unavailable`) so the HTTP layer can map them to 4xx and 5xx classes
//! without inspecting messages.

use thiserror::Error;

/// Failure to turn an encoded secret into a code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OtpError {
    /// The secret is not decodable Base32, or decodes to nothing.
    #[error("secret is not valid base32")]
    InvalidSecretEncoding,
}

/// Required or malformed settings detected at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Errors raised by a [`SecretBackend`](crate::store::SecretBackend)
/// implementation.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The request never got an HTTP answer (connect, TLS, timeout).
    #[error("backend request failed: {0}")]
    Transport(String),

    /// The backend answered with a non-success status.
    #[error("backend returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// The answer could not be parsed.
    #[error("unexpected backend response: {0}")]
    Decode(String),

    /// The backend is reachable but refuses to serve (sealed, uninitialized,
    /// bad credentials).
    #[error("backend not ready: {0}")]
    NotReady(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            BackendError::Decode(err.to_string())
        } else {
            BackendError::Transport(err.to_string())
        }
    }
}

/// Errors surfaced by [`SecretStore`](crate::store::SecretStore).
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend could not be reached, authenticated, or provisioned.
    #[error("secret store unavailable: {0}")]
    Unavailable(#[source] BackendError),

    #[error("TOTP name must be between 1 and 50 characters and must not contain '/'")]
    InvalidName,

    #[error("Invalid TOTP secret format. Must be a valid Base32 string.")]
    InvalidSecretFormat,

    #[error("failed to read from secret store: {0}")]
    ReadFailed(String),

    #[error("failed to write to secret store: {0}")]
    WriteFailed(String),
}

impl StoreError {
    /// Whether the error was caused by the caller's input.
    pub fn is_client_error(&self) -> bool {
        matches!(self, StoreError::InvalidName | StoreError::InvalidSecretFormat)
    }
}

/// Bearer token rejections.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,

    /// The published key set could not be fetched or parsed.
    #[error("unable to fetch signing keys: {0}")]
    KeySetUnavailable(String),

    #[error("unable to find appropriate key: {0}")]
    UnknownSigningKey(String),

    #[error("signing key {0} is not usable")]
    UnusableSigningKey(String),

    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("token has expired")]
    TokenExpired,

    #[error("token not yet valid")]
    TokenNotYetValid,

    #[error("invalid audience")]
    InvalidAudience,

    #[error("invalid issuer")]
    InvalidIssuer,

    #[error("invalid signature")]
    InvalidSignature,

    #[error("missing claim: {0}")]
    MissingClaim(String),

    #[error("malformed token: {0}")]
    MalformedToken(String),
}

impl AuthError {
    /// Whether the failure lies with the identity provider rather than the
    /// presented token.
    pub fn is_upstream_failure(&self) -> bool {
        matches!(self, AuthError::KeySetUnavailable(_))
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;
        match err.kind() {
            ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            ErrorKind::ImmatureSignature => AuthError::TokenNotYetValid,
            ErrorKind::InvalidAudience => AuthError::InvalidAudience,
            ErrorKind::InvalidIssuer => AuthError::InvalidIssuer,
            ErrorKind::InvalidSignature => AuthError::InvalidSignature,
            ErrorKind::InvalidAlgorithm => AuthError::UnsupportedAlgorithm(err.to_string()),
            ErrorKind::MissingRequiredClaim(claim) => AuthError::MissingClaim(claim.clone()),
            _ => AuthError::MalformedToken(err.to_string()),
        }
    }
}
