use std::sync::Arc;

use axum::{
    response::{IntoResponse, Response},
    Json,
};
use http::StatusCode;
use serde_json::json;

/// Classification of every way `authorize` can reject a request.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// `Authorization` header absent or not of the form `Bearer <token>`.
    MalformedAuthHeader,
    /// Token segments could not be decoded.
    InvalidTokenStructure,
    /// The token declares an algorithm other than the pinned one.
    UnsupportedAlgorithm,
    /// No key in the key set matches the token's `kid`.
    UnknownSigningKey,
    /// Cryptographic verification of the signature failed.
    InvalidSignature,
    /// Expiry, audience or issuer mismatch.
    ClaimValidationFailed,
    /// The token carries no `permissions` claim, i.e. the issuer does not have RBAC enabled.
    PermissionsClaimMissing,
    /// Authenticated, but the required permission is not granted.
    InsufficientPermission,
    /// The identity provider's key set could not be fetched. Not caused by the client.
    KeySetUnavailable,
}

impl FailureKind {
    /// HTTP status the boundary layer should answer with.
    pub fn status(self) -> StatusCode {
        match self {
            FailureKind::MalformedAuthHeader
            | FailureKind::InvalidTokenStructure
            | FailureKind::UnsupportedAlgorithm
            | FailureKind::UnknownSigningKey
            | FailureKind::InvalidSignature
            | FailureKind::ClaimValidationFailed => StatusCode::UNAUTHORIZED,
            FailureKind::PermissionsClaimMissing => StatusCode::BAD_REQUEST,
            FailureKind::InsufficientPermission => StatusCode::FORBIDDEN,
            FailureKind::KeySetUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Stable machine-readable code, suitable for log fields and metrics labels.
    pub fn code(self) -> &'static str {
        match self {
            FailureKind::MalformedAuthHeader => "invalid_header",
            FailureKind::InvalidTokenStructure => "invalid_token",
            FailureKind::UnsupportedAlgorithm => "unsupported_algorithm",
            FailureKind::UnknownSigningKey => "unknown_signing_key",
            FailureKind::InvalidSignature => "invalid_signature",
            FailureKind::ClaimValidationFailed => "invalid_claims",
            FailureKind::PermissionsClaimMissing => "permissions_missing",
            FailureKind::InsufficientPermission => "unauthorized",
            FailureKind::KeySetUnavailable => "key_set_unavailable",
        }
    }

    /// Whether the failure was caused by the client rather than by our own dependencies.
    pub fn is_client_error(self) -> bool {
        !matches!(self, FailureKind::KeySetUnavailable)
    }
}

/// Outcome of a rejected authorization.
///
/// The status hint is derived from the kind on construction, so the two can never disagree.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct AuthorizationFailure {
    kind: FailureKind,
    status: StatusCode,
    message: String,
}

impl AuthorizationFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: kind.status(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub(crate) fn malformed_header(message: &str) -> Self {
        Self::new(FailureKind::MalformedAuthHeader, message)
    }

    pub(crate) fn invalid_structure(message: impl Into<String>) -> Self {
        Self::new(FailureKind::InvalidTokenStructure, message)
    }

    pub(crate) fn claim(message: impl Into<String>) -> Self {
        Self::new(FailureKind::ClaimValidationFailed, message)
    }
}

impl From<KeySetError> for AuthorizationFailure {
    fn from(_: KeySetError) -> Self {
        // Upstream detail is logged at the point of failure, not sent to the client.
        Self::new(
            FailureKind::KeySetUnavailable,
            "Unable to fetch the signing keys of the identity provider.",
        )
    }
}

impl IntoResponse for AuthorizationFailure {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "success": false,
            "error": self.status.as_u16(),
            "message": self.message,
        }));
        (self.status, body).into_response()
    }
}

/// Failures while obtaining the identity provider's key set.
#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum KeySetError {
    #[error("failed to fetch JWK set")]
    Request(#[from] reqwest::Error),
    #[error("timed out fetching JWK set")]
    Timeout,
    #[error("received error response when fetching JWK set: {status_code}")]
    ErrorResponse { status_code: StatusCode },
    #[error("JWK set document is invalid")]
    InvalidDocument(#[source] serde_json::Error),
    #[error("JWK set rate limiter failed: {0}")]
    RateLimit(String),
    /// Failure of a fetch whose result was shared by several concurrent lookups.
    #[error(transparent)]
    Shared(Arc<KeySetError>),
}

impl KeySetError {
    /// The underlying failure, looking through errors shared between concurrent lookups.
    pub fn root(&self) -> &KeySetError {
        match self {
            KeySetError::Shared(inner) => inner.root(),
            other => other,
        }
    }
}

/// Invalid authorizer configuration, detected at construction.
#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("algorithm '{0}' cannot be pinned: only asymmetric algorithms are allowed")]
    SymmetricAlgorithm(String),
    #[error("invalid issuer URL")]
    InvalidIssuer(#[from] url::ParseError),
    #[error("audience must not be empty")]
    EmptyAudience,
}
