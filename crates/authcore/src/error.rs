//! Error taxonomy shared by the JWKS verifier and the RBAC decision engine.
//!
//! Every variant here corresponds to one failure kind in the authentication
//! core's error contract: callers match on the variant, never on a message
//! string.

use thiserror::Error;

/// Structured failure from token validation or RBAC enforcement.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No token set is present for the caller to use.
    #[error("not authenticated")]
    NotAuthenticated,

    /// `exp` has passed (outside the configured leeway).
    #[error("token expired")]
    TokenExpired,

    /// Signature, issuer, audience, missing `kid`, or malformed token.
    #[error("invalid token: {0}")]
    InvalidToken(String),

    /// Network or non-200 response fetching the JWKS document.
    #[error("jwks fetch failed: {0}")]
    JwksFetchFailed(String),

    /// The JWKS response body could not be parsed.
    #[error("jwks parse failed: {0}")]
    JwksParseFailed(String),

    /// An RBAC check evaluated to `false` at an enforcement point.
    #[error("permission denied")]
    PermissionDenied,
}

/// Result alias for `authcore` operations.
pub type Result<T> = std::result::Result<T, AuthError>;
