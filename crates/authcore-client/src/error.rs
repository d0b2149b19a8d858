//! Error taxonomy for the outbound OIDC clients (discovery, PKCE
//! authorization-code, device authorization grant).
//!
//! Variants shared with server-side token verification (`NotAuthenticated`,
//! `PermissionDenied`, …) live in [`authcore::AuthError`] and are folded in
//! via [`ClientError::Auth`] rather than duplicated.

use thiserror::Error;

/// Structured failure from the discovery cache, PKCE client, or device-flow client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// A server-side auth error surfaced through a client-side call, most
    /// commonly [`authcore::AuthError::NotAuthenticated`] from
    /// `get_access_token`/`refresh_token`.
    #[error(transparent)]
    Auth(#[from] authcore::AuthError),

    /// CSRF `state` returned by the authorization server did not match the
    /// value persisted at `login()` time.
    #[error("csrf state did not match")]
    StateMismatch,

    /// No PKCE verifier was found in the token store at callback time.
    #[error("stored pkce verifier is missing")]
    MissingPkceVerifier,

    /// Non-200 response exchanging an authorization code for tokens. `0`
    /// indicates a transport-level failure rather than an HTTP status.
    #[error("token request failed with status {0}")]
    TokenRequestFailed(u16),

    /// Non-200 response refreshing a token set. `0` indicates a
    /// transport-level failure rather than an HTTP status.
    #[error("token refresh failed with status {0}")]
    TokenRefreshFailed(u16),

    /// Non-200 response fetching the OIDC discovery document. `0` indicates
    /// a transport-level failure rather than an HTTP status.
    #[error("discovery fetch failed with status {0}")]
    DiscoveryFetchFailed(u16),

    /// A discovery-provided endpoint was not a valid URL.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// Terminal device-flow state: `expired_token`, `access_denied`,
    /// `cancelled`, `aborted`, or a transport failure.
    #[error("device flow error: {error_code}")]
    DeviceFlowError {
        error_code: String,
        description: Option<String>,
    },
}

/// Result alias for `authcore-client` operations.
pub type Result<T> = std::result::Result<T, ClientError>;
