//! The value types shared by every component: `TokenSet`, `Claims`, the
//! OIDC discovery document, and the device-code response.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// How far ahead of `expires_at` a token is considered "expiring soon".
///
/// `get_access_token` uses this to decide whether to refresh transparently
/// before handing the token back to the caller.
pub const EXPIRING_SOON_WINDOW_SECS: i64 = 60;

/// A resolved OAuth token set: the tokens plus their absolute expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    /// Absolute UTC instant at which `access_token` stops being valid.
    pub expires_at: DateTime<Utc>,
}

impl TokenSet {
    /// Build a `TokenSet` from a token-endpoint response, computing
    /// `expires_at` as `now + expires_in` seconds.
    #[must_use]
    pub fn from_expires_in(
        access_token: String,
        refresh_token: Option<String>,
        id_token: Option<String>,
        expires_in_secs: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token,
            refresh_token,
            id_token,
            expires_at: now + Duration::seconds(expires_in_secs),
        }
    }

    /// `true` iff `now < expires_at`.
    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    /// `true` iff `now >= expires_at - 60s`.
    #[must_use]
    pub fn is_expiring_soon_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at - Duration::seconds(EXPIRING_SOON_WINDOW_SECS)
    }

    /// `is_valid_at(Utc::now())`.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    /// `is_expiring_soon_at(Utc::now())`.
    #[must_use]
    pub fn is_expiring_soon(&self) -> bool {
        self.is_expiring_soon_at(Utc::now())
    }
}

/// Audience can be a single string or a set of strings, per OIDC.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    Single(String),
    Multiple(Vec<String>),
}

impl Audience {
    /// `true` iff `aud` matches the single value, or is contained in the set.
    #[must_use]
    pub fn contains(&self, aud: &str) -> bool {
        match self {
            Audience::Single(s) => s == aud,
            Audience::Multiple(v) => v.iter().any(|s| s == aud),
        }
    }
}

/// Keycloak-style realm-scoped roles: `claims.realm_access.roles`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RealmAccess {
    #[serde(default)]
    pub roles: HashSet<String>,
}

/// Keycloak-style resource-scoped roles: one entry per resource/client id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceRole {
    #[serde(default)]
    pub roles: HashSet<String>,
}

/// Decoded, validated claims from a JWT.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iss: String,
    pub aud: Audience,
    pub exp: i64,
    pub iat: i64,
    #[serde(default)]
    pub jti: Option<String>,
    /// Space-separated OAuth scope string.
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub preferred_username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub realm_access: Option<RealmAccess>,
    #[serde(default)]
    pub resource_access: HashMap<String, ResourceRole>,
    #[serde(default)]
    pub tier_access: HashSet<String>,
}

impl Claims {
    /// Iterate the whitespace-separated tokens of `scope`, or nothing if absent.
    pub fn scope_tokens(&self) -> impl Iterator<Item = &str> {
        self.scope
            .as_deref()
            .unwrap_or("")
            .split_whitespace()
    }
}

/// OIDC discovery document (`.well-known/openid-configuration`), trimmed to
/// the fields this crate family needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OIDCDiscovery {
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(default)]
    pub end_session_endpoint: Option<String>,
    pub jwks_uri: String,
    pub issuer: String,
    #[serde(default)]
    pub device_authorization_endpoint: Option<String>,
}

/// Response from a `device_code` request (RFC 8628).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceCodeResponse {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    #[serde(default)]
    pub verification_uri_complete: Option<String>,
    pub expires_in: u64,
    #[serde(default = "default_device_poll_interval")]
    pub interval: u64,
}

const fn default_device_poll_interval() -> u64 {
    5
}
