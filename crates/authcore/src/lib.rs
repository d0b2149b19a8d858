//! Core authentication primitives: PKCE, the shared token/claims model, JWKS
//! backed JWT verification, and the RBAC decision engine.
//!
//! This crate has no opinion about *how* tokens are obtained or stored (see
//! `authcore-client` for the authorization-code and device-flow clients that
//! build on top of it).

pub mod error;
pub mod jwks;
pub mod pkce;
pub mod rbac;
pub mod token;

pub use error::{AuthError, Result};
pub use jwks::{FetchedJwks, JwksFetcher, JwksVerifier, JwksVerifierConfig, ReqwestJwksFetcher};
pub use rbac::{RbacMode, check_permission, has_resource_role, has_role, has_tier_access};
pub use token::{Audience, Claims, DeviceCodeResponse, OIDCDiscovery, RealmAccess, ResourceRole, TokenSet};
