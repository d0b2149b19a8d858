//! Pure role/scope decision engine (C6).
//!
//! `check_permission` is deterministic and side-effect free: it only reads
//! [`Claims`]. Precedence is documented on the function itself and must not
//! be reordered, since callers rely on "first match wins" semantics.

use crate::token::Claims;

/// Controls whether [`check_permission`]'s step 4 wildcard scan runs.
///
/// Step 4 checks *every* entry of `resource_access` for the requested
/// action, not just the requested resource's entry, so a role named
/// `"read"` granted on resource `A` also grants `read` on resource `B`.
/// This is preserved legacy behavior; [`RbacMode::Strict`] opts out of it
/// for callers who want resource isolation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RbacMode {
    /// Step 4's cross-resource wildcard scan runs (default, matches legacy behavior).
    #[default]
    Legacy,
    /// Step 4 is skipped: only the exact resource's roles are consulted.
    Strict,
}

/// `true` iff `"admin"` is among `claims.realm_access.roles`.
#[must_use]
pub fn has_role(claims: &Claims, role: &str) -> bool {
    claims
        .realm_access
        .as_ref()
        .is_some_and(|ra| ra.roles.contains(role))
}

/// `true` iff `resource`'s entry in `claims.resource_access` contains `role`.
#[must_use]
pub fn has_resource_role(claims: &Claims, resource: &str, role: &str) -> bool {
    claims
        .resource_access
        .get(resource)
        .is_some_and(|r| r.roles.contains(role))
}

/// `true` iff `tier` is among `claims.tier_access`.
#[must_use]
pub fn has_tier_access(claims: &Claims, tier: &str) -> bool {
    claims.tier_access.contains(tier)
}

/// Evaluate whether `claims` grants `action` on `resource`.
///
/// Precedence, first match wins:
/// 1. `"admin"` realm role.
/// 2. `action` or `"{resource}:{action}"` present as a token in `claims.scope`.
/// 3. `resource`'s entry in `claims.resource_access` contains `action` or `"admin"`.
/// 4. (`RbacMode::Legacy` only) *any* entry in `claims.resource_access` contains
///    `action` or `"admin"`.
/// 5. Otherwise, denied.
#[must_use]
pub fn check_permission(claims: &Claims, resource: &str, action: &str, mode: RbacMode) -> bool {
    if has_role(claims, "admin") {
        return true;
    }

    let scoped_action = format!("{resource}:{action}");
    if claims
        .scope_tokens()
        .any(|tok| tok == action || tok == scoped_action)
    {
        return true;
    }

    if let Some(entry) = claims.resource_access.get(resource)
        && (entry.roles.contains(action) || entry.roles.contains("admin"))
    {
        return true;
    }

    if mode == RbacMode::Legacy
        && claims
            .resource_access
            .values()
            .any(|entry| entry.roles.contains(action) || entry.roles.contains("admin"))
    {
        return true;
    }

    false
}
