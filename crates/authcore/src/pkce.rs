//! PKCE (RFC 7636) code-verifier / code-challenge generation.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng as _;
use sha2::{Digest as _, Sha256};

/// The unreserved character set PKCE verifiers are drawn from.
const VERIFIER_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";

/// Length of a generated code verifier. RFC 7636 allows 43-128; this crate
/// always generates the minimum, matching every example in the RFC.
pub const CODE_VERIFIER_LEN: usize = 43;

/// Generate a PKCE code verifier using the platform's cryptographic RNG.
#[must_use]
pub fn generate_code_verifier() -> String {
    generate_code_verifier_with_rng(&mut rand::thread_rng())
}

/// Generate a PKCE code verifier using an injected RNG (for deterministic tests).
#[must_use]
pub fn generate_code_verifier_with_rng(rng: &mut impl rand::RngCore) -> String {
    (0..CODE_VERIFIER_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..VERIFIER_ALPHABET.len());
            VERIFIER_ALPHABET[idx] as char
        })
        .collect()
}

/// Derive the S256 code challenge for a verifier: `base64url(sha256(verifier))`.
#[must_use]
pub fn generate_code_challenge(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    base64url_encode(&digest)
}

/// Base64url-encode bytes without padding (`+`/`/` replaced, no `=`).
#[must_use]
pub fn base64url_encode(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}
