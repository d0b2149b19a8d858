//! Wiremock fixtures for OIDC discovery/JWKS/token-endpoint testing.
//!
//! Shared by `authcore`'s and `authcore-client`'s test suites so neither
//! crate hand-rolls RSA key generation or JWT signing twice.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rsa::traits::PublicKeyParts as _;
use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// An RSA keypair plus its JWK components, for signing and publishing test tokens.
pub struct TestKeyPair {
    pub kid: String,
    private_pem: String,
    n_b64: String,
    e_b64: String,
}

impl TestKeyPair {
    /// Generate a fresh 2048-bit RSA keypair under the given `kid`.
    ///
    /// # Panics
    ///
    /// Panics if RSA key generation or PEM encoding fails, which is
    /// acceptable in test fixtures never called from production code.
    #[must_use]
    pub fn generate(kid: &str) -> Self {
        use rsa::pkcs1::EncodeRsaPrivateKey as _;
        use rsa::{RsaPrivateKey, RsaPublicKey};

        let mut rng = rand_rsa_compat::OsRng;
        let private_key = RsaPrivateKey::new(&mut rng, 2048).expect("generate RSA key");
        let public_key = RsaPublicKey::from(&private_key);

        let n_b64 = URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be());
        let e_b64 = URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be());
        let private_pem = private_key
            .to_pkcs1_pem(rsa::pkcs1::LineEnding::LF)
            .expect("encode RSA private key")
            .to_string();

        Self {
            kid: kid.to_string(),
            private_pem,
            n_b64,
            e_b64,
        }
    }

    /// Sign a claims object into a compact RS256 JWT using this key.
    ///
    /// # Panics
    ///
    /// Panics if the claims can't be serialized or signing fails.
    #[must_use]
    pub fn sign(&self, claims: &Value) -> String {
        let mut header = jsonwebtoken::Header::new(jsonwebtoken::Algorithm::RS256);
        header.kid = Some(self.kid.clone());
        let key = jsonwebtoken::EncodingKey::from_rsa_pem(self.private_pem.as_bytes())
            .expect("load RSA encoding key");
        jsonwebtoken::encode(&header, claims, &key).expect("sign jwt")
    }

    /// Sign a claims object with RS256 but no `kid` header, for exercising
    /// verifiers' "missing kid" rejection path.
    ///
    /// # Panics
    ///
    /// Panics if the claims can't be serialized or signing fails.
    #[must_use]
    pub fn sign_without_kid(&self, claims: &Value) -> String {
        let header = jsonwebtoken::Header::new(jsonwebtoken::Algorithm::RS256);
        let key = jsonwebtoken::EncodingKey::from_rsa_pem(self.private_pem.as_bytes())
            .expect("load RSA encoding key");
        jsonwebtoken::encode(&header, claims, &key).expect("sign jwt")
    }

    fn jwk(&self) -> Value {
        json!({
            "kty": "RSA",
            "kid": self.kid,
            "use": "sig",
            "alg": "RS256",
            "n": self.n_b64,
            "e": self.e_b64,
        })
    }
}

/// Build a `{"keys": [...]}` JWKS document from a set of keypairs.
#[must_use]
pub fn jwks_document(keys: &[TestKeyPair]) -> Value {
    json!({ "keys": keys.iter().map(TestKeyPair::jwk).collect::<Vec<_>>() })
}

/// Standard claims builder: `sub`, `iss`, `aud`, `exp`/`iat` computed from `now`.
#[must_use]
pub fn base_claims(now_unix: u64, issuer: &str, audience: &str, subject: &str, ttl_secs: u64) -> Value {
    json!({
        "sub": subject,
        "iss": issuer,
        "aud": audience,
        "iat": now_unix,
        "exp": now_unix + ttl_secs,
    })
}

/// Mount a discovery document at `/.well-known/openid-configuration`.
pub async fn mount_discovery(server: &MockServer, issuer: &str) {
    let body = json!({
        "issuer": issuer,
        "authorization_endpoint": format!("{issuer}/authorize"),
        "token_endpoint": format!("{issuer}/token"),
        "end_session_endpoint": format!("{issuer}/logout"),
        "jwks_uri": format!("{issuer}/jwks.json"),
        "device_authorization_endpoint": format!("{issuer}/device/code"),
    });
    Mock::given(method("GET"))
        .and(path("/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

/// Mount a JWKS document at `/jwks.json`.
pub async fn mount_jwks(server: &MockServer, keys: &[TestKeyPair]) {
    Mock::given(method("GET"))
        .and(path("/jwks.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(jwks_document(keys)))
        .mount(server)
        .await;
}

/// Mount a fixed-response `/token` endpoint (always returns `body`).
pub async fn mount_token(server: &MockServer, body: Value) {
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

/// Mount a `/token` endpoint that fails with a non-200 status.
pub async fn mount_token_failure(server: &MockServer, status: u16) {
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}

/// Mount a sequence of `/token` responses, returned in order across successive calls.
/// Each entry is consumed exactly once; the last entry is reused for any further calls.
pub async fn mount_token_sequence(server: &MockServer, bodies: Vec<(u16, Value)>) {
    let Some((last_status, last_body)) = bodies.last().cloned() else {
        return;
    };
    let all_but_last = &bodies[..bodies.len().saturating_sub(1)];
    for (status, body) in all_but_last {
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(*status).set_body_json(body.clone()))
            .up_to_n_times(1)
            .mount(server)
            .await;
    }
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(last_status).set_body_json(last_body))
        .mount(server)
        .await;
}

/// Mount the device authorization endpoint at `/device/code`.
pub async fn mount_device_code(server: &MockServer, body: Value) {
    Mock::given(method("POST"))
        .and(path("/device/code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

/// `rand` 0.8's `OsRng` doesn't implement the `rand_core` 0.6 traits that
/// the `rsa` crate's generation API expects from a `CryptoRngCore`; both
/// crates re-export compatible `OsRng` types, so this module isolates the
/// glue to one place instead of repeating the import dance at call sites.
mod rand_rsa_compat {
    pub use rsa::rand_core::OsRng;
}
