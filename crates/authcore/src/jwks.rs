//! TTL-cached JWKS verifier (C5): fetch, cache, and use a remote JSON Web
//! Key Set to validate signed JWTs.
//!
//! The cache uses a double-checked locking pattern: a fast read-locked path
//! for the common case, and a write-locked re-check before any network
//! fetch, so concurrent callers never trigger more than one fetch per stale
//! window.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::error::{AuthError, Result};
use crate::token::Claims;

/// Floor on how often a `kid` miss is allowed to trigger a forced refresh.
/// Without this, an attacker sending random `kid`s could force a fetch per
/// request.
const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// Default JWKS cache TTL when the fetcher doesn't report one via
/// `Cache-Control: max-age`.
const DEFAULT_REFRESH_SECS: u64 = 300;

/// Default leeway applied to `exp`/`nbf` checks.
const DEFAULT_LEEWAY_SECS: u64 = 30;

/// A fetched and parsed JWKS, keyed by `kid`, plus an optional cache lifetime
/// advertised by the server.
pub struct FetchedJwks {
    pub keys_by_kid: HashMap<String, DecodingKey>,
    pub cache_ttl: Option<Duration>,
}

/// Injectable seam for retrieving a JWKS document.
///
/// Production code uses [`ReqwestJwksFetcher`]; tests inject a double that
/// never touches the network.
#[async_trait]
pub trait JwksFetcher: Send + Sync {
    async fn fetch(&self, jwks_uri: &str) -> Result<FetchedJwks>;
}

#[derive(Debug, Deserialize)]
struct JwksResponse {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    kty: String,
    #[serde(default)]
    kid: Option<String>,
    #[serde(rename = "use", default)]
    use_: Option<String>,
    #[serde(default)]
    n: Option<String>,
    #[serde(default)]
    e: Option<String>,
}

/// Default [`JwksFetcher`] backed by a `reqwest::Client`.
pub struct ReqwestJwksFetcher {
    http: reqwest::Client,
}

impl ReqwestJwksFetcher {
    #[must_use]
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

impl Default for ReqwestJwksFetcher {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

#[async_trait]
impl JwksFetcher for ReqwestJwksFetcher {
    async fn fetch(&self, jwks_uri: &str) -> Result<FetchedJwks> {
        let resp = self
            .http
            .get(jwks_uri)
            .send()
            .await
            .map_err(|e| AuthError::JwksFetchFailed(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(AuthError::JwksFetchFailed(format!(
                "jwks endpoint returned {}",
                resp.status()
            )));
        }

        let cache_ttl = parse_cache_control_max_age(resp.headers());
        let body: JwksResponse = resp
            .json()
            .await
            .map_err(|e| AuthError::JwksParseFailed(e.to_string()))?;

        let mut keys_by_kid = HashMap::new();
        for jwk in body.keys {
            if jwk.kty != "RSA" {
                continue;
            }
            if let Some(use_) = &jwk.use_
                && use_ != "sig"
            {
                continue;
            }
            let (Some(kid), Some(n), Some(e)) = (jwk.kid, jwk.n, jwk.e) else {
                continue;
            };
            let key = DecodingKey::from_rsa_components(&n, &e)
                .map_err(|err| AuthError::JwksParseFailed(err.to_string()))?;
            keys_by_kid.insert(kid, key);
        }

        if keys_by_kid.is_empty() {
            return Err(AuthError::JwksParseFailed(
                "jwks contains no usable RSA signing keys".to_string(),
            ));
        }

        Ok(FetchedJwks {
            keys_by_kid,
            cache_ttl,
        })
    }
}

fn parse_cache_control_max_age(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    let v = headers.get(reqwest::header::CACHE_CONTROL)?.to_str().ok()?;
    v.split(',').map(str::trim).find_map(|part| {
        part.strip_prefix("max-age=")
            .and_then(|rest| rest.parse::<u64>().ok())
            .map(Duration::from_secs)
    })
}

/// Configuration for a [`JwksVerifier`]. One verifier is a long-lived
/// singleton per `(jwks_uri, issuer, audience)` triple.
#[derive(Debug, Clone)]
pub struct JwksVerifierConfig {
    pub issuer: String,
    pub audiences: Vec<String>,
    pub jwks_uri: String,
    /// Clock-skew leeway applied to `exp`/`nbf` checks. Capped at 30s
    /// regardless of how this field is set, including by direct struct
    /// construction.
    pub leeway_secs: u64,
    pub jwks_refresh_secs: u64,
    /// Algorithms accepted from the token header. RS256-only unless
    /// explicitly widened.
    pub allowed_algorithms: Vec<Algorithm>,
}

impl JwksVerifierConfig {
    #[must_use]
    pub fn new(issuer: impl Into<String>, jwks_uri: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            audiences: Vec::new(),
            jwks_uri: jwks_uri.into(),
            leeway_secs: DEFAULT_LEEWAY_SECS,
            jwks_refresh_secs: DEFAULT_REFRESH_SECS,
            allowed_algorithms: vec![Algorithm::RS256],
        }
    }

    #[must_use]
    pub fn with_audiences(mut self, audiences: Vec<String>) -> Self {
        self.audiences = audiences;
        self
    }

    #[must_use]
    pub fn with_leeway_secs(mut self, leeway_secs: u64) -> Self {
        self.leeway_secs = leeway_secs.min(30);
        self
    }

    #[must_use]
    pub fn with_jwks_refresh_secs(mut self, secs: u64) -> Self {
        self.jwks_refresh_secs = secs.max(5);
        self
    }

    #[must_use]
    pub fn with_allowed_algorithms(mut self, algorithms: Vec<Algorithm>) -> Self {
        self.allowed_algorithms = algorithms;
        self
    }
}

#[derive(Default)]
struct JwksCache {
    next_refresh_after: Option<Instant>,
    last_refresh_attempt: Option<Instant>,
    keys_by_kid: HashMap<String, DecodingKey>,
}

/// TTL-cached, concurrency-safe JWT verifier backed by a remote JWKS.
pub struct JwksVerifier {
    config: JwksVerifierConfig,
    fetcher: Arc<dyn JwksFetcher>,
    cache: RwLock<JwksCache>,
}

impl JwksVerifier {
    #[must_use]
    pub fn new(config: JwksVerifierConfig, fetcher: Arc<dyn JwksFetcher>) -> Self {
        Self {
            config,
            fetcher,
            cache: RwLock::new(JwksCache::default()),
        }
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.config.issuer
    }

    /// Validate a JWT and return its claims.
    ///
    /// Fast-paths on a cached key, double-checks the refresh on miss or
    /// staleness, then enforces signature, issuer, audience, and expiry.
    pub async fn verify_token(&self, token: &str) -> Result<Claims> {
        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| AuthError::InvalidToken(format!("malformed header: {e}")))?;

        if jwt_has_crit_header(token)? {
            return Err(AuthError::InvalidToken(
                "unsupported jwt crit header".to_string(),
            ));
        }

        if !self.config.allowed_algorithms.contains(&header.alg) {
            return Err(AuthError::InvalidToken(format!(
                "unsupported algorithm {:?}",
                header.alg
            )));
        }

        let kid = header
            .kid
            .as_deref()
            .ok_or_else(|| AuthError::InvalidToken("missing kid".to_string()))?;

        if let Some(key) = self.get_key_if_present(kid).await {
            tracing::debug!(kid, "jwks cache hit");
            if let Ok(claims) = self.decode_with_key(token, &key, header.alg) {
                return Ok(claims);
            }
        }

        tracing::debug!(kid, "jwks cache miss, refreshing");
        self.refresh_if_needed(Some(kid)).await?;

        let key = self.get_key_if_present(kid).await.ok_or_else(|| {
            tracing::warn!(kid, "jwt rejected: no matching key after refresh");
            AuthError::InvalidToken("key not found".to_string())
        })?;

        self.decode_with_key(token, &key, header.alg).inspect_err(|err| {
            tracing::warn!(kid, %err, "jwt validation failed");
        })
    }

    fn decode_with_key(&self, token: &str, key: &DecodingKey, alg: Algorithm) -> Result<Claims> {
        let mut validation = Validation::new(alg);
        validation.leeway = self.config.leeway_secs.min(30);
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.set_issuer(&[self.config.issuer.as_str()]);
        if !self.config.audiences.is_empty() {
            let aud: Vec<&str> = self.config.audiences.iter().map(String::as_str).collect();
            validation.set_audience(&aud);
        } else {
            validation.validate_aud = false;
        }

        let data = jsonwebtoken::decode::<Claims>(token, key, &validation).map_err(|e| {
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::InvalidToken(e.to_string()),
            }
        })?;
        Ok(data.claims)
    }

    async fn get_key_if_present(&self, kid: &str) -> Option<DecodingKey> {
        let cache = self.cache.read().await;
        cache.keys_by_kid.get(kid).cloned()
    }

    /// Refresh the cache if stale or missing `maybe_kid`, using the
    /// double-checked pattern: a cheap read check, then a write-locked
    /// re-check before the (single) network fetch.
    async fn refresh_if_needed(&self, maybe_kid: Option<&str>) -> Result<()> {
        let now = Instant::now();

        {
            let cache = self.cache.read().await;
            if !Self::needs_refresh(&cache, maybe_kid, now) {
                return Ok(());
            }
        }

        let mut cache = self.cache.write().await;
        if !Self::needs_refresh(&cache, maybe_kid, now) {
            return Ok(());
        }

        if let Some(last) = cache.last_refresh_attempt
            && now.duration_since(last) < MIN_REFRESH_INTERVAL
        {
            return Ok(());
        }
        cache.last_refresh_attempt = Some(now);

        let fetched = self.fetcher.fetch(&self.config.jwks_uri).await.inspect_err(|err| {
            tracing::warn!(jwks_uri = %self.config.jwks_uri, %err, "jwks fetch failed");
        })?;
        let ttl = fetched
            .cache_ttl
            .unwrap_or_else(|| Duration::from_secs(self.config.jwks_refresh_secs));
        let key_count = fetched.keys_by_kid.len();
        cache.keys_by_kid = fetched.keys_by_kid;
        cache.next_refresh_after = Some(now + ttl);
        tracing::info!(jwks_uri = %self.config.jwks_uri, key_count, ttl_secs = ttl.as_secs(), "jwks refreshed");

        Ok(())
    }

    fn needs_refresh(cache: &JwksCache, maybe_kid: Option<&str>, now: Instant) -> bool {
        let stale = cache.next_refresh_after.is_none_or(|t| now >= t);
        let missing = maybe_kid.is_some_and(|kid| !cache.keys_by_kid.contains_key(kid));
        stale || missing
    }
}

fn jwt_has_crit_header(jwt: &str) -> Result<bool> {
    let mut parts = jwt.split('.');
    let header_b64 = parts
        .next()
        .ok_or_else(|| AuthError::InvalidToken("missing header part".to_string()))?;
    if parts.next().is_none() {
        return Err(AuthError::InvalidToken("missing payload part".to_string()));
    }
    if parts.next().is_none() {
        return Err(AuthError::InvalidToken(
            "missing signature part".to_string(),
        ));
    }
    if parts.next().is_some() {
        return Err(AuthError::InvalidToken("unexpected extra parts".to_string()));
    }

    let header_json = URL_SAFE_NO_PAD
        .decode(header_b64)
        .map_err(|e| AuthError::InvalidToken(format!("bad base64 header: {e}")))?;
    let header: serde_json::Value = serde_json::from_slice(&header_json)
        .map_err(|e| AuthError::InvalidToken(format!("bad json header: {e}")))?;
    let header = header
        .as_object()
        .ok_or_else(|| AuthError::InvalidToken("header is not an object".to_string()))?;
    Ok(header.contains_key("crit"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use authcore_test_support::{TestKeyPair, base_claims};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::SystemTime;

    struct CountingFetcher {
        keys: Vec<TestKeyPair>,
        calls: AtomicUsize,
        ttl: Option<Duration>,
    }

    #[async_trait]
    impl JwksFetcher for CountingFetcher {
        async fn fetch(&self, _jwks_uri: &str) -> Result<FetchedJwks> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut keys_by_kid = HashMap::new();
            for k in &self.keys {
                let jwk = authcore_test_support::jwks_document(std::slice::from_ref(k));
                let key_obj = &jwk["keys"][0];
                let n = key_obj["n"].as_str().unwrap();
                let e = key_obj["e"].as_str().unwrap();
                keys_by_kid.insert(k.kid.clone(), DecodingKey::from_rsa_components(n, e).unwrap());
            }
            Ok(FetchedJwks {
                keys_by_kid,
                cache_ttl: self.ttl,
            })
        }
    }

    fn now_unix() -> u64 {
        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap()
            .as_secs()
    }

    #[tokio::test]
    async fn verify_token_happy_path() {
        let key = TestKeyPair::generate("kid-1");
        let claims = base_claims(now_unix(), "https://issuer.example.com", "my-client", "user-1", 3600);
        let jwt = key.sign(&claims);

        let fetcher = Arc::new(CountingFetcher {
            keys: vec![key],
            calls: AtomicUsize::new(0),
            ttl: Some(Duration::from_secs(300)),
        });
        let config = JwksVerifierConfig::new("https://issuer.example.com", "https://issuer.example.com/jwks.json")
            .with_audiences(vec!["my-client".to_string()]);
        let verifier = JwksVerifier::new(config, fetcher.clone());

        let decoded = verifier.verify_token(&jwt).await.unwrap();
        assert_eq!(decoded.sub, "user-1");
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn three_sequential_verifications_cause_exactly_one_fetch() {
        let key = TestKeyPair::generate("kid-1");
        let claims = base_claims(now_unix(), "https://issuer.example.com", "my-client", "user-1", 3600);
        let jwt = key.sign(&claims);

        let fetcher = Arc::new(CountingFetcher {
            keys: vec![key],
            calls: AtomicUsize::new(0),
            ttl: Some(Duration::from_secs(300)),
        });
        let config = JwksVerifierConfig::new("https://issuer.example.com", "https://issuer.example.com/jwks.json")
            .with_audiences(vec!["my-client".to_string()]);
        let verifier = JwksVerifier::new(config, fetcher.clone());

        for _ in 0..3 {
            verifier.verify_token(&jwt).await.unwrap();
        }
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_verifications_share_a_single_fetch() {
        let key = TestKeyPair::generate("kid-1");
        let claims = base_claims(now_unix(), "https://issuer.example.com", "my-client", "user-1", 3600);
        let jwt = key.sign(&claims);

        let fetcher = Arc::new(CountingFetcher {
            keys: vec![key],
            calls: AtomicUsize::new(0),
            ttl: Some(Duration::from_secs(300)),
        });
        let config = JwksVerifierConfig::new("https://issuer.example.com", "https://issuer.example.com/jwks.json")
            .with_audiences(vec!["my-client".to_string()]);
        let verifier = Arc::new(JwksVerifier::new(config, fetcher.clone()));

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let verifier = verifier.clone();
                let jwt = jwt.clone();
                tokio::spawn(async move { verifier.verify_token(&jwt).await })
            })
            .collect();

        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn wrong_issuer_is_rejected() {
        let key = TestKeyPair::generate("kid-1");
        let claims = base_claims(now_unix(), "https://attacker.example.com", "my-client", "user-1", 3600);
        let jwt = key.sign(&claims);

        let fetcher = Arc::new(CountingFetcher {
            keys: vec![key],
            calls: AtomicUsize::new(0),
            ttl: Some(Duration::from_secs(300)),
        });
        let config = JwksVerifierConfig::new("https://issuer.example.com", "https://issuer.example.com/jwks.json")
            .with_audiences(vec!["my-client".to_string()]);
        let verifier = JwksVerifier::new(config, fetcher);

        let err = verifier.verify_token(&jwt).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken(_)));
    }

    #[tokio::test]
    async fn expired_token_is_rejected() {
        let key = TestKeyPair::generate("kid-1");
        let claims = base_claims(
            now_unix().saturating_sub(7200),
            "https://issuer.example.com",
            "my-client",
            "user-1",
            3600,
        );
        let jwt = key.sign(&claims);

        let fetcher = Arc::new(CountingFetcher {
            keys: vec![key],
            calls: AtomicUsize::new(0),
            ttl: Some(Duration::from_secs(300)),
        });
        let config = JwksVerifierConfig::new("https://issuer.example.com", "https://issuer.example.com/jwks.json")
            .with_audiences(vec!["my-client".to_string()]);
        let verifier = JwksVerifier::new(config, fetcher);

        let err = verifier.verify_token(&jwt).await.unwrap_err();
        assert!(matches!(err, AuthError::TokenExpired));
    }

    #[tokio::test]
    async fn missing_kid_is_rejected_without_fetching() {
        let key = TestKeyPair::generate("kid-1");
        let claims = base_claims(now_unix(), "https://issuer.example.com", "my-client", "user-1", 3600);
        let jwt = key.sign_without_kid(&claims);

        let fetcher = Arc::new(CountingFetcher {
            keys: vec![key],
            calls: AtomicUsize::new(0),
            ttl: Some(Duration::from_secs(300)),
        });
        let config = JwksVerifierConfig::new("https://issuer.example.com", "https://issuer.example.com/jwks.json")
            .with_audiences(vec!["my-client".to_string()]);
        let verifier = JwksVerifier::new(config, fetcher.clone());

        let err = verifier.verify_token(&jwt).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken(msg) if msg.contains("missing kid")));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }
}
