//! One-shot OIDC discovery fetch and memoization (C4).

use std::sync::Arc;

use authcore::OIDCDiscovery;
use tokio::sync::OnceCell;

use crate::error::{ClientError, Result};
use crate::transport::HttpGet;

/// Fetches `discovery_url` at most once per instance and serves every
/// subsequent call from the cached document. Single-writer, many-reader,
/// populated at-most-once: `tokio::sync::OnceCell` is exactly this shape.
pub struct DiscoveryCache {
    discovery_url: String,
    http_get: Arc<dyn HttpGet>,
    cell: OnceCell<OIDCDiscovery>,
}

impl DiscoveryCache {
    #[must_use]
    pub fn new(discovery_url: impl Into<String>, http_get: Arc<dyn HttpGet>) -> Self {
        Self {
            discovery_url: discovery_url.into(),
            http_get,
            cell: OnceCell::new(),
        }
    }

    /// Return the cached discovery document, fetching it on the first call.
    pub async fn get(&self) -> Result<OIDCDiscovery> {
        self.cell
            .get_or_try_init(|| async {
                let resp = self
                    .http_get
                    .get(&self.discovery_url)
                    .await
                    .map_err(|_| ClientError::DiscoveryFetchFailed(0))?;
                if resp.status != 200 {
                    return Err(ClientError::DiscoveryFetchFailed(resp.status));
                }
                serde_json::from_str(&resp.body)
                    .map_err(|_| ClientError::DiscoveryFetchFailed(resp.status))
            })
            .await
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::transport::HttpResponse;

    struct CountingHttpGet {
        calls: AtomicUsize,
        body: String,
    }

    #[async_trait]
    impl HttpGet for CountingHttpGet {
        async fn get(&self, _url: &str) -> std::result::Result<HttpResponse, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(HttpResponse {
                status: 200,
                body: self.body.clone(),
            })
        }
    }

    fn discovery_json(issuer: &str) -> String {
        serde_json::json!({
            "issuer": issuer,
            "authorization_endpoint": format!("{issuer}/authorize"),
            "token_endpoint": format!("{issuer}/token"),
            "end_session_endpoint": format!("{issuer}/logout"),
            "jwks_uri": format!("{issuer}/jwks.json"),
            "device_authorization_endpoint": format!("{issuer}/device/code"),
        })
        .to_string()
    }

    #[tokio::test]
    async fn fetches_exactly_once_across_repeated_calls() {
        let http_get = Arc::new(CountingHttpGet {
            calls: AtomicUsize::new(0),
            body: discovery_json("https://issuer.example.com"),
        });
        let cache = DiscoveryCache::new(
            "https://issuer.example.com/.well-known/openid-configuration",
            http_get.clone(),
        );

        for _ in 0..3 {
            let doc = cache.get().await.unwrap();
            assert_eq!(doc.issuer, "https://issuer.example.com");
        }
        assert_eq!(http_get.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn non_200_fails_with_discovery_fetch_failed() {
        struct FailingHttpGet;
        #[async_trait]
        impl HttpGet for FailingHttpGet {
            async fn get(&self, _url: &str) -> std::result::Result<HttpResponse, String> {
                Ok(HttpResponse {
                    status: 503,
                    body: String::new(),
                })
            }
        }

        let cache = DiscoveryCache::new("https://issuer.example.com/discovery", Arc::new(FailingHttpGet));
        let err = cache.get().await.unwrap_err();
        assert!(matches!(err, ClientError::DiscoveryFetchFailed(503)));
    }
}
