//! Device Authorization Grant client (C8): request a device code, then poll
//! the token endpoint until the user completes the out-of-band
//! authorization step.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use authcore::{DeviceCodeResponse, TokenSet};
use chrono::Utc;
use tokio::sync::Notify;

use crate::discovery::DiscoveryCache;
use crate::error::{ClientError, Result};
use crate::transport::HttpPost;

/// Injectable delay hook so tests can drive the poll loop without waiting
/// on wall-clock time.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Production sleeper backed by `tokio::time::sleep`.
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// A zero-delay sleeper for deterministic tests.
pub struct NoDelaySleeper;

#[async_trait]
impl Sleeper for NoDelaySleeper {
    async fn sleep(&self, _duration: Duration) {}
}

/// Cooperative cancellation signal for [`DeviceFlowClient::poll_token`].
/// The poll loop's sleep is the only suspension point it can interrupt.
#[derive(Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.notify.notified().await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives the `device_code` request/poll cycle.
pub struct DeviceFlowClient {
    discovery: DiscoveryCache,
    http_post: Arc<dyn HttpPost>,
    sleeper: Arc<dyn Sleeper>,
}

impl DeviceFlowClient {
    #[must_use]
    pub fn new(discovery: DiscoveryCache, http_post: Arc<dyn HttpPost>, sleeper: Arc<dyn Sleeper>) -> Self {
        Self {
            discovery,
            http_post,
            sleeper,
        }
    }

    /// POST to the device-authorization endpoint and return the parsed response.
    pub async fn request_device_code(
        &self,
        client_id: &str,
        scope: Option<&str>,
    ) -> Result<DeviceCodeResponse> {
        let discovery = self.discovery.get().await?;
        let endpoint = discovery.device_authorization_endpoint.clone().ok_or_else(|| {
            ClientError::DeviceFlowError {
                error_code: "no_device_endpoint".to_string(),
                description: Some("discovery document has no device_authorization_endpoint".to_string()),
            }
        })?;

        let mut form = vec![("client_id", client_id)];
        if let Some(scope) = scope {
            form.push(("scope", scope));
        }

        let resp = self.http_post.post_form(&endpoint, &form).await.map_err(|e| {
            ClientError::DeviceFlowError {
                error_code: "transport_error".to_string(),
                description: Some(e),
            }
        })?;
        if resp.status != 200 {
            return Err(ClientError::DeviceFlowError {
                error_code: "device_code_request_failed".to_string(),
                description: Some(format!("status {}", resp.status)),
            });
        }

        let parsed: DeviceCodeResponse =
            serde_json::from_str(&resp.body).map_err(|e| ClientError::DeviceFlowError {
                error_code: "parse_error".to_string(),
                description: Some(e.to_string()),
            })?;
        tracing::info!(user_code = %parsed.user_code, "device code issued");
        Ok(parsed)
    }

    /// Poll the token endpoint until success, a terminal error, or cancellation.
    pub async fn poll_token(
        &self,
        client_id: &str,
        device_code: &str,
        interval_secs: u64,
        cancel: Option<&CancelToken>,
    ) -> Result<TokenSet> {
        let mut interval = interval_secs;

        loop {
            if let Some(cancel) = cancel {
                tokio::select! {
                    () = self.sleeper.sleep(Duration::from_secs(interval)) => {}
                    () = cancel.cancelled() => {
                        return Err(ClientError::DeviceFlowError {
                            error_code: "cancelled".to_string(),
                            description: None,
                        });
                    }
                }
            } else {
                self.sleeper.sleep(Duration::from_secs(interval)).await;
            }

            let discovery = self.discovery.get().await?;
            let form = [
                ("grant_type", "urn:ietf:params:oauth:grant-type:device_code"),
                ("client_id", client_id),
                ("device_code", device_code),
            ];
            let resp = self.http_post.post_form(&discovery.token_endpoint, &form).await.map_err(|e| {
                ClientError::DeviceFlowError {
                    error_code: "transport_error".to_string(),
                    description: Some(e),
                }
            })?;

            let body: serde_json::Value =
                serde_json::from_str(&resp.body).unwrap_or(serde_json::Value::Null);

            if resp.status == 200
                && let Some(access_token) = body.get("access_token").and_then(|v| v.as_str())
            {
                let refresh_token = body.get("refresh_token").and_then(|v| v.as_str()).map(String::from);
                let id_token = body.get("id_token").and_then(|v| v.as_str()).map(String::from);
                let expires_in = body.get("expires_in").and_then(serde_json::Value::as_i64).unwrap_or(3600);
                return Ok(TokenSet::from_expires_in(
                    access_token.to_string(),
                    refresh_token,
                    id_token,
                    expires_in,
                    Utc::now(),
                ));
            }

            let error_code = body.get("error").and_then(|v| v.as_str()).unwrap_or("unknown_error");
            let description = body
                .get("error_description")
                .and_then(|v| v.as_str())
                .map(String::from);

            match error_code {
                "authorization_pending" => {
                    tracing::debug!("device authorization still pending");
                    continue;
                }
                "slow_down" => {
                    interval += 5;
                    tracing::debug!(interval, "device flow told to slow down");
                    continue;
                }
                other => {
                    tracing::warn!(error_code = other, "device flow terminated");
                    return Err(ClientError::DeviceFlowError {
                        error_code: other.to_string(),
                        description,
                    });
                }
            }
        }
    }

    /// Convenience composition: request a device code, let the caller
    /// display it, then poll using the server-supplied interval.
    pub async fn device_flow(
        &self,
        client_id: &str,
        scope: Option<&str>,
        on_user_code: impl FnOnce(&DeviceCodeResponse),
    ) -> Result<TokenSet> {
        let resp = self.request_device_code(client_id, scope).await?;
        on_user_code(&resp);
        self.poll_token(client_id, &resp.device_code, resp.interval, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use authcore_test_support::{mount_device_code, mount_discovery, mount_token_sequence};
    use std::sync::Arc;
    use std::time::Instant;
    use wiremock::MockServer;

    use crate::transport::ReqwestTransport;

    fn client(server: &MockServer, sleeper: Arc<dyn Sleeper>) -> DeviceFlowClient {
        let transport: Arc<dyn HttpPost> = Arc::new(ReqwestTransport::default());
        let http_get: Arc<dyn crate::transport::HttpGet> = Arc::new(ReqwestTransport::default());
        let discovery = DiscoveryCache::new(
            format!("{}/.well-known/openid-configuration", server.uri()),
            http_get,
        );
        DeviceFlowClient::new(discovery, transport, sleeper)
    }

    #[tokio::test]
    async fn polling_returns_token_after_pending_responses() {
        let server = MockServer::start().await;
        mount_discovery(&server, &server.uri()).await;
        mount_token_sequence(
            &server,
            vec![
                (200, serde_json::json!({"error": "authorization_pending"})),
                (200, serde_json::json!({"error": "authorization_pending"})),
                (
                    200,
                    serde_json::json!({"access_token": "access-token-xyz", "expires_in": 900, "token_type": "Bearer"}),
                ),
            ],
        )
        .await;

        let flow = client(&server, Arc::new(NoDelaySleeper));
        let token_set = flow.poll_token("test-client", "device-code-1", 0, None).await.unwrap();
        assert_eq!(token_set.access_token, "access-token-xyz");

        let requests = server.received_requests().await.unwrap();
        let token_calls = requests.iter().filter(|r| r.url.path() == "/token").count();
        assert!(token_calls >= 3);
    }

    #[tokio::test]
    async fn slow_down_adds_five_seconds_before_the_next_call() {
        let server = MockServer::start().await;
        mount_discovery(&server, &server.uri()).await;
        mount_token_sequence(
            &server,
            vec![
                (200, serde_json::json!({"error": "slow_down"})),
                (
                    200,
                    serde_json::json!({"access_token": "access-token-xyz", "expires_in": 900}),
                ),
            ],
        )
        .await;

        struct RecordingSleeper {
            calls: std::sync::Mutex<Vec<Duration>>,
        }
        #[async_trait]
        impl Sleeper for RecordingSleeper {
            async fn sleep(&self, duration: Duration) {
                self.calls.lock().unwrap().push(duration);
            }
        }
        let sleeper = Arc::new(RecordingSleeper {
            calls: std::sync::Mutex::new(Vec::new()),
        });

        let flow = client(&server, sleeper.clone());
        flow.poll_token("test-client", "device-code-1", 1, None).await.unwrap();

        let calls = sleeper.calls.lock().unwrap();
        assert_eq!(calls.as_slice(), [Duration::from_secs(1), Duration::from_secs(6)]);
    }

    #[tokio::test]
    async fn cancellation_aborts_the_current_sleep() {
        let server = MockServer::start().await;
        mount_discovery(&server, &server.uri()).await;
        mount_device_code(
            &server,
            serde_json::json!({
                "device_code": "dc", "user_code": "UC", "verification_uri": "https://x/verify",
                "expires_in": 600, "interval": 5,
            }),
        )
        .await;

        struct BlockingSleeper;
        #[async_trait]
        impl Sleeper for BlockingSleeper {
            async fn sleep(&self, _duration: Duration) {
                std::future::pending::<()>().await;
            }
        }

        let flow = client(&server, Arc::new(BlockingSleeper));
        let cancel = CancelToken::new();
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel_clone.cancel();
        });

        let start = Instant::now();
        let err = flow
            .poll_token("test-client", "device-code-1", 9999, Some(&cancel))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::DeviceFlowError { ref error_code, .. } if error_code == "cancelled"));
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
