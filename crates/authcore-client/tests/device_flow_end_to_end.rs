//! End-to-end device-flow scenario: request a device code, display it to
//! the user, then poll through to a token (the composition `device_flow`
//! exists for).

use std::sync::Arc;

use authcore_client::device::{DeviceFlowClient, NoDelaySleeper};
use authcore_client::discovery::DiscoveryCache;
use authcore_client::transport::{HttpGet, HttpPost, ReqwestTransport};
use authcore_test_support::{mount_device_code, mount_discovery, mount_token_sequence};
use wiremock::MockServer;

#[tokio::test]
async fn device_flow_displays_user_code_then_returns_a_token() {
    let server = MockServer::start().await;
    mount_discovery(&server, &server.uri()).await;
    mount_device_code(
        &server,
        serde_json::json!({
            "device_code": "dc-1",
            "user_code": "ABCD-EFGH",
            "verification_uri": format!("{}/verify", server.uri()),
            "expires_in": 600,
            "interval": 0,
        }),
    )
    .await;
    mount_token_sequence(
        &server,
        vec![
            (200, serde_json::json!({"error": "authorization_pending"})),
            (
                200,
                serde_json::json!({"access_token": "access-token-xyz", "expires_in": 900}),
            ),
        ],
    )
    .await;

    let http_get: Arc<dyn HttpGet> = Arc::new(ReqwestTransport::default());
    let http_post: Arc<dyn HttpPost> = Arc::new(ReqwestTransport::default());
    let discovery = DiscoveryCache::new(
        format!("{}/.well-known/openid-configuration", server.uri()),
        http_get,
    );
    let flow = DeviceFlowClient::new(discovery, http_post, Arc::new(NoDelaySleeper));

    let mut shown_user_code = None;
    let token_set = flow
        .device_flow("test-client", Some("openid"), |resp| {
            shown_user_code = Some(resp.user_code.clone());
        })
        .await
        .unwrap();

    assert_eq!(shown_user_code.as_deref(), Some("ABCD-EFGH"));
    assert_eq!(token_set.access_token, "access-token-xyz");
}
