//! Injectable HTTP seams. The outbound clients depend on these traits, not
//! on `reqwest` directly, so tests can substitute a double that never
//! touches the network.

use async_trait::async_trait;

/// A transport-level response: an HTTP status code plus the raw body.
/// Parsing and status-code interpretation happen in the caller.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// Transport error type: transport seams report connection-level failures
/// as a plain string, distinct from a non-200 `HttpResponse`.
pub type TransportError = String;

#[async_trait]
pub trait HttpGet: Send + Sync {
    async fn get(&self, url: &str) -> Result<HttpResponse, TransportError>;
}

#[async_trait]
pub trait HttpPost: Send + Sync {
    async fn post_form(
        &self,
        url: &str,
        form: &[(&str, &str)],
    ) -> Result<HttpResponse, TransportError>;
}

/// Default transport backed by a `reqwest::Client`.
pub struct ReqwestTransport {
    http: reqwest::Client,
}

impl ReqwestTransport {
    #[must_use]
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

#[async_trait]
impl HttpGet for ReqwestTransport {
    async fn get(&self, url: &str) -> Result<HttpResponse, TransportError> {
        let resp = self.http.get(url).send().await.map_err(|e| e.to_string())?;
        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(|e| e.to_string())?;
        Ok(HttpResponse { status, body })
    }
}

#[async_trait]
impl HttpPost for ReqwestTransport {
    async fn post_form(
        &self,
        url: &str,
        form: &[(&str, &str)],
    ) -> Result<HttpResponse, TransportError> {
        let resp = self
            .http
            .post(url)
            .form(form)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(|e| e.to_string())?;
        Ok(HttpResponse { status, body })
    }
}
