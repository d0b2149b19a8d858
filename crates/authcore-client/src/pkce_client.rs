//! PKCE authorization-code client (C7): the full login → callback →
//! refresh → logout state machine.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use authcore::{pkce, AuthError, TokenSet};
use chrono::Utc;
use parking_lot::Mutex;
use serde::Deserialize;
use url::Url;

use crate::discovery::DiscoveryCache;
use crate::error::{ClientError, Result};
use crate::store::{InMemoryTokenStore, TokenStore};
use crate::transport::{HttpGet, HttpPost, ReqwestTransport};

type ListenerId = u64;
type Listener = Box<dyn Fn(bool) + Send + Sync>;

/// Immutable configuration for a [`PkceAuthClient`].
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub discovery_url: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub post_logout_redirect_uri: Option<String>,
}

/// Construction options for [`PkceAuthClient::new`]. Every field but
/// `config` has a production-sensible default.
pub struct AuthClientOptions {
    pub config: AuthConfig,
    pub token_store: Option<Arc<dyn TokenStore>>,
    pub http_get: Option<Arc<dyn HttpGet>>,
    pub http_post: Option<Arc<dyn HttpPost>>,
    pub redirect: Option<Arc<dyn Fn(String) + Send + Sync>>,
    pub generate_state: Option<Arc<dyn Fn() -> String + Send + Sync>>,
}

impl AuthClientOptions {
    #[must_use]
    pub fn new(config: AuthConfig) -> Self {
        Self {
            config,
            token_store: None,
            http_get: None,
            http_post: None,
            redirect: None,
            generate_state: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
    expires_in: i64,
}

fn default_state_generator() -> String {
    pkce::generate_code_verifier()
}

/// Drives the Authorization Code + PKCE dance for one logical user session.
pub struct PkceAuthClient {
    config: AuthConfig,
    store: Arc<dyn TokenStore>,
    discovery: DiscoveryCache,
    http_post: Arc<dyn HttpPost>,
    redirect: Arc<dyn Fn(String) + Send + Sync>,
    generate_state: Arc<dyn Fn() -> String + Send + Sync>,
    listeners: Arc<Mutex<Vec<(ListenerId, Listener)>>>,
    next_listener_id: AtomicU64,
}

impl PkceAuthClient {
    #[must_use]
    pub fn new(options: AuthClientOptions) -> Self {
        let transport = Arc::new(ReqwestTransport::default());
        let http_get = options.http_get.unwrap_or_else(|| transport.clone());
        let http_post = options.http_post.unwrap_or(transport);

        Self {
            discovery: DiscoveryCache::new(options.config.discovery_url.clone(), http_get),
            config: options.config,
            store: options.token_store.unwrap_or_else(|| Arc::new(InMemoryTokenStore::new())),
            http_post,
            redirect: options.redirect.unwrap_or_else(|| Arc::new(|_url| {})),
            generate_state: options
                .generate_state
                .unwrap_or_else(|| Arc::new(default_state_generator)),
            listeners: Arc::new(Mutex::new(Vec::new())),
            next_listener_id: AtomicU64::new(0),
        }
    }

    /// Build the authorization URL, persist PKCE/CSRF material, and invoke
    /// the configured redirect hook.
    pub async fn login(&self) -> Result<()> {
        let url = self.get_authorization_url().await?;
        (self.redirect)(url);
        Ok(())
    }

    /// Identical effect to [`Self::login`] minus the redirect; returns the URL.
    pub async fn get_authorization_url(&self) -> Result<String> {
        let discovery = self.discovery.get().await?;

        let verifier = pkce::generate_code_verifier();
        let challenge = pkce::generate_code_challenge(&verifier);
        let state = (self.generate_state)();

        self.store.set_code_verifier(verifier).await;
        self.store.set_state(state.clone()).await;

        let mut url = Url::parse(&discovery.authorization_endpoint)
            .map_err(|e| ClientError::InvalidUrl(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &self.config.redirect_uri)
            .append_pair("scope", &self.config.scopes.join(" "))
            .append_pair("code_challenge", &challenge)
            .append_pair("code_challenge_method", "S256")
            .append_pair("state", &state);

        Ok(url.into())
    }

    /// Exchange an authorization-code callback for a token set.
    ///
    /// Clears the stored verifier and state only after the token set is
    /// persisted, and notifies listeners only after that.
    pub async fn handle_callback(&self, code: &str, state: &str) -> Result<TokenSet> {
        let stored_state = self.store.get_state().await;
        if stored_state.as_deref() != Some(state) {
            return Err(ClientError::StateMismatch);
        }

        let verifier = self
            .store
            .get_code_verifier()
            .await
            .ok_or(ClientError::MissingPkceVerifier)?;

        let discovery = self.discovery.get().await?;
        let form = [
            ("grant_type", "authorization_code"),
            ("client_id", self.config.client_id.as_str()),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("code_verifier", verifier.as_str()),
        ];

        let resp = self
            .http_post
            .post_form(&discovery.token_endpoint, &form)
            .await
            .map_err(|_| ClientError::TokenRequestFailed(0))?;
        if resp.status != 200 {
            return Err(ClientError::TokenRequestFailed(resp.status));
        }

        let payload: TokenResponse = serde_json::from_str(&resp.body)
            .map_err(|_| ClientError::TokenRequestFailed(resp.status))?;
        let token_set = TokenSet::from_expires_in(
            payload.access_token,
            payload.refresh_token,
            payload.id_token,
            payload.expires_in,
            Utc::now(),
        );

        self.store.set_token_set(token_set.clone()).await;
        self.store.clear_code_verifier().await;
        self.store.clear_state().await;
        self.notify(true);
        tracing::info!(client_id = %self.config.client_id, "authorization code exchanged");

        Ok(token_set)
    }

    /// Return the current access token, refreshing transparently if it's
    /// expiring within 60 seconds.
    pub async fn get_access_token(&self) -> Result<String> {
        let token_set = self
            .store
            .get_token_set()
            .await
            .ok_or(AuthError::NotAuthenticated)?;

        if token_set.is_expiring_soon() {
            let refreshed = self.refresh_token().await?;
            return Ok(refreshed.access_token);
        }
        Ok(token_set.access_token)
    }

    /// Exchange the stored refresh token for a new token set.
    ///
    /// On any failure, the stored token set is cleared and listeners are
    /// notified `false` *before* the error is returned, so observers see
    /// the failure transition exactly once.
    pub async fn refresh_token(&self) -> Result<TokenSet> {
        let token_set = self
            .store
            .get_token_set()
            .await
            .ok_or(AuthError::NotAuthenticated)?;
        let Some(refresh_token) = token_set.refresh_token.clone() else {
            self.store.clear_token_set().await;
            self.notify(false);
            return Err(ClientError::TokenRefreshFailed(0));
        };

        let discovery = match self.discovery.get().await {
            Ok(d) => d,
            Err(e) => {
                self.store.clear_token_set().await;
                self.notify(false);
                return Err(e);
            }
        };

        let form = [
            ("grant_type", "refresh_token"),
            ("client_id", self.config.client_id.as_str()),
            ("refresh_token", refresh_token.as_str()),
        ];

        let resp = match self.http_post.post_form(&discovery.token_endpoint, &form).await {
            Ok(resp) if resp.status == 200 => resp,
            Ok(resp) => {
                tracing::warn!(status = resp.status, "token refresh rejected");
                self.store.clear_token_set().await;
                self.notify(false);
                return Err(ClientError::TokenRefreshFailed(resp.status));
            }
            Err(err) => {
                tracing::warn!(%err, "token refresh transport error");
                self.store.clear_token_set().await;
                self.notify(false);
                return Err(ClientError::TokenRefreshFailed(0));
            }
        };

        let payload: TokenResponse = match serde_json::from_str(&resp.body) {
            Ok(payload) => payload,
            Err(_) => {
                self.store.clear_token_set().await;
                self.notify(false);
                return Err(ClientError::TokenRefreshFailed(resp.status));
            }
        };

        let new_token_set = TokenSet::from_expires_in(
            payload.access_token,
            payload.refresh_token.or(Some(refresh_token)),
            payload.id_token,
            payload.expires_in,
            Utc::now(),
        );
        self.store.set_token_set(new_token_set.clone()).await;
        tracing::debug!(client_id = %self.config.client_id, "access token refreshed");
        Ok(new_token_set)
    }

    /// `true` iff a token set is present and still within its validity window.
    pub async fn is_authenticated(&self) -> bool {
        self.store
            .get_token_set()
            .await
            .is_some_and(|ts| ts.is_valid())
    }

    /// Clear all local state, notify listeners, and (best-effort) redirect
    /// to the end-session endpoint. Discovery failure during logout must
    /// not prevent local state from being cleared.
    pub async fn logout(&self) -> Result<()> {
        let previous = self.store.get_token_set().await;
        self.store.clear_all().await;
        self.notify(false);
        tracing::debug!(client_id = %self.config.client_id, "local session cleared");

        let Some(token_set) = previous else {
            return Ok(());
        };
        let discovery = match self.discovery.get().await {
            Ok(d) => d,
            Err(err) => {
                tracing::warn!(%err, "discovery fetch failed during logout, skipping redirect");
                return Ok(());
            }
        };
        let Some(end_session_endpoint) = &discovery.end_session_endpoint else {
            return Ok(());
        };

        let mut url = Url::parse(end_session_endpoint).map_err(|e| ClientError::InvalidUrl(e.to_string()))?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(id_token) = &token_set.id_token {
                query.append_pair("id_token_hint", id_token);
            }
            if let Some(post_logout) = &self.config.post_logout_redirect_uri {
                query.append_pair("post_logout_redirect_uri", post_logout);
                query.append_pair("client_id", &self.config.client_id);
            }
        }
        (self.redirect)(url.into());
        Ok(())
    }

    /// Register a listener fired on every authenticated-state transition.
    /// Returns a closure that removes this listener when called.
    pub fn on_auth_state_change(
        &self,
        callback: impl Fn(bool) + Send + Sync + 'static,
    ) -> Box<dyn FnOnce() + Send> {
        let id = self.next_listener_id.fetch_add(1, Ordering::SeqCst);
        self.listeners.lock().push((id, Box::new(callback)));

        let listeners = self.listeners.clone();
        Box::new(move || {
            listeners.lock().retain(|(listener_id, _)| *listener_id != id);
        })
    }

    fn notify(&self, authenticated: bool) {
        for (_, callback) in self.listeners.lock().iter() {
            callback(authenticated);
        }
    }
}
