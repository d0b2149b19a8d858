//! TokenStore (C3): persistence of the three pieces of session state a PKCE
//! client owns between calls (the resolved token set, the pending PKCE
//! verifier, and the pending CSRF state).
//!
//! Grounded on the same "one small struct owns the only mutable session
//! state" shape as the source project's tenant-token signer: a single
//! mutex-guarded inner struct, cheap clone-out reads, no I/O in the
//! reference implementation.

use async_trait::async_trait;
use parking_lot::Mutex;

use authcore::TokenSet;

/// Capabilities every token store must provide. Alternative implementations
/// (persistent secure storage, browser local-storage) must preserve this
/// exact observable contract: `clear_*` removes a value `get_*` can no
/// longer see, and `clear_all` is equivalent to clearing each slot.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn get_token_set(&self) -> Option<TokenSet>;
    async fn set_token_set(&self, token_set: TokenSet);
    async fn clear_token_set(&self);

    async fn get_code_verifier(&self) -> Option<String>;
    async fn set_code_verifier(&self, verifier: String);
    async fn clear_code_verifier(&self);

    async fn get_state(&self) -> Option<String>;
    async fn set_state(&self, state: String);
    async fn clear_state(&self);

    async fn clear_all(&self);
}

#[derive(Default)]
struct Inner {
    token_set: Option<TokenSet>,
    code_verifier: Option<String>,
    state: Option<String>,
}

/// Reference `TokenStore`: all three slots held in memory, cleared on drop.
#[derive(Default)]
pub struct InMemoryTokenStore {
    inner: Mutex<Inner>,
}

impl InMemoryTokenStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn get_token_set(&self) -> Option<TokenSet> {
        self.inner.lock().token_set.clone()
    }

    async fn set_token_set(&self, token_set: TokenSet) {
        self.inner.lock().token_set = Some(token_set);
    }

    async fn clear_token_set(&self) {
        self.inner.lock().token_set = None;
    }

    async fn get_code_verifier(&self) -> Option<String> {
        self.inner.lock().code_verifier.clone()
    }

    async fn set_code_verifier(&self, verifier: String) {
        self.inner.lock().code_verifier = Some(verifier);
    }

    async fn clear_code_verifier(&self) {
        self.inner.lock().code_verifier = None;
    }

    async fn get_state(&self) -> Option<String> {
        self.inner.lock().state.clone()
    }

    async fn set_state(&self, state: String) {
        self.inner.lock().state = Some(state);
    }

    async fn clear_state(&self) {
        self.inner.lock().state = None;
    }

    async fn clear_all(&self) {
        let mut inner = self.inner.lock();
        inner.token_set = None;
        inner.code_verifier = None;
        inner.state = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn roundtrips_each_slot_independently() {
        let store = InMemoryTokenStore::new();
        assert!(store.get_code_verifier().await.is_none());

        store.set_code_verifier("verifier-1".to_string()).await;
        store.set_state("state-1".to_string()).await;
        assert_eq!(store.get_code_verifier().await.as_deref(), Some("verifier-1"));
        assert_eq!(store.get_state().await.as_deref(), Some("state-1"));

        store.clear_code_verifier().await;
        assert!(store.get_code_verifier().await.is_none());
        assert_eq!(store.get_state().await.as_deref(), Some("state-1"));
    }

    #[tokio::test]
    async fn clear_all_empties_every_slot() {
        let store = InMemoryTokenStore::new();
        store.set_code_verifier("v".to_string()).await;
        store.set_state("s".to_string()).await;

        store.clear_all().await;
        assert!(store.get_code_verifier().await.is_none());
        assert!(store.get_state().await.is_none());
        assert!(store.get_token_set().await.is_none());
    }
}
