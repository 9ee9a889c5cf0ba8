//! Per-session identity handed to providers and launcher factories.

use std::sync::Arc;

use tokio::sync::Mutex;

/// Cached hub API token for one wrapper.
///
/// Cloning shares the slot, so a provider that refreshes the token updates
/// the wrapper's copy as well.
#[derive(Debug, Clone, Default)]
pub struct TokenSlot(Arc<Mutex<Option<String>>>);

impl TokenSlot {
    /// Current token, if one was issued.
    pub async fn get(&self) -> Option<String> {
        self.0.lock().await.clone()
    }

    /// Store a freshly issued token.
    pub async fn set(&self, token: impl Into<String>) {
        *self.0.lock().await = Some(token.into());
    }

    /// Drop the cached token so the next call issues a new one.
    pub async fn clear(&self) {
        *self.0.lock().await = None;
    }
}

/// Identity and session fields shared between a wrapper and its launcher.
#[derive(Debug, Clone)]
pub struct SpawnContext {
    /// Name of the user the session belongs to.
    pub user: String,
    /// Named server, empty for the default server.
    pub server_name: String,
    /// Hub API base URL, used when issuing per-user tokens.
    pub hub_api_url: Option<String>,
    /// Token cache scoped to this wrapper.
    pub hub_token: TokenSlot,
}

impl SpawnContext {
    /// Create a context for the user's default server.
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            server_name: String::new(),
            hub_api_url: None,
            hub_token: TokenSlot::default(),
        }
    }

    /// Set the named server.
    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = name.into();
        self
    }

    /// Set the hub API URL.
    pub fn hub_api_url(mut self, url: impl Into<String>) -> Self {
        self.hub_api_url = Some(url.into());
        self
    }
}
