//! Server Application State
//!
//! Shared state accessible by all HTTP handlers.

use std::collections::HashSet;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use desk_runtime::DeskRegistry;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// Desk registry
    registry: Arc<DeskRegistry>,

    /// Accepted API tokens; empty means authentication is off
    auth_tokens: HashSet<String>,

    /// Cancelled when the server begins shutting down
    shutdown: CancellationToken,
}

impl AppState {
    /// Create new application state
    pub fn new(registry: Arc<DeskRegistry>, auth_tokens: impl IntoIterator<Item = String>) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                registry,
                auth_tokens: auth_tokens
                    .into_iter()
                    .filter(|token| !token.is_empty())
                    .collect(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Get the desk registry
    pub fn registry(&self) -> &Arc<DeskRegistry> {
        &self.inner.registry
    }

    /// Whether `/v1` routes require a token
    pub fn auth_enabled(&self) -> bool {
        !self.inner.auth_tokens.is_empty()
    }

    /// Check a presented token
    pub fn is_authorized(&self, token: &str) -> bool {
        self.inner.auth_tokens.contains(token)
    }

    /// Token that ends long-lived responses once cancelled
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.inner.shutdown
    }
}
