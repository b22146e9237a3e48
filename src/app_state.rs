//! Shared application state injected into all Axum handlers.

use crate::service::Hub;

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// The fan-out hub shared by the WebSocket and SSE endpoints.
    pub hub: Hub,
}

impl AppState {
    /// Wraps a running hub.
    #[must_use]
    pub const fn new(hub: Hub) -> Self {
        Self { hub }
    }
}
