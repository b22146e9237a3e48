//! Axum WebSocket upgrade handler.

use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::response::IntoResponse;

use super::connection::run_connection;
use crate::api::auth::AuthenticatedUser;
use crate::app_state::AppState;

/// `GET /ws` — Upgrade an authenticated request to a WebSocket.
///
/// Requests without an identity are rejected with `401` before the
/// upgrade.
pub async fn ws_handler(
    AuthenticatedUser(user_id): AuthenticatedUser,
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let hub = state.hub;
    let max_message = hub.config().ws_max_message_bytes;

    ws.max_message_size(max_message)
        .on_upgrade(move |socket| run_connection(socket, hub, user_id))
}
