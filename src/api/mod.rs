//! HTTP surface: identity extraction, system endpoints and router
//! composition.
//!
//! | Route     | Handler                                  |
//! |-----------|------------------------------------------|
//! | `/ws`     | [`crate::ws::handler::ws_handler`]       |
//! | `/sse`    | [`crate::sse::handler::sse_handler`]     |
//! | `/health` | [`system::health_handler`]               |

pub mod auth;
pub mod system;

use axum::Router;
use axum::middleware;
use axum::routing::get;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;
use crate::sse::handler::sse_handler;
use crate::ws::handler::ws_handler;

/// Builds the complete router with every endpoint and the standard
/// middleware stack.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/sse", get(sse_handler))
        .merge(system::routes())
        .layer(middleware::from_fn(auth::attach_identity))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
