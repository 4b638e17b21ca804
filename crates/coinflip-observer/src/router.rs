//! Axum router construction for the Observer API.
//!
//! Assembles all routes (REST + `WebSocket`) into a single [`Router`]
//! with CORS middleware enabled for cross-origin dashboard access.

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::control;
use crate::handlers;
use crate::state::AppState;
use crate::ws;

/// Build the complete Axum router for the Observer server.
///
/// The router includes:
/// - `GET /` -- minimal HTML status page
/// - `GET /ws` -- `WebSocket` event stream
/// - `GET /api/patterns` -- pattern catalog
/// - `POST /api/simulation/{configure,start,stop,reset}` -- lifecycle control
/// - `GET /api/simulation/status` -- run status
/// - `GET /api/statistics` -- aggregate statistics
/// - `GET /api/sessions` -- session table
/// - `GET /api/sessions/{id}` -- single session
///
/// CORS allows any origin so the dashboard can be served separately.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Status page
        .route("/", get(handlers::index))
        // WebSocket
        .route("/ws", get(ws::ws_events))
        // Control
        .route("/api/simulation/configure", post(control::configure))
        .route("/api/simulation/start", post(control::start))
        .route("/api/simulation/stop", post(control::stop))
        .route("/api/simulation/reset", post(control::reset))
        .route("/api/simulation/status", get(control::status))
        // Queries
        .route("/api/patterns", get(handlers::list_patterns))
        .route("/api/statistics", get(handlers::get_statistics))
        .route("/api/sessions", get(handlers::list_sessions))
        .route("/api/sessions/{id}", get(handlers::get_session))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
