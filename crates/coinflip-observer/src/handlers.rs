//! Read-only REST endpoint handlers for the Observer server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/` | Minimal HTML status page |
//! | `GET` | `/api/patterns` | Pattern identifier to description map |
//! | `GET` | `/api/statistics` | Aggregate statistics snapshot |
//! | `GET` | `/api/sessions` | Session table (`?status=&limit=`) |
//! | `GET` | `/api/sessions/{id}` | Single session |

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::response::{Html, IntoResponse};
use coinflip_core::SessionFilter;
use coinflip_types::SessionId;

use crate::error::ObserverError;
use crate::state::AppState;

/// Default page size for `GET /api/sessions`.
const DEFAULT_SESSION_LIMIT: usize = 1_000;

// ---------------------------------------------------------------------------
// Query parameter structs
// ---------------------------------------------------------------------------

/// Query parameters for the `GET /api/sessions` endpoint.
#[derive(Debug, serde::Deserialize)]
pub struct SessionsQuery {
    /// Filter: `all`, `active`, `completed`, `found` or `failed`.
    pub status: Option<String>,
    /// Maximum number of sessions to return (default 1000).
    pub limit: Option<usize>,
}

// ---------------------------------------------------------------------------
// GET / -- minimal HTML status page
// ---------------------------------------------------------------------------

/// Serve a minimal HTML page showing the run state and API links.
pub async fn index(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let status = state.simulator.status().await;
    let stats = state.simulator.statistics().await;
    let run_state = status.state.as_str().to_uppercase();
    let pattern = stats.pattern_description;
    let completed = stats.completed_sessions;
    let total = stats.total_sessions;
    let actual_ev = format!("{:.3}", stats.actual_ev);
    let theoretical_ev = format!("{:.3}", stats.theoretical_ev);
    let subscribers = state.simulator.subscriber_count();

    Html(format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="utf-8">
    <title>Coinflip Observer</title>
    <style>
        body {{
            background: #0d1117;
            color: #c9d1d9;
            font-family: 'Cascadia Code', 'Fira Code', 'Consolas', monospace;
            padding: 2rem;
            max-width: 800px;
            margin: 0 auto;
        }}
        h1 {{ color: #58a6ff; margin-bottom: 0.25rem; }}
        .subtitle {{ color: #8b949e; margin-top: 0; }}
        .metric {{
            display: inline-block;
            background: #161b22;
            border: 1px solid #30363d;
            border-radius: 6px;
            padding: 1rem 1.5rem;
            margin: 0.5rem 0.5rem 0.5rem 0;
            min-width: 120px;
        }}
        .metric .label {{ color: #8b949e; font-size: 0.85rem; }}
        .metric .value {{ color: #58a6ff; font-size: 1.5rem; font-weight: bold; }}
        a {{ color: #58a6ff; text-decoration: none; }}
        ul {{ list-style: none; padding: 0; }}
        li {{ padding: 0.3rem 0; }}
        .status {{ color: #3fb950; font-weight: bold; }}
        hr {{ border: none; border-top: 1px solid #30363d; margin: 1.5rem 0; }}
    </style>
</head>
<body>
    <h1>Coinflip Observer</h1>
    <p class="subtitle">Pattern simulation engine</p>

    <p>State: <span class="status">{run_state}</span> &middot; {pattern}</p>

    <div>
        <div class="metric">
            <div class="label">Completed</div>
            <div class="value">{completed} / {total}</div>
        </div>
        <div class="metric">
            <div class="label">Actual EV</div>
            <div class="value">{actual_ev}</div>
        </div>
        <div class="metric">
            <div class="label">Theoretical EV</div>
            <div class="value">{theoretical_ev}</div>
        </div>
        <div class="metric">
            <div class="label">Subscribers</div>
            <div class="value">{subscribers}</div>
        </div>
    </div>

    <hr>

    <h2>API Endpoints</h2>
    <ul>
        <li>GET <a href="/api/patterns">/api/patterns</a> -- Pattern catalog</li>
        <li>GET <a href="/api/simulation/status">/api/simulation/status</a> -- Run status</li>
        <li>GET <a href="/api/statistics">/api/statistics</a> -- Aggregate statistics</li>
        <li>GET <a href="/api/sessions">/api/sessions</a> -- Session table (?status=active&amp;limit=N)</li>
        <li>POST /api/simulation/configure | start | stop | reset</li>
    </ul>

    <h2>WebSocket</h2>
    <ul>
        <li><code>ws://host:port/ws</code> -- Live event stream</li>
    </ul>
</body>
</html>"#
    ))
}

// ---------------------------------------------------------------------------
// GET /api/patterns
// ---------------------------------------------------------------------------

/// Return the pattern catalog as an identifier to description map.
pub async fn list_patterns(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.simulator.patterns())
}

// ---------------------------------------------------------------------------
// GET /api/statistics
// ---------------------------------------------------------------------------

/// Return a self-consistent aggregate statistics snapshot.
pub async fn get_statistics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.simulator.statistics().await)
}

// ---------------------------------------------------------------------------
// GET /api/sessions
// ---------------------------------------------------------------------------

/// List sessions of the current run in id order.
///
/// # Query Parameters
///
/// - `status`: `all` | `active` | `completed` | `found` | `failed`
///   (default: `all`)
/// - `limit`: maximum number returned (default: 1000)
pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SessionsQuery>,
) -> Result<impl IntoResponse, ObserverError> {
    let filter = params
        .status
        .as_deref()
        .map(str::parse::<SessionFilter>)
        .transpose()
        .map_err(ObserverError::InvalidQuery)?
        .unwrap_or_default();
    let limit = params.limit.unwrap_or(DEFAULT_SESSION_LIMIT);

    let sessions = state.simulator.sessions(filter, Some(limit)).await;

    Ok(Json(serde_json::json!({
        "count": sessions.len(),
        "sessions": sessions,
    })))
}

// ---------------------------------------------------------------------------
// GET /api/sessions/{id}
// ---------------------------------------------------------------------------

/// Return a single session of the current run.
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ObserverError> {
    let id: u32 = id
        .parse()
        .map_err(|e| ObserverError::InvalidQuery(format!("invalid session id '{id}': {e}")))?;
    let session_id = SessionId(id);

    let session = state
        .simulator
        .session(session_id)
        .await
        .ok_or_else(|| ObserverError::NotFound(format!("session {session_id}")))?;

    Ok(Json(session))
}
