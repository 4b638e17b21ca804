//! Control REST API handlers for the run lifecycle.
//!
//! These endpoints drive the [`Simulator`](coinflip_core::Simulator) state
//! machine. State conflicts map to `409`, invalid run parameters and
//! malformed bodies to `400`.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/simulation/configure` | Store defaults for the next start |
//! | `POST` | `/api/simulation/start` | Start a run (body optional) |
//! | `POST` | `/api/simulation/stop` | Stop the running run |
//! | `POST` | `/api/simulation/reset` | Discard the run, back to idle |
//! | `GET` | `/api/simulation/status` | Current lifecycle status |

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::response::IntoResponse;
use coinflip_types::{RunRequest, RunSettings, RunStatus};
use tracing::info;

use crate::error::ObserverError;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

/// Success response for control operations.
#[derive(Debug, serde::Serialize)]
struct ControlResponse {
    /// Always `true`; failures go through [`ObserverError`].
    success: bool,
    /// Human-readable message.
    message: String,
    /// Run status after the operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    run: Option<RunStatus>,
    /// Stored defaults, for `configure`.
    #[serde(skip_serializing_if = "Option::is_none")]
    settings: Option<RunSettings>,
}

impl ControlResponse {
    fn run(message: &str, run: RunStatus) -> Self {
        Self {
            success: true,
            message: message.to_owned(),
            run: Some(run),
            settings: None,
        }
    }
}

/// Decode an optional JSON request body. An empty body means "use the
/// defaults".
fn parse_request(body: &Bytes) -> Result<RunRequest, ObserverError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(RunRequest::default());
    }
    serde_json::from_slice(body).map_err(|e| ObserverError::InvalidBody(e.to_string()))
}

// ---------------------------------------------------------------------------
// POST /api/simulation/configure
// ---------------------------------------------------------------------------

/// Validate the request and store it as the defaults for the next start.
pub async fn configure(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<impl IntoResponse, ObserverError> {
    let request = parse_request(&body)?;
    let settings = state.simulator.configure(&request).await?;

    Ok(Json(ControlResponse {
        success: true,
        message: "Simulation configured".to_owned(),
        run: None,
        settings: Some(settings),
    }))
}

// ---------------------------------------------------------------------------
// POST /api/simulation/start
// ---------------------------------------------------------------------------

/// Start a run. Fields missing from the body (or an empty body) fall back
/// to the configured defaults.
pub async fn start(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<impl IntoResponse, ObserverError> {
    let request = parse_request(&body)?;
    let status = state.simulator.start(&request).await?;
    info!(run_id = ?status.run_id, "Start requested via API");

    Ok(Json(ControlResponse::run("Simulation started", status)))
}

// ---------------------------------------------------------------------------
// POST /api/simulation/stop
// ---------------------------------------------------------------------------

/// Stop the running run. Statistics are frozen from this point.
pub async fn stop(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ObserverError> {
    let status = state.simulator.stop().await?;
    Ok(Json(ControlResponse::run("Simulation stopped", status)))
}

// ---------------------------------------------------------------------------
// POST /api/simulation/reset
// ---------------------------------------------------------------------------

/// Discard the current run and return to idle.
pub async fn reset(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ObserverError> {
    let status = state.simulator.reset().await?;
    Ok(Json(ControlResponse::run("Simulation reset", status)))
}

// ---------------------------------------------------------------------------
// GET /api/simulation/status
// ---------------------------------------------------------------------------

/// Return the current lifecycle status.
pub async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.simulator.status().await)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn empty_body_uses_defaults() {
        assert_eq!(parse_request(&Bytes::new()).unwrap(), RunRequest::default());
        assert_eq!(
            parse_request(&Bytes::from_static(b"  \n")).unwrap(),
            RunRequest::default()
        );
    }

    #[test]
    fn partial_body_is_accepted() {
        let request = parse_request(&Bytes::from_static(br#"{"num_sessions": 3}"#)).unwrap();
        assert_eq!(request.num_sessions, Some(3));
        assert!(request.pattern_type.is_none());
    }

    #[test]
    fn malformed_body_is_rejected() {
        let err = parse_request(&Bytes::from_static(b"{not json")).unwrap_err();
        assert!(matches!(err, ObserverError::InvalidBody(_)));
    }
}
