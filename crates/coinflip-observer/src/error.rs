//! Error types for the Observer API server.
//!
//! [`ObserverError`] unifies all failure modes into a single enum that
//! can be converted into an Axum HTTP response via its
//! [`IntoResponse`](axum::response::IntoResponse) implementation. Every
//! error body has the shape `{"success": false, "error": ..., "status": ...}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use coinflip_core::SimulationError;
use tracing::debug;

/// Errors that can occur in the Observer API layer.
#[derive(Debug, thiserror::Error)]
pub enum ObserverError {
    /// The engine rejected the operation.
    #[error(transparent)]
    Simulation(#[from] SimulationError),

    /// The requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// The request body could not be decoded.
    #[error("invalid request body: {0}")]
    InvalidBody(String),

    /// An invalid query parameter was provided.
    #[error("invalid query: {0}")]
    InvalidQuery(String),
}

impl ObserverError {
    /// HTTP status for this error.
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Simulation(e) if e.is_configuration() => StatusCode::BAD_REQUEST,
            Self::Simulation(_) => StatusCode::CONFLICT,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidBody(_) | Self::InvalidQuery(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ObserverError {
    fn into_response(self) -> Response {
        let status = self.status();
        debug!(status = status.as_u16(), error = %self, "Request rejected");

        let body = serde_json::json!({
            "success": false,
            "error": self.to_string(),
            "status": status.as_u16(),
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use coinflip_types::RunState;

    use super::*;

    #[test]
    fn configuration_errors_are_bad_requests() {
        let err = ObserverError::from(SimulationError::UnknownPattern("x".into()));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn state_conflicts_are_conflicts() {
        let err = ObserverError::from(SimulationError::NotRunning {
            state: RunState::Idle,
        });
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(
            ObserverError::from(SimulationError::ResetWhileRunning).status(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn unknown_session_is_not_found() {
        let err = ObserverError::NotFound("session 9".into());
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(err.to_string(), "not found: session 9");
    }

    #[tokio::test]
    async fn response_body_carries_status_and_message() {
        let response = ObserverError::InvalidBody("expected value".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["status"], 400);
        assert_eq!(json["error"], "invalid request body: expected value");
    }
}
