//! Session, statistics and run-status payloads.
//!
//! These structs are the JSON contract between the engine and the live
//! dashboard. Field names follow the dashboard's expectations
//! (`flips_count`, `pattern_found_sessions`, `actual_ev`, ...).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::{RunState, StopReason};
use crate::ids::{RunId, SessionId};

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

/// Compact per-session change pushed on the `simulation_update` channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct SessionDelta {
    /// Session index within the run.
    pub session_id: SessionId,
    /// Flips performed so far.
    pub flips_count: u64,
    /// Whether the session reached a terminal state.
    pub completed: bool,
    /// Whether the session terminated because the pattern completed.
    pub pattern_found: bool,
}

/// Full view of one session as held by the aggregator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct SessionStatus {
    /// Session index within the run.
    pub session_id: SessionId,
    /// Flips performed so far.
    pub flips_count: u64,
    /// Whether the session reached a terminal state.
    pub completed: bool,
    /// Whether the session terminated because the pattern completed.
    pub pattern_found: bool,
    /// 0-based index of the flip that completed the pattern.
    pub pattern_position: Option<u64>,
    /// Why the session stopped, once terminal.
    pub stop_reason: Option<StopReason>,
    /// Fault description for sessions that ended with an error.
    pub error: Option<String>,
}

impl SessionStatus {
    /// A session that has not flipped yet.
    pub const fn pending(session_id: SessionId) -> Self {
        Self {
            session_id,
            flips_count: 0,
            completed: false,
            pattern_found: false,
            pattern_position: None,
            stop_reason: None,
            error: None,
        }
    }

    /// Whether the session ended with an internal fault.
    pub const fn failed(&self) -> bool {
        matches!(self.stop_reason, Some(StopReason::Fault))
    }

    /// Project the status onto the compact delta form.
    pub const fn delta(&self) -> SessionDelta {
        SessionDelta {
            session_id: self.session_id,
            flips_count: self.flips_count,
            completed: self.completed,
            pattern_found: self.pattern_found,
        }
    }
}

// ---------------------------------------------------------------------------
// Aggregate statistics
// ---------------------------------------------------------------------------

/// A self-consistent read of the run's aggregate counters.
///
/// Every ratio is guarded: a zero denominator yields `0.0`, never NaN.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct AggregateStatistics {
    /// Number of sessions in the run.
    pub total_sessions: u64,
    /// Sessions that reached a terminal state (including faults).
    pub completed_sessions: u64,
    /// Sessions that terminated because the pattern completed.
    pub pattern_found_sessions: u64,
    /// Sessions that terminated with an internal fault.
    pub failed_sessions: u64,
    /// `completed_sessions / total_sessions`.
    pub completion_rate: f64,
    /// `pattern_found_sessions / completed_sessions`.
    pub pattern_success_rate: f64,
    /// Mean flip count over all completed sessions.
    pub average_flips_all: f64,
    /// Mean flip count over sessions that found the pattern.
    pub average_flips_pattern_found: f64,
    /// Expected flips to completion for the selected pattern.
    pub theoretical_ev: f64,
    /// Empirical expected value (equal to `average_flips_pattern_found`).
    pub actual_ev: f64,
    /// Human-readable description of the selected pattern.
    pub pattern_description: String,
    /// Whether the run is currently in the `running` state.
    pub is_running: bool,
}

// ---------------------------------------------------------------------------
// Run configuration
// ---------------------------------------------------------------------------

/// Raw start/configure request as received from a client.
///
/// Every field is optional; missing fields fall back to the coordinator's
/// current defaults. Counts are signed so that non-positive values reach
/// validation instead of failing to decode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct RunRequest {
    /// Pattern identifier from the catalog.
    #[serde(default)]
    pub pattern_type: Option<String>,
    /// Number of independent sessions to run.
    #[serde(default)]
    pub num_sessions: Option<i64>,
    /// Flip ceiling per session.
    #[serde(default)]
    pub max_flips_per_session: Option<i64>,
}

/// Validated run parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct RunSettings {
    /// Pattern identifier from the catalog.
    pub pattern_type: String,
    /// Number of independent sessions.
    pub num_sessions: u32,
    /// Flip ceiling per session.
    pub max_flips_per_session: u64,
}

/// Coordinator status served by `GET /api/simulation/status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct RunStatus {
    /// Current lifecycle state.
    pub state: RunState,
    /// Identifier of the current (or last) run, if any.
    pub run_id: Option<RunId>,
    /// Parameters of the current run, if any.
    pub settings: Option<RunSettings>,
    /// Seed the per-session generators were derived from.
    pub seed: Option<u64>,
    /// When the run started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the run stopped or completed.
    pub finished_at: Option<DateTime<Utc>>,
    /// Parameters the next start will use when a request omits them.
    pub defaults: RunSettings,
    /// Sessions that have not reached a terminal state.
    pub active_sessions: u64,
}

// ---------------------------------------------------------------------------
// Delta batch
// ---------------------------------------------------------------------------

/// Batch of session changes pushed on the `simulation_update` channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct SimulationUpdate {
    /// Run the deltas belong to.
    pub run_id: RunId,
    /// Lifecycle state at emission time.
    pub status: RunState,
    /// Sessions that have not reached a terminal state.
    pub active_sessions: u64,
    /// Latest state of every session that changed since the last batch.
    pub updates: Vec<SessionDelta>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_session_has_no_progress() {
        let status = SessionStatus::pending(SessionId(3));
        assert_eq!(status.flips_count, 0);
        assert!(!status.completed);
        assert!(!status.failed());
        assert_eq!(status.delta().session_id, SessionId(3));
    }

    #[test]
    fn run_request_fields_are_optional() {
        let request: RunRequest =
            serde_json::from_str(r#"{"num_sessions": -5}"#).unwrap_or_default();
        assert_eq!(request.num_sessions, Some(-5));
        assert!(request.pattern_type.is_none());
        assert!(request.max_flips_per_session.is_none());
    }

    #[test]
    fn default_statistics_are_zeroed() {
        let stats = AggregateStatistics::default();
        assert_eq!(stats.total_sessions, 0);
        assert_eq!(stats.completed_sessions, 0);
        assert!(stats.actual_ev.abs() < f64::EPSILON);
        assert!(!stats.is_running);
    }
}
