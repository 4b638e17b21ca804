//! Enumeration types for the Coinflip simulation.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// The result of a single coin flip.
///
/// Serialized as `"tails"` / `"heads"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum Outcome {
    /// Tails.
    Tails,
    /// Heads.
    Heads,
}

impl Outcome {
    /// Map a random boolean onto an outcome (`true` is heads).
    pub const fn from_bool(heads: bool) -> Self {
        if heads { Self::Heads } else { Self::Tails }
    }

    /// Lower-case plural name used in pattern descriptions.
    pub const fn plural(self) -> &'static str {
        match self {
            Self::Tails => "tails",
            Self::Heads => "heads",
        }
    }

    /// Capitalized singular name used in sequence descriptions.
    pub const fn title(self) -> &'static str {
        match self {
            Self::Tails => "Tails",
            Self::Heads => "Heads",
        }
    }
}

// ---------------------------------------------------------------------------
// Run state
// ---------------------------------------------------------------------------

/// Lifecycle state of the simulation coordinator.
///
/// ```text
/// Idle --start--> Running --stop--> Stopped --reset--> Idle
///                    |
///                    +--all sessions terminal--> Completed --reset--> Idle
/// ```
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS,
)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum RunState {
    /// No run exists. The only state that accepts a start.
    #[default]
    Idle,
    /// Sessions are being driven by the worker pool.
    Running,
    /// The operator stopped the run before every session finished.
    Stopped,
    /// Every session reached a terminal state.
    Completed,
}

impl RunState {
    /// Whether this state represents an active run.
    pub const fn is_running(self) -> bool {
        matches!(self, Self::Running)
    }

    /// Stable lower-case name, matching the serialized form.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Completed => "completed",
        }
    }
}

impl core::fmt::Display for RunState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Stop reason
// ---------------------------------------------------------------------------

/// Why a session reached its terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum StopReason {
    /// The configured pattern completed.
    PatternFound,
    /// The flip ceiling was reached without a match.
    MaxFlipsReached,
    /// An internal fault ended the session early.
    Fault,
}
