//! Shared type definitions for the Coinflip pattern simulation.
//!
//! This crate is the single source of truth for every payload exchanged
//! between the engine and its subscribers. Types flow downstream to
//! `TypeScript` via `ts-rs` for the live dashboard.
//!
//! # Modules
//!
//! - [`ids`] -- Run and session identifiers
//! - [`enums`] -- Coin outcomes, run lifecycle states, stop reasons
//! - [`structs`] -- Session deltas, aggregate statistics, run status
//! - [`events`] -- Envelope for events pushed to subscribers

pub mod enums;
pub mod events;
pub mod ids;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use enums::{Outcome, RunState, StopReason};
pub use events::PublishedEvent;
pub use ids::{RunId, SessionId};
pub use structs::{
    AggregateStatistics, RunRequest, RunSettings, RunStatus, SessionDelta, SessionStatus,
    SimulationUpdate,
};
