//! Observer API server for the Coinflip simulation.
//!
//! This crate provides an Axum HTTP server that exposes:
//!
//! - **`WebSocket` endpoint** (`/ws`) streaming every published event
//!   (`statistics_update`, `simulation_update`, `simulation_completed`)
//!   via [`tokio::sync::broadcast`]
//! - **Control REST endpoints** for the run lifecycle (configure, start,
//!   stop, reset, status)
//! - **Query REST endpoints** for the pattern catalog, aggregate
//!   statistics and the session table
//! - **Minimal HTML status page** (`GET /`)
//!
//! # Architecture
//!
//! Every handler talks to the shared [`Simulator`] held in [`AppState`].
//! The simulator serializes lifecycle transitions itself, so handlers stay
//! thin: decode the request, call one operation, map the result or the
//! [`ObserverError`] onto a JSON response.
//!
//! [`Simulator`]: coinflip_core::Simulator
//! [`AppState`]: state::AppState
//! [`ObserverError`]: error::ObserverError

pub mod control;
pub mod error;
pub mod handlers;
pub mod router;
pub mod server;
pub mod state;
pub mod ws;

// Re-export primary types for convenience.
pub use router::build_router;
pub use server::{ServerConfig, ServerError, start_server};
pub use state::AppState;
