//! Shared application state for the Observer API server.
//!
//! [`AppState`] holds the engine handle that every handler operates on.
//! Live events come from the simulator's own publisher; the observer only
//! subscribes to it.

use std::sync::Arc;

use coinflip_core::Simulator;
use coinflip_types::PublishedEvent;
use tokio::sync::broadcast;

/// Shared state for the Axum application.
///
/// Wrapped in [`Arc`] and injected via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    /// The simulation engine.
    pub simulator: Arc<Simulator>,
}

impl AppState {
    /// Wrap an engine for serving.
    pub const fn new(simulator: Arc<Simulator>) -> Self {
        Self { simulator }
    }

    /// Subscribe to the engine's event stream.
    ///
    /// Returns a receiver that yields every [`PublishedEvent`] emitted
    /// from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.simulator.subscribe()
    }
}
