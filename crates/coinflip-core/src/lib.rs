//! Simulation engine for the Coinflip pattern experiment.
//!
//! Many independent sessions each flip a fair coin until a chosen pattern
//! first appears (or a flip ceiling is hit). The crate runs those sessions
//! on a pool of worker tasks, folds their reports into live aggregate
//! statistics, and publishes progress to any number of subscribers.
//!
//! # Modules
//!
//! - [`config`] -- Configuration loading from `coinflip-config.yaml` into
//!   strongly-typed structs.
//! - [`pattern`] -- Pattern rules, incremental matchers, and the catalog.
//! - [`session`] -- [`SessionRunner`]: one session's generator, matcher
//!   and flip counter.
//! - [`pool`] -- Worker tasks that step sessions in slices.
//! - [`aggregator`] -- Per-session state and order-independent counters.
//! - [`publisher`] -- Broadcast fan-out and delta coalescing.
//! - [`run_config`] -- Request defaulting and validation.
//! - [`coordinator`] -- [`Simulator`]: the lifecycle and control surface.
//!
//! [`SessionRunner`]: session::SessionRunner
//! [`Simulator`]: coordinator::Simulator

pub mod aggregator;
pub mod config;
pub mod coordinator;
mod driver;
pub mod pattern;
pub mod pool;
pub mod publisher;
pub mod run_config;
pub mod session;

pub use aggregator::SessionFilter;
pub use config::EngineConfig;
pub use coordinator::{SimulationError, Simulator};
pub use pattern::{PatternCatalog, PatternSpec};
