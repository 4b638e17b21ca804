//! Engine binary for the Coinflip simulation.
//!
//! Wires together configuration, structured logging, the simulation
//! engine and the observer server, then serves until Ctrl-C.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `coinflip-config.yaml` (defaults if absent)
//! 2. Initialize structured logging (tracing)
//! 3. Create the simulator
//! 4. Optionally start a run with the configured defaults
//! 5. Serve the observer API until Ctrl-C
//! 6. Stop any running run and wait for its driver to exit

mod error;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;
use coinflip_core::config::LoggingConfig;
use coinflip_core::{EngineConfig, Simulator};
use coinflip_observer::{AppState, ServerConfig};
use coinflip_types::RunRequest;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::EngineError;

/// Configuration file looked up in the working directory.
const CONFIG_PATH: &str = "coinflip-config.yaml";

/// Application entry point for the engine.
///
/// # Errors
///
/// Returns an error if configuration, logging, autostart or the observer
/// server fails.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load configuration. Logging is not up yet, so note the source
    //    and report it once the subscriber exists.
    let (config, from_file) = load_config().context("loading configuration")?;

    // 2. Initialize structured logging.
    init_tracing(&config.logging).context("initializing logging")?;
    info!("coinflip-engine starting");
    if from_file {
        info!(path = CONFIG_PATH, "Configuration loaded");
    } else {
        info!("Config file not found, using defaults");
    }
    info!(
        host = %config.server.host,
        port = config.server.port,
        workers = config.engine.worker_count,
        flips_per_slice = config.engine.flips_per_slice,
        seed = ?config.engine.seed,
        pattern = %config.defaults.pattern_type,
        sessions = config.defaults.num_sessions,
        "Engine configuration"
    );

    // 3. Create the simulator.
    let simulator = Arc::new(Simulator::new(&config));
    info!(
        patterns = simulator.patterns().len(),
        "Simulator initialized"
    );

    // 4. Optional autostart.
    if config.autostart {
        let status = simulator
            .start(&RunRequest::default())
            .await
            .map_err(EngineError::from)
            .context("autostarting the default run")?;
        info!(run_id = ?status.run_id, "Autostart run launched");
    }

    // 5. Serve until Ctrl-C.
    let server_config = ServerConfig::from(&config.server);
    let app_state = Arc::new(AppState::new(Arc::clone(&simulator)));
    coinflip_observer::start_server(&server_config, app_state, shutdown_signal())
        .await
        .map_err(EngineError::from)
        .context("running the observer server")?;

    // 6. Tear down the run.
    simulator.shutdown().await;
    info!(state = %simulator.state(), "coinflip-engine shutdown complete");

    Ok(())
}

/// Load the engine configuration from [`CONFIG_PATH`].
///
/// Returns the configuration and whether it came from the file. When the
/// file is absent the defaults still go through environment overrides and
/// validation.
fn load_config() -> Result<(EngineConfig, bool), EngineError> {
    let config_path = Path::new(CONFIG_PATH);
    if config_path.exists() {
        Ok((EngineConfig::from_file(config_path)?, true))
    } else {
        Ok((EngineConfig::parse("")?, false))
    }
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level. The format is
/// JSON when `logging.format` is `json`, human-readable otherwise.
fn init_tracing(logging: &LoggingConfig) -> Result<(), EngineError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let result = if logging.format.eq_ignore_ascii_case("json") {
        builder.json().try_init()
    } else {
        builder.pretty().try_init()
    };

    result.map_err(|e| EngineError::Logging {
        message: e.to_string(),
    })
}

/// Resolve when the process receives Ctrl-C.
async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => warn!(error = %e, "Failed to listen for Ctrl-C, shutting down"),
    }
}
