//! Error types for the engine binary.
//!
//! [`EngineError`] is the top-level error type that wraps every failure
//! mode during engine startup and serving.

/// Top-level error for the engine binary.
///
/// Each variant wraps a specific subsystem error, providing a single
/// error type that `main` can propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: coinflip_core::config::ConfigError,
    },

    /// The logging subscriber could not be installed.
    #[error("logging error: {message}")]
    Logging {
        /// Description of the subscriber failure.
        message: String,
    },

    /// The autostart run was rejected.
    #[error("autostart error: {source}")]
    Autostart {
        /// The underlying simulation error.
        #[from]
        source: coinflip_core::SimulationError,
    },

    /// The observer server failed to bind or serve.
    #[error("observer error: {source}")]
    Observer {
        /// The underlying server error.
        #[from]
        source: coinflip_observer::ServerError,
    },
}
