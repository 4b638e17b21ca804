//! Configuration loading and typed config structures.
//!
//! The configuration lives in `coinflip-config.yaml` at the working
//! directory. Every section and field has a default, so an empty file (or
//! no file at all) yields a usable engine.

use std::path::Path;
use std::time::Duration;

use coinflip_types::RunSettings;
use serde::Deserialize;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A value parsed correctly but is out of range.
    #[error("invalid config value for {field}: {reason}")]
    Invalid {
        /// Dotted path of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level engine configuration, mirroring `coinflip-config.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct EngineConfig {
    /// HTTP listener settings.
    #[serde(default)]
    pub server: ServerSettings,

    /// Worker pool and randomness settings.
    #[serde(default)]
    pub engine: ExecutionConfig,

    /// Publish cadence and batching.
    #[serde(default)]
    pub publisher: PublisherConfig,

    /// Run parameters used when a start request omits them.
    #[serde(default)]
    pub defaults: RunDefaults,

    /// Upper bounds on run parameters.
    #[serde(default)]
    pub limits: RunLimits,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Start a run with the default parameters as soon as the engine boots.
    #[serde(default)]
    pub autostart: bool,
}

impl EngineConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// Environment variables override YAML values:
    /// - `COINFLIP_HOST` overrides `server.host`
    /// - `COINFLIP_PORT` overrides `server.port`
    /// - `COINFLIP_SEED` overrides `engine.seed`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string, then apply environment
    /// overrides and validate.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yml::from_str(yaml)?
        };
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from an environment lookup function.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if an override does not parse.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("COINFLIP_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("COINFLIP_PORT") {
            self.server.port = port.trim().parse().map_err(|e| ConfigError::Invalid {
                field: "server.port",
                reason: format!("COINFLIP_PORT={port}: {e}"),
            })?;
        }
        if let Some(seed) = lookup("COINFLIP_SEED") {
            let parsed = seed.trim().parse().map_err(|e| ConfigError::Invalid {
                field: "engine.seed",
                reason: format!("COINFLIP_SEED={seed}: {e}"),
            })?;
            self.engine.seed = Some(parsed);
        }
        Ok(())
    }

    /// Check cross-field constraints that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn positive(field: &'static str, value: u64) -> Result<(), ConfigError> {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: String::from("must be greater than zero"),
                });
            }
            Ok(())
        }

        positive("engine.flips_per_slice", u64::from(self.engine.flips_per_slice))?;
        positive(
            "engine.report_channel_capacity",
            u64::try_from(self.engine.report_channel_capacity).unwrap_or(u64::MAX),
        )?;
        positive("publisher.update_interval_ms", self.publisher.update_interval_ms)?;
        positive(
            "publisher.statistics_interval_ms",
            self.publisher.statistics_interval_ms,
        )?;
        positive(
            "publisher.max_batch_size",
            u64::try_from(self.publisher.max_batch_size).unwrap_or(u64::MAX),
        )?;
        positive(
            "publisher.broadcast_capacity",
            u64::try_from(self.publisher.broadcast_capacity).unwrap_or(u64::MAX),
        )?;
        positive("limits.max_sessions", u64::from(self.limits.max_sessions))?;
        positive(
            "limits.max_flips_per_session",
            self.limits.max_flips_per_session,
        )?;
        positive("defaults.num_sessions", u64::from(self.defaults.num_sessions))?;
        positive(
            "defaults.max_flips_per_session",
            self.defaults.max_flips_per_session,
        )?;

        if self.defaults.num_sessions > self.limits.max_sessions {
            return Err(ConfigError::Invalid {
                field: "defaults.num_sessions",
                reason: format!("exceeds limits.max_sessions ({})", self.limits.max_sessions),
            });
        }
        if self.defaults.max_flips_per_session > self.limits.max_flips_per_session {
            return Err(ConfigError::Invalid {
                field: "defaults.max_flips_per_session",
                reason: format!(
                    "exceeds limits.max_flips_per_session ({})",
                    self.limits.max_flips_per_session
                ),
            });
        }
        match self.logging.format.as_str() {
            "pretty" | "json" => Ok(()),
            other => Err(ConfigError::Invalid {
                field: "logging.format",
                reason: format!("expected `pretty` or `json`, got `{other}`"),
            }),
        }
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerSettings {
    /// Address to bind (e.g. `0.0.0.0`).
    #[serde(default = "default_host")]
    pub host: String,

    /// TCP port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Worker pool and randomness settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExecutionConfig {
    /// Number of worker tasks (0 = available parallelism).
    #[serde(default)]
    pub worker_count: usize,

    /// Flips a worker performs on one session before moving to the next.
    #[serde(default = "default_flips_per_slice")]
    pub flips_per_slice: u32,

    /// Pause between worker rounds in milliseconds (0 = only yield).
    #[serde(default)]
    pub round_interval_ms: u64,

    /// Capacity of the bounded report channel from workers to the driver.
    #[serde(default = "default_report_channel_capacity")]
    pub report_channel_capacity: usize,

    /// Base seed for the per-session generators. Random when absent.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl ExecutionConfig {
    /// Resolve the effective worker count for a run of `sessions` sessions.
    pub fn effective_workers(&self, sessions: u32) -> usize {
        let requested = if self.worker_count == 0 {
            std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
        } else {
            self.worker_count
        };
        let sessions = usize::try_from(sessions).unwrap_or(usize::MAX);
        requested.min(sessions).max(1)
    }

    /// Pause between worker rounds.
    pub const fn round_interval(&self) -> Duration {
        Duration::from_millis(self.round_interval_ms)
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            worker_count: 0,
            flips_per_slice: default_flips_per_slice(),
            round_interval_ms: 0,
            report_channel_capacity: default_report_channel_capacity(),
            seed: None,
        }
    }
}

/// Publish cadence and batching.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PublisherConfig {
    /// Interval between `simulation_update` batches in milliseconds.
    #[serde(default = "default_update_interval_ms")]
    pub update_interval_ms: u64,

    /// Interval between `statistics_update` snapshots in milliseconds.
    #[serde(default = "default_statistics_interval_ms")]
    pub statistics_interval_ms: u64,

    /// Maximum number of session deltas in one batch.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Capacity of the subscriber broadcast channel.
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
}

impl PublisherConfig {
    /// Interval between delta batches.
    pub const fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }

    /// Interval between statistics snapshots.
    pub const fn statistics_interval(&self) -> Duration {
        Duration::from_millis(self.statistics_interval_ms)
    }
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            update_interval_ms: default_update_interval_ms(),
            statistics_interval_ms: default_statistics_interval_ms(),
            max_batch_size: default_max_batch_size(),
            broadcast_capacity: default_broadcast_capacity(),
        }
    }
}

/// Run parameters used when a start request omits them.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RunDefaults {
    /// Pattern identifier from the catalog.
    #[serde(default = "default_pattern_type")]
    pub pattern_type: String,

    /// Number of sessions.
    #[serde(default = "default_num_sessions")]
    pub num_sessions: u32,

    /// Flip ceiling per session.
    #[serde(default = "default_max_flips_per_session")]
    pub max_flips_per_session: u64,
}

impl RunDefaults {
    /// The defaults as wire settings.
    pub fn settings(&self) -> RunSettings {
        RunSettings {
            pattern_type: self.pattern_type.clone(),
            num_sessions: self.num_sessions,
            max_flips_per_session: self.max_flips_per_session,
        }
    }
}

impl Default for RunDefaults {
    fn default() -> Self {
        Self {
            pattern_type: default_pattern_type(),
            num_sessions: default_num_sessions(),
            max_flips_per_session: default_max_flips_per_session(),
        }
    }
}

/// Upper bounds on run parameters.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RunLimits {
    /// Largest accepted `num_sessions`.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: u32,

    /// Largest accepted `max_flips_per_session`.
    #[serde(default = "default_flip_limit")]
    pub max_flips_per_session: u64,
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
            max_flips_per_session: default_flip_limit(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: `pretty` or `json`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_host() -> String {
    String::from("0.0.0.0")
}

const fn default_port() -> u16 {
    5000
}

const fn default_flips_per_slice() -> u32 {
    16
}

const fn default_report_channel_capacity() -> usize {
    4096
}

const fn default_update_interval_ms() -> u64 {
    100
}

const fn default_statistics_interval_ms() -> u64 {
    500
}

const fn default_max_batch_size() -> usize {
    1000
}

const fn default_broadcast_capacity() -> usize {
    256
}

fn default_pattern_type() -> String {
    String::from("2_consecutive_tails")
}

const fn default_num_sessions() -> u32 {
    1000
}

const fn default_max_flips_per_session() -> u64 {
    10_000
}

const fn default_max_sessions() -> u32 {
    100_000
}

const fn default_flip_limit() -> u64 {
    10_000_000
}

fn default_log_level() -> String {
    String::from("info")
}

fn default_log_format() -> String {
    String::from("pretty")
}
