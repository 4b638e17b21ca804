//! Listener for the simulation control API and event stream.
//!
//! [`start_server`] binds the address from the engine's `server` config
//! section and serves [`build_router`] until the caller's shutdown future
//! resolves. The engine binary passes a Ctrl-C future and then shuts the
//! simulator down once this returns, so a run never outlives its API.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use coinflip_core::config::ServerSettings;
use tokio::net::TcpListener;
use tracing::info;

use crate::router::build_router;
use crate::state::AppState;

/// Where the control API listens.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host or IP to bind (e.g. `0.0.0.0`).
    pub host: String,
    /// TCP port; `0` asks the OS for a free one.
    pub port: u16,
}

impl ServerConfig {
    /// Resolve the configured host and port into a socket address.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] when the host is not an IP literal.
    pub fn addr(&self) -> Result<SocketAddr, ServerError> {
        let raw = format!("{}:{}", self.host, self.port);
        raw.parse()
            .map_err(|e| ServerError::Bind(format!("invalid address {raw}: {e}")))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from(&ServerSettings::default())
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(settings: &ServerSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
        }
    }
}

/// Serve the control API and `/ws` stream until `shutdown` resolves.
///
/// In-flight requests finish before this returns. Open `WebSocket`
/// streams end when their connection is dropped.
///
/// # Errors
///
/// Returns [`ServerError::Bind`] if the address is invalid or taken, and
/// [`ServerError::Serve`] on a fatal I/O error while serving.
pub async fn start_server<F>(
    config: &ServerConfig,
    state: Arc<AppState>,
    shutdown: F,
) -> Result<(), ServerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = config.addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::Bind(format!("bind failed on {addr}: {e}")))?;
    let local = listener
        .local_addr()
        .map_err(|e| ServerError::Bind(format!("no local address for {addr}: {e}")))?;

    info!(
        addr = %local,
        patterns = state.simulator.patterns().len(),
        state = %state.simulator.state(),
        "Simulation API listening"
    );

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| ServerError::Serve(e.to_string()))?;

    info!(addr = %local, "Simulation API stopped");
    Ok(())
}

/// Errors that can occur when starting or running the control API.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The listen address is invalid or could not be bound.
    #[error("bind error: {0}")]
    Bind(String),

    /// The server failed while serving.
    #[error("serve error: {0}")]
    Serve(String),
}
