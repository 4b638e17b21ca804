//! Run lifecycle and the public control surface of the engine.
//!
//! [`Simulator`] owns the lifecycle state machine:
//!
//! ```text
//!            start              all sessions terminal
//!   Idle ───────────▶ Running ───────────────────────▶ Completed
//!    ▲                   │                                  │
//!    │                   │ stop                             │
//!    │                   ▼                                  │
//!    └────── reset ── Stopped ◀─────────────────────────────┘ (reset)
//! ```
//!
//! Transitions are serialized by one lifecycle mutex. When both the
//! lifecycle and a run's aggregator must be held, the lifecycle is always
//! locked first.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use coinflip_types::{
    AggregateStatistics, PublishedEvent, RunId, RunRequest, RunSettings, RunState, RunStatus,
    SessionId, SessionStatus,
};
use rand::Rng;
use tokio::sync::{Mutex, RwLock, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::aggregator::{Aggregator, SessionFilter};
use crate::config::{EngineConfig, ExecutionConfig, PublisherConfig, RunDefaults, RunLimits};
use crate::driver::RunDriver;
use crate::pattern::PatternCatalog;
use crate::pool::WorkerPool;
use crate::publisher::Publisher;
use crate::run_config::RunConfig;
use crate::session::{SessionRunner, session_seed};

/// Errors returned by the control operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SimulationError {
    /// The requested pattern is not in the catalog.
    #[error("unknown pattern type: {0}")]
    UnknownPattern(String),

    /// A count was zero or negative.
    #[error("{field} must be a positive integer, got {value}")]
    NonPositive {
        /// Offending request field.
        field: &'static str,
        /// Value received.
        value: i64,
    },

    /// A count was above the configured limit.
    #[error("{field} of {value} exceeds the limit of {limit}")]
    LimitExceeded {
        /// Offending request field.
        field: &'static str,
        /// Value received.
        value: u64,
        /// Configured maximum.
        limit: u64,
    },

    /// Start was called while a run exists.
    #[error("simulation already {state}; reset before starting a new run")]
    AlreadyRunning {
        /// State at the time of the call.
        state: RunState,
    },

    /// Stop was called while no run is executing.
    #[error("simulation is not running (state: {state})")]
    NotRunning {
        /// State at the time of the call.
        state: RunState,
    },

    /// Reset was called while a run is executing.
    #[error("cannot reset while the simulation is running; stop it first")]
    ResetWhileRunning,
}

impl SimulationError {
    /// Whether the error describes invalid run parameters.
    pub const fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::UnknownPattern(_) | Self::NonPositive { .. } | Self::LimitExceeded { .. }
        )
    }
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// Bookkeeping for the current (or last) run.
struct RunContext {
    id: RunId,
    settings: RunSettings,
    seed: u64,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    aggregator: Arc<RwLock<Aggregator>>,
    cancel: CancellationToken,
    driver: Option<JoinHandle<()>>,
}

/// Lifecycle state guarded by the coordinator mutex.
pub(crate) struct Lifecycle {
    state: RunState,
    defaults: RunDefaults,
    run: Option<RunContext>,
    state_tx: watch::Sender<RunState>,
}

impl Lifecycle {
    /// Whether `run_id` is the current run and it is still running.
    pub(crate) fn is_running(&self, run_id: RunId) -> bool {
        self.state == RunState::Running && self.run.as_ref().is_some_and(|run| run.id == run_id)
    }

    /// Leave `running` for `state`, stamping the finish time.
    pub(crate) fn finish(&mut self, state: RunState) {
        if let Some(run) = self.run.as_mut() {
            run.finished_at = Some(Utc::now());
        }
        self.set_state(state);
    }

    fn set_state(&mut self, state: RunState) {
        self.state = state;
        self.state_tx.send_replace(state);
    }
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

/// The engine: pattern catalog, lifecycle, and the event publisher.
pub struct Simulator {
    catalog: PatternCatalog,
    execution: ExecutionConfig,
    publisher_config: PublisherConfig,
    limits: RunLimits,
    publisher: Publisher,
    lifecycle: Arc<Mutex<Lifecycle>>,
    state_rx: watch::Receiver<RunState>,
    #[cfg(test)]
    faulty_sessions: Vec<SessionId>,
    #[cfg(test)]
    abort_workers: bool,
}

impl Simulator {
    /// An idle engine with the built-in pattern catalog.
    pub fn new(config: &EngineConfig) -> Self {
        Self::with_catalog(config, PatternCatalog::builtin())
    }

    /// An idle engine with a custom pattern catalog.
    pub fn with_catalog(config: &EngineConfig, catalog: PatternCatalog) -> Self {
        let (state_tx, state_rx) = watch::channel(RunState::Idle);
        Self {
            catalog,
            execution: config.engine.clone(),
            publisher_config: config.publisher.clone(),
            limits: config.limits.clone(),
            publisher: Publisher::new(config.publisher.broadcast_capacity),
            lifecycle: Arc::new(Mutex::new(Lifecycle {
                state: RunState::Idle,
                defaults: config.defaults.clone(),
                run: None,
                state_tx,
            })),
            state_rx,
            #[cfg(test)]
            faulty_sessions: Vec::new(),
            #[cfg(test)]
            abort_workers: false,
        }
    }

    /// Sessions whose second flip panics in every run.
    #[cfg(test)]
    fn with_faulty_sessions(mut self, ids: impl IntoIterator<Item = SessionId>) -> Self {
        self.faulty_sessions = ids.into_iter().collect();
        self
    }

    /// Abort every worker right after it is spawned.
    #[cfg(test)]
    const fn with_aborted_workers(mut self) -> Self {
        self.abort_workers = true;
        self
    }

    #[cfg(test)]
    fn abort_if_requested(&self, mut pool: WorkerPool) -> WorkerPool {
        if self.abort_workers {
            pool.abort_all();
        }
        pool
    }

    #[cfg(test)]
    fn inject_faults(&self, runners: Vec<SessionRunner>) -> Vec<SessionRunner> {
        runners
            .into_iter()
            .map(|runner| {
                if self.faulty_sessions.contains(&runner.id()) {
                    runner.panic_at(1)
                } else {
                    runner
                }
            })
            .collect()
    }

    /// Start a run. Missing request fields fall back to the current
    /// defaults. Only allowed from `idle`.
    pub async fn start(&self, request: &RunRequest) -> Result<RunStatus, SimulationError> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.state != RunState::Idle {
            warn!(state = %lifecycle.state, "Start rejected");
            return Err(SimulationError::AlreadyRunning {
                state: lifecycle.state,
            });
        }

        let config = RunConfig::resolve(request, &lifecycle.defaults, &self.catalog, &self.limits)
            .inspect_err(|e| warn!(error = %e, "Start rejected"))?;
        let settings = config.settings();
        let seed = self
            .execution
            .seed
            .unwrap_or_else(|| rand::rng().random::<u64>());
        let run_id = RunId::new();

        let mut aggregator = Aggregator::new(config.num_sessions, &config.pattern);
        aggregator.set_running(true);
        let initial = aggregator.snapshot();
        let aggregator = Arc::new(RwLock::new(aggregator));

        let runners: Vec<SessionRunner> = (0..config.num_sessions)
            .map(SessionId)
            .map(|id| {
                SessionRunner::new(
                    id,
                    &config.pattern,
                    config.max_flips_per_session,
                    session_seed(seed, id),
                )
            })
            .collect();
        #[cfg(test)]
        let runners = self.inject_faults(runners);

        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(self.execution.report_channel_capacity.max(1));
        let pool = WorkerPool::spawn(runners, &self.execution, &tx, &cancel);
        #[cfg(test)]
        let pool = self.abort_if_requested(pool);
        drop(tx);

        let driver = tokio::spawn(
            RunDriver {
                run_id,
                lifecycle: Arc::clone(&self.lifecycle),
                aggregator: Arc::clone(&aggregator),
                publisher: self.publisher.clone(),
                publisher_config: self.publisher_config.clone(),
                reports: rx,
                pool,
                cancel: cancel.clone(),
            }
            .run(),
        );

        lifecycle.run = Some(RunContext {
            id: run_id,
            settings,
            seed,
            started_at: Utc::now(),
            finished_at: None,
            aggregator,
            cancel,
            driver: Some(driver),
        });
        lifecycle.set_state(RunState::Running);
        self.publisher.statistics(initial);

        info!(
            %run_id,
            pattern_type = config.pattern.id(),
            num_sessions = config.num_sessions,
            max_flips_per_session = config.max_flips_per_session,
            seed,
            "Simulation started"
        );
        Ok(Self::status_of(&lifecycle).await)
    }

    /// Stop the running run. Statistics are frozen once this returns and
    /// no further `simulation_update` is published for the run.
    pub async fn stop(&self) -> Result<RunStatus, SimulationError> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.state != RunState::Running {
            return Err(SimulationError::NotRunning {
                state: lifecycle.state,
            });
        }
        let Some(run) = lifecycle.run.as_ref() else {
            return Err(SimulationError::NotRunning {
                state: lifecycle.state,
            });
        };

        run.cancel.cancel();
        // Waits out any fold already in progress; later folds see the
        // cancelled token and drop their reports.
        let stats = {
            let mut aggregator = run.aggregator.write().await;
            aggregator.set_running(false);
            aggregator.snapshot()
        };
        let run_id = run.id;

        lifecycle.finish(RunState::Stopped);
        self.publisher.statistics(stats.clone());
        info!(
            %run_id,
            completed = stats.completed_sessions,
            total = stats.total_sessions,
            "Simulation stopped"
        );
        Ok(Self::status_of(&lifecycle).await)
    }

    /// Discard the current run and return to `idle`. Rejected while
    /// running.
    pub async fn reset(&self) -> Result<RunStatus, SimulationError> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.state == RunState::Running {
            return Err(SimulationError::ResetWhileRunning);
        }
        if let Some(run) = lifecycle.run.take() {
            run.cancel.cancel();
            if let Some(driver) = run.driver {
                driver.abort();
            }
        }
        lifecycle.set_state(RunState::Idle);
        self.publisher.statistics(self.idle_statistics(&lifecycle.defaults));
        info!("Simulation reset");
        Ok(Self::status_of(&lifecycle).await)
    }

    /// Validate a request and store it as the defaults for the next start.
    /// Allowed in any state; a run in progress is unaffected.
    pub async fn configure(&self, request: &RunRequest) -> Result<RunSettings, SimulationError> {
        let mut lifecycle = self.lifecycle.lock().await;
        let config = RunConfig::resolve(request, &lifecycle.defaults, &self.catalog, &self.limits)
            .inspect_err(|e| warn!(error = %e, "Configure rejected"))?;
        lifecycle.defaults = RunDefaults {
            pattern_type: config.pattern.id().to_owned(),
            num_sessions: config.num_sessions,
            max_flips_per_session: config.max_flips_per_session,
        };
        let settings = config.settings();
        info!(
            pattern_type = %settings.pattern_type,
            num_sessions = settings.num_sessions,
            max_flips_per_session = settings.max_flips_per_session,
            "Simulation configured"
        );
        Ok(settings)
    }

    /// Current lifecycle status.
    pub async fn status(&self) -> RunStatus {
        let lifecycle = self.lifecycle.lock().await;
        Self::status_of(&lifecycle).await
    }

    /// Aggregate statistics of the current run, or a zeroed snapshot for
    /// the default pattern when idle.
    pub async fn statistics(&self) -> AggregateStatistics {
        let aggregator = {
            let lifecycle = self.lifecycle.lock().await;
            match lifecycle.run.as_ref() {
                Some(run) => Arc::clone(&run.aggregator),
                None => return self.idle_statistics(&lifecycle.defaults),
            }
        };
        aggregator.read().await.snapshot()
    }

    /// Sessions of the current run selected by `filter`, in id order.
    /// `limit` caps the number returned.
    pub async fn sessions(
        &self,
        filter: SessionFilter,
        limit: Option<usize>,
    ) -> Vec<SessionStatus> {
        let Some(aggregator) = self.current_aggregator().await else {
            return Vec::new();
        };
        let aggregator = aggregator.read().await;
        aggregator
            .sessions()
            .iter()
            .filter(|status| filter.matches(status))
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    /// One session of the current run.
    pub async fn session(&self, id: SessionId) -> Option<SessionStatus> {
        let aggregator = self.current_aggregator().await?;
        let aggregator = aggregator.read().await;
        aggregator.session(id).cloned()
    }

    /// Pattern identifier to description mapping.
    pub fn patterns(&self) -> BTreeMap<String, String> {
        self.catalog.descriptions()
    }

    /// Subscribe to published events.
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.publisher.subscribe()
    }

    /// Number of connected subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.publisher.subscriber_count()
    }

    /// Current lifecycle state without taking the lifecycle lock.
    pub fn state(&self) -> RunState {
        *self.state_rx.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn watch_state(&self) -> watch::Receiver<RunState> {
        self.state_rx.clone()
    }

    /// Stop any running run and wait for its driver to exit.
    pub async fn shutdown(&self) {
        match self.stop().await {
            Ok(_) => info!("Running simulation stopped for shutdown"),
            Err(SimulationError::NotRunning { .. }) => {}
            Err(e) => warn!(error = %e, "Shutdown stop failed"),
        }
        let driver = {
            let mut lifecycle = self.lifecycle.lock().await;
            lifecycle.run.as_mut().and_then(|run| {
                run.cancel.cancel();
                run.driver.take()
            })
        };
        // The driver locks the lifecycle before publishing, so wait for it
        // with the lock released.
        if let Some(driver) = driver {
            match driver.await {
                Err(e) if !e.is_cancelled() => {
                    warn!(error = %e, "Run driver ended abnormally");
                }
                _ => {}
            }
        }
    }

    async fn current_aggregator(&self) -> Option<Arc<RwLock<Aggregator>>> {
        let lifecycle = self.lifecycle.lock().await;
        lifecycle.run.as_ref().map(|run| Arc::clone(&run.aggregator))
    }

    fn idle_statistics(&self, defaults: &RunDefaults) -> AggregateStatistics {
        self.catalog
            .get(&defaults.pattern_type)
            .map(|pattern| Aggregator::new(0, pattern).snapshot())
            .unwrap_or_default()
    }

    async fn status_of(lifecycle: &Lifecycle) -> RunStatus {
        let run = lifecycle.run.as_ref();
        let active_sessions = match run {
            Some(run) => run.aggregator.read().await.active_sessions(),
            None => 0,
        };
        RunStatus {
            state: lifecycle.state,
            run_id: run.map(|r| r.id),
            settings: run.map(|r| r.settings.clone()),
            seed: run.map(|r| r.seed),
            started_at: run.map(|r| r.started_at),
            finished_at: run.and_then(|r| r.finished_at),
            defaults: lifecycle.defaults.settings(),
            active_sessions,
        }
    }
}

impl Drop for Simulator {
    fn drop(&mut self) {
        let Ok(lifecycle) = self.lifecycle.try_lock() else {
            return;
        };
        if let Some(run) = lifecycle.run.as_ref() {
            run.cancel.cancel();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use coinflip_types::StopReason;

    use super::*;

    fn request(pattern: &str, sessions: i64, flips: i64) -> RunRequest {
        RunRequest {
            pattern_type: Some(pattern.to_owned()),
            num_sessions: Some(sessions),
            max_flips_per_session: Some(flips),
        }
    }

    #[tokio::test]
    async fn unknown_pattern_is_rejected_and_state_unchanged() {
        let sim = Simulator::new(&EngineConfig::default());
        let err = sim.start(&request("5_consecutive_tails", 10, 10)).await.unwrap_err();
        assert_eq!(err, SimulationError::UnknownPattern("5_consecutive_tails".into()));
        assert!(err.is_configuration());
        assert_eq!(sim.state(), RunState::Idle);
    }

    #[tokio::test]
    async fn stop_when_idle_is_rejected() {
        let sim = Simulator::new(&EngineConfig::default());
        assert_eq!(
            sim.stop().await.unwrap_err(),
            SimulationError::NotRunning {
                state: RunState::Idle
            }
        );
    }

    #[tokio::test]
    async fn configure_changes_defaults_for_next_start() {
        let sim = Simulator::new(&EngineConfig::default());
        let settings = sim
            .configure(&request("3_alternating", 5, 20))
            .await
            .unwrap();
        assert_eq!(settings.pattern_type, "3_alternating");

        let status = sim.status().await;
        assert_eq!(status.defaults.num_sessions, 5);

        let stats = sim.statistics().await;
        assert_eq!(stats.pattern_description, "3 alternating flips");
        assert!((stats.theoretical_ev - 7.0).abs() < 1e-9);
        assert_eq!(stats.total_sessions, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn session_faults_stay_isolated() {
        let mut config = EngineConfig::default();
        config.engine.seed = Some(11);
        config.engine.worker_count = 4;
        config.engine.flips_per_slice = 1;
        let faulty = [SessionId(3), SessionId(7), SessionId(250)];
        let sim = Simulator::new(&config).with_faulty_sessions(faulty);

        sim.start(&request("2_consecutive_tails", 400, 10_000)).await.unwrap();
        let mut watch = sim.watch_state();
        tokio::time::timeout(
            Duration::from_secs(30),
            watch.wait_for(|s| *s == RunState::Completed),
        )
        .await
        .unwrap()
        .unwrap();

        let stats = sim.statistics().await;
        assert_eq!(stats.total_sessions, 400);
        assert_eq!(stats.completed_sessions, 400);
        assert_eq!(stats.failed_sessions, 3);
        assert_eq!(stats.pattern_found_sessions, 397);

        let failed = sim.sessions(SessionFilter::Failed, None).await;
        let ids: Vec<SessionId> = failed.iter().map(|s| s.session_id).collect();
        assert_eq!(ids, faulty);
        for session in &failed {
            assert!(session.completed);
            assert!(!session.pattern_found);
            assert_eq!(session.stop_reason, Some(StopReason::Fault));
            assert_eq!(session.flips_count, 1);
            assert!(session.error.as_deref().unwrap().contains("panicked"));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn aborted_workers_fault_their_unsettled_sessions() {
        let mut config = EngineConfig::default();
        config.engine.seed = Some(5);
        config.engine.worker_count = 3;
        config.engine.flips_per_slice = 1;
        config.engine.round_interval_ms = 1_000;
        let sim = Simulator::new(&config).with_aborted_workers();

        // Four heads cannot complete within a single one-flip slice, so
        // every session is still unsettled when its worker goes away.
        sim.start(&request("4_consecutive_heads", 30, 10_000)).await.unwrap();
        let mut watch = sim.watch_state();
        tokio::time::timeout(
            Duration::from_secs(30),
            watch.wait_for(|s| *s == RunState::Completed),
        )
        .await
        .unwrap()
        .unwrap();

        let stats = sim.statistics().await;
        assert_eq!(stats.completed_sessions, 30);
        assert_eq!(stats.failed_sessions, 30);
        assert_eq!(stats.pattern_found_sessions, 0);

        for session in sim.sessions(SessionFilter::All, None).await {
            assert_eq!(session.stop_reason, Some(StopReason::Fault));
            // Settled either by the worker-exit path or, if the report
            // channel closes first, by the orphan sweep.
            let error = session.error.unwrap();
            assert!(error == "worker aborted" || error.contains("before settling"));
            assert!(session.flips_count <= 1);
        }
    }

    #[tokio::test]
    async fn idle_status_has_no_run() {
        let sim = Simulator::new(&EngineConfig::default());
        let status = sim.status().await;
        assert_eq!(status.state, RunState::Idle);
        assert!(status.run_id.is_none());
        assert!(status.settings.is_none());
        assert!(sim.sessions(SessionFilter::All, None).await.is_empty());
        assert!(sim.session(SessionId(0)).await.is_none());
        assert_eq!(sim.patterns().len(), 10);
    }
}
