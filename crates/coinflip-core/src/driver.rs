//! The per-run driver task.
//!
//! The driver is the single consumer of worker reports. It folds them into
//! the run's [`Aggregator`], coalesces session deltas, and publishes on two
//! fixed cadences:
//!
//! - **`simulation_update`** every `update_interval_ms`, at most
//!   `max_batch_size` deltas per message
//! - **`statistics_update`** every `statistics_interval_ms`
//!
//! When every session is terminal it flushes the remaining deltas, moves
//! the lifecycle to `completed` and emits `simulation_completed` once.
//! Every publish happens under the lifecycle lock after checking that the
//! run is still the current running one, so nothing leaks out after a
//! stop or reset.

use std::sync::Arc;

use coinflip_types::{RunId, RunState, SimulationUpdate};
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::aggregator::Aggregator;
use crate::config::PublisherConfig;
use crate::coordinator::Lifecycle;
use crate::pool::{WorkerExit, WorkerPool};
use crate::publisher::{Cadence, DeltaBuffer, Publisher};
use crate::session::SessionReport;

/// Most reports folded under one aggregator lock acquisition.
const RECEIVE_BATCH: usize = 512;

/// Owns the receiving side of one run.
pub(crate) struct RunDriver {
    pub(crate) run_id: RunId,
    pub(crate) lifecycle: Arc<Mutex<Lifecycle>>,
    pub(crate) aggregator: Arc<RwLock<Aggregator>>,
    pub(crate) publisher: Publisher,
    pub(crate) publisher_config: PublisherConfig,
    pub(crate) reports: mpsc::Receiver<SessionReport>,
    pub(crate) pool: WorkerPool,
    pub(crate) cancel: CancellationToken,
}

impl RunDriver {
    /// Drive the run until it completes or is cancelled.
    pub(crate) async fn run(mut self) {
        let mut cadence = Cadence::new(&self.publisher_config);
        let mut deltas = DeltaBuffer::new(self.publisher_config.max_batch_size);
        let mut received = Vec::with_capacity(RECEIVE_BATCH);

        debug!(run_id = %self.run_id, "Run driver started");

        loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => {
                    debug!(run_id = %self.run_id, "Run driver cancelled");
                    break;
                }
                _ = cadence.updates.tick() => {
                    if !self.flush_updates(&mut deltas).await {
                        break;
                    }
                }
                _ = cadence.statistics.tick() => {
                    if !self.publish_statistics().await {
                        break;
                    }
                }
                Some(exit) = self.pool.join_next() => {
                    self.worker_exited(exit, &mut received, &mut deltas).await;
                }
                count = self.reports.recv_many(&mut received, RECEIVE_BATCH) => {
                    if count == 0 {
                        self.settle_orphans(&mut deltas).await;
                    } else {
                        self.fold(&mut received, &mut deltas).await;
                    }
                }
            }

            if self.aggregator.read().await.is_settled() {
                self.complete(&mut deltas).await;
                break;
            }
        }

        self.pool.shutdown().await;
        debug!(run_id = %self.run_id, "Run driver exited");
    }

    /// Apply a batch of reports. Reports arriving after cancellation are
    /// discarded so the frozen statistics stay frozen.
    async fn fold(&self, received: &mut Vec<SessionReport>, deltas: &mut DeltaBuffer) {
        let mut aggregator = self.aggregator.write().await;
        if self.cancel.is_cancelled() {
            received.clear();
            return;
        }
        for report in received.drain(..) {
            if let Some(delta) = aggregator.apply(&report) {
                deltas.record(delta);
            }
        }
    }

    /// A worker died. Fold whatever it managed to send, then fault the
    /// sessions of its shard that never settled.
    async fn worker_exited(
        &mut self,
        exit: WorkerExit,
        received: &mut Vec<SessionReport>,
        deltas: &mut DeltaBuffer,
    ) {
        let WorkerExit::Failed { sessions, reason } = exit else {
            return;
        };

        let pending = self.reports.len();
        for _ in 0..pending {
            match self.reports.try_recv() {
                Ok(report) => received.push(report),
                Err(_) => break,
            }
        }
        self.fold(received, deltas).await;

        let mut aggregator = self.aggregator.write().await;
        if self.cancel.is_cancelled() {
            return;
        }
        for delta in aggregator.fail_unsettled(sessions, &reason) {
            deltas.record(delta);
        }
    }

    /// The report channel closed. Any session still unsettled has lost its
    /// worker.
    async fn settle_orphans(&self, deltas: &mut DeltaBuffer) {
        let mut aggregator = self.aggregator.write().await;
        if self.cancel.is_cancelled() {
            return;
        }
        let orphans = aggregator.unsettled();
        if orphans.is_empty() {
            return;
        }
        error!(
            run_id = %self.run_id,
            count = orphans.len(),
            "Workers exited with unsettled sessions"
        );
        for delta in aggregator.fail_unsettled(orphans, "worker exited before settling session") {
            deltas.record(delta);
        }
    }

    /// Publish the next delta batch. Returns `false` when the run is no
    /// longer the current running one.
    async fn flush_updates(&self, deltas: &mut DeltaBuffer) -> bool {
        if deltas.is_empty() {
            return true;
        }
        let lifecycle = self.lifecycle.lock().await;
        if !lifecycle.is_running(self.run_id) {
            return false;
        }
        let active_sessions = self.aggregator.read().await.active_sessions();
        self.publisher.update(SimulationUpdate {
            run_id: self.run_id,
            status: RunState::Running,
            active_sessions,
            updates: deltas.take_batch(),
        });
        true
    }

    /// Publish a statistics snapshot. Returns `false` when the run is no
    /// longer the current running one.
    async fn publish_statistics(&self) -> bool {
        let lifecycle = self.lifecycle.lock().await;
        if !lifecycle.is_running(self.run_id) {
            return false;
        }
        let stats = self.aggregator.read().await.snapshot();
        self.publisher.statistics(stats);
        true
    }

    /// Every session is terminal: flush, transition, announce.
    async fn complete(&self, deltas: &mut DeltaBuffer) {
        let mut lifecycle = self.lifecycle.lock().await;
        if !lifecycle.is_running(self.run_id) {
            return;
        }

        let stats = {
            let mut aggregator = self.aggregator.write().await;
            let active_sessions = aggregator.active_sessions();
            while !deltas.is_empty() {
                self.publisher.update(SimulationUpdate {
                    run_id: self.run_id,
                    status: RunState::Running,
                    active_sessions,
                    updates: deltas.take_batch(),
                });
            }
            aggregator.set_running(false);
            aggregator.snapshot()
        };

        lifecycle.finish(RunState::Completed);
        info!(
            run_id = %self.run_id,
            total_sessions = stats.total_sessions,
            pattern_found = stats.pattern_found_sessions,
            failed = stats.failed_sessions,
            actual_ev = stats.actual_ev,
            theoretical_ev = stats.theoretical_ev,
            "Simulation completed"
        );
        self.publisher.completed(stats);
    }
}
