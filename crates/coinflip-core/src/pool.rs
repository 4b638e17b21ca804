//! Worker tasks that step sessions and report to the run driver.
//!
//! Sessions are dealt round-robin into one shard per worker. Each worker
//! owns its runners outright, so no session state is shared between tasks;
//! the only channel out is the bounded report queue. Workers interleave
//! their sessions in slices of `flips_per_slice` flips and give the
//! scheduler a turn after every round.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use coinflip_types::SessionId;
use tokio::sync::mpsc;
use tokio::task::{self, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::config::ExecutionConfig;
use crate::session::{Advance, SessionFault, SessionReport, SessionRunner};

/// How a worker task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    /// The task returned normally (all sessions settled, cancelled, or the
    /// driver went away).
    Finished,
    /// The task was aborted (or panicked outside a session step); its
    /// shard may hold unsettled sessions.
    Failed {
        /// Every session the worker owned.
        sessions: Vec<SessionId>,
        /// Panic or abort description.
        reason: String,
    },
}

/// Slice parameters shared by every worker of a run.
#[derive(Debug, Clone, Copy)]
struct SlicePlan {
    flips_per_slice: u32,
    round_interval: Duration,
}

/// The worker tasks of one run.
#[derive(Debug)]
pub struct WorkerPool {
    tasks: JoinSet<()>,
    shards: HashMap<task::Id, Vec<SessionId>>,
}

impl WorkerPool {
    /// Shard `runners` across workers and spawn them.
    pub fn spawn(
        runners: Vec<SessionRunner>,
        execution: &ExecutionConfig,
        reports: &mpsc::Sender<SessionReport>,
        cancel: &CancellationToken,
    ) -> Self {
        let sessions = u32::try_from(runners.len()).unwrap_or(u32::MAX);
        let workers = execution.effective_workers(sessions);
        let plan = SlicePlan {
            flips_per_slice: execution.flips_per_slice.max(1),
            round_interval: execution.round_interval(),
        };

        let mut shards: Vec<Vec<SessionRunner>> = (0..workers).map(|_| Vec::new()).collect();
        for (index, runner) in runners.into_iter().enumerate() {
            if let Some(shard) = shards.get_mut(index.checked_rem(workers).unwrap_or(0)) {
                shard.push(runner);
            }
        }

        let mut tasks = JoinSet::new();
        let mut ids = HashMap::with_capacity(workers);
        for (worker, shard) in shards.into_iter().enumerate() {
            if shard.is_empty() {
                continue;
            }
            let owned = shard.iter().map(SessionRunner::id).collect();
            let handle = tasks.spawn(run_worker(
                worker,
                shard,
                plan,
                reports.clone(),
                cancel.clone(),
            ));
            ids.insert(handle.id(), owned);
        }

        debug!(workers = tasks.len(), sessions, "Worker pool started");
        Self { tasks, shards: ids }
    }

    /// Wait for the next worker to exit. `None` once every worker is gone.
    pub async fn join_next(&mut self) -> Option<WorkerExit> {
        let joined = self.tasks.join_next_with_id().await?;
        Some(match joined {
            Ok((id, ())) => {
                self.shards.remove(&id);
                WorkerExit::Finished
            }
            Err(err) => {
                let sessions = self.shards.remove(&err.id()).unwrap_or_default();
                let reason = if err.is_panic() {
                    "worker panicked".to_owned()
                } else {
                    "worker aborted".to_owned()
                };
                error!(error = %err, sessions = sessions.len(), "Worker exited abnormally");
                WorkerExit::Failed { sessions, reason }
            }
        })
    }

    /// Number of workers still running.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether every worker has exited.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn abort_all(&mut self) {
        self.tasks.abort_all();
    }

    /// Abort every remaining worker and wait for them to go away.
    pub async fn shutdown(&mut self) {
        self.tasks.shutdown().await;
        self.shards.clear();
    }
}

async fn run_worker(
    worker: usize,
    mut sessions: Vec<SessionRunner>,
    plan: SlicePlan,
    reports: mpsc::Sender<SessionReport>,
    cancel: CancellationToken,
) {
    debug!(worker, sessions = sessions.len(), "Worker starting");

    while !sessions.is_empty() {
        let mut index = 0;
        while index < sessions.len() {
            if cancel.is_cancelled() {
                debug!(worker, "Worker cancelled");
                return;
            }
            let Some(runner) = sessions.get_mut(index) else {
                break;
            };

            let report = match step(runner, plan.flips_per_slice) {
                Ok(advance) => SessionReport::from(advance),
                Err(fault) => {
                    warn!(worker, session_id = %runner.id(), error = %fault, "Session fault");
                    SessionReport::Terminal(runner.fault(&fault))
                }
            };
            let settled = report.is_terminal();

            tokio::select! {
                sent = reports.send(report) => {
                    if sent.is_err() {
                        debug!(worker, "Report channel closed, worker exiting");
                        return;
                    }
                }
                () = cancel.cancelled() => {
                    debug!(worker, "Worker cancelled");
                    return;
                }
            }

            if settled {
                sessions.swap_remove(index);
            } else {
                index = index.saturating_add(1);
            }
        }

        if sessions.is_empty() {
            break;
        }
        if plan.round_interval.is_zero() {
            task::yield_now().await;
        } else {
            tokio::select! {
                () = tokio::time::sleep(plan.round_interval) => {}
                () = cancel.cancelled() => {
                    debug!(worker, "Worker cancelled");
                    return;
                }
            }
        }
    }

    debug!(worker, "Worker finished");
}

/// Advance one session, turning a panic into a fault of that session only.
fn step(runner: &mut SessionRunner, budget: u32) -> Result<Advance, SessionFault> {
    panic::catch_unwind(AssertUnwindSafe(|| runner.advance(budget)))
        .unwrap_or_else(|payload| Err(SessionFault::Panicked(panic_message(&*payload))))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_owned())
}
