//! Folds session reports into per-session state and aggregate counters.
//!
//! The aggregator is the only writer of session state for a run. It keeps
//! integer sums so that the derived ratios do not depend on the order in
//! which reports arrive, and it enforces that each session is settled at
//! most once.

use coinflip_types::{AggregateStatistics, SessionDelta, SessionId, SessionStatus, StopReason};
use tracing::{debug, warn};

use crate::pattern::PatternSpec;
use crate::session::{SessionOutcome, SessionReport};

/// Per-run session table plus aggregate counters.
#[derive(Debug, Clone)]
pub struct Aggregator {
    pattern_description: String,
    theoretical_ev: f64,
    sessions: Vec<SessionStatus>,
    completed: u64,
    pattern_found: u64,
    failed: u64,
    flips_completed: u64,
    flips_found: u64,
    running: bool,
}

impl Aggregator {
    /// A table of `num_sessions` pending sessions for `pattern`.
    pub fn new(num_sessions: u32, pattern: &PatternSpec) -> Self {
        Self {
            pattern_description: pattern.description().to_owned(),
            theoretical_ev: pattern.theoretical_ev(),
            sessions: (0..num_sessions)
                .map(|id| SessionStatus::pending(SessionId(id)))
                .collect(),
            completed: 0,
            pattern_found: 0,
            failed: 0,
            flips_completed: 0,
            flips_found: 0,
            running: false,
        }
    }

    /// Set the `is_running` flag reported in snapshots.
    pub const fn set_running(&mut self, running: bool) {
        self.running = running;
    }

    /// Apply one report. Returns the session's new delta when its state
    /// changed, `None` when the report was ignored.
    pub fn apply(&mut self, report: &SessionReport) -> Option<SessionDelta> {
        match report {
            SessionReport::Progress(delta) => self.progress(delta),
            SessionReport::Terminal(outcome) => self.settle(outcome),
        }
    }

    /// Apply one report and return the resulting snapshot.
    pub fn fold(&mut self, report: &SessionReport) -> AggregateStatistics {
        self.apply(report);
        self.snapshot()
    }

    /// Settle every listed session that is not terminal yet as a fault.
    pub fn fail_unsettled(
        &mut self,
        ids: impl IntoIterator<Item = SessionId>,
        reason: &str,
    ) -> Vec<SessionDelta> {
        ids.into_iter()
            .filter_map(|id| {
                let flips = self
                    .sessions
                    .get(id.index())
                    .filter(|status| !status.completed)?
                    .flips_count;
                self.settle(&SessionOutcome::fault(id, flips, reason))
            })
            .collect()
    }

    /// Sessions that have not reached a terminal state.
    pub fn unsettled(&self) -> Vec<SessionId> {
        self.sessions
            .iter()
            .filter(|status| !status.completed)
            .map(|status| status.session_id)
            .collect()
    }

    /// Whether every session is terminal.
    pub fn is_settled(&self) -> bool {
        self.completed == self.total()
    }

    /// Number of sessions in the run.
    pub fn total(&self) -> u64 {
        u64::try_from(self.sessions.len()).unwrap_or(u64::MAX)
    }

    /// Number of sessions still flipping.
    pub fn active_sessions(&self) -> u64 {
        self.total().saturating_sub(self.completed)
    }

    /// State of one session.
    pub fn session(&self, id: SessionId) -> Option<&SessionStatus> {
        self.sessions.get(id.index())
    }

    /// Every session in id order.
    pub fn sessions(&self) -> &[SessionStatus] {
        &self.sessions
    }

    /// A self-consistent read of the aggregate counters.
    pub fn snapshot(&self) -> AggregateStatistics {
        let total = self.total();
        let average_found = ratio(self.flips_found, self.pattern_found);
        AggregateStatistics {
            total_sessions: total,
            completed_sessions: self.completed,
            pattern_found_sessions: self.pattern_found,
            failed_sessions: self.failed,
            completion_rate: ratio(self.completed, total),
            pattern_success_rate: ratio(self.pattern_found, self.completed),
            average_flips_all: ratio(self.flips_completed, self.completed),
            average_flips_pattern_found: average_found,
            theoretical_ev: self.theoretical_ev,
            actual_ev: average_found,
            pattern_description: self.pattern_description.clone(),
            is_running: self.running,
        }
    }

    fn progress(&mut self, delta: &SessionDelta) -> Option<SessionDelta> {
        let Some(status) = self.sessions.get_mut(delta.session_id.index()) else {
            warn!(session_id = %delta.session_id, "Progress for unknown session");
            return None;
        };
        if status.completed {
            debug!(session_id = %delta.session_id, "Progress after terminal report ignored");
            return None;
        }
        if delta.flips_count <= status.flips_count {
            return None;
        }
        status.flips_count = delta.flips_count;
        Some(status.delta())
    }

    fn settle(&mut self, outcome: &SessionOutcome) -> Option<SessionDelta> {
        let Some(status) = self.sessions.get_mut(outcome.session_id.index()) else {
            warn!(session_id = %outcome.session_id, "Terminal report for unknown session");
            return None;
        };
        if status.completed {
            warn!(session_id = %outcome.session_id, "Duplicate terminal report ignored");
            return None;
        }

        let found = outcome.pattern_found();
        status.flips_count = outcome.flips_count.max(status.flips_count);
        status.completed = true;
        status.pattern_found = found;
        status.pattern_position = outcome.pattern_position;
        status.stop_reason = Some(outcome.reason);
        status.error.clone_from(&outcome.error);
        let delta = status.delta();

        self.completed = self.completed.saturating_add(1);
        self.flips_completed = self.flips_completed.saturating_add(delta.flips_count);
        if found {
            self.pattern_found = self.pattern_found.saturating_add(1);
            self.flips_found = self.flips_found.saturating_add(delta.flips_count);
        }
        if outcome.reason == StopReason::Fault {
            self.failed = self.failed.saturating_add(1);
            warn!(
                session_id = %outcome.session_id,
                error = outcome.error.as_deref().unwrap_or("unknown"),
                "Session faulted"
            );
        }
        Some(delta)
    }
}

/// Selects sessions by lifecycle outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionFilter {
    /// Every session.
    #[default]
    All,
    /// Sessions still flipping.
    Active,
    /// Sessions in a terminal state.
    Completed,
    /// Sessions that found the pattern.
    Found,
    /// Sessions that ended with a fault.
    Failed,
}

impl SessionFilter {
    /// Whether `status` is selected.
    pub const fn matches(self, status: &SessionStatus) -> bool {
        match self {
            Self::All => true,
            Self::Active => !status.completed,
            Self::Completed => status.completed,
            Self::Found => status.pattern_found,
            Self::Failed => status.failed(),
        }
    }
}

impl std::str::FromStr for SessionFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(Self::All),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "found" => Ok(Self::Found),
            "failed" => Ok(Self::Failed),
            other => Err(format!(
                "unknown session status filter '{other}' (expected all, active, completed, found or failed)"
            )),
        }
    }
}

/// `numerator / denominator`, or `0.0` when the denominator is zero.
#[allow(clippy::cast_precision_loss)]
fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]
mod tests {
    use super::*;
    use crate::pattern::PatternCatalog;

    fn aggregator(sessions: u32) -> Aggregator {
        let catalog = PatternCatalog::builtin();
        Aggregator::new(sessions, catalog.get("2_consecutive_tails").unwrap())
    }

    fn found(id: u32, flips: u64) -> SessionReport {
        SessionReport::Terminal(SessionOutcome {
            session_id: SessionId(id),
            flips_count: flips,
            pattern_position: Some(flips - 1),
            reason: StopReason::PatternFound,
            error: None,
        })
    }

    fn exhausted(id: u32, flips: u64) -> SessionReport {
        SessionReport::Terminal(SessionOutcome {
            session_id: SessionId(id),
            flips_count: flips,
            pattern_position: None,
            reason: StopReason::MaxFlipsReached,
            error: None,
        })
    }

    fn progress(id: u32, flips: u64) -> SessionReport {
        SessionReport::Progress(SessionDelta {
            session_id: SessionId(id),
            flips_count: flips,
            completed: false,
            pattern_found: false,
        })
    }

    #[test]
    fn empty_run_has_zeroed_ratios() {
        let stats = aggregator(0).snapshot();
        assert_eq!(stats.total_sessions, 0);
        assert!(stats.completion_rate.abs() < f64::EPSILON);
        assert!(stats.actual_ev.abs() < f64::EPSILON);
        assert!(!stats.actual_ev.is_nan());
    }

    #[test]
    fn snapshot_after_mixed_outcomes() {
        let mut agg = aggregator(4);
        agg.apply(&found(0, 4));
        agg.apply(&found(1, 8));
        agg.apply(&exhausted(2, 10));
        let stats = agg.snapshot();

        assert_eq!(stats.total_sessions, 4);
        assert_eq!(stats.completed_sessions, 3);
        assert_eq!(stats.pattern_found_sessions, 2);
        assert!((stats.completion_rate - 0.75).abs() < 1e-9);
        assert!((stats.pattern_success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert!((stats.average_flips_all - 22.0 / 3.0).abs() < 1e-9);
        assert!((stats.average_flips_pattern_found - 6.0).abs() < 1e-9);
        assert!((stats.actual_ev - stats.average_flips_pattern_found).abs() < f64::EPSILON);
        assert!((stats.theoretical_ev - 6.0).abs() < 1e-9);
        assert_eq!(stats.pattern_description, "2 consecutive tails");
        assert_eq!(agg.active_sessions(), 1);
        assert!(!agg.is_settled());
    }

    #[test]
    fn terminal_report_is_applied_once() {
        let mut agg = aggregator(1);
        assert!(agg.apply(&found(0, 3)).is_some());
        assert!(agg.apply(&found(0, 5)).is_none());
        assert!(agg.apply(&progress(0, 9)).is_none());
        let stats = agg.snapshot();
        assert_eq!(stats.completed_sessions, 1);
        assert!((stats.average_flips_all - 3.0).abs() < 1e-9);
        assert!(agg.is_settled());
    }

    #[test]
    fn progress_never_regresses() {
        let mut agg = aggregator(1);
        assert!(agg.apply(&progress(0, 16)).is_some());
        assert!(agg.apply(&progress(0, 8)).is_none());
        assert_eq!(agg.session(SessionId(0)).unwrap().flips_count, 16);
    }

    #[test]
    fn unknown_sessions_are_ignored() {
        let mut agg = aggregator(2);
        assert!(agg.apply(&found(7, 3)).is_none());
        assert_eq!(agg.snapshot().completed_sessions, 0);
    }

    #[test]
    fn statistics_do_not_depend_on_arrival_order() {
        let reports = [found(0, 2), exhausted(1, 50), found(2, 9), found(3, 17)];
        let mut forward = aggregator(4);
        let mut backward = aggregator(4);
        for report in &reports {
            forward.apply(report);
        }
        for report in reports.iter().rev() {
            backward.apply(report);
        }
        assert_eq!(forward.snapshot(), backward.snapshot());
    }

    #[test]
    fn fail_unsettled_settles_only_pending_sessions() {
        let mut agg = aggregator(3);
        agg.apply(&found(0, 2));
        agg.apply(&progress(1, 32));
        let deltas = agg.fail_unsettled([SessionId(0), SessionId(1), SessionId(2)], "worker panicked");
        assert_eq!(deltas.len(), 2);
        assert!(agg.is_settled());

        let failed = agg.session(SessionId(1)).unwrap();
        assert!(failed.failed());
        assert_eq!(failed.flips_count, 32);
        assert_eq!(failed.error.as_deref(), Some("worker panicked"));

        let stats = agg.snapshot();
        assert_eq!(stats.failed_sessions, 2);
        assert_eq!(stats.pattern_found_sessions, 1);
    }

    #[test]
    fn session_filters() {
        let mut agg = aggregator(3);
        agg.apply(&found(0, 2));
        agg.fail_unsettled([SessionId(1)], "boom");
        let count = |filter: SessionFilter| {
            agg.sessions().iter().filter(|s| filter.matches(s)).count()
        };
        assert_eq!(count(SessionFilter::All), 3);
        assert_eq!(count(SessionFilter::Active), 1);
        assert_eq!(count(SessionFilter::Completed), 2);
        assert_eq!(count(SessionFilter::Found), 1);
        assert_eq!(count(SessionFilter::Failed), 1);
        assert_eq!("found".parse::<SessionFilter>(), Ok(SessionFilter::Found));
        assert!("bogus".parse::<SessionFilter>().is_err());
    }

    #[test]
    fn fold_reports_running_flag() {
        let mut agg = aggregator(2);
        agg.set_running(true);
        let stats = agg.fold(&found(1, 6));
        assert!(stats.is_running);
        assert_eq!(stats.completed_sessions, 1);
        assert_eq!(agg.unsettled(), vec![SessionId(0)]);
    }
}
