//! A single simulated session: a private generator, a matcher and a flip
//! counter.
//!
//! A [`SessionRunner`] flips until its pattern completes or its flip
//! ceiling is reached. Workers drive it in slices through
//! [`SessionRunner::advance`] and forward the resulting
//! [`SessionReport`]s to the run driver.

use coinflip_types::{Outcome, SessionDelta, SessionId, StopReason};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::pattern::{MatchResult, Matcher, PatternSpec};

/// Internal failures that end a single session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionFault {
    /// The flip counter cannot be incremented further.
    #[error("flip counter overflowed after {flips} flips")]
    CounterOverflow {
        /// Flips performed before the overflow.
        flips: u64,
    },

    /// The session was stepped after it already reached a terminal state.
    #[error("session {0} stepped after it finished")]
    AlreadyFinished(SessionId),

    /// Stepping the session panicked; the payload message is kept.
    #[error("session panicked: {0}")]
    Panicked(String),
}

/// Terminal result of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    /// Session index within the run.
    pub session_id: SessionId,
    /// Flips performed in total.
    pub flips_count: u64,
    /// 0-based index of the completing flip, when the pattern was found.
    pub pattern_position: Option<u64>,
    /// Why the session stopped.
    pub reason: StopReason,
    /// Fault description when `reason` is [`StopReason::Fault`].
    pub error: Option<String>,
}

impl SessionOutcome {
    /// A session ended by an internal fault after `flips_count` flips.
    pub fn fault(session_id: SessionId, flips_count: u64, error: impl ToString) -> Self {
        Self {
            session_id,
            flips_count,
            pattern_position: None,
            reason: StopReason::Fault,
            error: Some(error.to_string()),
        }
    }

    /// Whether the session stopped because the pattern completed.
    pub fn pattern_found(&self) -> bool {
        self.reason == StopReason::PatternFound
    }
}

/// Message sent from a worker to the run driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionReport {
    /// Non-terminal progress after a slice.
    Progress(SessionDelta),
    /// Terminal outcome, sent exactly once per session.
    Terminal(SessionOutcome),
}

impl SessionReport {
    /// Session the report belongs to.
    pub const fn session_id(&self) -> SessionId {
        match self {
            Self::Progress(delta) => delta.session_id,
            Self::Terminal(outcome) => outcome.session_id,
        }
    }

    /// Whether this report ends its session.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal(_))
    }
}

/// Result of one flip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flip {
    /// The face that came up.
    pub outcome: Outcome,
    /// Set when this flip ended the session.
    pub terminal: Option<SessionOutcome>,
}

/// Result of advancing a session by a slice of flips.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    /// The slice was used up without reaching a terminal state.
    Progress(SessionDelta),
    /// The session reached a terminal state within the slice.
    Finished(SessionOutcome),
}

impl From<Advance> for SessionReport {
    fn from(advance: Advance) -> Self {
        match advance {
            Advance::Progress(delta) => Self::Progress(delta),
            Advance::Finished(outcome) => Self::Terminal(outcome),
        }
    }
}

/// Executes one session.
#[derive(Debug)]
pub struct SessionRunner {
    id: SessionId,
    matcher: Matcher,
    rng: StdRng,
    flips: u64,
    max_flips: u64,
    finished: bool,
    #[cfg(test)]
    panic_at: Option<u64>,
}

impl SessionRunner {
    /// A fresh session for `pattern`, capped at `max_flips` flips and
    /// driven by a generator seeded with `seed`.
    pub fn new(id: SessionId, pattern: &PatternSpec, max_flips: u64, seed: u64) -> Self {
        Self {
            id,
            matcher: pattern.matcher(),
            rng: StdRng::seed_from_u64(seed),
            flips: 0,
            max_flips: max_flips.max(1),
            finished: false,
            #[cfg(test)]
            panic_at: None,
        }
    }

    /// Make the flip after `flips` flips panic.
    #[cfg(test)]
    pub(crate) const fn panic_at(mut self, flips: u64) -> Self {
        self.panic_at = Some(flips);
        self
    }

    /// Session index within the run.
    pub const fn id(&self) -> SessionId {
        self.id
    }

    /// Flips performed so far.
    pub const fn flips(&self) -> u64 {
        self.flips
    }

    /// Whether the session has reached a terminal state.
    pub const fn is_finished(&self) -> bool {
        self.finished
    }

    /// Perform exactly one flip.
    pub fn flip(&mut self) -> Result<Flip, SessionFault> {
        if self.finished {
            return Err(SessionFault::AlreadyFinished(self.id));
        }
        #[cfg(test)]
        self.trip();
        let outcome = Outcome::from_bool(self.rng.random::<bool>());
        self.flips = self
            .flips
            .checked_add(1)
            .ok_or(SessionFault::CounterOverflow { flips: self.flips })?;

        let terminal = match self.matcher.observe(outcome) {
            MatchResult::Matched(position) => {
                Some(self.finish(StopReason::PatternFound, Some(position)))
            }
            MatchResult::NoMatch if self.flips >= self.max_flips => {
                Some(self.finish(StopReason::MaxFlipsReached, None))
            }
            MatchResult::NoMatch => None,
        };
        Ok(Flip { outcome, terminal })
    }

    /// Perform up to `budget` flips, stopping early on a terminal state.
    pub fn advance(&mut self, budget: u32) -> Result<Advance, SessionFault> {
        for _ in 0..budget.max(1) {
            if let Some(outcome) = self.flip()?.terminal {
                return Ok(Advance::Finished(outcome));
            }
        }
        Ok(Advance::Progress(self.delta()))
    }

    /// Current state as a delta.
    pub const fn delta(&self) -> SessionDelta {
        SessionDelta {
            session_id: self.id,
            flips_count: self.flips,
            completed: self.finished,
            pattern_found: false,
        }
    }

    /// Terminal outcome for a fault raised while stepping this session.
    pub fn fault(&mut self, fault: &SessionFault) -> SessionOutcome {
        self.finished = true;
        SessionOutcome::fault(self.id, self.flips, fault)
    }

    #[cfg(test)]
    #[allow(clippy::panic)]
    fn trip(&self) {
        if self.panic_at == Some(self.flips) {
            panic!("injected fault in session {}", self.id);
        }
    }

    fn finish(&mut self, reason: StopReason, pattern_position: Option<u64>) -> SessionOutcome {
        self.finished = true;
        SessionOutcome {
            session_id: self.id,
            flips_count: self.flips,
            pattern_position,
            reason,
            error: None,
        }
    }
}

/// Derive the seed of one session from the run seed.
///
/// Sessions get decorrelated streams even for adjacent ids, and the same
/// `(run_seed, id)` pair always yields the same flips.
pub fn session_seed(run_seed: u64, id: SessionId) -> u64 {
    let mut z = run_seed.wrapping_add(u64::from(id.get()).wrapping_mul(0x9E37_79B9_7F4A_7C15));
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::pattern::PatternCatalog;

    fn spec(id: &str) -> PatternSpec {
        PatternCatalog::builtin().get(id).unwrap().clone()
    }

    #[test]
    fn session_stops_at_first_match() {
        let pattern = spec("3_consecutive_heads");
        for seed in 0..50 {
            let mut runner = SessionRunner::new(SessionId(0), &pattern, 10_000, seed);
            let mut history = Vec::new();
            let outcome = loop {
                let flip = runner.flip().unwrap();
                history.push(flip.outcome);
                if let Some(outcome) = flip.terminal {
                    break outcome;
                }
            };
            assert_eq!(outcome.reason, StopReason::PatternFound);
            assert_eq!(outcome.flips_count, history.len() as u64);
            let position = outcome.pattern_position.unwrap();
            assert_eq!(position + 1, outcome.flips_count);
            assert!(pattern.verify(&history, position));
            assert_eq!(pattern.find_first(&history), Some(position));
        }
    }

    #[test]
    fn flip_ceiling_is_respected() {
        let pattern = spec("4_consecutive_tails");
        let mut runner = SessionRunner::new(SessionId(1), &pattern, 1, 7);
        match runner.advance(100).unwrap() {
            Advance::Finished(outcome) => {
                assert_eq!(outcome.flips_count, 1);
                assert_eq!(outcome.reason, StopReason::MaxFlipsReached);
                assert!(!outcome.pattern_found());
            }
            Advance::Progress(_) => panic!("session should have finished"),
        }
        assert_eq!(runner.flips(), 1);
    }

    #[test]
    fn stepping_a_finished_session_faults() {
        let pattern = spec("2_consecutive_tails");
        let mut runner = SessionRunner::new(SessionId(2), &pattern, 1, 3);
        runner.advance(1).unwrap();
        assert!(runner.is_finished());
        assert_eq!(
            runner.flip().unwrap_err(),
            SessionFault::AlreadyFinished(SessionId(2))
        );
    }

    #[test]
    fn advance_reports_progress_within_slice() {
        let pattern = spec("4_consecutive_heads");
        let mut runner = SessionRunner::new(SessionId(5), &pattern, 1_000_000, 11);
        let mut last = 0;
        loop {
            match runner.advance(2).unwrap() {
                Advance::Progress(delta) => {
                    assert_eq!(delta.flips_count, last + 2);
                    assert!(!delta.completed);
                    last = delta.flips_count;
                }
                Advance::Finished(outcome) => {
                    assert!(outcome.flips_count > last);
                    assert!(outcome.flips_count <= last + 2);
                    break;
                }
            }
        }
    }

    #[test]
    fn same_seed_replays_same_flips() {
        let pattern = spec("heads_tails_heads");
        let seed = session_seed(42, SessionId(9));
        let mut a = SessionRunner::new(SessionId(9), &pattern, 500, seed);
        let mut b = SessionRunner::new(SessionId(9), &pattern, 500, seed);
        assert_eq!(a.advance(500).unwrap(), b.advance(500).unwrap());
    }

    #[test]
    fn session_seeds_differ_per_session() {
        assert_ne!(session_seed(1, SessionId(0)), session_seed(1, SessionId(1)));
        assert_ne!(session_seed(1, SessionId(0)), session_seed(2, SessionId(0)));
        assert_eq!(session_seed(5, SessionId(3)), session_seed(5, SessionId(3)));
    }

    #[test]
    fn fault_outcome_carries_message() {
        let outcome = SessionOutcome::fault(
            SessionId(4),
            12,
            &SessionFault::CounterOverflow { flips: 12 },
        );
        assert_eq!(outcome.reason, StopReason::Fault);
        assert_eq!(outcome.flips_count, 12);
        assert!(outcome.error.unwrap().contains("overflowed"));
    }
}
