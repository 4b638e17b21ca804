//! Pattern specifications, incremental matchers, and the pattern catalog.
//!
//! A [`PatternSpec`] pairs a catalog identifier and description with a
//! [`PatternRule`]. Each rule variant produces its own [`Matcher`] state:
//!
//! | Rule | Incremental state | Theoretical EV |
//! |------|-------------------|----------------|
//! | `Consecutive { n }` | run-length counter | `2^(n+1) - 2` |
//! | `Alternating { n }` | last outcome + alternation run | `2^n - 1` |
//! | `Sequence { s }` | prefix automaton (failure table) | `Σ 2^k` over self-overlaps |
//!
//! Matchers consume one outcome at a time and never look back at the
//! history, so a session costs O(1) per flip regardless of its length.

use std::collections::BTreeMap;

use coinflip_types::Outcome;

/// Longest supported fixed sequence.
pub const MAX_SEQUENCE_LEN: usize = 64;

/// Errors raised when building a pattern.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatternError {
    /// A pattern must contain at least one flip.
    #[error("pattern must contain at least one flip")]
    Empty,

    /// A fixed sequence is longer than [`MAX_SEQUENCE_LEN`].
    #[error("sequence of {len} flips exceeds the maximum of {max}")]
    TooLong {
        /// Requested length.
        len: usize,
        /// Supported maximum.
        max: usize,
    },
}

/// Result of feeding one outcome to a [`Matcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchResult {
    /// The pattern has not completed on this flip.
    NoMatch,
    /// The pattern completed; the value is the 0-based index of the flip
    /// that completed it.
    Matched(u64),
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// Completion rule over a binary outcome stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternRule {
    /// `length` consecutive flips equal to `target`.
    Consecutive {
        /// Run length required.
        length: u32,
        /// Face that must repeat.
        target: Outcome,
    },
    /// `length` flips in which every neighbour differs (HTH..., THT...).
    Alternating {
        /// Run length required.
        length: u32,
    },
    /// One exact fixed-length subsequence.
    Sequence {
        /// Flips to match, oldest first.
        outcomes: Vec<Outcome>,
    },
}

impl PatternRule {
    /// Number of flips the pattern spans.
    pub fn len(&self) -> usize {
        match self {
            Self::Consecutive { length, .. } | Self::Alternating { length } => {
                usize::try_from(*length).unwrap_or(usize::MAX)
            }
            Self::Sequence { outcomes } => outcomes.len(),
        }
    }

    /// Whether the pattern spans zero flips (never true for catalog rules).
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Closed-form expected number of flips until the pattern first
    /// completes with a fair coin.
    pub fn theoretical_ev(&self) -> f64 {
        match self {
            Self::Consecutive { length, .. } => pow2(length.saturating_add(1)) - 2.0,
            Self::Alternating { length } => pow2(*length) - 1.0,
            Self::Sequence { outcomes } => {
                // Conway's leading-number formula: every k where the
                // k-prefix equals the k-suffix contributes 2^k.
                let n = outcomes.len();
                (1..=n)
                    .filter(|&k| {
                        outcomes.get(..k) == outcomes.get(n.saturating_sub(k)..)
                    })
                    .map(|k| pow2(u32::try_from(k).unwrap_or(u32::MAX)))
                    .sum()
            }
        }
    }

    /// Check a window of exactly [`len`](Self::len) flips against the rule.
    pub fn matches_window(&self, window: &[Outcome]) -> bool {
        if window.len() != self.len() || window.is_empty() {
            return false;
        }
        match self {
            Self::Consecutive { target, .. } => window.iter().all(|o| o == target),
            Self::Alternating { .. } => window.windows(2).all(|pair| match pair {
                [a, b] => a != b,
                _ => false,
            }),
            Self::Sequence { outcomes } => window == outcomes.as_slice(),
        }
    }

    /// Fresh incremental matcher for this rule.
    pub fn matcher(&self) -> Matcher {
        match self {
            Self::Consecutive { length, target } => Matcher::Consecutive(RunMatcher {
                length: *length,
                target: *target,
                run: 0,
                seen: 0,
            }),
            Self::Alternating { length } => Matcher::Alternating(AlternatingMatcher {
                length: *length,
                last: None,
                run: 0,
                seen: 0,
            }),
            Self::Sequence { outcomes } => {
                Matcher::Sequence(SequenceMatcher::new(outcomes.clone()))
            }
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn pow2(exponent: u32) -> f64 {
    let exponent = i32::try_from(exponent).unwrap_or(i32::MAX);
    2.0_f64.powi(exponent)
}

// ---------------------------------------------------------------------------
// Matchers
// ---------------------------------------------------------------------------

/// Incremental matcher state, one variant per [`PatternRule`] variant.
#[derive(Debug, Clone)]
pub enum Matcher {
    /// Run-length counter for consecutive patterns.
    Consecutive(RunMatcher),
    /// Alternation tracker.
    Alternating(AlternatingMatcher),
    /// Prefix automaton for fixed sequences.
    Sequence(SequenceMatcher),
}

impl Matcher {
    /// Append one outcome and report whether the pattern just completed.
    pub fn observe(&mut self, outcome: Outcome) -> MatchResult {
        match self {
            Self::Consecutive(m) => m.observe(outcome),
            Self::Alternating(m) => m.observe(outcome),
            Self::Sequence(m) => m.observe(outcome),
        }
    }

    /// Number of outcomes observed so far.
    pub const fn observed(&self) -> u64 {
        match self {
            Self::Consecutive(m) => m.seen,
            Self::Alternating(m) => m.seen,
            Self::Sequence(m) => m.seen,
        }
    }
}

/// Counts the current run of the target face.
#[derive(Debug, Clone)]
pub struct RunMatcher {
    length: u32,
    target: Outcome,
    run: u32,
    seen: u64,
}

impl RunMatcher {
    fn observe(&mut self, outcome: Outcome) -> MatchResult {
        self.seen = self.seen.saturating_add(1);
        self.run = if outcome == self.target {
            self.run.saturating_add(1)
        } else {
            0
        };
        if self.length > 0 && self.run >= self.length {
            MatchResult::Matched(self.seen.saturating_sub(1))
        } else {
            MatchResult::NoMatch
        }
    }
}

/// Tracks the length of the alternating run ending at the latest flip.
#[derive(Debug, Clone)]
pub struct AlternatingMatcher {
    length: u32,
    last: Option<Outcome>,
    run: u32,
    seen: u64,
}

impl AlternatingMatcher {
    fn observe(&mut self, outcome: Outcome) -> MatchResult {
        self.seen = self.seen.saturating_add(1);
        self.run = match self.last {
            Some(previous) if previous != outcome => self.run.saturating_add(1),
            _ => 1,
        };
        self.last = Some(outcome);
        if self.length > 0 && self.run >= self.length {
            MatchResult::Matched(self.seen.saturating_sub(1))
        } else {
            MatchResult::NoMatch
        }
    }
}

/// Knuth-Morris-Pratt automaton over a fixed sequence.
///
/// `state` is the length of the longest prefix of the target that is a
/// suffix of the history observed so far.
#[derive(Debug, Clone)]
pub struct SequenceMatcher {
    target: Vec<Outcome>,
    failure: Vec<usize>,
    state: usize,
    seen: u64,
}

impl SequenceMatcher {
    fn new(target: Vec<Outcome>) -> Self {
        let failure = failure_table(&target);
        Self {
            target,
            failure,
            state: 0,
            seen: 0,
        }
    }

    fn observe(&mut self, outcome: Outcome) -> MatchResult {
        self.seen = self.seen.saturating_add(1);
        if self.target.is_empty() {
            return MatchResult::NoMatch;
        }

        let mut state = self.state;
        while state > 0 && self.target.get(state) != Some(&outcome) {
            state = self.fallback(state);
        }
        if self.target.get(state) == Some(&outcome) {
            state = state.saturating_add(1);
        }

        if state == self.target.len() {
            // Keep the longest proper border so overlapping occurrences
            // are still recognised.
            self.state = self.fallback(state);
            MatchResult::Matched(self.seen.saturating_sub(1))
        } else {
            self.state = state;
            MatchResult::NoMatch
        }
    }

    fn fallback(&self, state: usize) -> usize {
        self.failure
            .get(state.saturating_sub(1))
            .copied()
            .unwrap_or(0)
    }
}

/// `failure[i]` is the length of the longest proper prefix of
/// `pattern[..=i]` that is also its suffix.
fn failure_table(pattern: &[Outcome]) -> Vec<usize> {
    let mut failure = vec![0; pattern.len()];
    let mut k = 0_usize;
    for i in 1..pattern.len() {
        while k > 0 && pattern.get(i) != pattern.get(k) {
            k = failure.get(k.saturating_sub(1)).copied().unwrap_or(0);
        }
        if pattern.get(i) == pattern.get(k) {
            k = k.saturating_add(1);
        }
        if let Some(slot) = failure.get_mut(i) {
            *slot = k;
        }
    }
    failure
}

// ---------------------------------------------------------------------------
// Specifications
// ---------------------------------------------------------------------------

/// A named, immutable pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternSpec {
    id: String,
    description: String,
    rule: PatternRule,
}

impl PatternSpec {
    /// `length` consecutive flips of `target`, described as
    /// `"{length} consecutive {tails|heads}"`.
    pub fn consecutive(id: impl Into<String>, length: u32, target: Outcome) -> Self {
        let length = length.max(1);
        Self {
            id: id.into(),
            description: format!("{length} consecutive {}", target.plural()),
            rule: PatternRule::Consecutive { length, target },
        }
    }

    /// `length` alternating flips, described as `"{length} alternating flips"`.
    pub fn alternating(id: impl Into<String>, length: u32) -> Self {
        let length = length.max(1);
        Self {
            id: id.into(),
            description: format!("{length} alternating flips"),
            rule: PatternRule::Alternating { length },
        }
    }

    /// An exact sequence of flips.
    ///
    /// When `description` is empty it is derived from the outcomes
    /// (`"Heads-Tails-Heads"`).
    pub fn sequence(
        id: impl Into<String>,
        description: impl Into<String>,
        outcomes: &[Outcome],
    ) -> Result<Self, PatternError> {
        if outcomes.is_empty() {
            return Err(PatternError::Empty);
        }
        if outcomes.len() > MAX_SEQUENCE_LEN {
            return Err(PatternError::TooLong {
                len: outcomes.len(),
                max: MAX_SEQUENCE_LEN,
            });
        }
        let mut description = description.into();
        if description.is_empty() {
            description = outcomes
                .iter()
                .map(|o| o.title())
                .collect::<Vec<_>>()
                .join("-");
        }
        Ok(Self {
            id: id.into(),
            description,
            rule: PatternRule::Sequence {
                outcomes: outcomes.to_vec(),
            },
        })
    }

    /// Catalog identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Human-readable description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Completion rule.
    pub const fn rule(&self) -> &PatternRule {
        &self.rule
    }

    /// Expected flips until completion.
    pub fn theoretical_ev(&self) -> f64 {
        self.rule.theoretical_ev()
    }

    /// Fresh incremental matcher.
    pub fn matcher(&self) -> Matcher {
        self.rule.matcher()
    }

    /// Check that the pattern occupies the flips ending at `position`.
    pub fn verify(&self, history: &[Outcome], position: u64) -> bool {
        let Ok(end) = usize::try_from(position) else {
            return false;
        };
        let len = self.rule.len();
        let Some(start) = end.saturating_add(1).checked_sub(len) else {
            return false;
        };
        history
            .get(start..=end)
            .is_some_and(|window| self.rule.matches_window(window))
    }

    /// Scan a complete history for the first completion.
    ///
    /// Quadratic; meant for cross-checking the incremental matchers.
    pub fn find_first(&self, history: &[Outcome]) -> Option<u64> {
        let len = self.rule.len();
        if len == 0 {
            return None;
        }
        history
            .windows(len)
            .position(|window| self.rule.matches_window(window))
            .and_then(|start| u64::try_from(start.saturating_add(len).saturating_sub(1)).ok())
    }
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// The closed set of patterns a run may select.
#[derive(Debug, Clone)]
pub struct PatternCatalog {
    patterns: BTreeMap<String, PatternSpec>,
}

impl PatternCatalog {
    /// The built-in catalog served to the dashboard.
    pub fn builtin() -> Self {
        use Outcome::{Heads, Tails};

        let mut specs = vec![
            PatternSpec::consecutive("2_consecutive_tails", 2, Tails),
            PatternSpec::consecutive("2_consecutive_heads", 2, Heads),
            PatternSpec::consecutive("3_consecutive_tails", 3, Tails),
            PatternSpec::consecutive("3_consecutive_heads", 3, Heads),
            PatternSpec::consecutive("4_consecutive_tails", 4, Tails),
            PatternSpec::consecutive("4_consecutive_heads", 4, Heads),
            PatternSpec::alternating("3_alternating", 3),
            PatternSpec::alternating("4_alternating", 4),
        ];
        specs.extend(
            [
                ("heads_tails_heads", "Heads-Tails-Heads", [Heads, Tails, Heads]),
                ("tails_heads_tails", "Tails-Heads-Tails", [Tails, Heads, Tails]),
            ]
            .into_iter()
            .filter_map(|(id, description, outcomes)| {
                PatternSpec::sequence(id, description, &outcomes).ok()
            }),
        );
        Self::from_specs(specs)
    }

    /// Build a catalog from explicit specs. Later duplicates win.
    pub fn from_specs(specs: impl IntoIterator<Item = PatternSpec>) -> Self {
        Self {
            patterns: specs
                .into_iter()
                .map(|spec| (spec.id.clone(), spec))
                .collect(),
        }
    }

    /// Look up a pattern by identifier.
    pub fn get(&self, id: &str) -> Option<&PatternSpec> {
        self.patterns.get(id)
    }

    /// Identifier to description mapping.
    pub fn descriptions(&self) -> BTreeMap<String, String> {
        self.patterns
            .iter()
            .map(|(id, spec)| (id.clone(), spec.description.clone()))
            .collect()
    }

    /// Iterate over every pattern in identifier order.
    pub fn iter(&self) -> impl Iterator<Item = &PatternSpec> {
        self.patterns.values()
    }

    /// Number of patterns.
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

impl Default for PatternCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}
