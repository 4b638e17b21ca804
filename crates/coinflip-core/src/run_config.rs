//! Resolution of client run requests into validated run parameters.

use coinflip_types::{RunRequest, RunSettings};

use crate::config::{RunDefaults, RunLimits};
use crate::coordinator::SimulationError;
use crate::pattern::{PatternCatalog, PatternSpec};

/// Validated parameters of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// Pattern every session looks for.
    pub pattern: PatternSpec,
    /// Number of independent sessions.
    pub num_sessions: u32,
    /// Flip ceiling per session.
    pub max_flips_per_session: u64,
}

impl RunConfig {
    /// Fill missing request fields from `defaults`, then validate against
    /// the catalog and `limits`.
    pub fn resolve(
        request: &RunRequest,
        defaults: &RunDefaults,
        catalog: &PatternCatalog,
        limits: &RunLimits,
    ) -> Result<Self, SimulationError> {
        let pattern_type = request
            .pattern_type
            .as_deref()
            .unwrap_or(&defaults.pattern_type);
        let pattern = catalog
            .get(pattern_type)
            .ok_or_else(|| SimulationError::UnknownPattern(pattern_type.to_owned()))?
            .clone();

        let num_sessions = match request.num_sessions {
            Some(value) => {
                let limit = u64::from(limits.max_sessions);
                let sessions = bounded("num_sessions", value, limit)?;
                u32::try_from(sessions)
                    .ok()
                    .ok_or(SimulationError::LimitExceeded {
                        field: "num_sessions",
                        value: sessions,
                        limit,
                    })?
            }
            None => defaults.num_sessions,
        };

        let max_flips_per_session = match request.max_flips_per_session {
            Some(value) => bounded("max_flips_per_session", value, limits.max_flips_per_session)?,
            None => defaults.max_flips_per_session,
        };

        Ok(Self {
            pattern,
            num_sessions,
            max_flips_per_session,
        })
    }

    /// The parameters in wire form.
    pub fn settings(&self) -> RunSettings {
        RunSettings {
            pattern_type: self.pattern.id().to_owned(),
            num_sessions: self.num_sessions,
            max_flips_per_session: self.max_flips_per_session,
        }
    }
}

fn bounded(field: &'static str, value: i64, limit: u64) -> Result<u64, SimulationError> {
    let positive = u64::try_from(value)
        .ok()
        .filter(|v| *v > 0)
        .ok_or(SimulationError::NonPositive { field, value })?;
    if positive > limit {
        return Err(SimulationError::LimitExceeded {
            field,
            value: positive,
            limit,
        });
    }
    Ok(positive)
}
