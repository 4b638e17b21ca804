//! Events pushed to subscribers over the `WebSocket` stream.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::structs::{AggregateStatistics, SimulationUpdate};

/// One message on the publish channel.
///
/// Serialized as `{"event": "<channel>", "data": <payload>}` where the
/// channel is `statistics_update`, `simulation_update` or
/// `simulation_completed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum PublishedEvent {
    /// Periodic full statistics snapshot.
    StatisticsUpdate(AggregateStatistics),
    /// Periodic batch of per-session deltas.
    SimulationUpdate(SimulationUpdate),
    /// Final snapshot, emitted once when every session is terminal.
    SimulationCompleted(AggregateStatistics),
}

impl PublishedEvent {
    /// The channel name carried in the `event` field.
    pub const fn channel(&self) -> &'static str {
        match self {
            Self::StatisticsUpdate(_) => "statistics_update",
            Self::SimulationUpdate(_) => "simulation_update",
            Self::SimulationCompleted(_) => "simulation_completed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_envelope_uses_channel_name() {
        let event = PublishedEvent::SimulationCompleted(AggregateStatistics::default());
        let json = serde_json::to_value(&event).unwrap_or_default();
        assert_eq!(json["event"], "simulation_completed");
        assert_eq!(json["data"]["total_sessions"], 0);
        assert_eq!(event.channel(), "simulation_completed");
    }
}
