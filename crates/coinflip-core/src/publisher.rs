//! Fan-out of run events to subscribers, plus delta coalescing.
//!
//! Events go out on a [`tokio::sync::broadcast`] channel so every
//! subscriber sees the same ordered stream. A subscriber that falls behind
//! the channel capacity skips the oldest events and is told how many it
//! missed; publishing never blocks the simulation.

use std::collections::{HashMap, VecDeque};

use coinflip_types::{
    AggregateStatistics, PublishedEvent, SessionDelta, SessionId, SimulationUpdate,
};
use tokio::sync::broadcast;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::trace;

use crate::config::PublisherConfig;

/// Cloneable handle onto the event channel.
#[derive(Debug, Clone)]
pub struct Publisher {
    tx: broadcast::Sender<PublishedEvent>,
}

impl Publisher {
    /// A channel buffering at most `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Register a new subscriber. It receives events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.tx.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Send an event to every subscriber. Returns how many received it.
    pub fn publish(&self, event: PublishedEvent) -> usize {
        let channel = event.channel();
        // No subscribers is fine; the event is dropped.
        let delivered = self.tx.send(event).unwrap_or(0);
        trace!(channel, delivered, "Event published");
        delivered
    }

    /// Publish a `statistics_update` snapshot.
    pub fn statistics(&self, stats: AggregateStatistics) -> usize {
        self.publish(PublishedEvent::StatisticsUpdate(stats))
    }

    /// Publish a `simulation_update` batch.
    pub fn update(&self, update: SimulationUpdate) -> usize {
        self.publish(PublishedEvent::SimulationUpdate(update))
    }

    /// Publish the final `simulation_completed` snapshot.
    pub fn completed(&self, stats: AggregateStatistics) -> usize {
        self.publish(PublishedEvent::SimulationCompleted(stats))
    }
}

/// Coalesces session deltas between publish ticks.
///
/// Only the latest delta per session is kept. Sessions leave the buffer in
/// the order they first changed, so a session that keeps changing cannot
/// starve the others across batches.
#[derive(Debug)]
pub struct DeltaBuffer {
    order: VecDeque<SessionId>,
    latest: HashMap<SessionId, SessionDelta>,
    max_batch: usize,
}

impl DeltaBuffer {
    /// A buffer releasing at most `max_batch` deltas per batch.
    pub fn new(max_batch: usize) -> Self {
        Self {
            order: VecDeque::new(),
            latest: HashMap::new(),
            max_batch: max_batch.max(1),
        }
    }

    /// Record the latest state of a session.
    pub fn record(&mut self, delta: SessionDelta) {
        if self.latest.insert(delta.session_id, delta).is_none() {
            self.order.push_back(delta.session_id);
        }
    }

    /// Remove and return the next batch, oldest changes first.
    pub fn take_batch(&mut self) -> Vec<SessionDelta> {
        let size = self.max_batch.min(self.order.len());
        let mut batch = Vec::with_capacity(size);
        while batch.len() < size {
            let Some(id) = self.order.pop_front() else {
                break;
            };
            if let Some(delta) = self.latest.remove(&id) {
                batch.push(delta);
            }
        }
        batch
    }

    /// Sessions waiting to be published.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// The two publish timers of a run.
#[derive(Debug)]
pub struct Cadence {
    /// Fires every `update_interval_ms`.
    pub updates: Interval,
    /// Fires every `statistics_interval_ms`.
    pub statistics: Interval,
}

impl Cadence {
    /// Timers whose first tick is one full period from now.
    pub fn new(config: &PublisherConfig) -> Self {
        Self {
            updates: delayed_interval(config.update_interval()),
            statistics: delayed_interval(config.statistics_interval()),
        }
    }
}

fn delayed_interval(period: std::time::Duration) -> Interval {
    let period = period.max(std::time::Duration::from_millis(1));
    let start = Instant::now().checked_add(period).unwrap_or_else(Instant::now);
    let mut interval = tokio::time::interval_at(start, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use coinflip_types::{RunId, RunState};

    use super::*;

    fn delta(id: u32, flips: u64) -> SessionDelta {
        SessionDelta {
            session_id: SessionId(id),
            flips_count: flips,
            completed: false,
            pattern_found: false,
        }
    }

    #[test]
    fn buffer_keeps_latest_per_session() {
        let mut buffer = DeltaBuffer::new(10);
        buffer.record(delta(1, 16));
        buffer.record(delta(2, 16));
        buffer.record(delta(1, 32));
        assert_eq!(buffer.len(), 2);
        let batch = buffer.take_batch();
        assert_eq!(batch, vec![delta(1, 32), delta(2, 16)]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn batches_are_bounded_and_fifo() {
        let mut buffer = DeltaBuffer::new(2);
        for id in 0..5 {
            buffer.record(delta(id, 1));
        }
        let first = buffer.take_batch();
        assert_eq!(first.iter().map(|d| d.session_id.get()).collect::<Vec<_>>(), vec![0, 1]);
        // Session 0 changes again; it queues behind the ones already waiting.
        buffer.record(delta(0, 2));
        let second = buffer.take_batch();
        assert_eq!(second.iter().map(|d| d.session_id.get()).collect::<Vec<_>>(), vec![2, 3]);
        let third = buffer.take_batch();
        assert_eq!(third, vec![delta(4, 1), delta(0, 2)]);
        assert!(buffer.take_batch().is_empty());
    }

    #[tokio::test]
    async fn every_subscriber_sees_every_event() {
        let publisher = Publisher::new(16);
        let mut a = publisher.subscribe();
        let mut b = publisher.subscribe();
        assert_eq!(publisher.subscriber_count(), 2);

        publisher.statistics(AggregateStatistics::default());
        publisher.update(SimulationUpdate {
            run_id: RunId::new(),
            status: RunState::Running,
            active_sessions: 1,
            updates: vec![delta(0, 4)],
        });

        for rx in [&mut a, &mut b] {
            assert_eq!(rx.recv().await.unwrap().channel(), "statistics_update");
            assert_eq!(rx.recv().await.unwrap().channel(), "simulation_update");
        }
    }

    #[tokio::test]
    async fn slow_subscriber_lags_without_blocking() {
        let publisher = Publisher::new(2);
        let mut rx = publisher.subscribe();
        for _ in 0..5 {
            publisher.statistics(AggregateStatistics::default());
        }
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(3))
        ));
        assert!(rx.recv().await.is_ok());
    }

    #[test]
    fn publishing_without_subscribers_is_dropped() {
        let publisher = Publisher::new(4);
        assert_eq!(publisher.completed(AggregateStatistics::default()), 0);
    }
}
