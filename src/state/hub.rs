use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::debug;

use crate::dto::events::{Audience, RoundEvent};

/// Local fanout of round events to the clients connected to this instance.
///
/// Round topics are created on first subscription and pruned once their last
/// receiver is dropped.
pub struct RoundHub {
    capacity: usize,
    global: broadcast::Sender<RoundEvent>,
    topics: DashMap<String, broadcast::Sender<RoundEvent>>,
}

impl RoundHub {
    /// Construct a hub whose channels all share `capacity`.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (global, _receiver) = broadcast::channel(capacity);
        Self {
            capacity,
            global,
            topics: DashMap::new(),
        }
    }

    /// Receiver for events addressed to every client.
    pub fn subscribe_global(&self) -> broadcast::Receiver<RoundEvent> {
        self.global.subscribe()
    }

    /// Receiver for events of one round.
    pub fn subscribe_round(&self, round_id: &str) -> broadcast::Receiver<RoundEvent> {
        self.topics
            .entry(round_id.to_owned())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Deliver an event to its audience, ignoring the absence of receivers.
    pub fn deliver(&self, event: RoundEvent) {
        match event.audience() {
            Audience::Everyone => {
                let _ = self.global.send(event);
            }
            Audience::Round => {
                let round_id = event.round_id().to_owned();
                let delivered = self
                    .topics
                    .get(&round_id)
                    .map(|topic| topic.send(event).is_ok())
                    .unwrap_or(false);
                if !delivered {
                    self.prune(&round_id);
                }
            }
        }
    }

    /// Drop the topic of `round_id` if nobody listens to it anymore.
    pub fn prune(&self, round_id: &str) {
        if self
            .topics
            .remove_if(round_id, |_, topic| topic.receiver_count() == 0)
            .is_some()
        {
            debug!(round_id, "pruned idle round topic");
        }
    }

    /// Number of round topics currently allocated.
    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }
}
