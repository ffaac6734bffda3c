use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use futures::{StreamExt, future::BoxFuture};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::warn;

use crate::{
    dao::{
        event_bus::{EnvelopeStream, EventBus},
        storage::{StorageError, StorageResult},
    },
    dto::events::EventEnvelope,
};

#[derive(Debug, Error)]
#[error("in-process event bus is offline")]
struct Offline;

/// Event bus shared by every component of one process, and by several
/// simulated instances in tests.
#[derive(Clone)]
pub struct LocalEventBus {
    inner: Arc<LocalInner>,
}

struct LocalInner {
    sender: broadcast::Sender<EventEnvelope>,
    offline: AtomicBool,
}

impl LocalEventBus {
    /// Bus buffering up to `capacity` envelopes per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(LocalInner {
                sender,
                offline: AtomicBool::new(false),
            }),
        }
    }

    /// Make publish and subscribe fail (`false`) or succeed again (`true`).
    pub fn set_available(&self, available: bool) {
        self.inner.offline.store(!available, Ordering::SeqCst);
    }

    fn check(&self) -> StorageResult<()> {
        if self.inner.offline.load(Ordering::SeqCst) {
            Err(StorageError::unavailable("event bus offline".into(), Offline))
        } else {
            Ok(())
        }
    }
}

impl Default for LocalEventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventBus for LocalEventBus {
    fn publish(&self, envelope: EventEnvelope) -> BoxFuture<'static, StorageResult<()>> {
        let bus = self.clone();
        Box::pin(async move {
            bus.check()?;
            // No subscriber is not an error for a pub/sub channel.
            let _ = bus.inner.sender.send(envelope);
            Ok(())
        })
    }

    fn subscribe(&self) -> BoxFuture<'static, StorageResult<EnvelopeStream>> {
        let bus = self.clone();
        Box::pin(async move {
            bus.check()?;
            let stream = BroadcastStream::new(bus.inner.sender.subscribe()).filter_map(
                |item| async move {
                    match item {
                        Ok(envelope) => Some(envelope),
                        Err(err) => {
                            warn!(error = %err, "event bus subscriber lagged");
                            None
                        }
                    }
                },
            );
            Ok(stream.boxed())
        })
    }
}

#[cfg(test)]
mod tests {
    use time::OffsetDateTime;

    use super::*;
    use crate::dto::events::{RoundEvent, RoundFinishedEvent};

    fn envelope(instance: &str) -> EventEnvelope {
        EventEnvelope::new(
            instance,
            OffsetDateTime::UNIX_EPOCH,
            RoundEvent::RoundFinished(RoundFinishedEvent {
                id: "r1".into(),
                total_points: 0,
                winner: None,
            }),
        )
    }

    #[tokio::test]
    async fn subscribers_receive_published_envelopes() {
        let bus = LocalEventBus::default();
        let mut first = bus.subscribe().await.unwrap();
        let mut second = bus.subscribe().await.unwrap();

        bus.publish(envelope("a")).await.unwrap();

        assert_eq!(first.next().await.unwrap().instance_id, "a");
        assert_eq!(second.next().await.unwrap().instance_id, "a");
    }

    #[tokio::test]
    async fn offline_bus_rejects_calls() {
        let bus = LocalEventBus::default();
        bus.set_available(false);
        assert!(bus.publish(envelope("a")).await.is_err());
        assert!(bus.subscribe().await.is_err());
    }
}
