use futures::{StreamExt, future::BoxFuture};
use redis::AsyncCommands;
use tracing::{info, warn};

use crate::{
    dao::{
        cache::redis::{RedisCacheBackend, RedisCacheError},
        event_bus::{EnvelopeStream, EventBus},
        storage::{StorageError, StorageResult},
    },
    dto::events::EventEnvelope,
};

/// Redis pub/sub channel shared by every instance.
///
/// Publishing reuses the cache connection manager; each subscription opens a
/// dedicated pub/sub connection.
#[derive(Clone)]
pub struct RedisEventBus {
    backend: RedisCacheBackend,
    channel: String,
}

impl RedisEventBus {
    /// Bus publishing on `channel` through `backend`'s client.
    pub fn new(backend: RedisCacheBackend, channel: impl Into<String>) -> Self {
        Self {
            backend,
            channel: channel.into(),
        }
    }

    async fn publish(&self, envelope: EventEnvelope) -> StorageResult<()> {
        let payload = serde_json::to_string(&envelope)
            .map_err(|err| StorageError::corrupt(&self.channel, err))?;
        let mut conn = self.backend.connection().await?;
        conn.publish::<_, _, ()>(&self.channel, payload)
            .await
            .map_err(|source| RedisCacheError::Command {
                command: "PUBLISH",
                source,
            })?;
        Ok(())
    }

    async fn subscribe(&self) -> StorageResult<EnvelopeStream> {
        let mut pubsub = self
            .backend
            .client()
            .get_async_pubsub()
            .await
            .map_err(|source| RedisCacheError::Connect { source })?;
        pubsub
            .subscribe(&self.channel)
            .await
            .map_err(|source| RedisCacheError::Command {
                command: "SUBSCRIBE",
                source,
            })?;
        info!(channel = %self.channel, "subscribed to inter-instance channel");

        let stream = pubsub.into_on_message().filter_map(|message| async move {
            let payload: String = match message.get_payload() {
                Ok(payload) => payload,
                Err(err) => {
                    warn!(error = %err, "unreadable pub/sub payload");
                    return None;
                }
            };
            match serde_json::from_str::<EventEnvelope>(&payload) {
                Ok(envelope) => Some(envelope),
                Err(err) => {
                    warn!(error = %err, "failed to decode inter-instance message");
                    None
                }
            }
        });
        Ok(stream.boxed())
    }
}

impl EventBus for RedisEventBus {
    fn publish(&self, envelope: EventEnvelope) -> BoxFuture<'static, StorageResult<()>> {
        let bus = self.clone();
        Box::pin(async move { bus.publish(envelope).await })
    }

    fn subscribe(&self) -> BoxFuture<'static, StorageResult<EnvelopeStream>> {
        let bus = self.clone();
        Box::pin(async move { bus.subscribe().await })
    }
}
