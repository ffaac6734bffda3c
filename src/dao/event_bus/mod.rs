//! Publish/subscribe seam carrying events between server instances.

/// Single-process bus over a tokio broadcast channel.
pub mod memory;
/// Redis pub/sub bus.
#[cfg(feature = "redis-cache")]
pub mod redis;

use futures::{future::BoxFuture, stream::BoxStream};

use crate::{dao::storage::StorageResult, dto::events::EventEnvelope};

pub use self::memory::LocalEventBus;

/// Stream of envelopes received from the shared channel, in publish order.
pub type EnvelopeStream = BoxStream<'static, EventEnvelope>;

/// Shared channel every instance publishes round events to and listens on.
pub trait EventBus: Send + Sync {
    /// Publish one envelope to every subscriber, including this instance.
    fn publish(&self, envelope: EventEnvelope) -> BoxFuture<'static, StorageResult<()>>;
    /// Open a new subscription. The stream ends when the connection is lost.
    fn subscribe(&self) -> BoxFuture<'static, StorageResult<EnvelopeStream>>;
}
