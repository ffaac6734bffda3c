//! Durable store of record for rounds and participant scores.

/// In-memory store used by tests and builds without MongoDB.
pub mod memory;
/// MongoDB implementation.
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use futures::future::BoxFuture;
use time::OffsetDateTime;

use crate::dao::models::{NewRoundEntity, RoundEntity, RoundRecord, ScoreEntity};
use crate::dao::storage::StorageResult;

pub use self::memory::MemoryRoundStore;

/// Store of record for every round ever created and its participant history.
pub trait RoundStore: Send + Sync {
    /// Persist a new round, generating an id when the input carries none.
    fn create_round(&self, round: NewRoundEntity) -> BoxFuture<'static, StorageResult<RoundEntity>>;
    /// Round and all of its score rows.
    fn find_round(&self, id: String) -> BoxFuture<'static, StorageResult<Option<RoundRecord>>>;
    /// Every round, newest start first.
    fn list_rounds(&self) -> BoxFuture<'static, StorageResult<Vec<RoundEntity>>>;
    /// Rounds whose window has not fully elapsed at `now`, with their scores.
    fn list_active_or_upcoming(
        &self,
        now: OffsetDateTime,
    ) -> BoxFuture<'static, StorageResult<Vec<RoundRecord>>>;
    /// Overwrite the stored total. Returns `false` when the round is unknown.
    fn update_total_points(&self, id: String, total: u64) -> BoxFuture<'static, StorageResult<bool>>;
    /// Upsert one participant's stats. Taps and points never decrease.
    fn update_participant_stats(&self, score: ScoreEntity) -> BoxFuture<'static, StorageResult<()>>;
    /// Remove a round and its scores. Only used to undo a failed creation.
    fn delete_round(&self, id: String) -> BoxFuture<'static, StorageResult<bool>>;
    /// Cheap query proving the backend still answers.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    /// Re-establish the connection after a failed health check.
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
