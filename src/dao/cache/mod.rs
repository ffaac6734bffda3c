//! Ephemeral store holding live round state, leaderboards and tap sessions.

/// In-process backend with TTL support.
pub mod memory;
/// Redis backend.
#[cfg(feature = "redis-cache")]
pub mod redis;
/// Typed access to round state, leaderboards and sessions.
pub mod repository;

use std::time::Duration;

use futures::future::BoxFuture;

use crate::dao::storage::StorageResult;

pub use self::memory::MemoryCacheBackend;
pub use self::repository::{CacheKeys, CacheRepository, CacheSettings};

/// Minimal key/value + set surface the cache repository needs.
pub trait CacheBackend: Send + Sync {
    /// Value stored under `key`, if present and not expired.
    fn get(&self, key: String) -> BoxFuture<'static, StorageResult<Option<String>>>;
    /// Store `value`, expiring it after `ttl` when given.
    fn set(
        &self,
        key: String,
        value: String,
        ttl: Option<Duration>,
    ) -> BoxFuture<'static, StorageResult<()>>;
    /// Remove every key in `keys`; missing keys are ignored.
    fn del(&self, keys: Vec<String>) -> BoxFuture<'static, StorageResult<()>>;
    /// Add `member` to the set stored at `key`.
    fn set_add(&self, key: String, member: String) -> BoxFuture<'static, StorageResult<()>>;
    /// Remove `member` from the set stored at `key`.
    fn set_remove(&self, key: String, member: String) -> BoxFuture<'static, StorageResult<()>>;
    /// All members of the set at `key`, empty when it does not exist.
    fn set_members(&self, key: String) -> BoxFuture<'static, StorageResult<Vec<String>>>;
    /// Whether `member` belongs to the set at `key`.
    fn set_contains(&self, key: String, member: String) -> BoxFuture<'static, StorageResult<bool>>;
    /// Delete every key matching a glob `pattern`, returning how many were removed.
    fn delete_by_pattern(&self, pattern: String) -> BoxFuture<'static, StorageResult<u64>>;
    /// Round-trip check used by the health endpoint.
    fn ping(&self) -> BoxFuture<'static, StorageResult<()>>;
}
