use std::{sync::Arc, time::Duration};

use futures::future::BoxFuture;
use redis::{AsyncCommands, Client, RedisError, aio::ConnectionManager};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::info;

use crate::dao::{cache::CacheBackend, storage::{StorageError, StorageResult}};

/// Failures talking to Redis.
#[derive(Debug, Error)]
pub enum RedisCacheError {
    /// The URL could not be parsed.
    #[error("failed to parse Redis URL `{url}`")]
    InvalidUrl {
        /// URL as given.
        url: String,
        /// Client error.
        #[source]
        source: RedisError,
    },
    /// Opening the connection failed.
    #[error("failed to connect to Redis")]
    Connect {
        /// Client error.
        #[source]
        source: RedisError,
    },
    /// A command returned an error.
    #[error("Redis command `{command}` failed")]
    Command {
        /// Redis command name.
        command: &'static str,
        /// Client error.
        #[source]
        source: RedisError,
    },
}

impl From<RedisCacheError> for StorageError {
    fn from(err: RedisCacheError) -> Self {
        StorageError::unavailable(err.to_string(), err)
    }
}

pub(crate) type RedisResult<T> = Result<T, RedisCacheError>;

/// Redis-backed [`CacheBackend`]. The connection is opened on first use and
/// re-established transparently by the connection manager.
#[derive(Clone)]
pub struct RedisCacheBackend {
    inner: Arc<RedisInner>,
}

struct RedisInner {
    client: Client,
    connection: OnceCell<ConnectionManager>,
}

impl RedisCacheBackend {
    /// Backend for `url`. No connection is made until the first command.
    pub fn new(url: &str) -> RedisResult<Self> {
        let client = Client::open(url).map_err(|source| RedisCacheError::InvalidUrl {
            url: url.to_owned(),
            source,
        })?;
        Ok(Self {
            inner: Arc::new(RedisInner {
                client,
                connection: OnceCell::new(),
            }),
        })
    }

    /// Underlying client, shared with the pub/sub event bus.
    pub fn client(&self) -> Client {
        self.inner.client.clone()
    }

    pub(crate) async fn connection(&self) -> RedisResult<ConnectionManager> {
        let manager = self
            .inner
            .connection
            .get_or_try_init(|| async {
                let manager = self
                    .inner
                    .client
                    .get_connection_manager()
                    .await
                    .map_err(|source| RedisCacheError::Connect { source })?;
                info!("connected to Redis");
                Ok::<_, RedisCacheError>(manager)
            })
            .await?;
        Ok(manager.clone())
    }

    async fn get(&self, key: String) -> RedisResult<Option<String>> {
        let mut conn = self.connection().await?;
        conn.get(&key)
            .await
            .map_err(|source| RedisCacheError::Command { command: "GET", source })
    }

    async fn set(&self, key: String, value: String, ttl: Option<Duration>) -> RedisResult<()> {
        let mut conn = self.connection().await?;
        match ttl {
            Some(ttl) => conn
                .set_ex::<_, _, ()>(&key, value, ttl.as_secs().max(1))
                .await
                .map_err(|source| RedisCacheError::Command { command: "SETEX", source }),
            None => conn
                .set::<_, _, ()>(&key, value)
                .await
                .map_err(|source| RedisCacheError::Command { command: "SET", source }),
        }
    }

    async fn del(&self, keys: Vec<String>) -> RedisResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection().await?;
        conn.del::<_, ()>(keys)
            .await
            .map_err(|source| RedisCacheError::Command { command: "DEL", source })
    }

    async fn set_add(&self, key: String, member: String) -> RedisResult<()> {
        let mut conn = self.connection().await?;
        conn.sadd::<_, _, ()>(&key, member)
            .await
            .map_err(|source| RedisCacheError::Command { command: "SADD", source })
    }

    async fn set_remove(&self, key: String, member: String) -> RedisResult<()> {
        let mut conn = self.connection().await?;
        conn.srem::<_, _, ()>(&key, member)
            .await
            .map_err(|source| RedisCacheError::Command { command: "SREM", source })
    }

    async fn set_members(&self, key: String) -> RedisResult<Vec<String>> {
        let mut conn = self.connection().await?;
        conn.smembers(&key)
            .await
            .map_err(|source| RedisCacheError::Command { command: "SMEMBERS", source })
    }

    async fn set_contains(&self, key: String, member: String) -> RedisResult<bool> {
        let mut conn = self.connection().await?;
        conn.sismember(&key, member)
            .await
            .map_err(|source| RedisCacheError::Command { command: "SISMEMBER", source })
    }

    async fn delete_by_pattern(&self, pattern: String) -> RedisResult<u64> {
        let mut conn = self.connection().await?;
        let keys: Vec<String> = {
            let mut iter = conn
                .scan_match::<_, String>(&pattern)
                .await
                .map_err(|source| RedisCacheError::Command { command: "SCAN", source })?;
            let mut keys = Vec::new();
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
            keys
        };

        if keys.is_empty() {
            return Ok(0);
        }

        let removed: u64 = conn
            .del(&keys)
            .await
            .map_err(|source| RedisCacheError::Command { command: "DEL", source })?;
        Ok(removed)
    }

    async fn ping(&self) -> RedisResult<()> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|source| RedisCacheError::Command { command: "PING", source })?;
        Ok(())
    }
}

impl CacheBackend for RedisCacheBackend {
    fn get(&self, key: String) -> BoxFuture<'static, StorageResult<Option<String>>> {
        let cache = self.clone();
        Box::pin(async move { cache.get(key).await.map_err(Into::into) })
    }

    fn set(
        &self,
        key: String,
        value: String,
        ttl: Option<Duration>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let cache = self.clone();
        Box::pin(async move { cache.set(key, value, ttl).await.map_err(Into::into) })
    }

    fn del(&self, keys: Vec<String>) -> BoxFuture<'static, StorageResult<()>> {
        let cache = self.clone();
        Box::pin(async move { cache.del(keys).await.map_err(Into::into) })
    }

    fn set_add(&self, key: String, member: String) -> BoxFuture<'static, StorageResult<()>> {
        let cache = self.clone();
        Box::pin(async move { cache.set_add(key, member).await.map_err(Into::into) })
    }

    fn set_remove(&self, key: String, member: String) -> BoxFuture<'static, StorageResult<()>> {
        let cache = self.clone();
        Box::pin(async move { cache.set_remove(key, member).await.map_err(Into::into) })
    }

    fn set_members(&self, key: String) -> BoxFuture<'static, StorageResult<Vec<String>>> {
        let cache = self.clone();
        Box::pin(async move { cache.set_members(key).await.map_err(Into::into) })
    }

    fn set_contains(&self, key: String, member: String) -> BoxFuture<'static, StorageResult<bool>> {
        let cache = self.clone();
        Box::pin(async move { cache.set_contains(key, member).await.map_err(Into::into) })
    }

    fn delete_by_pattern(&self, pattern: String) -> BoxFuture<'static, StorageResult<u64>> {
        let cache = self.clone();
        Box::pin(async move { cache.delete_by_pattern(pattern).await.map_err(Into::into) })
    }

    fn ping(&self) -> BoxFuture<'static, StorageResult<()>> {
        let cache = self.clone();
        Box::pin(async move { cache.ping().await.map_err(Into::into) })
    }
}
