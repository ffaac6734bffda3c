use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use dashmap::DashMap;
use futures::future::BoxFuture;
use indexmap::IndexSet;
use thiserror::Error;
use tokio::time::Instant;

use crate::dao::{
    cache::CacheBackend,
    storage::{StorageError, StorageResult},
};

#[derive(Debug, Error)]
#[error("in-memory cache is unreachable")]
struct Unreachable;

#[derive(Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|deadline| deadline > now)
    }
}

/// Process-local cache with TTLs and an availability switch.
#[derive(Clone, Default)]
pub struct MemoryCacheBackend {
    inner: Arc<MemoryCacheInner>,
}

#[derive(Default)]
struct MemoryCacheInner {
    values: DashMap<String, Entry>,
    sets: DashMap<String, IndexSet<String>>,
    unreachable: AtomicBool,
}

impl MemoryCacheBackend {
    /// Empty, reachable backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail (`false`) or succeed again (`true`).
    pub fn set_available(&self, available: bool) {
        self.inner.unreachable.store(!available, Ordering::SeqCst);
    }

    /// Raw write that bypasses the availability switch.
    pub fn insert_raw(&self, key: impl Into<String>, value: impl Into<String>) {
        self.inner.values.insert(
            key.into(),
            Entry {
                value: value.into(),
                expires_at: None,
            },
        );
    }

    /// Number of live string keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.inner
            .values
            .iter()
            .filter(|entry| entry.is_live(now))
            .count()
    }

    /// Whether no live string key remains.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self) -> StorageResult<()> {
        if self.inner.unreachable.load(Ordering::SeqCst) {
            Err(StorageError::unavailable(
                "cache unreachable".into(),
                Unreachable,
            ))
        } else {
            Ok(())
        }
    }

    fn get_now(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        let entry = self.inner.values.get(key)?.clone();
        if entry.is_live(now) {
            Some(entry.value)
        } else {
            self.inner.values.remove(key);
            None
        }
    }
}

/// Glob match supporting `*` (any run) and `?` (one char).
pub(crate) fn glob_matches(pattern: &str, candidate: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let candidate: Vec<char> = candidate.chars().collect();
    let (mut p, mut c) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while c < candidate.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == candidate[c]) {
            p += 1;
            c += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            backtrack = Some((p, c));
            p += 1;
        } else if let Some((star, matched)) = backtrack {
            p = star + 1;
            c = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|ch| *ch == '*')
}

impl CacheBackend for MemoryCacheBackend {
    fn get(&self, key: String) -> BoxFuture<'static, StorageResult<Option<String>>> {
        let cache = self.clone();
        Box::pin(async move {
            cache.check()?;
            Ok(cache.get_now(&key))
        })
    }

    fn set(
        &self,
        key: String,
        value: String,
        ttl: Option<Duration>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let cache = self.clone();
        Box::pin(async move {
            cache.check()?;
            let expires_at = ttl.map(|ttl| Instant::now() + ttl);
            cache.inner.values.insert(key, Entry { value, expires_at });
            Ok(())
        })
    }

    fn del(&self, keys: Vec<String>) -> BoxFuture<'static, StorageResult<()>> {
        let cache = self.clone();
        Box::pin(async move {
            cache.check()?;
            for key in keys {
                cache.inner.values.remove(&key);
                cache.inner.sets.remove(&key);
            }
            Ok(())
        })
    }

    fn set_add(&self, key: String, member: String) -> BoxFuture<'static, StorageResult<()>> {
        let cache = self.clone();
        Box::pin(async move {
            cache.check()?;
            cache.inner.sets.entry(key).or_default().insert(member);
            Ok(())
        })
    }

    fn set_remove(&self, key: String, member: String) -> BoxFuture<'static, StorageResult<()>> {
        let cache = self.clone();
        Box::pin(async move {
            cache.check()?;
            if let Some(mut set) = cache.inner.sets.get_mut(&key) {
                set.shift_remove(&member);
            }
            cache.inner.sets.remove_if(&key, |_, set| set.is_empty());
            Ok(())
        })
    }

    fn set_members(&self, key: String) -> BoxFuture<'static, StorageResult<Vec<String>>> {
        let cache = self.clone();
        Box::pin(async move {
            cache.check()?;
            Ok(cache
                .inner
                .sets
                .get(&key)
                .map(|set| set.iter().cloned().collect())
                .unwrap_or_default())
        })
    }

    fn set_contains(&self, key: String, member: String) -> BoxFuture<'static, StorageResult<bool>> {
        let cache = self.clone();
        Box::pin(async move {
            cache.check()?;
            Ok(cache
                .inner
                .sets
                .get(&key)
                .is_some_and(|set| set.contains(&member)))
        })
    }

    fn delete_by_pattern(&self, pattern: String) -> BoxFuture<'static, StorageResult<u64>> {
        let cache = self.clone();
        Box::pin(async move {
            cache.check()?;
            let mut removed = 0u64;
            let mut keep = |key: &String| {
                let matched = glob_matches(&pattern, key);
                removed += u64::from(matched);
                !matched
            };
            cache.inner.values.retain(|key, _| keep(key));
            cache.inner.sets.retain(|key, _| keep(key));
            Ok(removed)
        })
    }

    fn ping(&self) -> BoxFuture<'static, StorageResult<()>> {
        let cache = self.clone();
        Box::pin(async move { cache.check() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_matching() {
        assert!(glob_matches("rounds:round:abc:*", "rounds:round:abc:state"));
        assert!(glob_matches("rounds:round:abc:*", "rounds:round:abc:user:1:taps"));
        assert!(!glob_matches("rounds:round:abc:*", "rounds:round:abcd:state"));
        assert!(glob_matches("a?c", "abc"));
        assert!(glob_matches("*", ""));
        assert!(!glob_matches("a*b", "acbd"));
    }

    #[tokio::test(start_paused = true)]
    async fn values_expire_after_ttl() {
        let cache = MemoryCacheBackend::new();
        cache
            .set("k".into(), "v".into(), Some(Duration::from_secs(10)))
            .await
            .unwrap();
        assert_eq!(cache.get("k".into()).await.unwrap().as_deref(), Some("v"));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cache.get("k".into()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_operations() {
        let cache = MemoryCacheBackend::new();
        cache.set_add("s".into(), "a".into()).await.unwrap();
        cache.set_add("s".into(), "b".into()).await.unwrap();
        cache.set_add("s".into(), "a".into()).await.unwrap();
        assert_eq!(cache.set_members("s".into()).await.unwrap(), vec!["a", "b"]);
        assert!(cache.set_contains("s".into(), "b".into()).await.unwrap());

        cache.set_remove("s".into(), "b".into()).await.unwrap();
        assert!(!cache.set_contains("s".into(), "b".into()).await.unwrap());
    }

    #[tokio::test]
    async fn pattern_delete_only_touches_matching_keys() {
        let cache = MemoryCacheBackend::new();
        for key in ["p:round:1:state", "p:round:1:leaderboard", "p:round:2:state"] {
            cache.set(key.into(), "x".into(), None).await.unwrap();
        }
        let removed = cache
            .delete_by_pattern("p:round:1:*".into())
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert!(cache.get("p:round:2:state".into()).await.unwrap().is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn pattern_delete_counts_only_its_own_removals_under_concurrent_writes() {
        let cache = MemoryCacheBackend::new();
        let writer = {
            let cache = cache.clone();
            tokio::spawn(async move {
                for i in 0..500 {
                    cache.set(format!("other:{i}"), "x".into(), None).await.unwrap();
                    cache.set_add(format!("set:{i}"), "m".into()).await.unwrap();
                }
            })
        };

        let mut removed = 0;
        for round in 0..50 {
            cache
                .set(format!("p:round:{round}:state"), "x".into(), None)
                .await
                .unwrap();
            removed += cache.delete_by_pattern("p:round:*".into()).await.unwrap();
        }
        writer.await.unwrap();

        assert_eq!(removed, 50);
    }

    #[tokio::test]
    async fn unreachable_cache_fails_every_call() {
        let cache = MemoryCacheBackend::new();
        cache.set_available(false);
        assert!(cache.get("k".into()).await.is_err());
        assert!(cache.ping().await.is_err());
        cache.set_available(true);
        assert!(cache.ping().await.is_ok());
    }
}
