//! In-process [`RoundStore`] used by tests and by the server when no durable
//! backend is configured.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use futures::future::BoxFuture;
use indexmap::IndexMap;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::dao::{
    models::{NewRoundEntity, RoundEntity, RoundRecord, ScoreEntity},
    round_store::RoundStore,
    storage::{StorageError, StorageResult},
};

#[derive(Debug, Error)]
#[error("in-memory round store is offline")]
struct Offline;

/// Process-local [`RoundStore`] that can be switched offline in tests.
#[derive(Clone, Default)]
pub struct MemoryRoundStore {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    rounds: RwLock<IndexMap<String, RoundEntity>>,
    scores: RwLock<IndexMap<(String, String), ScoreEntity>>,
    offline: AtomicBool,
}

impl MemoryRoundStore {
    /// Empty, online store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the backend going away (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        self.inner.offline.store(!available, Ordering::SeqCst);
    }

    fn check(&self) -> StorageResult<()> {
        if self.inner.offline.load(Ordering::SeqCst) {
            Err(StorageError::unavailable("memory store offline".into(), Offline))
        } else {
            Ok(())
        }
    }

    async fn scores_for(&self, round_id: &str) -> Vec<ScoreEntity> {
        let scores = self.inner.scores.read().await;
        let mut rows: Vec<ScoreEntity> = scores
            .values()
            .filter(|score| score.round_id == round_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        rows
    }

    async fn create_round(&self, round: NewRoundEntity) -> StorageResult<RoundEntity> {
        self.check()?;
        let id = round.id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut rounds = self.inner.rounds.write().await;
        if rounds.contains_key(&id) {
            return Err(StorageError::Duplicate { key: id });
        }

        let entity = RoundEntity {
            id: id.clone(),
            starts_at: round.starts_at,
            ends_at: round.ends_at,
            total_points: 0,
            created_at: OffsetDateTime::now_utc(),
        };
        rounds.insert(id, entity.clone());
        Ok(entity)
    }

    async fn find_round(&self, id: String) -> StorageResult<Option<RoundRecord>> {
        self.check()?;
        let round = self.inner.rounds.read().await.get(&id).cloned();
        match round {
            Some(round) => {
                let scores = self.scores_for(&id).await;
                Ok(Some(RoundRecord { round, scores }))
            }
            None => Ok(None),
        }
    }

    async fn list_rounds(&self) -> StorageResult<Vec<RoundEntity>> {
        self.check()?;
        let mut rounds: Vec<RoundEntity> =
            self.inner.rounds.read().await.values().cloned().collect();
        rounds.sort_by(|a, b| b.starts_at.cmp(&a.starts_at));
        Ok(rounds)
    }

    async fn list_active_or_upcoming(&self, now: OffsetDateTime) -> StorageResult<Vec<RoundRecord>> {
        self.check()?;
        let rounds: Vec<RoundEntity> = self
            .inner
            .rounds
            .read()
            .await
            .values()
            .filter(|round| round.ends_at >= now)
            .cloned()
            .collect();

        let mut records = Vec::with_capacity(rounds.len());
        for round in rounds {
            let scores = self.scores_for(&round.id).await;
            records.push(RoundRecord { round, scores });
        }
        Ok(records)
    }

    async fn update_total_points(&self, id: String, total: u64) -> StorageResult<bool> {
        self.check()?;
        let mut rounds = self.inner.rounds.write().await;
        match rounds.get_mut(&id) {
            Some(round) => {
                round.total_points = total;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn update_participant_stats(&self, score: ScoreEntity) -> StorageResult<()> {
        self.check()?;
        let key = (score.round_id.clone(), score.user_id.clone());
        let mut scores = self.inner.scores.write().await;
        match scores.get_mut(&key) {
            Some(existing) => {
                existing.username = score.username;
                existing.zero_score = score.zero_score;
                existing.taps = existing.taps.max(score.taps);
                existing.points = existing.points.max(score.points);
                existing.updated_at = existing.updated_at.max(score.updated_at);
            }
            None => {
                scores.insert(key, score);
            }
        }
        Ok(())
    }

    async fn delete_round(&self, id: String) -> StorageResult<bool> {
        self.check()?;
        let removed = self.inner.rounds.write().await.shift_remove(&id).is_some();
        self.inner
            .scores
            .write()
            .await
            .retain(|(round_id, _), _| round_id != &id);
        Ok(removed)
    }
}

impl RoundStore for MemoryRoundStore {
    fn create_round(&self, round: NewRoundEntity) -> BoxFuture<'static, StorageResult<RoundEntity>> {
        let store = self.clone();
        Box::pin(async move { store.create_round(round).await })
    }

    fn find_round(&self, id: String) -> BoxFuture<'static, StorageResult<Option<RoundRecord>>> {
        let store = self.clone();
        Box::pin(async move { store.find_round(id).await })
    }

    fn list_rounds(&self) -> BoxFuture<'static, StorageResult<Vec<RoundEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_rounds().await })
    }

    fn list_active_or_upcoming(
        &self,
        now: OffsetDateTime,
    ) -> BoxFuture<'static, StorageResult<Vec<RoundRecord>>> {
        let store = self.clone();
        Box::pin(async move { store.list_active_or_upcoming(now).await })
    }

    fn update_total_points(&self, id: String, total: u64) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { store.update_total_points(id, total).await })
    }

    fn update_participant_stats(&self, score: ScoreEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.update_participant_stats(score).await })
    }

    fn delete_round(&self, id: String) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { store.delete_round(id).await })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.check() })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.check() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(1_700_000_000 + secs).unwrap()
    }

    fn new_round(id: Option<&str>, start: i64, end: i64) -> NewRoundEntity {
        NewRoundEntity {
            id: id.map(str::to_owned),
            starts_at: at(start),
            ends_at: at(end),
        }
    }

    fn score(round: &str, user: &str, taps: u64, updated: i64) -> ScoreEntity {
        ScoreEntity {
            round_id: round.into(),
            user_id: user.into(),
            username: user.into(),
            taps,
            points: taps,
            zero_score: false,
            updated_at: at(updated),
        }
    }

    #[tokio::test]
    async fn create_keeps_supplied_id_and_rejects_duplicates() {
        let store = MemoryRoundStore::new();
        let created = RoundStore::create_round(&store, new_round(Some("abc"), 0, 60))
            .await
            .unwrap();
        assert_eq!(created.id, "abc");

        let err = RoundStore::create_round(&store, new_round(Some("abc"), 0, 60))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Duplicate { .. }));

        let generated = RoundStore::create_round(&store, new_round(None, 0, 60))
            .await
            .unwrap();
        assert!(Uuid::parse_str(&generated.id).is_ok());
    }

    #[tokio::test]
    async fn lists_newest_start_first_and_filters_elapsed() {
        let store = MemoryRoundStore::new();
        for (id, start, end) in [("old", -100, -50), ("live", -10, 50), ("next", 30, 90)] {
            RoundStore::create_round(&store, new_round(Some(id), start, end))
                .await
                .unwrap();
        }

        let all: Vec<_> = RoundStore::list_rounds(&store)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(all, vec!["next", "live", "old"]);

        let pending: Vec<_> = RoundStore::list_active_or_upcoming(&store, at(0))
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.round.id)
            .collect();
        assert_eq!(pending, vec!["live", "next"]);
    }

    #[tokio::test]
    async fn participant_stats_never_move_backwards() {
        let store = MemoryRoundStore::new();
        RoundStore::create_round(&store, new_round(Some("r"), 0, 60))
            .await
            .unwrap();
        RoundStore::update_participant_stats(&store, score("r", "u", 5, 5))
            .await
            .unwrap();
        RoundStore::update_participant_stats(&store, score("r", "u", 3, 3))
            .await
            .unwrap();

        let record = RoundStore::find_round(&store, "r".into())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.scores.len(), 1);
        assert_eq!(record.scores[0].taps, 5);
        assert_eq!(record.scores[0].updated_at, at(5));
    }

    #[tokio::test]
    async fn delete_removes_round_and_scores() {
        let store = MemoryRoundStore::new();
        RoundStore::create_round(&store, new_round(Some("r"), 0, 60))
            .await
            .unwrap();
        RoundStore::update_participant_stats(&store, score("r", "u", 1, 1))
            .await
            .unwrap();

        assert!(RoundStore::delete_round(&store, "r".into()).await.unwrap());
        assert!(!RoundStore::delete_round(&store, "r".into()).await.unwrap());
        assert!(store.scores_for("r").await.is_empty());
    }

    #[tokio::test]
    async fn offline_store_reports_unavailable() {
        let store = MemoryRoundStore::new();
        store.set_available(false);
        assert!(RoundStore::health_check(&store).await.is_err());
        assert!(RoundStore::list_rounds(&store).await.is_err());
        store.set_available(true);
        assert!(RoundStore::health_check(&store).await.is_ok());
    }

    #[tokio::test]
    async fn total_update_reports_unknown_rounds() {
        let store = MemoryRoundStore::new();
        assert!(!RoundStore::update_total_points(&store, "missing".into(), 3)
            .await
            .unwrap());
        RoundStore::create_round(&store, new_round(Some("r"), 0, 60))
            .await
            .unwrap();
        assert!(RoundStore::update_total_points(&store, "r".into(), 3)
            .await
            .unwrap());
    }
}
