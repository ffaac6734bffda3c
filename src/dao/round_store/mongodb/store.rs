use std::{collections::HashMap, sync::Arc};

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{Client, Collection, Database, IndexModel, bson::doc, options::IndexOptions};
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use super::{
    config::MongoConfig,
    connection::establish_connection,
    error::{MongoDaoError, MongoResult, is_duplicate_key},
    models::{MongoRoundDocument, MongoScoreDocument, doc_id, score_upsert, to_bson_datetime, to_i64},
};
use crate::dao::{
    models::{NewRoundEntity, RoundEntity, RoundRecord, ScoreEntity},
    round_store::RoundStore,
    storage::StorageResult,
};

const ROUND_COLLECTION_NAME: &str = "rounds";
const SCORE_COLLECTION_NAME: &str = "round_scores";

/// Rounds and score rows kept in two MongoDB collections.
#[derive(Clone)]
pub struct MongoRoundStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
}

struct MongoState {
    #[allow(dead_code)]
    client: Client,
    database: Database,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = {
            let guard = self.state.read().await;
            guard.database.clone()
        };

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) =
            establish_connection(&self.config.options, &self.config.database_name).await?;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.database = database;
        Ok(())
    }
}

impl MongoRoundStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) =
            establish_connection(&config.options, &config.database_name).await?;
        info!(database = %config.database_name, "connected to MongoDB");

        let inner = Arc::new(MongoInner {
            state: RwLock::new(MongoState { client, database }),
            config,
        });

        let store = Self { inner };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let rounds = self.rounds().await;
        let window_index = IndexModel::builder()
            .keys(doc! { "end_at": 1, "start_at": -1 })
            .options(
                IndexOptions::builder()
                    .name(Some("round_window_idx".to_owned()))
                    .build(),
            )
            .build();
        rounds
            .create_index(window_index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: ROUND_COLLECTION_NAME,
                index: "end_at,start_at",
                source,
            })?;

        let scores = self.scores().await;
        let score_index = IndexModel::builder()
            .keys(doc! { "round_id": 1, "user_id": 1 })
            .options(
                IndexOptions::builder()
                    .name(Some("round_score_user_idx".to_owned()))
                    .unique(Some(true))
                    .build(),
            )
            .build();
        scores
            .create_index(score_index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: SCORE_COLLECTION_NAME,
                index: "round_id,user_id",
                source,
            })?;

        Ok(())
    }

    async fn rounds(&self) -> Collection<MongoRoundDocument> {
        let guard = self.inner.state.read().await;
        guard
            .database
            .collection::<MongoRoundDocument>(ROUND_COLLECTION_NAME)
    }

    async fn scores(&self) -> Collection<MongoScoreDocument> {
        let guard = self.inner.state.read().await;
        guard
            .database
            .collection::<MongoScoreDocument>(SCORE_COLLECTION_NAME)
    }

    async fn create_round(&self, round: NewRoundEntity) -> MongoResult<RoundEntity> {
        let entity = RoundEntity {
            id: round.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            starts_at: round.starts_at,
            ends_at: round.ends_at,
            total_points: 0,
            created_at: OffsetDateTime::now_utc(),
        };

        let document = MongoRoundDocument::from(&entity);
        self.rounds()
            .await
            .insert_one(&document)
            .await
            .map_err(|source| {
                if is_duplicate_key(&source) {
                    MongoDaoError::DuplicateRound {
                        id: entity.id.clone(),
                    }
                } else {
                    MongoDaoError::CreateRound {
                        id: entity.id.clone(),
                        source,
                    }
                }
            })?;

        Ok(entity)
    }

    async fn load_scores(&self, ids: &[String]) -> MongoResult<HashMap<String, Vec<ScoreEntity>>> {
        let documents: Vec<MongoScoreDocument> = self
            .scores()
            .await
            .find(doc! { "round_id": { "$in": ids.to_vec() } })
            .sort(doc! { "updated_at": 1 })
            .await
            .map_err(|source| MongoDaoError::ListRounds { source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::ListRounds { source })?;

        let mut grouped: HashMap<String, Vec<ScoreEntity>> = HashMap::new();
        for document in documents {
            let score = ScoreEntity::from(document);
            grouped.entry(score.round_id.clone()).or_default().push(score);
        }
        Ok(grouped)
    }

    async fn find_round(&self, id: String) -> MongoResult<Option<RoundRecord>> {
        let document = self
            .rounds()
            .await
            .find_one(doc_id(&id))
            .await
            .map_err(|source| MongoDaoError::LoadRound {
                id: id.clone(),
                source,
            })?;

        let Some(document) = document else {
            return Ok(None);
        };

        let scores: Vec<ScoreEntity> = self
            .scores()
            .await
            .find(doc! { "round_id": id.as_str() })
            .sort(doc! { "updated_at": 1 })
            .await
            .map_err(|source| MongoDaoError::LoadRound {
                id: id.clone(),
                source,
            })?
            .map_ok(ScoreEntity::from)
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::LoadRound { id, source })?;

        Ok(Some(RoundRecord {
            round: document.into(),
            scores,
        }))
    }

    async fn list_rounds(&self) -> MongoResult<Vec<RoundEntity>> {
        let documents: Vec<MongoRoundDocument> = self
            .rounds()
            .await
            .find(doc! {})
            .sort(doc! { "start_at": -1 })
            .await
            .map_err(|source| MongoDaoError::ListRounds { source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::ListRounds { source })?;

        Ok(documents.into_iter().map(Into::into).collect())
    }

    async fn list_active_or_upcoming(&self, now: OffsetDateTime) -> MongoResult<Vec<RoundRecord>> {
        let documents: Vec<MongoRoundDocument> = self
            .rounds()
            .await
            .find(doc! { "end_at": { "$gte": to_bson_datetime(now) } })
            .sort(doc! { "start_at": 1 })
            .await
            .map_err(|source| MongoDaoError::ListRounds { source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::ListRounds { source })?;

        let ids: Vec<String> = documents.iter().map(|doc| doc.id.clone()).collect();
        let mut scores = self.load_scores(&ids).await?;

        Ok(documents
            .into_iter()
            .map(|document| {
                let scores = scores.remove(&document.id).unwrap_or_default();
                RoundRecord {
                    round: document.into(),
                    scores,
                }
            })
            .collect())
    }

    async fn update_total_points(&self, id: String, total: u64) -> MongoResult<bool> {
        let result = self
            .rounds()
            .await
            .update_one(
                doc_id(&id),
                doc! { "$set": { "total_points": to_i64(total) } },
            )
            .await
            .map_err(|source| MongoDaoError::UpdateRound { id, source })?;
        Ok(result.matched_count > 0)
    }

    async fn update_participant_stats(&self, score: ScoreEntity) -> MongoResult<()> {
        self.scores()
            .await
            .update_one(
                doc! { "round_id": score.round_id.as_str(), "user_id": score.user_id.as_str() },
                score_upsert(&score),
            )
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::SaveScore {
                round_id: score.round_id.clone(),
                user_id: score.user_id.clone(),
                source,
            })?;
        Ok(())
    }

    async fn delete_round(&self, id: String) -> MongoResult<bool> {
        self.scores()
            .await
            .delete_many(doc! { "round_id": id.as_str() })
            .await
            .map_err(|source| MongoDaoError::DeleteRound {
                id: id.clone(),
                source,
            })?;

        let result = self
            .rounds()
            .await
            .delete_one(doc_id(&id))
            .await
            .map_err(|source| MongoDaoError::DeleteRound { id, source })?;
        Ok(result.deleted_count > 0)
    }
}

impl RoundStore for MongoRoundStore {
    fn create_round(&self, round: NewRoundEntity) -> BoxFuture<'static, StorageResult<RoundEntity>> {
        let store = self.clone();
        Box::pin(async move { store.create_round(round).await.map_err(Into::into) })
    }

    fn find_round(&self, id: String) -> BoxFuture<'static, StorageResult<Option<RoundRecord>>> {
        let store = self.clone();
        Box::pin(async move { store.find_round(id).await.map_err(Into::into) })
    }

    fn list_rounds(&self) -> BoxFuture<'static, StorageResult<Vec<RoundEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_rounds().await.map_err(Into::into) })
    }

    fn list_active_or_upcoming(
        &self,
        now: OffsetDateTime,
    ) -> BoxFuture<'static, StorageResult<Vec<RoundRecord>>> {
        let store = self.clone();
        Box::pin(async move { store.list_active_or_upcoming(now).await.map_err(Into::into) })
    }

    fn update_total_points(&self, id: String, total: u64) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { store.update_total_points(id, total).await.map_err(Into::into) })
    }

    fn update_participant_stats(&self, score: ScoreEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .update_participant_stats(score)
                .await
                .map_err(Into::into)
        })
    }

    fn delete_round(&self, id: String) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { store.delete_round(id).await.map_err(Into::into) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
