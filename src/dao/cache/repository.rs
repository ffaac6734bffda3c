use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use dashmap::DashMap;
use serde::{Serialize, de::DeserializeOwned};
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    dao::{
        cache::CacheBackend,
        models::CachedRoundState,
        storage::{StorageError, StorageResult},
    },
    state::{
        leaderboard::Leaderboard,
        round::{Round, RoundParticipant, RoundStatus},
        session::GameplaySession,
    },
};

/// Key builder for everything the repository stores under its prefix.
#[derive(Debug, Clone)]
pub struct CacheKeys {
    prefix: String,
}

impl CacheKeys {
    /// Keys namespaced under `prefix`.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Set of rounds the sweeps still track.
    pub fn active_rounds(&self) -> String {
        format!("{}active_rounds", self.prefix)
    }

    /// Serialized [`CachedRoundState`].
    pub fn state(&self, round_id: &str) -> String {
        format!("{}round:{round_id}:state", self.prefix)
    }

    /// Serialized [`Leaderboard`].
    pub fn leaderboard(&self, round_id: &str) -> String {
        format!("{}round:{round_id}:leaderboard", self.prefix)
    }

    /// Session tap counter.
    pub fn taps(&self, round_id: &str, user_id: &str) -> String {
        format!("{}round:{round_id}:user:{user_id}:taps", self.prefix)
    }

    /// Last accepted tap time, used by the throttle.
    pub fn last_tap(&self, round_id: &str, user_id: &str) -> String {
        format!("{}round:{round_id}:user:{user_id}:last_tap", self.prefix)
    }

    /// Glob covering every per-round key.
    pub fn round_pattern(&self, round_id: &str) -> String {
        format!("{}round:{round_id}:*", self.prefix)
    }
}

/// Expiry settings for cached records.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Namespace of every key.
    pub key_prefix: String,
    /// Extra lifetime of a leaderboard past its round end.
    pub leaderboard_ttl: Duration,
    /// Expiry of the last-tap marker.
    pub last_tap_ttl: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            key_prefix: "rounds:".into(),
            leaderboard_ttl: Duration::from_secs(3600),
            last_tap_ttl: Duration::from_secs(10),
        }
    }
}

/// Round-level view over a [`CacheBackend`].
///
/// Apart from [`CacheRepository::create_round`] and the `try_*` session
/// calls, every operation swallows backend failures after logging them and
/// returns an empty or no-op result. [`CacheRepository::is_degraded`] reports
/// whether the last backend call failed.
pub struct CacheRepository {
    backend: Arc<dyn CacheBackend>,
    keys: CacheKeys,
    leaderboard_ttl: Duration,
    last_tap_ttl: Duration,
    round_locks: DashMap<String, Arc<Mutex<()>>>,
    degraded: AtomicBool,
}

impl CacheRepository {
    /// Repository over `backend`, starting healthy.
    pub fn new(backend: Arc<dyn CacheBackend>, settings: CacheSettings) -> Self {
        Self {
            backend,
            keys: CacheKeys::new(settings.key_prefix),
            leaderboard_ttl: settings.leaderboard_ttl,
            last_tap_ttl: settings.last_tap_ttl,
            round_locks: DashMap::new(),
            degraded: AtomicBool::new(false),
        }
    }

    /// Key layout in use.
    pub fn keys(&self) -> &CacheKeys {
        &self.keys
    }

    /// Whether the most recent backend call failed.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    /// Ping the backend, updating the degraded flag.
    pub async fn ping(&self) -> StorageResult<()> {
        let result = self.backend.ping().await;
        self.track(&result);
        result
    }

    fn track<T>(&self, result: &StorageResult<T>) {
        match result {
            Ok(_) => {
                if self.degraded.swap(false, Ordering::SeqCst) {
                    info!("cache reachable again; leaving degraded cache mode");
                }
            }
            Err(StorageError::Unavailable { message, .. }) => {
                if !self.degraded.swap(true, Ordering::SeqCst) {
                    warn!(error = %message, "cache unreachable; entering degraded cache mode");
                }
            }
            Err(_) => {}
        }
    }

    /// Log and drop a failure, returning `None`.
    fn settle<T>(&self, operation: &'static str, round_id: &str, result: StorageResult<T>) -> Option<T> {
        self.track(&result);
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(operation, round_id, error = %err, "cache operation failed");
                None
            }
        }
    }

    fn round_lock(&self, round_id: &str) -> Arc<Mutex<()>> {
        self.round_locks
            .entry(round_id.to_owned())
            .or_default()
            .clone()
    }

    async fn read_json<T: DeserializeOwned>(&self, key: String) -> StorageResult<Option<T>> {
        let result = self.backend.get(key.clone()).await;
        self.track(&result);
        match result? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|err| StorageError::corrupt(key, err)),
            None => Ok(None),
        }
    }

    async fn write_json<T: Serialize>(
        &self,
        key: String,
        value: &T,
        ttl: Option<Duration>,
    ) -> StorageResult<()> {
        let raw = serde_json::to_string(value).map_err(|err| StorageError::corrupt(&key, err))?;
        let result = self.backend.set(key, raw, ttl).await;
        self.track(&result);
        result
    }

    async fn write_state(&self, state: &CachedRoundState) -> StorageResult<()> {
        self.write_json(self.keys.state(&state.id), state, None).await
    }

    /// Leaderboards outlive the round window by the configured TTL, so a
    /// live round never loses its ranking to expiry.
    fn leaderboard_expiry(&self, ends_at: OffsetDateTime, now: OffsetDateTime) -> Duration {
        let remaining = Duration::try_from(ends_at - now).unwrap_or_default();
        self.leaderboard_ttl.saturating_add(remaining)
    }

    async fn write_leaderboard(
        &self,
        leaderboard: &Leaderboard,
        ends_at: OffsetDateTime,
        now: OffsetDateTime,
    ) -> StorageResult<()> {
        self.write_json(
            self.keys.leaderboard(&leaderboard.id),
            leaderboard,
            Some(self.leaderboard_expiry(ends_at, now)),
        )
        .await
    }

    async fn add_active(&self, round_id: &str) -> StorageResult<()> {
        let result = self
            .backend
            .set_add(self.keys.active_rounds(), round_id.to_owned())
            .await;
        self.track(&result);
        result
    }

    /// Write state, empty leaderboard and active-set membership for a new round.
    ///
    /// Unlike the other writes this reports failure so creation can roll back
    /// the durable row.
    pub async fn create_round(&self, round: &Round, now: OffsetDateTime) -> StorageResult<()> {
        let state = CachedRoundState::from_round(round, now);
        self.write_state(&state).await?;
        self.write_leaderboard(
            &Leaderboard::empty(&round.id, state.status),
            round.window.ends_at(),
            now,
        )
        .await?;
        self.add_active(&round.id).await?;
        debug!(round_id = %round.id, "round cached");
        Ok(())
    }

    /// Cached state, failing on unreachable cache or undecodable data.
    pub async fn try_state(&self, round_id: &str) -> StorageResult<Option<CachedRoundState>> {
        self.read_json(self.keys.state(round_id)).await
    }

    /// Cached state, `None` on a miss or backend failure.
    pub async fn state(&self, round_id: &str) -> Option<CachedRoundState> {
        let result = self.try_state(round_id).await;
        self.settle("read_state", round_id, result).flatten()
    }

    /// Cached leaderboard, `None` on a miss or backend failure.
    pub async fn leaderboard(&self, round_id: &str) -> Option<Leaderboard> {
        let result = self.read_json(self.keys.leaderboard(round_id)).await;
        self.settle("read_leaderboard", round_id, result).flatten()
    }

    async fn save_leaderboard(&self, leaderboard: &Leaderboard, state: &CachedRoundState) {
        let result = self
            .write_leaderboard(leaderboard, state.ends_at, state.last_update)
            .await;
        self.settle("save_leaderboard", &leaderboard.id, result);
    }

    /// Domain round rebuilt from the cached state and leaderboard.
    ///
    /// A state listing participants without a leaderboard to rank them is
    /// incomplete and reported as a miss, so the caller reloads the round
    /// from the durable store.
    pub async fn find_round(&self, round_id: &str) -> Option<Round> {
        let state = self.state(round_id).await?;
        let leaderboard = self.leaderboard(round_id).await;
        if leaderboard.is_none() && !state.participants.is_empty() {
            debug!(round_id, "cached leaderboard missing; treating round as a cache miss");
            return None;
        }
        match state.to_round(leaderboard.as_ref()) {
            Ok(round) => Some(round),
            Err(err) => {
                warn!(round_id, error = %err, "cached round has an invalid window");
                None
            }
        }
    }

    /// Ids in the active set, propagating backend failures.
    pub async fn try_active_round_ids(&self) -> StorageResult<Vec<String>> {
        let result = self.backend.set_members(self.keys.active_rounds()).await;
        self.track(&result);
        result
    }

    /// Ids in the active set, empty on backend failure.
    pub async fn active_round_ids(&self) -> Vec<String> {
        let result = self.try_active_round_ids().await;
        self.settle("list_active", "*", result).unwrap_or_default()
    }

    /// Whether `round_id` is in the active set.
    pub async fn is_active_member(&self, round_id: &str) -> bool {
        let result = self
            .backend
            .set_contains(self.keys.active_rounds(), round_id.to_owned())
            .await;
        self.settle("check_active", round_id, result)
            .unwrap_or(false)
    }

    /// Drop `round_id` from the active set.
    pub async fn remove_active(&self, round_id: &str) {
        let result = self
            .backend
            .set_remove(self.keys.active_rounds(), round_id.to_owned())
            .await;
        self.settle("remove_active", round_id, result);
    }

    /// Overwrite the cached total on both records.
    pub async fn update_total_points(&self, round_id: &str, total: u64, now: OffsetDateTime) {
        let lock = self.round_lock(round_id);
        let _guard = lock.lock().await;

        let Some(mut state) = self.state(round_id).await else {
            return;
        };
        state.total_points = total;
        state.last_update = now;
        let result = self.write_state(&state).await;
        self.settle("update_total", round_id, result);

        if let Some(mut leaderboard) = self.leaderboard(round_id).await {
            leaderboard.total_points = total;
            self.save_leaderboard(&leaderboard, &state).await;
        }
    }

    /// Persist a status computed by the status sweep.
    pub async fn set_status(&self, round_id: &str, status: RoundStatus, now: OffsetDateTime) {
        let lock = self.round_lock(round_id);
        let _guard = lock.lock().await;

        let Some(mut state) = self.state(round_id).await else {
            return;
        };
        state.status = status;
        state.last_update = now;
        let result = self.write_state(&state).await;
        self.settle("set_status", round_id, result);

        if let Some(mut leaderboard) = self.leaderboard(round_id).await {
            leaderboard.status = status;
            self.save_leaderboard(&leaderboard, &state).await;
        }
    }

    /// Insert or update one participant of `round`, re-rank, and write the
    /// new total back to the state record. Returns the updated snapshot.
    ///
    /// A leaderboard that vanished while the state still exists is reseeded
    /// from `round`'s participants before the update is applied. An update
    /// carrying fewer taps than the ranked entry is dropped. The cached total
    /// never decreases.
    pub async fn update_participant(
        &self,
        round: &Round,
        participant: &RoundParticipant,
        now: OffsetDateTime,
    ) -> Option<Leaderboard> {
        let round_id = round.id.as_str();
        let lock = self.round_lock(round_id);
        let _guard = lock.lock().await;

        let mut state = self.state(round_id).await?;
        let mut leaderboard = match self.leaderboard(round_id).await {
            Some(leaderboard) => leaderboard,
            None => {
                debug!(round_id, participants = round.participants.len(), "leaderboard missing; reseeding from round");
                let mut seeded = round.leaderboard_snapshot(now);
                seeded.status = state.status;
                seeded
            }
        };

        if leaderboard
            .entry(&participant.user_id)
            .is_some_and(|entry| entry.taps > participant.taps)
        {
            debug!(round_id, user_id = %participant.user_id, "ignoring out-of-order participant update");
            return Some(leaderboard);
        }

        leaderboard.upsert(participant);
        leaderboard.total_points = leaderboard.total_points.max(state.total_points);
        let result = self.write_leaderboard(&leaderboard, state.ends_at, now).await;
        self.settle("update_participant", round_id, result)?;

        for entry in &leaderboard.entries {
            if !state.participants.contains(&entry.user_id) {
                state.participants.push(entry.user_id.clone());
            }
        }
        state.total_points = leaderboard.total_points;
        state.last_update = now;
        let result = self.write_state(&state).await;
        self.settle("update_participant_state", round_id, result);

        Some(leaderboard)
    }

    /// Write state, leaderboard and active-set membership from a durable round.
    pub async fn rebuild_round(&self, round: &Round, now: OffsetDateTime) -> bool {
        let lock = self.round_lock(&round.id);
        let _guard = lock.lock().await;

        let state = CachedRoundState::from_round(round, now);
        let leaderboard = round.leaderboard_snapshot(now);

        let result = async {
            self.write_state(&state).await?;
            self.write_leaderboard(&leaderboard, round.window.ends_at(), now)
                .await?;
            self.add_active(&round.id).await
        }
        .await;
        self.settle("rebuild_round", &round.id, result).is_some()
    }

    /// Drop every key of a round and its active-set membership.
    pub async fn purge_round(&self, round_id: &str) -> bool {
        let removed = self
            .backend
            .delete_by_pattern(self.keys.round_pattern(round_id))
            .await;
        let removed = self.settle("purge_round", round_id, removed);
        self.remove_active(round_id).await;
        self.round_locks.remove(round_id);
        removed.is_some()
    }

    /// Session of `user_id` in `round_id`, failing when the cache is unreachable.
    pub async fn try_session(
        &self,
        user_id: &str,
        round_id: &str,
    ) -> StorageResult<Option<GameplaySession>> {
        let taps = self.backend.get(self.keys.taps(round_id, user_id)).await;
        self.track(&taps);
        let Some(taps) = taps? else {
            return Ok(None);
        };
        let taps = taps
            .parse::<u64>()
            .map_err(|err| StorageError::corrupt(self.keys.taps(round_id, user_id), err))?;

        let last_tap = self.backend.get(self.keys.last_tap(round_id, user_id)).await;
        self.track(&last_tap);
        let last_tap_at = last_tap?
            .and_then(|raw| raw.parse::<i128>().ok())
            .and_then(|millis| OffsetDateTime::from_unix_timestamp_nanos(millis * 1_000_000).ok());

        Ok(Some(GameplaySession {
            user_id: user_id.to_owned(),
            round_id: round_id.to_owned(),
            taps,
            last_tap_at,
        }))
    }

    /// Persist tap count and, when present, the last tap instant with its TTL.
    pub async fn try_save_session(&self, session: &GameplaySession) -> StorageResult<()> {
        if let Some(last_tap_at) = session.last_tap_at {
            let millis = last_tap_at.unix_timestamp_nanos() / 1_000_000;
            let result = self
                .backend
                .set(
                    self.keys.last_tap(&session.round_id, &session.user_id),
                    millis.to_string(),
                    Some(self.last_tap_ttl),
                )
                .await;
            self.track(&result);
            result?;
        }

        let result = self
            .backend
            .set(
                self.keys.taps(&session.round_id, &session.user_id),
                session.taps.to_string(),
                None,
            )
            .await;
        self.track(&result);
        result
    }

    /// Forget the tap session of one user.
    pub async fn clear_session(&self, user_id: &str, round_id: &str) {
        let result = self
            .backend
            .del(vec![
                self.keys.taps(round_id, user_id),
                self.keys.last_tap(round_id, user_id),
            ])
            .await;
        self.settle("clear_session", round_id, result);
    }
}
