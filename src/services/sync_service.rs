use std::{collections::HashMap, future::Future, sync::Arc, time::Duration};

use time::OffsetDateTime;
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};
use tracing::{debug, info, warn};

use crate::{
    dao::{
        models::{CachedRoundState, NewRoundEntity, ScoreEntity},
        round_store::RoundStore,
        storage::{StorageError, StorageResult},
    },
    dto::events::WinnerSummary,
    services::{broadcast_service, recovery_service},
    state::{SharedState, leaderboard::Leaderboard, round::RoundStatus},
};

/// Counters of one cache-to-durable pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Rounds missing from the durable store and inserted.
    pub created: usize,
    /// Stored totals raised to the cached value.
    pub totals_updated: usize,
    /// Score rows upserted.
    pub scores_written: usize,
    /// Rounds removed from the active set for lack of cached state.
    pub dropped: usize,
}

impl SyncReport {
    fn absorb(&mut self, other: SyncReport) {
        self.created += other.created;
        self.totals_updated += other.totals_updated;
        self.scores_written += other.scores_written;
        self.dropped += other.dropped;
    }

    /// Whether the pass wrote anything.
    pub fn is_noop(&self) -> bool {
        *self == SyncReport::default()
    }
}

/// Recompute each cached round's status and announce transitions.
///
/// Returns how many rounds changed status.
pub async fn status_sweep_at(state: &SharedState, now: OffsetDateTime) -> usize {
    let cache = state.cache();
    let mut transitions = 0;

    for round_id in cache.active_round_ids().await {
        let Some(cached) = cache.state(&round_id).await else {
            continue;
        };
        let window = match cached.window() {
            Ok(window) => window,
            Err(err) => {
                warn!(round_id = %round_id, error = %err, "cached round has an invalid window");
                continue;
            }
        };

        let status = window.status_at(now);
        if status == cached.status {
            continue;
        }

        info!(round_id = %round_id, from = %cached.status, to = %status, "round status changed");
        cache.set_status(&round_id, status, now).await;
        broadcast_service::broadcast_round_update(
            state,
            &round_id,
            &window,
            cached.total_points,
            status,
        );
        if status == RoundStatus::Finished {
            announce_finished(state, &cached, now).await;
        }
        transitions += 1;
    }

    transitions
}

async fn announce_finished(state: &SharedState, cached: &CachedRoundState, now: OffsetDateTime) {
    let leaderboard = state.cache().leaderboard(&cached.id).await;
    let winner = match cached.to_round(leaderboard.as_ref()) {
        Ok(round) => round.winner(now).map(WinnerSummary::from),
        Err(_) => None,
    };
    broadcast_service::broadcast_round_finished(state, &cached.id, cached.total_points, winner);
}

/// Push every cached round to the durable store.
///
/// Rounds missing from the durable store are created from the cached window,
/// participant stats that differ are upserted, and a differing total is
/// overwritten with the cached one. Rounds without readable cached state are
/// dropped from the active set.
pub async fn sync_sweep_at(state: &SharedState, now: OffsetDateTime) -> SyncReport {
    let mut report = SyncReport::default();

    let Some(store) = state.round_store().await else {
        debug!("skipping cache sync: no round store installed");
        return report;
    };
    let cache = state.cache();
    let round_ids = match cache.try_active_round_ids().await {
        Ok(ids) => ids,
        Err(err) => {
            warn!(error = %err, "skipping cache sync: active rounds unreadable");
            return report;
        }
    };

    for round_id in round_ids {
        let cached = match cache.try_state(&round_id).await {
            Ok(Some(cached)) => cached,
            Ok(None) | Err(StorageError::Corrupt { .. }) => {
                warn!(round_id = %round_id, "dropping round without readable cached state");
                cache.remove_active(&round_id).await;
                report.dropped += 1;
                continue;
            }
            Err(err) => {
                warn!(round_id = %round_id, error = %err, "failed to read cached round");
                continue;
            }
        };

        let leaderboard = cache.leaderboard(&round_id).await;
        match flush_round(store.as_ref(), &cached, leaderboard.as_ref()).await {
            Ok(flushed) => report.absorb(flushed),
            Err(err) => {
                warn!(round_id = %round_id, error = %err, "failed to sync round to durable store");
            }
        }
    }

    if !report.is_noop() {
        info!(
            created = report.created,
            totals = report.totals_updated,
            scores = report.scores_written,
            dropped = report.dropped,
            at = %now,
            "cache sync pass wrote changes"
        );
    }
    report
}

/// Write one cached round into the durable store.
async fn flush_round(
    store: &dyn RoundStore,
    cached: &CachedRoundState,
    leaderboard: Option<&Leaderboard>,
) -> StorageResult<SyncReport> {
    let mut report = SyncReport::default();
    let round_id = cached.id.clone();

    let record = match store.find_round(round_id.clone()).await? {
        Some(record) => Some(record),
        None => {
            match store
                .create_round(NewRoundEntity {
                    id: Some(round_id.clone()),
                    starts_at: cached.starts_at,
                    ends_at: cached.ends_at,
                })
                .await
            {
                Ok(_) | Err(StorageError::Duplicate { .. }) => {}
                Err(err) => return Err(err),
            }
            debug!(round_id = %round_id, "created missing durable round from cache");
            report.created += 1;
            None
        }
    };

    let stored_scores: HashMap<&str, (u64, u64)> = record
        .as_ref()
        .map(|record| {
            record
                .scores
                .iter()
                .map(|score| (score.user_id.as_str(), (score.taps, score.points)))
                .collect()
        })
        .unwrap_or_default();

    if let Some(leaderboard) = leaderboard {
        for participant in leaderboard.participants() {
            let score = ScoreEntity::from_participant(&round_id, &participant);
            if stored_scores.get(score.user_id.as_str()) == Some(&(score.taps, score.points)) {
                continue;
            }
            store.update_participant_stats(score).await?;
            report.scores_written += 1;
        }
    }

    let stored_total = record.as_ref().map(|record| record.round.total_points).unwrap_or(0);
    if stored_total != cached.total_points {
        store
            .update_total_points(round_id, cached.total_points)
            .await?;
        report.totals_updated += 1;
    }

    Ok(report)
}

/// Remove cache entries of rounds that are gone, elapsed, or finished and stale.
///
/// An elapsed round is flushed to the durable store and announced as finished
/// (if the status sweep has not done so yet) before its keys are deleted.
/// Returns how many rounds were purged.
pub async fn cleanup_sweep_at(state: &SharedState, now: OffsetDateTime) -> usize {
    let cache = state.cache();
    let round_ids = match cache.try_active_round_ids().await {
        Ok(ids) => ids,
        Err(err) => {
            warn!(error = %err, "skipping cleanup: active rounds unreadable");
            return 0;
        }
    };
    let store = state.round_store().await;
    let retention = state.config().finished_retention();
    let mut purged = 0;

    for round_id in round_ids {
        let cached = match cache.try_state(&round_id).await {
            Ok(Some(cached)) => cached,
            Ok(None) | Err(StorageError::Corrupt { .. }) => {
                purge(state, &round_id).await;
                purged += 1;
                continue;
            }
            Err(err) => {
                warn!(round_id = %round_id, error = %err, "failed to read cached round");
                continue;
            }
        };

        let elapsed = now > cached.ends_at;
        let stale = cached.status == RoundStatus::Finished && now - cached.last_update > retention;
        if !(elapsed || stale || cached.window().is_err()) {
            continue;
        }

        if let Some(store) = store.as_ref() {
            let leaderboard = cache.leaderboard(&round_id).await;
            if let Err(err) = flush_round(store.as_ref(), &cached, leaderboard.as_ref()).await {
                warn!(round_id = %round_id, error = %err, "final flush failed; keeping round cached");
                continue;
            }
        }
        if cached.status != RoundStatus::Finished && cached.window().is_ok() {
            announce_finished(state, &cached, now).await;
        }

        purge(state, &round_id).await;
        purged += 1;
    }

    if purged > 0 {
        info!(purged, "cache cleanup removed rounds");
    }
    purged
}

async fn purge(state: &SharedState, round_id: &str) {
    debug!(round_id, "purging cached round");
    state.cache().purge_round(round_id).await;
    state.release_tap_locks(round_id);
    state.hub().prune(round_id);
}

/// Handles of the periodic sweeps.
pub struct SyncScheduler {
    tasks: Vec<JoinHandle<()>>,
}

impl SyncScheduler {
    /// Run startup recovery, then spawn the status, sync and cleanup sweeps.
    ///
    /// Every sweep stops once `shutdown` becomes `true` (or its sender is dropped).
    pub async fn start(state: SharedState, shutdown: watch::Receiver<bool>) -> Self {
        recovery_service::recover_at(&state, OffsetDateTime::now_utc()).await;

        let config = state.config().clone();
        let tasks = vec![
            spawn_periodic(
                "status",
                config.status_interval(),
                state.clone(),
                shutdown.clone(),
                |state| async move {
                    status_sweep_at(&state, OffsetDateTime::now_utc()).await;
                },
            ),
            spawn_periodic(
                "sync",
                config.sync_interval(),
                state.clone(),
                shutdown.clone(),
                |state| async move {
                    sync_sweep_at(&state, OffsetDateTime::now_utc()).await;
                },
            ),
            spawn_periodic(
                "cleanup",
                config.cleanup_interval(),
                state,
                shutdown,
                |state| async move {
                    cleanup_sweep_at(&state, OffsetDateTime::now_utc()).await;
                },
            ),
        ];

        Self { tasks }
    }

    /// Wait for every sweep to stop.
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "sweep task ended abnormally");
            }
        }
    }
}

fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    state: SharedState,
    mut shutdown: watch::Receiver<bool>,
    sweep: F,
) -> JoinHandle<()>
where
    F: Fn(SharedState) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => sweep(Arc::clone(&state)).await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!(sweep = name, "sweep stopped");
                        return;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use tokio::time::timeout;

    use super::*;
    use crate::{
        dto::events::RoundEvent,
        state::{
            round::{Round, RoundParticipant, RoundWindow},
            testing::TestHarness,
        },
    };

    fn at(secs: i64) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(1_700_000_000 + secs).unwrap()
    }

    fn participant(id: &str, taps: u64, points: u64, updated: i64) -> RoundParticipant {
        RoundParticipant {
            user_id: id.into(),
            name: id.into(),
            taps,
            points,
            updated_at: at(updated),
            zero_score: false,
        }
    }

    async fn cache_round(harness: &TestHarness, id: &str, start: i64, end: i64, created: i64) -> Round {
        let round = Round::new(id, RoundWindow::new(at(start), at(end)).unwrap());
        harness.state.cache().create_round(&round, at(created)).await.unwrap();
        round
    }

    #[tokio::test]
    async fn status_sweep_announces_each_transition_once() {
        let harness = TestHarness::new().await;
        cache_round(&harness, "r1", 10, 20, 0).await;
        let mut global = harness.state.hub().subscribe_global();

        assert_eq!(status_sweep_at(&harness.state, at(5)).await, 0);
        assert_eq!(status_sweep_at(&harness.state, at(10)).await, 1);
        assert_eq!(status_sweep_at(&harness.state, at(15)).await, 0);

        match global.recv().await.unwrap() {
            RoundEvent::RoundUpdate(update) => assert_eq!(update.status, RoundStatus::Active),
            other => panic!("unexpected event {other:?}"),
        }
        let cached = harness.state.cache().state("r1").await.unwrap();
        assert_eq!(cached.status, RoundStatus::Active);
    }

    #[tokio::test]
    async fn finishing_round_announces_the_winner() {
        let harness = TestHarness::new().await;
        let round = cache_round(&harness, "r1", 0, 20, 0).await;
        let cache = harness.state.cache();
        cache.update_participant(&round, &participant("a", 11, 20, 3), at(3)).await;
        cache.update_participant(&round, &participant("b", 11, 20, 4), at(4)).await;
        status_sweep_at(&harness.state, at(1)).await;
        let mut global = harness.state.hub().subscribe_global();

        assert_eq!(status_sweep_at(&harness.state, at(21)).await, 1);

        assert!(matches!(global.recv().await.unwrap(), RoundEvent::RoundUpdate(_)));
        match global.recv().await.unwrap() {
            RoundEvent::RoundFinished(finished) => {
                assert_eq!(finished.total_points, 40);
                assert_eq!(finished.winner.unwrap().user_id, "a");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn sync_creates_missing_rounds_and_pushes_scores() {
        let harness = TestHarness::new().await;
        let round = cache_round(&harness, "r1", 0, 60, 0).await;
        harness
            .state
            .cache()
            .update_participant(&round, &participant("a", 11, 20, 3), at(3))
            .await;

        let report = sync_sweep_at(&harness.state, at(5)).await;
        assert_eq!(report.created, 1);
        assert_eq!(report.scores_written, 1);
        assert_eq!(report.totals_updated, 1);

        let record = harness.store.find_round("r1".into()).await.unwrap().unwrap();
        assert_eq!(record.round.total_points, 20);
        assert_eq!(record.scores[0].points, 20);
    }

    #[tokio::test]
    async fn sync_and_cleanup_are_idempotent() {
        let harness = TestHarness::new().await;
        let live = cache_round(&harness, "live", 0, 60, 0).await;
        cache_round(&harness, "over", -120, -60, -150).await;
        harness
            .state
            .cache()
            .update_participant(&live, &participant("a", 3, 3, 2), at(2))
            .await;

        sync_sweep_at(&harness.state, at(5)).await;
        let purged = cleanup_sweep_at(&harness.state, at(5)).await;
        assert_eq!(purged, 1);

        let cached_before = harness.state.cache().state("live").await;
        let durable_before = harness.store.find_round("live".into()).await.unwrap();

        assert!(sync_sweep_at(&harness.state, at(5)).await.is_noop());
        assert_eq!(cleanup_sweep_at(&harness.state, at(5)).await, 0);

        assert_eq!(harness.state.cache().state("live").await, cached_before);
        assert_eq!(harness.store.find_round("live".into()).await.unwrap(), durable_before);
    }

    #[tokio::test]
    async fn sync_drops_rounds_without_state() {
        let harness = TestHarness::new().await;
        cache_round(&harness, "r1", 0, 60, 0).await;
        harness.cache.insert_raw("rounds:round:r1:state", "garbage");

        let report = sync_sweep_at(&harness.state, at(5)).await;
        assert_eq!(report.dropped, 1);
        assert!(harness.state.cache().active_round_ids().await.is_empty());
    }

    #[tokio::test]
    async fn cleanup_flushes_and_announces_before_purging() {
        let harness = TestHarness::new().await;
        let round = cache_round(&harness, "r1", 0, 10, 0).await;
        harness
            .state
            .cache()
            .update_participant(&round, &participant("a", 2, 2, 5), at(5))
            .await;
        let mut global = harness.state.hub().subscribe_global();

        assert_eq!(cleanup_sweep_at(&harness.state, at(11)).await, 1);

        let record = harness.store.find_round("r1".into()).await.unwrap().unwrap();
        assert_eq!(record.round.total_points, 2);
        assert_eq!(record.scores.len(), 1);
        match global.recv().await.unwrap() {
            RoundEvent::RoundFinished(finished) => assert_eq!(finished.winner.unwrap().user_id, "a"),
            other => panic!("unexpected event {other:?}"),
        }
        assert!(harness.state.cache().state("r1").await.is_none());
        assert!(harness.cache.is_empty());
    }

    #[tokio::test]
    async fn stale_finished_rounds_are_purged_only_after_retention() {
        let harness = TestHarness::new().await;
        cache_round(&harness, "r1", 0, 7_200, 0).await;
        harness.state.cache().set_status("r1", RoundStatus::Finished, at(1)).await;

        assert_eq!(cleanup_sweep_at(&harness.state, at(3_000)).await, 0);
        assert_eq!(cleanup_sweep_at(&harness.state, at(3_602)).await, 1);
        assert!(harness.state.cache().active_round_ids().await.is_empty());
    }

    #[tokio::test]
    async fn cache_rebuilt_from_durable_syncs_back_identically() {
        let harness = TestHarness::new().await;
        harness
            .store
            .create_round(NewRoundEntity {
                id: Some("r1".into()),
                starts_at: at(-10),
                ends_at: at(50),
            })
            .await
            .unwrap();
        for (user, points, updated) in [("a", 9, -8), ("b", 20, -6)] {
            harness
                .store
                .update_participant_stats(ScoreEntity {
                    round_id: "r1".into(),
                    user_id: user.into(),
                    username: user.into(),
                    taps: points,
                    points,
                    zero_score: false,
                    updated_at: at(updated),
                })
                .await
                .unwrap();
        }
        harness.store.update_total_points("r1".into(), 29).await.unwrap();
        let before = harness.store.find_round("r1".into()).await.unwrap().unwrap();

        recovery_service::recover_at(&harness.state, at(0)).await;
        let report = sync_sweep_at(&harness.state, at(1)).await;
        assert!(report.is_noop());

        let after = harness.store.find_round("r1".into()).await.unwrap().unwrap();
        assert_eq!(after.round.total_points, before.round.total_points);
        let ids = |record: &crate::dao::models::RoundRecord| {
            let mut ids: Vec<_> = record.scores.iter().map(|s| s.user_id.clone()).collect();
            ids.sort();
            ids
        };
        assert_eq!(ids(&after), ids(&before));
    }

    #[tokio::test]
    async fn scheduler_stops_on_shutdown() {
        let harness = TestHarness::new().await;
        let (stop_tx, stop_rx) = watch::channel(false);
        let scheduler = SyncScheduler::start(harness.state.clone(), stop_rx).await;

        stop_tx.send(true).unwrap();
        timeout(Duration::from_secs(1), scheduler.join())
            .await
            .unwrap();
    }
}
