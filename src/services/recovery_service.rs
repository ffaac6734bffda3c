use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::{
    dao::models::RoundRecord,
    state::{SharedState, round::Round},
};

/// Counters of one recovery pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Rounds written back into the cache.
    pub restored: usize,
    /// Rounds left alone.
    pub skipped: usize,
    /// Rounds whose restore failed.
    pub failed: usize,
}

/// Rebuild the cache for every durable round whose window has not elapsed at `now`.
///
/// Best effort: a failing round is logged and counted, the pass goes on.
pub async fn recover_at(state: &SharedState, now: OffsetDateTime) -> RecoveryReport {
    let mut report = RecoveryReport::default();

    let Some(store) = state.round_store().await else {
        warn!("skipping cache recovery: no round store installed");
        return report;
    };

    let records = match store.list_active_or_upcoming(now).await {
        Ok(records) => records,
        Err(err) => {
            warn!(error = %err, "failed to list live rounds for recovery");
            return report;
        }
    };

    for record in records {
        match restore_record(state, &record, now).await {
            Some(true) => report.restored += 1,
            Some(false) => report.failed += 1,
            None => report.skipped += 1,
        }
    }

    info!(
        restored = report.restored,
        skipped = report.skipped,
        failed = report.failed,
        "cache recovery finished"
    );
    report
}

async fn restore_record(state: &SharedState, record: &RoundRecord, now: OffsetDateTime) -> Option<bool> {
    match record.to_round() {
        Ok(round) => restore_round(state, &round, now).await,
        Err(err) => {
            warn!(round_id = %record.round.id, error = %err, "durable round has an invalid window");
            Some(false)
        }
    }
}

/// Write `round` back into the cache unless its window has elapsed.
///
/// Returns `None` when skipped, otherwise whether the cache accepted it.
pub async fn restore_round(state: &SharedState, round: &Round, now: OffsetDateTime) -> Option<bool> {
    if round.window.has_elapsed(now) {
        debug!(round_id = %round.id, "not restoring elapsed round");
        return None;
    }
    let restored = state.cache().rebuild_round(round, now).await;
    if restored {
        debug!(round_id = %round.id, participants = round.participants.len(), "round restored to cache");
    }
    Some(restored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dao::{
            models::{NewRoundEntity, ScoreEntity},
            round_store::RoundStore,
        },
        state::{round::RoundWindow, testing::TestHarness},
    };

    fn at(secs: i64) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(1_700_000_000 + secs).unwrap()
    }

    async fn seed(harness: &TestHarness, id: &str, start: i64, end: i64) {
        harness
            .store
            .create_round(NewRoundEntity {
                id: Some(id.into()),
                starts_at: at(start),
                ends_at: at(end),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn restores_live_rounds_with_their_scores() {
        let harness = TestHarness::new().await;
        seed(&harness, "live", -10, 50).await;
        seed(&harness, "upcoming", 30, 90).await;
        seed(&harness, "over", -100, -40).await;
        harness
            .store
            .update_participant_stats(ScoreEntity {
                round_id: "live".into(),
                user_id: "u1".into(),
                username: "Alice".into(),
                taps: 11,
                points: 20,
                zero_score: false,
                updated_at: at(-5),
            })
            .await
            .unwrap();

        let report = recover_at(&harness.state, at(0)).await;
        assert_eq!(report.restored, 2);
        assert_eq!(report.failed, 0);

        let cache = harness.state.cache();
        let mut ids = cache.active_round_ids().await;
        ids.sort();
        assert_eq!(ids, vec!["live", "upcoming"]);

        let live = cache.find_round("live").await.unwrap();
        assert_eq!(live.total_points, 20);
        assert_eq!(live.participants[0].user_id, "u1");
        assert!(cache.find_round("over").await.is_none());
    }

    #[tokio::test]
    async fn unreachable_cache_counts_failures() {
        let harness = TestHarness::new().await;
        seed(&harness, "live", -10, 50).await;
        harness.cache.set_available(false);

        let report = recover_at(&harness.state, at(0)).await;
        assert_eq!(report.failed, 1);
    }

    #[tokio::test]
    async fn missing_store_is_a_no_op() {
        let harness = TestHarness::new().await;
        harness.state.clear_round_store().await;
        assert_eq!(recover_at(&harness.state, at(0)).await, RecoveryReport::default());
    }

    #[tokio::test]
    async fn elapsed_rounds_are_skipped() {
        let harness = TestHarness::new().await;
        let round = Round::new("r", RoundWindow::new(at(-60), at(-1)).unwrap());
        assert_eq!(restore_round(&harness.state, &round, at(0)).await, None);
        assert!(harness.cache.is_empty());
    }
}
