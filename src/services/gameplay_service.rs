use serde::Serialize;
use time::OffsetDateTime;
use tracing::{debug, warn};
use utoipa::ToSchema;

use crate::{
    error::ServiceError,
    state::{
        SharedState,
        round::Round,
        session::{GameplaySession, TapOutcome, TapRejection},
        user::AuthenticatedUser,
    },
};

/// Taps and points of one user in one round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct UserStats {
    /// Taps counted in the session.
    pub taps: u64,
    /// Points for those taps, 0 for zero-score users.
    pub points: u64,
    /// Last accepted tap, if any.
    #[serde(with = "time::serde::rfc3339::option")]
    #[schema(value_type = Option<String>, format = DateTime)]
    pub last_tap_at: Option<OffsetDateTime>,
}

/// Decide and record one tap of `user` in `round` at `now`.
///
/// Taps of the same user in the same round are serialised, so the throttle
/// check and the increment observe each other. Only the session keys are
/// written; the caller updates the leaderboard.
pub async fn tap_at(
    state: &SharedState,
    user: &AuthenticatedUser,
    round: &Round,
    now: OffsetDateTime,
) -> Result<TapOutcome, ServiceError> {
    let status = round.status(now);
    if !round.is_active(now) {
        return Ok(TapOutcome::Rejected(TapRejection::NotTappable { status }));
    }

    let lock = state.tap_lock(&user.id, &round.id);
    let _guard = lock.lock().await;

    let mut session = load_or_create(state, &user.id, round).await?;
    let outcome = session.tap(round, user.is_zero_score(), &state.config().throttle(), now);

    if outcome.is_accepted() {
        state
            .cache()
            .try_save_session(&session)
            .await
            .map_err(|err| {
                warn!(user_id = %user.id, round_id = %round.id, error = %err, "failed to save session");
                ServiceError::Degraded
            })?;
    }

    Ok(outcome)
}

/// Session of `user_id` in `round_id`, if the user tapped at least once.
pub async fn session(
    state: &SharedState,
    user_id: &str,
    round_id: &str,
) -> Result<Option<GameplaySession>, ServiceError> {
    state
        .cache()
        .try_session(user_id, round_id)
        .await
        .map_err(|err| {
            warn!(user_id, round_id, error = %err, "failed to load session");
            ServiceError::Degraded
        })
}

/// Stored session, or one resuming from the user's ranked taps when the
/// round was rebuilt without its session keys.
async fn load_or_create(
    state: &SharedState,
    user_id: &str,
    round: &Round,
) -> Result<GameplaySession, ServiceError> {
    if let Some(session) = session(state, user_id, &round.id).await? {
        return Ok(session);
    }

    let mut session = GameplaySession::new(user_id, &round.id);
    if let Some(participant) = round.participant(user_id) {
        debug!(user_id, round_id = %round.id, taps = participant.taps, "resuming session from ranked taps");
        session.taps = participant.taps;
    }
    Ok(session)
}

/// Forget the session of `user_id` in `round_id`.
pub async fn clear_session(state: &SharedState, user_id: &str, round_id: &str) {
    state.cache().clear_session(user_id, round_id).await;
}

/// Current stats of `user` in `round_id`; zero when the user never tapped.
pub async fn user_stats(
    state: &SharedState,
    user: &AuthenticatedUser,
    round_id: &str,
) -> Result<UserStats, ServiceError> {
    let stats = match session(state, &user.id, round_id).await? {
        Some(session) => UserStats {
            taps: session.taps,
            points: session.points(user.is_zero_score()),
            last_tap_at: session.last_tap_at,
        },
        None => UserStats {
            taps: 0,
            points: 0,
            last_tap_at: None,
        },
    };
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use time::Duration;

    use super::*;
    use crate::config::AppConfig;
    use crate::state::{
        round::{RoundParticipant, RoundStatus, RoundWindow},
        session::TapAccepted,
        testing::TestHarness,
        user::UserRole,
    };

    fn at_ms(ms: i64) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap() + Duration::milliseconds(ms)
    }

    fn round(start_ms: i64, end_ms: i64) -> Round {
        Round::new("r1", RoundWindow::new(at_ms(start_ms), at_ms(end_ms)).unwrap())
    }

    fn player() -> AuthenticatedUser {
        AuthenticatedUser::new("u1", "Alice", UserRole::Player)
    }

    #[tokio::test]
    async fn throttle_window_applies_between_requests() {
        let harness = TestHarness::new().await;
        let round = round(0, 5_000);
        let user = player();

        let first = tap_at(&harness.state, &user, &round, at_ms(0)).await.unwrap();
        assert_eq!(
            first,
            TapOutcome::Accepted(TapAccepted {
                taps: 1,
                points: 1,
                timestamp: at_ms(0)
            })
        );

        let second = tap_at(&harness.state, &user, &round, at_ms(10)).await.unwrap();
        assert!(matches!(
            second,
            TapOutcome::Rejected(TapRejection::Throttled { retry_after_ms: 40 })
        ));

        let third = tap_at(&harness.state, &user, &round, at_ms(60)).await.unwrap();
        assert!(matches!(third, TapOutcome::Accepted(TapAccepted { taps: 2, points: 2, .. })));
    }

    #[tokio::test]
    async fn eleven_taps_earn_the_bonus() {
        let harness = TestHarness::new().await;
        let round = round(0, 5_000);
        let user = player();

        let mut last = None;
        for i in 0..11 {
            last = Some(tap_at(&harness.state, &user, &round, at_ms(i * 100)).await.unwrap());
        }
        assert!(matches!(last, Some(TapOutcome::Accepted(TapAccepted { taps: 11, points: 20, .. }))));

        let stats = user_stats(&harness.state, &user, "r1").await.unwrap();
        assert_eq!(stats.points, 20);
        assert_eq!(stats.last_tap_at, Some(at_ms(1_000)));
    }

    #[tokio::test]
    async fn finished_round_rejects_without_writing() {
        let harness = TestHarness::new().await;
        let round = round(-10_000, -5_000);

        let outcome = tap_at(&harness.state, &player(), &round, at_ms(0)).await.unwrap();
        assert_eq!(
            outcome,
            TapOutcome::Rejected(TapRejection::NotTappable {
                status: RoundStatus::Finished
            })
        );
        assert!(session(&harness.state, "u1", "r1").await.unwrap().is_none());
        assert!(harness.cache.is_empty());
    }

    #[tokio::test]
    async fn zero_score_users_tap_without_points() {
        let harness = TestHarness::new().await;
        let round = round(0, 5_000);
        let user = AuthenticatedUser::new("n", "Nikita", UserRole::ZeroScore);

        let outcome = tap_at(&harness.state, &user, &round, at_ms(0)).await.unwrap();
        assert!(matches!(outcome, TapOutcome::Accepted(TapAccepted { taps: 1, points: 0, .. })));
    }

    #[tokio::test]
    async fn unreachable_cache_degrades_taps() {
        let harness = TestHarness::new().await;
        harness.cache.set_available(false);

        let result = tap_at(&harness.state, &player(), &round(0, 5_000), at_ms(0)).await;
        assert!(matches!(result, Err(ServiceError::Degraded)));
    }

    #[tokio::test]
    async fn concurrent_taps_never_lose_increments() {
        let mut config = AppConfig::default();
        config.throttle.window_ms = 0;
        let harness = TestHarness::with_config(config).await;
        let round = round(0, 60_000);
        let user = player();

        let taps = (0..20).map(|_| {
            let state = harness.state.clone();
            let round = round.clone();
            let user = user.clone();
            tokio::spawn(async move { tap_at(&state, &user, &round, at_ms(100)).await })
        });
        for handle in taps.collect::<Vec<_>>() {
            handle.await.unwrap().unwrap();
        }

        let session = session(&harness.state, "u1", "r1").await.unwrap().unwrap();
        assert_eq!(session.taps, 20);
    }

    #[tokio::test]
    async fn missing_session_resumes_from_ranked_taps() {
        let harness = TestHarness::new().await;
        let mut round = round(0, 5_000);
        round.participants = vec![RoundParticipant {
            user_id: "u1".into(),
            name: "Alice".into(),
            taps: 30,
            points: 48,
            updated_at: at_ms(-1_000),
            zero_score: false,
        }];

        let outcome = tap_at(&harness.state, &player(), &round, at_ms(0)).await.unwrap();
        assert!(matches!(outcome, TapOutcome::Accepted(TapAccepted { taps: 31, points: 49, .. })));
        let stored = session(&harness.state, "u1", "r1").await.unwrap().unwrap();
        assert_eq!(stored.taps, 31);
    }

    #[tokio::test]
    async fn cleared_sessions_start_over() {
        let harness = TestHarness::new().await;
        let round = round(0, 5_000);
        let user = player();
        tap_at(&harness.state, &user, &round, at_ms(0)).await.unwrap();

        clear_session(&harness.state, "u1", "r1").await;
        let stats = user_stats(&harness.state, &user, "r1").await.unwrap();
        assert_eq!(stats.taps, 0);
    }
}
