use indexmap::IndexMap;
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::models::{NewRoundEntity, RoundEntity},
    dto::{
        events::WinnerSummary,
        rounds::{
            CreatedRound, MAX_PAGE_SIZE, RoundDetailResponse, RoundListResponse, RoundSummary,
            RoundTimingConfig, TapResponse,
        },
        validation::validate_round_id,
    },
    error::ServiceError,
    services::{broadcast_service, gameplay_service, recovery_service},
    state::{
        SharedState,
        leaderboard::Leaderboard,
        round::{Round, RoundParticipant, RoundWindow},
        session::{TapOutcome, TapRejection},
        user::AuthenticatedUser,
    },
};

/// Result of a tap request that reached the gameplay rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TapSubmission {
    /// Counted and reflected in the leaderboard.
    Committed(TapResponse),
    /// Refused by the round status or the throttle.
    Rejected(TapRejection),
}

/// Create a round opening one cooldown after `now`.
///
/// The durable row is written first; if the cache write fails the row is
/// deleted again so no orphan survives.
pub async fn create_round_at(
    state: &SharedState,
    user: &AuthenticatedUser,
    now: OffsetDateTime,
) -> Result<CreatedRound, ServiceError> {
    if !user.is_admin() {
        return Err(ServiceError::Forbidden("only admins may create rounds".into()));
    }

    let config = state.config();
    let window = RoundWindow::starting_after(now, config.cooldown(), config.round_length())?;
    let store = state.require_round_store().await?;

    let entity = store
        .create_round(NewRoundEntity {
            id: Some(Uuid::new_v4().to_string()),
            starts_at: window.starts_at(),
            ends_at: window.ends_at(),
        })
        .await?;
    let round = Round::new(entity.id.clone(), window);

    if let Err(err) = state.cache().create_round(&round, now).await {
        warn!(round_id = %round.id, error = %err, "failed to cache new round; rolling back");
        match store.delete_round(round.id.clone()).await {
            Ok(_) => debug!(round_id = %round.id, "durable round rolled back"),
            Err(rollback) => {
                warn!(round_id = %round.id, error = %rollback, "failed to roll back durable round");
            }
        }
        return Err(ServiceError::Unavailable(err));
    }

    info!(
        round_id = %round.id,
        created_by = %user.id,
        starts_at = %window.starts_at(),
        ends_at = %window.ends_at(),
        "round created"
    );
    broadcast_service::broadcast_round_update(state, &round.id, &window, 0, round.status(now));

    Ok(CreatedRound {
        id: round.id,
        starts_at: window.starts_at(),
        ends_at: window.ends_at(),
    })
}

/// Page of live and historical rounds, newest start first.
///
/// An empty active set triggers a recovery pass first, so a fresh cache is
/// repopulated by the first listing.
pub async fn list_rounds_at(
    state: &SharedState,
    after: Option<&str>,
    limit: Option<u32>,
    now: OffsetDateTime,
) -> Result<RoundListResponse, ServiceError> {
    let store = state.require_round_store().await?;
    let cache = state.cache();

    let mut active_ids = cache.active_round_ids().await;
    if active_ids.is_empty() {
        recovery_service::recover_at(state, now).await;
        active_ids = cache.active_round_ids().await;
    }

    let mut rounds: IndexMap<String, Round> = IndexMap::new();
    for id in active_ids {
        if let Some(round) = cache.find_round(&id).await {
            rounds.insert(id, round);
        }
    }
    for entity in store.list_rounds().await? {
        if rounds.contains_key(&entity.id) {
            continue;
        }
        match round_from_entity(&entity) {
            Some(round) => {
                rounds.insert(entity.id, round);
            }
            None => warn!(round_id = %entity.id, "skipping durable round with an invalid window"),
        }
    }

    let mut rounds: Vec<Round> = rounds.into_values().collect();
    rounds.sort_by(|a, b| b.window.starts_at().cmp(&a.window.starts_at()));

    let start = after
        .and_then(|cursor| rounds.iter().position(|round| round.id == cursor))
        .map_or(0, |index| index + 1);
    let limit = limit
        .map(|limit| limit as usize)
        .unwrap_or(state.config().rounds.default_page_size)
        .clamp(1, MAX_PAGE_SIZE as usize);

    let data = rounds
        .iter()
        .skip(start)
        .take(limit)
        .map(|round| RoundSummary::from_round(round, now))
        .collect();

    Ok(RoundListResponse {
        data,
        has_more: start + limit < rounds.len(),
        config: RoundTimingConfig::from(state.config()),
    })
}

fn round_from_entity(entity: &RoundEntity) -> Option<Round> {
    let window = entity.window().ok()?;
    let mut round = Round::new(entity.id.clone(), window);
    round.total_points = entity.total_points;
    Some(round)
}

/// Round `round_id` as seen by `user` at `now`.
pub async fn round_detail_at(
    state: &SharedState,
    round_id: &str,
    user: &AuthenticatedUser,
    now: OffsetDateTime,
) -> Result<RoundDetailResponse, ServiceError> {
    check_round_id(round_id)?;
    let round = load_round(state, round_id, now).await?;

    let my_points = if user.is_zero_score() {
        0
    } else {
        round.participant(&user.id).map_or(0, |p| p.points)
    };

    Ok(RoundDetailResponse {
        id: round.id.clone(),
        starts_at: round.window.starts_at(),
        ends_at: round.window.ends_at(),
        total_points: round.total_points,
        status: round.status(now),
        my_points,
        winner: round.winner(now).map(WinnerSummary::from),
        config: RoundTimingConfig::from(state.config()),
    })
}

/// Record one tap of `user` in `round_id` at `now`.
///
/// A committed tap updates the cached leaderboard and is broadcast as a
/// tap event followed by the new leaderboard.
pub async fn tap_at(
    state: &SharedState,
    round_id: &str,
    user: &AuthenticatedUser,
    now: OffsetDateTime,
) -> Result<TapSubmission, ServiceError> {
    check_round_id(round_id)?;
    let round = load_round(state, round_id, now).await?;

    let accepted = match gameplay_service::tap_at(state, user, &round, now).await? {
        TapOutcome::Accepted(accepted) => accepted,
        TapOutcome::Rejected(rejection) => {
            debug!(round_id, user_id = %user.id, %rejection, "tap rejected");
            return Ok(TapSubmission::Rejected(rejection));
        }
    };

    let participant = RoundParticipant {
        user_id: user.id.clone(),
        name: user.name.clone(),
        taps: accepted.taps,
        points: accepted.points,
        updated_at: accepted.timestamp,
        zero_score: user.is_zero_score(),
    };
    let leaderboard = state
        .cache()
        .update_participant(&round, &participant, now)
        .await;

    let total_points = match &leaderboard {
        Some(leaderboard) => leaderboard.total_points,
        None => {
            let previous = round.participant(&user.id).map_or(0, |p| p.points);
            round.total_points.saturating_sub(previous) + accepted.points
        }
    };

    broadcast_service::broadcast_user_tap(state, round_id, &user.id, &accepted);
    if let Some(leaderboard) = leaderboard {
        broadcast_service::broadcast_leaderboard(state, leaderboard);
    }

    Ok(TapSubmission::Committed(TapResponse {
        taps: accepted.taps,
        points: accepted.points,
        total_points,
    }))
}

/// Ranked snapshot of `round_id`: the cached one, or one derived from the
/// durable record.
pub async fn leaderboard_at(
    state: &SharedState,
    round_id: &str,
    now: OffsetDateTime,
) -> Result<Leaderboard, ServiceError> {
    check_round_id(round_id)?;
    if let Some(mut leaderboard) = state.cache().leaderboard(round_id).await {
        if let Some(cached) = state.cache().state(round_id).await {
            if let Ok(window) = cached.window() {
                leaderboard.status = window.status_at(now);
            }
        }
        return Ok(leaderboard);
    }

    let round = load_round(state, round_id, now).await?;
    Ok(round.leaderboard_snapshot(now))
}

/// Round from the cache, or from the durable store with a cache restore
/// when its window has not elapsed.
pub async fn load_round(
    state: &SharedState,
    round_id: &str,
    now: OffsetDateTime,
) -> Result<Round, ServiceError> {
    if let Some(round) = state.cache().find_round(round_id).await {
        return Ok(round);
    }

    let Some(store) = state.round_store().await else {
        let partially_cached = state.cache().state(round_id).await.is_some();
        return Err(if partially_cached || state.cache().is_degraded() {
            ServiceError::Degraded
        } else {
            ServiceError::NotFound(format!("round `{round_id}` not found"))
        });
    };

    let record = store
        .find_round(round_id.to_owned())
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("round `{round_id}` not found")))?;
    let round = record
        .to_round()
        .map_err(|err| ServiceError::InvalidState(format!("round `{round_id}`: {err}")))?;

    debug!(round_id, "cache miss; round loaded from durable store");
    recovery_service::restore_round(state, &round, now).await;
    Ok(round)
}

fn check_round_id(round_id: &str) -> Result<(), ServiceError> {
    validate_round_id(round_id).map_err(|err| {
        ServiceError::InvalidInput(
            err.message
                .map(|message| message.to_string())
                .unwrap_or_else(|| "invalid round id".into()),
        )
    })
}
