use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, post},
};
use time::OffsetDateTime;
use validator::Validate;

use crate::{
    dto::rounds::{
        CreateRoundResponse, ListRoundsQuery, RoundDetailResponse, RoundListResponse, TapResponse,
    },
    error::AppError,
    services::round_service::{self, TapSubmission},
    state::{SharedState, leaderboard::Leaderboard, user::AuthenticatedUser},
};

/// Routes exposing round creation, lookup and gameplay.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/rounds", get(list_rounds).post(create_round))
        .route("/rounds/{id}", get(get_round))
        .route("/rounds/{id}/tap", post(tap))
        .route("/rounds/{id}/leaderboard", get(get_leaderboard))
}

#[utoipa::path(
    get,
    path = "/rounds",
    tag = "rounds",
    params(ListRoundsQuery),
    responses(
        (status = 200, description = "Page of rounds, newest start first", body = RoundListResponse),
        (status = 400, description = "Invalid cursor or limit"),
        (status = 503, description = "Round store unavailable")
    )
)]
/// List live and historical rounds.
pub async fn list_rounds(
    State(state): State<SharedState>,
    Query(query): Query<ListRoundsQuery>,
) -> Result<Json<RoundListResponse>, AppError> {
    query.validate()?;
    let page = round_service::list_rounds_at(
        &state,
        query.after.as_deref(),
        query.limit,
        OffsetDateTime::now_utc(),
    )
    .await?;
    Ok(Json(page))
}

#[utoipa::path(
    post,
    path = "/rounds",
    tag = "rounds",
    responses(
        (status = 200, description = "Round created", body = CreateRoundResponse),
        (status = 401, description = "Missing identity"),
        (status = 403, description = "Caller is not an admin"),
        (status = 503, description = "A store is unavailable")
    )
)]
/// Create a round opening after the configured cooldown.
pub async fn create_round(
    State(state): State<SharedState>,
    user: AuthenticatedUser,
) -> Result<Json<CreateRoundResponse>, AppError> {
    let data = round_service::create_round_at(&state, &user, OffsetDateTime::now_utc()).await?;
    Ok(Json(CreateRoundResponse { data }))
}

#[utoipa::path(
    get,
    path = "/rounds/{id}",
    tag = "rounds",
    params(("id" = String, Path, description = "Round identifier")),
    responses(
        (status = 200, description = "Round seen by the caller", body = RoundDetailResponse),
        (status = 404, description = "Unknown round")
    )
)]
/// Return one round with the caller's points and the winner once finished.
pub async fn get_round(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    user: AuthenticatedUser,
) -> Result<Json<RoundDetailResponse>, AppError> {
    let detail = round_service::round_detail_at(&state, &id, &user, OffsetDateTime::now_utc()).await?;
    Ok(Json(detail))
}

#[utoipa::path(
    post,
    path = "/rounds/{id}/tap",
    tag = "rounds",
    params(("id" = String, Path, description = "Round identifier")),
    responses(
        (status = 200, description = "Tap recorded", body = TapResponse),
        (status = 409, description = "Round is not active"),
        (status = 429, description = "Tap inside the throttle window"),
        (status = 503, description = "Cache unavailable")
    )
)]
/// Record one tap of the caller.
pub async fn tap(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    user: AuthenticatedUser,
) -> Result<Json<TapResponse>, AppError> {
    match round_service::tap_at(&state, &id, &user, OffsetDateTime::now_utc()).await? {
        TapSubmission::Committed(response) => Ok(Json(response)),
        TapSubmission::Rejected(rejection) => Err(rejection.into()),
    }
}

#[utoipa::path(
    get,
    path = "/rounds/{id}/leaderboard",
    tag = "rounds",
    params(("id" = String, Path, description = "Round identifier")),
    responses(
        (status = 200, description = "Ranked participants", body = Leaderboard),
        (status = 404, description = "Unknown round")
    )
)]
/// Current ranked standings of a round.
pub async fn get_leaderboard(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Leaderboard>, AppError> {
    let leaderboard = round_service::leaderboard_at(&state, &id, OffsetDateTime::now_utc()).await?;
    Ok(Json(leaderboard))
}
