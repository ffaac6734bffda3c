use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for Round Tap Back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::rounds::list_rounds,
        crate::routes::rounds::create_round,
        crate::routes::rounds::get_round,
        crate::routes::rounds::tap,
        crate::routes::rounds::get_leaderboard,
        crate::routes::websocket::ws_handler,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::rounds::RoundListResponse,
            crate::dto::rounds::RoundSummary,
            crate::dto::rounds::RoundTimingConfig,
            crate::dto::rounds::CreatedRound,
            crate::dto::rounds::CreateRoundResponse,
            crate::dto::rounds::RoundDetailResponse,
            crate::dto::rounds::TapResponse,
            crate::dto::events::UserTapEvent,
            crate::dto::events::RoundUpdateEvent,
            crate::dto::events::RoundFinishedEvent,
            crate::dto::events::LeaderboardUpdateEvent,
            crate::dto::events::WinnerSummary,
            crate::dto::ws::ServerMessage,
            crate::dto::ws::RoundAck,
            crate::dto::ws::TapResult,
            crate::dto::ws::ErrorMessage,
            crate::state::leaderboard::Leaderboard,
            crate::state::leaderboard::LeaderboardEntry,
            crate::state::round::RoundStatus,
            crate::state::user::UserRole,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "rounds", description = "Round lifecycle, taps and leaderboards"),
        (name = "realtime", description = "WebSocket push of round events"),
    )
)]
pub struct ApiDoc;
