use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::{
    config::AppConfig,
    dto::{events::WinnerSummary, validation::validate_round_id},
    state::round::{Round, RoundStatus},
};

/// Largest page a client may request.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Durations applied to newly created rounds, in seconds.
#[derive(Debug, Clone, Copy, Serialize, ToSchema)]
pub struct RoundTimingConfig {
    /// Seconds between creation and start.
    pub cooldown_duration: u64,
    /// Seconds the round stays active.
    pub round_duration: u64,
}

impl From<&AppConfig> for RoundTimingConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            cooldown_duration: config.game.cooldown_secs,
            round_duration: config.game.round_secs,
        }
    }
}

/// One line of the round listing, status derived at request time.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RoundSummary {
    /// Round identifier.
    pub id: String,
    /// First instant taps are accepted.
    #[serde(with = "time::serde::rfc3339")]
    #[schema(value_type = String, format = DateTime)]
    pub starts_at: OffsetDateTime,
    /// Last instant taps are accepted.
    #[serde(with = "time::serde::rfc3339")]
    #[schema(value_type = String, format = DateTime)]
    pub ends_at: OffsetDateTime,
    /// Points scored by everyone so far.
    pub total_points: u64,
    /// Status at request time.
    pub status: RoundStatus,
}

impl RoundSummary {
    /// Summarise `round` with its status at `now`.
    pub fn from_round(round: &Round, now: OffsetDateTime) -> Self {
        Self {
            id: round.id.clone(),
            starts_at: round.window.starts_at(),
            ends_at: round.window.ends_at(),
            total_points: round.total_points,
            status: round.status(now),
        }
    }
}

/// Cursor-paginated page of rounds, newest start first.
#[derive(Debug, Serialize, ToSchema)]
pub struct RoundListResponse {
    /// Rounds of this page.
    pub data: Vec<RoundSummary>,
    /// More rounds follow the last one of `data`.
    pub has_more: bool,
    /// Timing applied to new rounds.
    pub config: RoundTimingConfig,
}

/// Query string of `GET /rounds`.
#[derive(Debug, Default, Deserialize, Validate, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListRoundsQuery {
    /// Return rounds listed after this id.
    #[validate(custom(function = "validate_round_id"))]
    pub after: Option<String>,
    /// Page size, 1 to 100.
    #[validate(range(min = 1, max = 100))]
    pub limit: Option<u32>,
}

/// Window of a freshly created round.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CreatedRound {
    /// Generated round identifier.
    pub id: String,
    /// End of the cooldown.
    #[serde(with = "time::serde::rfc3339")]
    #[schema(value_type = String, format = DateTime)]
    pub starts_at: OffsetDateTime,
    /// End of the active window.
    #[serde(with = "time::serde::rfc3339")]
    #[schema(value_type = String, format = DateTime)]
    pub ends_at: OffsetDateTime,
}

/// Body of `POST /rounds`.
#[derive(Debug, Serialize, ToSchema)]
pub struct CreateRoundResponse {
    /// The round just created.
    pub data: CreatedRound,
}

/// Round as seen by one user.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RoundDetailResponse {
    /// Round identifier.
    pub id: String,
    /// Start of the active window.
    #[serde(with = "time::serde::rfc3339")]
    #[schema(value_type = String, format = DateTime)]
    pub starts_at: OffsetDateTime,
    /// End of the active window.
    #[serde(with = "time::serde::rfc3339")]
    #[schema(value_type = String, format = DateTime)]
    pub ends_at: OffsetDateTime,
    /// Points scored by everyone.
    pub total_points: u64,
    /// Status at request time.
    pub status: RoundStatus,
    /// Caller's points, always 0 for zero-score users.
    pub my_points: u64,
    /// Set once the round is finished and someone tapped.
    pub winner: Option<WinnerSummary>,
    /// Timing applied to new rounds.
    pub config: RoundTimingConfig,
}

/// Result of a committed tap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct TapResponse {
    /// Caller's taps in this round.
    pub taps: u64,
    /// Caller's points in this round.
    pub points: u64,
    /// Round total after this tap.
    pub total_points: u64,
}
