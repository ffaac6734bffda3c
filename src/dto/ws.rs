use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use utoipa::ToSchema;

use crate::{dto::events::RoundEvent, state::session::TapRejection};

/// Reply to `join_round`.
pub const EVENT_JOINED_ROUND: &str = "joined_round";
/// Reply to `leave_round`.
pub const EVENT_LEFT_ROUND: &str = "left_round";
/// Reply to `tap`.
pub const EVENT_TAP_RESULT: &str = "tap_result";
/// Reply to `ping`.
pub const EVENT_PONG: &str = "pong";
/// Sent when a message cannot be parsed or served.
pub const EVENT_ERROR: &str = "error";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
/// Messages accepted from WebSocket clients.
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Start receiving the round's tap and leaderboard events.
    JoinRound {
        /// Round to subscribe to.
        round_id: String,
    },
    /// Stop receiving events of a joined round.
    LeaveRound {
        /// Round to unsubscribe from.
        round_id: String,
    },
    /// Tap once in a round.
    Tap {
        /// Round being tapped.
        round_id: String,
    },
    /// Ask for the current standings.
    GetLeaderboard {
        /// Round whose leaderboard is wanted.
        round_id: String,
    },
    /// Keep-alive, answered with `pong`.
    Ping,
}

impl ClientMessage {
    /// Parse one text frame.
    pub fn from_json_str(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

/// Envelope of everything pushed to a WebSocket client.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ServerMessage {
    /// Event name, e.g. `tap_result` or `user_tap`.
    pub event: String,
    /// Event payload.
    #[schema(value_type = Object)]
    pub data: Value,
    /// When the server built the message.
    #[serde(with = "time::serde::rfc3339")]
    #[schema(value_type = String, format = DateTime)]
    pub timestamp: OffsetDateTime,
}

impl ServerMessage {
    /// Wrap `data` under `event`, stamped with the current time.
    pub fn new<T: Serialize>(event: &str, data: &T) -> serde_json::Result<Self> {
        Ok(Self {
            event: event.to_owned(),
            data: serde_json::to_value(data)?,
            timestamp: OffsetDateTime::now_utc(),
        })
    }

    /// Push notification for a relayed round event.
    pub fn from_event(event: &RoundEvent) -> serde_json::Result<Self> {
        Ok(Self {
            event: event.name().to_owned(),
            data: event.payload()?,
            timestamp: OffsetDateTime::now_utc(),
        })
    }
}

/// Answer to `join_round` and `leave_round`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RoundAck {
    /// Round the request named.
    pub round_id: String,
    /// Whether the subscription changed.
    pub success: bool,
}

/// Answer to a `tap` message.
#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct TapResult {
    /// Whether the tap was counted.
    pub success: bool,
    /// Caller's taps after this tap.
    pub taps: u64,
    /// Caller's points after this tap.
    pub my_points: u64,
    /// Round total, present on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_points: Option<u64>,
    /// Reason the tap was refused.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set when the tap hit the throttle window.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

impl TapResult {
    /// Refused by the round status or the throttle.
    pub fn rejected(rejection: TapRejection) -> Self {
        let retry_after_ms = match rejection {
            TapRejection::Throttled { retry_after_ms } => Some(retry_after_ms),
            TapRejection::NotTappable { .. } => None,
        };
        Self {
            error: Some(rejection.to_string()),
            retry_after_ms,
            ..Self::default()
        }
    }

    /// Refused for an infrastructure reason.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }
}

/// Payload of an `error` event.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ErrorMessage {
    /// Human readable reason.
    pub message: String,
}
