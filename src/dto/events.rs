use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;

use crate::state::{
    leaderboard::Leaderboard,
    round::{RoundParticipant, RoundStatus},
};

/// Event name pushed to round subscribers after a committed tap.
pub const EVENT_USER_TAP: &str = "round.user_tap";
/// Event name pushed on round creation and status transitions.
pub const EVENT_ROUND_UPDATE: &str = "round_update";
/// Event name pushed once a round is over.
pub const EVENT_ROUND_FINISHED: &str = "round_finished";
/// Event name carrying a full ranked snapshot.
pub const EVENT_LEADERBOARD: &str = "leaderboard";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
/// A tap has been committed for `user_id`.
pub struct UserTapEvent {
    /// Round tapped.
    pub round_id: String,
    /// User who tapped.
    pub user_id: String,
    /// User's taps after the tap.
    pub taps: u64,
    /// User's points after the tap.
    pub points: u64,
    /// Commit time.
    #[serde(with = "time::serde::rfc3339")]
    #[schema(value_type = String, format = DateTime)]
    pub timestamp: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
/// Round created or its derived status changed.
pub struct RoundUpdateEvent {
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
    /// Points scored so far.
    pub total_points: u64,
    /// New status.
    pub status: RoundStatus,
}

/// Highest ranked participant with points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct WinnerSummary {
    /// Winner's identifier.
    pub user_id: String,
    /// Winner's display name.
    pub name: String,
    /// Winner's final points.
    pub points: u64,
}

impl From<&RoundParticipant> for WinnerSummary {
    fn from(participant: &RoundParticipant) -> Self {
        Self {
            user_id: participant.user_id.clone(),
            name: participant.name.clone(),
            points: participant.points,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
/// Round reached the end of its window.
pub struct RoundFinishedEvent {
    /// Round identifier.
    pub id: String,
    /// Final total.
    pub total_points: u64,
    /// Absent when nobody scored.
    pub winner: Option<WinnerSummary>,
}

/// Standings changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct LeaderboardUpdateEvent {
    /// Full ranked snapshot.
    pub leaderboard: Leaderboard,
}

/// Every state change relayed to connected clients and sibling instances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoundEvent {
    /// See [`UserTapEvent`].
    UserTap(UserTapEvent),
    /// See [`RoundUpdateEvent`].
    RoundUpdate(RoundUpdateEvent),
    /// See [`RoundFinishedEvent`].
    RoundFinished(RoundFinishedEvent),
    /// See [`LeaderboardUpdateEvent`].
    LeaderboardUpdate(LeaderboardUpdateEvent),
}

/// Who receives an event on a given instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    /// Only clients subscribed to the round topic.
    Round,
    /// Every connected client.
    Everyone,
}

impl RoundEvent {
    /// Round the event belongs to.
    pub fn round_id(&self) -> &str {
        match self {
            RoundEvent::UserTap(event) => &event.round_id,
            RoundEvent::RoundUpdate(event) => &event.id,
            RoundEvent::RoundFinished(event) => &event.id,
            RoundEvent::LeaderboardUpdate(event) => &event.leaderboard.id,
        }
    }

    /// Name used when the event is pushed to a client.
    pub fn name(&self) -> &'static str {
        match self {
            RoundEvent::UserTap(_) => EVENT_USER_TAP,
            RoundEvent::RoundUpdate(_) => EVENT_ROUND_UPDATE,
            RoundEvent::RoundFinished(_) => EVENT_ROUND_FINISHED,
            RoundEvent::LeaderboardUpdate(_) => EVENT_LEADERBOARD,
        }
    }

    /// Round-scoped events go to subscribers, lifecycle events to everyone.
    pub fn audience(&self) -> Audience {
        match self {
            RoundEvent::UserTap(_) | RoundEvent::LeaderboardUpdate(_) => Audience::Round,
            RoundEvent::RoundUpdate(_) | RoundEvent::RoundFinished(_) => Audience::Everyone,
        }
    }

    /// JSON body pushed to clients (the payload without the `type` tag).
    pub fn payload(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            RoundEvent::UserTap(event) => serde_json::to_value(event),
            RoundEvent::RoundUpdate(event) => serde_json::to_value(event),
            RoundEvent::RoundFinished(event) => serde_json::to_value(event),
            RoundEvent::LeaderboardUpdate(event) => serde_json::to_value(&event.leaderboard),
        }
    }
}

/// Message exchanged between instances on the shared channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Publishing instance, used to drop our own echoes.
    pub instance_id: String,
    /// Publish time.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    /// The relayed event.
    pub event: RoundEvent,
}

impl EventEnvelope {
    /// Stamp `event` with its origin.
    pub fn new(instance_id: impl Into<String>, timestamp: OffsetDateTime, event: RoundEvent) -> Self {
        Self {
            instance_id: instance_id.into(),
            timestamp,
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn at(secs: i64) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(1_700_000_000 + secs).unwrap()
    }

    #[test]
    fn envelope_tags_events_by_type() {
        let envelope = EventEnvelope::new(
            "node-a",
            at(0),
            RoundEvent::RoundFinished(RoundFinishedEvent {
                id: "r1".into(),
                total_points: 20,
                winner: None,
            }),
        );

        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(
            value,
            json!({
                "instance_id": "node-a",
                "timestamp": "2023-11-14T22:13:20Z",
                "event": {"type": "round_finished", "id": "r1", "total_points": 20, "winner": null}
            })
        );

        let parsed: EventEnvelope = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, envelope);
    }

    #[test]
    fn routing_follows_event_kind() {
        let tap = RoundEvent::UserTap(UserTapEvent {
            round_id: "r1".into(),
            user_id: "u".into(),
            taps: 1,
            points: 1,
            timestamp: at(0),
        });
        assert_eq!(tap.round_id(), "r1");
        assert_eq!(tap.name(), "round.user_tap");
        assert_eq!(tap.audience(), Audience::Round);

        let board = RoundEvent::LeaderboardUpdate(LeaderboardUpdateEvent {
            leaderboard: Leaderboard::empty("r2", RoundStatus::Active),
        });
        assert_eq!(board.round_id(), "r2");
        assert_eq!(board.payload().unwrap()["id"], "r2");
    }
}
