use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::state::{
    leaderboard::Leaderboard,
    round::{Round, RoundParticipant, RoundStatus, RoundWindow, WindowError},
};

/// Round row persisted in the durable store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundEntity {
    /// Stable identifier, shared with the cache.
    pub id: String,
    /// Start of the active window.
    pub starts_at: OffsetDateTime,
    /// End of the active window.
    pub ends_at: OffsetDateTime,
    /// Last total pushed by the sync engine.
    pub total_points: u64,
    /// Insertion time.
    pub created_at: OffsetDateTime,
}

/// Input for creating a round. The store generates an id when none is given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRoundEntity {
    /// Id to use, or `None` to let the store pick one.
    pub id: Option<String>,
    /// Start of the active window.
    pub starts_at: OffsetDateTime,
    /// End of the active window.
    pub ends_at: OffsetDateTime,
}

/// Per-participant score row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreEntity {
    /// Owning round.
    pub round_id: String,
    /// Participant identifier.
    pub user_id: String,
    /// Display name at the last update.
    pub username: String,
    /// Taps counted so far.
    pub taps: u64,
    /// Points counted so far, 0 for zero-score users.
    pub points: u64,
    /// Whether the user holds the zero-score role.
    pub zero_score: bool,
    /// Time of the last counted tap.
    pub updated_at: OffsetDateTime,
}

/// A round together with its full participant history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundRecord {
    /// The round row.
    pub round: RoundEntity,
    /// Ordered by `updated_at`, oldest first.
    pub scores: Vec<ScoreEntity>,
}

impl RoundEntity {
    /// Validated window of the stored round.
    pub fn window(&self) -> Result<RoundWindow, WindowError> {
        RoundWindow::new(self.starts_at, self.ends_at)
    }
}

impl From<&ScoreEntity> for RoundParticipant {
    fn from(value: &ScoreEntity) -> Self {
        Self {
            user_id: value.user_id.clone(),
            name: value.username.clone(),
            taps: value.taps,
            points: value.points,
            updated_at: value.updated_at,
            zero_score: value.zero_score,
        }
    }
}

impl ScoreEntity {
    /// Score row for `participant` inside `round_id`.
    pub fn from_participant(round_id: &str, participant: &RoundParticipant) -> Self {
        Self {
            round_id: round_id.to_owned(),
            user_id: participant.user_id.clone(),
            username: participant.name.clone(),
            taps: participant.taps,
            points: if participant.zero_score {
                0
            } else {
                participant.points
            },
            zero_score: participant.zero_score,
            updated_at: participant.updated_at,
        }
    }
}

impl RoundRecord {
    /// Rebuild the domain round.
    ///
    /// The total is the larger of the stored total and the sum of the score
    /// rows, so a lagging total never hides points that were already flushed.
    pub fn to_round(&self) -> Result<Round, WindowError> {
        let window = self.round.window()?;
        let mut participants: Vec<RoundParticipant> =
            self.scores.iter().map(RoundParticipant::from).collect();
        participants.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        let scored: u64 = participants.iter().map(|p| p.points).sum();

        Ok(Round {
            id: self.round.id.clone(),
            window,
            total_points: self.round.total_points.max(scored),
            participants,
        })
    }
}

/// Round state snapshot kept in the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedRoundState {
    /// Round identifier.
    pub id: String,
    /// Start of the active window.
    #[serde(with = "time::serde::rfc3339")]
    pub starts_at: OffsetDateTime,
    /// End of the active window.
    #[serde(with = "time::serde::rfc3339")]
    pub ends_at: OffsetDateTime,
    /// Running total, never decreases.
    pub total_points: u64,
    /// Last status written by the status sweep.
    pub status: RoundStatus,
    /// Ids of every participant that tapped at least once.
    #[serde(default)]
    pub participants: Vec<String>,
    /// Last time the state was written.
    #[serde(with = "time::serde::rfc3339")]
    pub last_update: OffsetDateTime,
}

impl CachedRoundState {
    /// Fresh state for a round at `now`.
    pub fn from_round(round: &Round, now: OffsetDateTime) -> Self {
        Self {
            id: round.id.clone(),
            starts_at: round.window.starts_at(),
            ends_at: round.window.ends_at(),
            total_points: round.total_points,
            status: round.status(now),
            participants: round
                .participants
                .iter()
                .map(|p| p.user_id.clone())
                .collect(),
            last_update: now,
        }
    }

    /// Validated window of the cached round.
    pub fn window(&self) -> Result<RoundWindow, WindowError> {
        RoundWindow::new(self.starts_at, self.ends_at)
    }

    /// Domain round built from this state and the cached leaderboard.
    pub fn to_round(&self, leaderboard: Option<&Leaderboard>) -> Result<Round, WindowError> {
        let window = self.window()?;
        let participants = leaderboard
            .map(Leaderboard::participants)
            .unwrap_or_default();

        Ok(Round {
            id: self.id.clone(),
            window,
            total_points: self.total_points,
            participants,
        })
    }
}

#[cfg(test)]
mod tests {
    use time::Duration;

    use super::*;

    fn at(secs: i64) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(1_700_000_000 + secs).unwrap()
    }

    fn score(user: &str, points: u64, updated: i64) -> ScoreEntity {
        ScoreEntity {
            round_id: "r".into(),
            user_id: user.into(),
            username: user.into(),
            taps: points,
            points,
            zero_score: false,
            updated_at: at(updated),
        }
    }

    #[test]
    fn record_orders_participants_by_update() {
        let record = RoundRecord {
            round: RoundEntity {
                id: "r".into(),
                starts_at: at(0),
                ends_at: at(60),
                total_points: 0,
                created_at: at(-30),
            },
            scores: vec![score("b", 4, 9), score("a", 3, 2)],
        };

        let round = record.to_round().unwrap();
        let ids: Vec<_> = round.participants.iter().map(|p| p.user_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(round.total_points, 7);
    }

    #[test]
    fn record_with_bad_window_is_rejected() {
        let record = RoundRecord {
            round: RoundEntity {
                id: "r".into(),
                starts_at: at(0),
                ends_at: at(0) + Duration::days(2),
                total_points: 0,
                created_at: at(0),
            },
            scores: Vec::new(),
        };
        assert_eq!(record.to_round().unwrap_err(), WindowError::TooLong);
    }

    #[test]
    fn zero_score_rows_never_carry_points() {
        let participant = RoundParticipant {
            user_id: "z".into(),
            name: "z".into(),
            taps: 30,
            points: 50,
            updated_at: at(1),
            zero_score: true,
        };
        assert_eq!(ScoreEntity::from_participant("r", &participant).points, 0);
    }

    #[test]
    fn cached_state_tracks_participant_ids() {
        let mut round = Round::new("r", RoundWindow::new(at(0), at(60)).unwrap());
        round.participants.push(RoundParticipant::from(&score("a", 1, 1)));
        let state = CachedRoundState::from_round(&round, at(-5));
        assert_eq!(state.status, RoundStatus::Cooldown);
        assert_eq!(state.participants, vec!["a".to_string()]);

        let json = serde_json::to_string(&state).unwrap();
        let back: CachedRoundState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
