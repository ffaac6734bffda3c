//! Ranked standings of a round.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;

use crate::state::round::{RoundParticipant, RoundStatus};

/// Ranked snapshot of a round, as stored in the cache and pushed to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Leaderboard {
    /// Round identifier.
    pub id: String,
    /// Round status when the snapshot was taken.
    pub status: RoundStatus,
    /// Points scored by everyone.
    pub total_points: u64,
    /// Participants, best first.
    pub entries: Vec<LeaderboardEntry>,
}

/// One ranked line of a [`Leaderboard`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct LeaderboardEntry {
    /// 1-based position.
    pub rank: u32,
    /// Participant identifier.
    pub user_id: String,
    /// Display name.
    pub name: String,
    /// Taps counted.
    pub taps: u64,
    /// Points counted, 0 for zero-score users.
    pub points: u64,
    /// Time of the last counted tap.
    #[serde(with = "time::serde::rfc3339")]
    #[schema(value_type = String, format = DateTime)]
    pub updated_at: OffsetDateTime,
    /// Whether the user holds the zero-score role.
    #[serde(default)]
    pub zero_score: bool,
}

impl From<&RoundParticipant> for LeaderboardEntry {
    fn from(value: &RoundParticipant) -> Self {
        Self {
            rank: 0,
            user_id: value.user_id.clone(),
            name: value.name.clone(),
            taps: value.taps,
            points: value.points,
            updated_at: value.updated_at,
            zero_score: value.zero_score,
        }
    }
}

impl From<&LeaderboardEntry> for RoundParticipant {
    fn from(value: &LeaderboardEntry) -> Self {
        Self {
            user_id: value.user_id.clone(),
            name: value.name.clone(),
            taps: value.taps,
            points: value.points,
            updated_at: value.updated_at,
            zero_score: value.zero_score,
        }
    }
}

/// Sort by points descending, then by `updated_at` ascending, then keep input
/// order, and rewrite every rank from its position.
pub fn rank_entries(entries: &mut [LeaderboardEntry]) {
    entries.sort_by(|a, b| {
        b.points
            .cmp(&a.points)
            .then_with(|| a.updated_at.cmp(&b.updated_at))
    });
    for (index, entry) in entries.iter_mut().enumerate() {
        entry.rank = u32::try_from(index + 1).unwrap_or(u32::MAX);
    }
}

impl Leaderboard {
    /// Empty leaderboard for a freshly created round.
    pub fn empty(id: impl Into<String>, status: RoundStatus) -> Self {
        Self {
            id: id.into(),
            status,
            total_points: 0,
            entries: Vec::new(),
        }
    }

    /// Insert or replace one participant's standing and re-rank.
    ///
    /// The total is recomputed from the entries so it can never drift from
    /// the ranked lines.
    pub fn upsert(&mut self, participant: &RoundParticipant) {
        match self
            .entries
            .iter_mut()
            .find(|entry| entry.user_id == participant.user_id)
        {
            Some(entry) => {
                entry.name = participant.name.clone();
                entry.taps = participant.taps;
                entry.points = participant.points;
                entry.updated_at = participant.updated_at;
                entry.zero_score = participant.zero_score;
            }
            None => self.entries.push(participant.into()),
        }

        rank_entries(&mut self.entries);
        self.total_points = self.entries.iter().map(|entry| entry.points).sum();
    }

    /// Entry for `user_id`, if ranked.
    pub fn entry(&self, user_id: &str) -> Option<&LeaderboardEntry> {
        self.entries.iter().find(|entry| entry.user_id == user_id)
    }

    /// Top-ranked entry with a positive score.
    pub fn leader(&self) -> Option<&LeaderboardEntry> {
        self.entries.first().filter(|entry| entry.points > 0)
    }

    /// Participants ordered by last update, oldest first.
    pub fn participants(&self) -> Vec<RoundParticipant> {
        let mut participants: Vec<RoundParticipant> =
            self.entries.iter().map(RoundParticipant::from).collect();
        participants.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        participants
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(millis: i64) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp_nanos(1_700_000_000_000_000_000 + millis as i128 * 1_000_000)
            .unwrap()
    }

    fn participant(id: &str, points: u64, updated: i64) -> RoundParticipant {
        RoundParticipant {
            user_id: id.into(),
            name: id.to_uppercase(),
            taps: points,
            points,
            updated_at: at(updated),
            zero_score: false,
        }
    }

    fn order(board: &Leaderboard) -> Vec<(u32, &str)> {
        board
            .entries
            .iter()
            .map(|e| (e.rank, e.user_id.as_str()))
            .collect()
    }

    #[test]
    fn equal_points_rank_by_last_update_not_id() {
        let mut board = Leaderboard::empty("r", RoundStatus::Active);
        board.upsert(&participant("zed", 20, 5));
        board.upsert(&participant("amy", 20, 9));

        assert_eq!(order(&board), vec![(1, "zed"), (2, "amy")]);
    }

    #[test]
    fn reaching_a_score_later_ranks_lower() {
        let mut board = Leaderboard::empty("r", RoundStatus::Active);
        board.upsert(&participant("a", 19, 1));
        board.upsert(&participant("b", 20, 2));
        board.upsert(&participant("a", 20, 3));

        assert_eq!(order(&board), vec![(1, "b"), (2, "a")]);
        assert_eq!(board.total_points, 40);
    }

    #[test]
    fn reranking_without_mutation_is_stable() {
        let mut board = Leaderboard::empty("r", RoundStatus::Active);
        for (id, ts) in [("a", 1), ("b", 1), ("c", 1)] {
            board.upsert(&participant(id, 5, ts));
        }
        let before = board.clone();
        rank_entries(&mut board.entries);
        rank_entries(&mut board.entries);
        assert_eq!(before, board);
        assert_eq!(order(&board), vec![(1, "a"), (2, "b"), (3, "c")]);
    }

    #[test]
    fn upsert_replaces_existing_entry() {
        let mut board = Leaderboard::empty("r", RoundStatus::Active);
        board.upsert(&participant("a", 1, 1));
        board.upsert(&participant("a", 2, 2));
        assert_eq!(board.entries.len(), 1);
        assert_eq!(board.entry("a").unwrap().points, 2);
        assert_eq!(board.total_points, 2);
    }

    #[test]
    fn leader_ignores_scoreless_entries() {
        let mut board = Leaderboard::empty("r", RoundStatus::Finished);
        let mut zero = participant("z", 0, 1);
        zero.taps = 15;
        zero.zero_score = true;
        board.upsert(&zero);
        assert!(board.leader().is_none());

        board.upsert(&participant("p", 3, 2));
        assert_eq!(board.leader().unwrap().user_id, "p");
    }

    #[test]
    fn participants_come_back_in_update_order() {
        let mut board = Leaderboard::empty("r", RoundStatus::Active);
        board.upsert(&participant("late", 50, 9));
        board.upsert(&participant("early", 1, 1));
        let ids: Vec<_> = board
            .participants()
            .into_iter()
            .map(|p| p.user_id)
            .collect();
        assert_eq!(ids, vec!["early", "late"]);
    }

    #[test]
    fn serializes_timestamps_as_rfc3339() {
        let mut board = Leaderboard::empty("r", RoundStatus::Active);
        board.upsert(&participant("a", 1, 0));
        let json = serde_json::to_value(&board).unwrap();
        assert_eq!(json["status"], "active");
        assert_eq!(json["entries"][0]["updated_at"], "2023-11-14T22:13:20Z");

        let back: Leaderboard = serde_json::from_value(json).unwrap();
        assert_eq!(back, board);
    }
}
