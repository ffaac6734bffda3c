//! Round lifecycle derived purely from the round's time window.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use utoipa::ToSchema;

use crate::state::leaderboard::{Leaderboard, LeaderboardEntry, rank_entries};

/// Longest window a round may span.
pub const MAX_ROUND_LENGTH: Duration = Duration::hours(24);

/// Lifecycle phase of a round, always computed from its window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum RoundStatus {
    /// The window has not opened yet.
    Cooldown,
    /// Taps are accepted.
    Active,
    /// The window has closed.
    Finished,
}

impl RoundStatus {
    /// Wire name of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            RoundStatus::Cooldown => "cooldown",
            RoundStatus::Active => "active",
            RoundStatus::Finished => "finished",
        }
    }
}

impl fmt::Display for RoundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reasons a window is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WindowError {
    /// `ends_at` is not strictly after `starts_at`.
    #[error("round end time must be after start time")]
    EndNotAfterStart,
    /// Window is longer than [`MAX_ROUND_LENGTH`] or ends past the representable range.
    #[error("round duration cannot exceed 24 hours")]
    TooLong,
}

/// Validated start/end pair of a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundWindow {
    starts_at: OffsetDateTime,
    ends_at: OffsetDateTime,
}

impl RoundWindow {
    /// Build a window, enforcing `end > start` and the 24 hour cap.
    pub fn new(starts_at: OffsetDateTime, ends_at: OffsetDateTime) -> Result<Self, WindowError> {
        if ends_at <= starts_at {
            return Err(WindowError::EndNotAfterStart);
        }
        if ends_at - starts_at > MAX_ROUND_LENGTH {
            return Err(WindowError::TooLong);
        }
        Ok(Self { starts_at, ends_at })
    }

    /// Window opening `cooldown` after `now` and lasting `length`.
    ///
    /// Offsets past the representable range are rejected as too long.
    pub fn starting_after(
        now: OffsetDateTime,
        cooldown: Duration,
        length: Duration,
    ) -> Result<Self, WindowError> {
        let starts_at = now.checked_add(cooldown).ok_or(WindowError::TooLong)?;
        let ends_at = starts_at.checked_add(length).ok_or(WindowError::TooLong)?;
        Self::new(starts_at, ends_at)
    }

    /// Instant the round opens.
    pub fn starts_at(&self) -> OffsetDateTime {
        self.starts_at
    }

    /// Instant the round closes.
    pub fn ends_at(&self) -> OffsetDateTime {
        self.ends_at
    }

    /// Status of the window at `now`.
    pub fn status_at(&self, now: OffsetDateTime) -> RoundStatus {
        derive_status(self, now)
    }

    /// Whether the whole window lies before `now`.
    pub fn has_elapsed(&self, now: OffsetDateTime) -> bool {
        now > self.ends_at
    }
}

/// `now < start` is cooldown, `now > end` is finished, both endpoints are active.
pub fn derive_status(window: &RoundWindow, now: OffsetDateTime) -> RoundStatus {
    if now < window.starts_at {
        RoundStatus::Cooldown
    } else if now > window.ends_at {
        RoundStatus::Finished
    } else {
        RoundStatus::Active
    }
}

/// One user's standing inside a round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundParticipant {
    /// Participant identifier.
    pub user_id: String,
    /// Display name.
    pub name: String,
    /// Taps counted.
    pub taps: u64,
    /// Points counted.
    pub points: u64,
    /// Last time the taps/points pair changed.
    pub updated_at: OffsetDateTime,
    /// Participant holds the zero-score role.
    pub zero_score: bool,
}

/// A round with its participants, ordered by last update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Round {
    /// Round identifier.
    pub id: String,
    /// Active window.
    pub window: RoundWindow,
    /// Points scored by everyone, never decreases.
    pub total_points: u64,
    /// Everyone who tapped at least once.
    pub participants: Vec<RoundParticipant>,
}

impl Round {
    /// Fresh round without participants.
    pub fn new(id: impl Into<String>, window: RoundWindow) -> Self {
        Self {
            id: id.into(),
            window,
            total_points: 0,
            participants: Vec::new(),
        }
    }

    /// Status at `now`.
    pub fn status(&self, now: OffsetDateTime) -> RoundStatus {
        derive_status(&self.window, now)
    }

    /// Taps are accepted at `now` (both window endpoints included).
    pub fn is_active(&self, now: OffsetDateTime) -> bool {
        self.status(now) == RoundStatus::Active
    }

    /// The window closed before `now`.
    pub fn is_finished(&self, now: OffsetDateTime) -> bool {
        self.status(now) == RoundStatus::Finished
    }

    /// Highest scorer of a finished round.
    ///
    /// On equal points the participant appearing first in `participants`
    /// wins, which is also the one ranked first by [`Round::leaderboard`].
    pub fn winner(&self, now: OffsetDateTime) -> Option<&RoundParticipant> {
        if !self.is_finished(now) {
            return None;
        }

        self.participants.iter().fold(None, |best, candidate| match best {
            Some(current) if candidate.points <= current.points => Some(current),
            _ => Some(candidate),
        })
    }

    /// Participants ordered by points, descending. The sort is stable so
    /// equal scores keep their relative input order.
    pub fn leaderboard(&self) -> Vec<&RoundParticipant> {
        let mut ranked: Vec<&RoundParticipant> = self.participants.iter().collect();
        ranked.sort_by(|a, b| b.points.cmp(&a.points));
        ranked
    }

    /// Look up a participant by user id.
    pub fn participant(&self, user_id: &str) -> Option<&RoundParticipant> {
        self.participants.iter().find(|p| p.user_id == user_id)
    }

    /// Ranked snapshot of this round at `now`.
    pub fn leaderboard_snapshot(&self, now: OffsetDateTime) -> Leaderboard {
        let mut entries: Vec<LeaderboardEntry> = self
            .participants
            .iter()
            .map(LeaderboardEntry::from)
            .collect();
        rank_entries(&mut entries);

        Leaderboard {
            id: self.id.clone(),
            status: self.status(now),
            total_points: self.total_points,
            entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(1_700_000_000 + secs).unwrap()
    }

    fn window(start: i64, end: i64) -> RoundWindow {
        RoundWindow::new(at(start), at(end)).unwrap()
    }

    fn participant(id: &str, points: u64, updated: i64) -> RoundParticipant {
        RoundParticipant {
            user_id: id.into(),
            name: format!("user-{id}"),
            taps: points,
            points,
            updated_at: at(updated),
            zero_score: false,
        }
    }

    fn finished_round(participants: Vec<RoundParticipant>) -> Round {
        Round {
            id: "r1".into(),
            window: window(0, 60),
            total_points: participants.iter().map(|p| p.points).sum(),
            participants,
        }
    }

    #[test]
    fn rejects_inverted_and_empty_windows() {
        assert_eq!(
            RoundWindow::new(at(10), at(10)).unwrap_err(),
            WindowError::EndNotAfterStart
        );
        assert_eq!(
            RoundWindow::new(at(10), at(5)).unwrap_err(),
            WindowError::EndNotAfterStart
        );
    }

    #[test]
    fn rejects_windows_longer_than_a_day() {
        let start = at(0);
        assert!(RoundWindow::new(start, start + Duration::hours(24)).is_ok());
        assert_eq!(
            RoundWindow::new(start, start + Duration::hours(24) + Duration::SECOND).unwrap_err(),
            WindowError::TooLong
        );
    }

    #[test]
    fn offsets_beyond_the_calendar_are_too_long() {
        let huge = Duration::seconds(i64::MAX);
        assert_eq!(
            RoundWindow::starting_after(at(0), huge, Duration::minutes(1)).unwrap_err(),
            WindowError::TooLong
        );
        assert_eq!(
            RoundWindow::starting_after(at(0), Duration::seconds(30), huge).unwrap_err(),
            WindowError::TooLong
        );
        let window = RoundWindow::starting_after(at(0), Duration::seconds(30), Duration::minutes(1)).unwrap();
        assert_eq!(window.starts_at(), at(30));
        assert_eq!(window.ends_at(), at(90));
    }

    #[test]
    fn status_boundaries_are_inclusive() {
        let w = window(10, 20);
        assert_eq!(derive_status(&w, at(9)), RoundStatus::Cooldown);
        assert_eq!(derive_status(&w, at(10)), RoundStatus::Active);
        assert_eq!(derive_status(&w, at(15)), RoundStatus::Active);
        assert_eq!(derive_status(&w, at(20)), RoundStatus::Active);
        assert_eq!(derive_status(&w, at(21)), RoundStatus::Finished);
    }

    #[test]
    fn status_is_monotonic_over_time() {
        let w = window(100, 200);
        let rank = |s: RoundStatus| match s {
            RoundStatus::Cooldown => 0,
            RoundStatus::Active => 1,
            RoundStatus::Finished => 2,
        };
        let mut last = 0;
        for secs in 0..300 {
            let current = rank(derive_status(&w, at(secs)));
            assert!(current >= last);
            last = current;
        }
        assert_eq!(last, 2);
    }

    #[test]
    fn predicates_follow_derived_status() {
        let round = Round::new("r", window(10, 20));
        assert!(!round.is_active(at(9)));
        assert!(round.is_active(at(10)));
        assert!(round.is_active(at(20)));
        assert!(!round.is_finished(at(20)));
        assert!(round.is_finished(at(21)));
    }

    #[test]
    fn winner_requires_finished_round() {
        let round = finished_round(vec![participant("a", 5, 1)]);
        assert!(round.winner(at(30)).is_none());
        assert_eq!(round.winner(at(61)).unwrap().user_id, "a");
    }

    #[test]
    fn winner_is_none_without_participants() {
        let round = finished_round(Vec::new());
        assert!(round.winner(at(61)).is_none());
    }

    #[test]
    fn winner_ties_go_to_first_occurrence() {
        let round = finished_round(vec![
            participant("a", 3, 1),
            participant("b", 20, 2),
            participant("c", 20, 3),
        ]);
        assert_eq!(round.winner(at(61)).unwrap().user_id, "b");
        assert_eq!(round.leaderboard()[0].user_id, "b");
    }

    #[test]
    fn leaderboard_is_stable_for_equal_points() {
        let round = finished_round(vec![
            participant("a", 20, 1),
            participant("b", 30, 2),
            participant("c", 20, 3),
            participant("d", 20, 4),
        ]);

        let first: Vec<_> = round.leaderboard().iter().map(|p| p.user_id.clone()).collect();
        assert_eq!(first, vec!["b", "a", "c", "d"]);

        let second: Vec<_> = round.leaderboard().iter().map(|p| p.user_id.clone()).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn participant_lookup() {
        let round = finished_round(vec![participant("a", 1, 1)]);
        assert_eq!(round.participant("a").unwrap().points, 1);
        assert!(round.participant("zzz").is_none());
    }

    #[test]
    fn snapshot_ranks_positionally() {
        let round = finished_round(vec![participant("a", 1, 1), participant("b", 9, 2)]);
        let snapshot = round.leaderboard_snapshot(at(61));
        assert_eq!(snapshot.status, RoundStatus::Finished);
        assert_eq!(snapshot.total_points, 10);
        let ranks: Vec<_> = snapshot
            .entries
            .iter()
            .map(|e| (e.rank, e.user_id.as_str()))
            .collect();
        assert_eq!(ranks, vec![(1, "b"), (2, "a")]);
    }
}
