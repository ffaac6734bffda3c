//! Per-user tap session inside a round and the pure tap decision.

use std::fmt;

use time::{Duration, OffsetDateTime};

use crate::state::{
    round::{Round, RoundStatus},
    scoring,
};

/// Default minimum spacing between two accepted taps of the same user.
pub const DEFAULT_THROTTLE_WINDOW_MS: u64 = 50;

/// Tap rate limit applied per user and round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleConfig {
    /// Minimum spacing between accepted taps, in milliseconds.
    pub window_ms: u64,
}

impl ThrottleConfig {
    /// Throttle of `window_ms` milliseconds.
    pub fn new(window_ms: u64) -> Self {
        Self { window_ms }
    }

    fn window(&self) -> Duration {
        Duration::milliseconds(i64::try_from(self.window_ms).unwrap_or(i64::MAX))
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self::new(DEFAULT_THROTTLE_WINDOW_MS)
    }
}

/// Tap counter of one user in one round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameplaySession {
    /// Tapping user.
    pub user_id: String,
    /// Round tapped.
    pub round_id: String,
    /// Accepted taps so far.
    pub taps: u64,
    /// Time of the last accepted tap.
    pub last_tap_at: Option<OffsetDateTime>,
}

/// Successful tap result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TapAccepted {
    /// Taps including this one.
    pub taps: u64,
    /// Points for those taps.
    pub points: u64,
    /// Time the tap was accepted.
    pub timestamp: OffsetDateTime,
}

/// Expected, non-exceptional reasons a tap is refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapRejection {
    /// The round is not inside its active window.
    NotTappable {
        /// Status at the time of the tap.
        status: RoundStatus,
    },
    /// The previous tap was too recent.
    Throttled {
        /// Time left until the next tap is allowed.
        retry_after_ms: u64,
    },
}

impl fmt::Display for TapRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TapRejection::NotTappable {
                status: RoundStatus::Cooldown,
            } => f.write_str("round has not started yet"),
            TapRejection::NotTappable {
                status: RoundStatus::Finished,
            } => f.write_str("round has already finished"),
            TapRejection::NotTappable { .. } => f.write_str("round is not active"),
            TapRejection::Throttled { .. } => f.write_str("too many taps"),
        }
    }
}

/// Outcome of one tap attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapOutcome {
    /// The tap counts.
    Accepted(TapAccepted),
    /// The tap was refused.
    Rejected(TapRejection),
}

impl TapOutcome {
    /// Whether the tap counted.
    pub fn is_accepted(&self) -> bool {
        matches!(self, TapOutcome::Accepted(_))
    }
}

impl GameplaySession {
    /// Session without any recorded tap.
    pub fn new(user_id: impl Into<String>, round_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            round_id: round_id.into(),
            taps: 0,
            last_tap_at: None,
        }
    }

    /// Points currently held by this session.
    pub fn points(&self, zero_score: bool) -> u64 {
        scoring::points(self.taps, zero_score)
    }

    /// Remaining throttle time at `now`, if any.
    pub fn throttle_remaining(
        &self,
        config: &ThrottleConfig,
        now: OffsetDateTime,
    ) -> Option<Duration> {
        let last = self.last_tap_at?;
        let elapsed = now - last;
        let window = config.window();
        (elapsed < window).then(|| window - elapsed)
    }

    /// Decide a tap at `now` and, when accepted, advance the session.
    ///
    /// Rejected taps leave the session untouched.
    pub fn tap(
        &mut self,
        round: &Round,
        zero_score: bool,
        config: &ThrottleConfig,
        now: OffsetDateTime,
    ) -> TapOutcome {
        let status = round.status(now);
        if status != RoundStatus::Active {
            return TapOutcome::Rejected(TapRejection::NotTappable { status });
        }

        if let Some(remaining) = self.throttle_remaining(config, now) {
            let retry_after_ms = u64::try_from(remaining.whole_milliseconds()).unwrap_or(0);
            return TapOutcome::Rejected(TapRejection::Throttled { retry_after_ms });
        }

        self.taps += 1;
        self.last_tap_at = Some(now);

        TapOutcome::Accepted(TapAccepted {
            taps: self.taps,
            points: self.points(zero_score),
            timestamp: now,
        })
    }
}
