//! Tap-to-points conversion.

/// Number of taps that make up one bonus block.
pub const BONUS_BLOCK_TAPS: u64 = 11;
/// Extra points granted for every complete bonus block.
pub const BONUS_POINTS: u64 = 9;

/// Point total for a participant with `taps` taps.
///
/// Every tap is worth one point and every complete block of
/// [`BONUS_BLOCK_TAPS`] taps adds [`BONUS_POINTS`]. Zero-score participants
/// always get 0.
pub fn points(taps: u64, zero_score: bool) -> u64 {
    if zero_score {
        return 0;
    }

    taps.saturating_add((taps / BONUS_BLOCK_TAPS).saturating_mul(BONUS_POINTS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_taps_scores_nothing() {
        assert_eq!(points(0, false), 0);
    }

    #[test]
    fn below_first_block_is_one_point_per_tap() {
        for taps in 1..BONUS_BLOCK_TAPS {
            assert_eq!(points(taps, false), taps);
        }
    }

    #[test]
    fn eleventh_tap_adds_bonus() {
        assert_eq!(points(10, false), 10);
        assert_eq!(points(11, false), 20);
        assert_eq!(points(12, false), 21);
        assert_eq!(points(22, false), 40);
    }

    #[test]
    fn matches_closed_form_and_is_monotonic() {
        let mut previous = 0;
        for taps in 0..500u64 {
            let value = points(taps, false);
            assert_eq!(value, taps + (taps / 11) * 9);
            assert!(value >= previous);
            previous = value;
        }
    }

    #[test]
    fn zero_score_role_is_pinned_to_zero() {
        for taps in [0, 1, 11, 1_000, u64::MAX] {
            assert_eq!(points(taps, true), 0);
        }
    }
}
