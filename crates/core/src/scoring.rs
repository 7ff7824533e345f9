//! Time-based scoring for timed (sprint) sessions.

/// Points for any correct answer.
pub const BASE_SCORE: u32 = 10;
/// Points for an instant correct answer.
pub const MAX_SCORE: u32 = 20;

/// Seconds at which the speed bonus reaches zero.
const BONUS_HORIZON_SECS: f64 = 45.0;
/// Seconds saved per bonus point.
const SECS_PER_BONUS_POINT: f64 = 4.5;

/// Score a single sprint answer.
///
/// Wrong answers and timeouts score 0. A correct answer scores
/// `clamp(10 + round((45 - t) / 4.5), 10, 20)` where `t` is the solve time in
/// seconds.
#[must_use]
pub fn sprint_score(is_correct: bool, time_ms: u64) -> u32 {
    if !is_correct {
        return 0;
    }

    #[allow(clippy::cast_precision_loss)]
    let secs = time_ms as f64 / 1000.0;
    let bonus = ((BONUS_HORIZON_SECS - secs) / SECS_PER_BONUS_POINT).round();
    let raw = f64::from(BASE_SCORE) + bonus;

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let score = raw.clamp(f64::from(BASE_SCORE), f64::from(MAX_SCORE)) as u32;
    score
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_points() {
        assert_eq!(sprint_score(true, 0), 20);
        assert_eq!(sprint_score(true, 45_000), 10);
        assert_eq!(sprint_score(true, 90_000), 10);
        assert_eq!(sprint_score(false, 1_000), 0);
    }

    #[test]
    fn bonus_decays_with_time() {
        assert_eq!(sprint_score(true, 4_500), 19);
        assert_eq!(sprint_score(true, 22_500), 15);
        assert_eq!(sprint_score(true, 40_000), 11);
    }

    #[test]
    fn score_is_monotonic_non_increasing() {
        let mut previous = sprint_score(true, 0);
        for ms in (0..=120_000).step_by(250) {
            let current = sprint_score(true, ms);
            assert!(current <= previous, "score rose at {ms}ms");
            assert!((BASE_SCORE..=MAX_SCORE).contains(&current));
            previous = current;
        }
    }
}
