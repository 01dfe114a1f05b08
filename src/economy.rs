//! Pure calculators for rewards, levels, investment returns, and progress.
//!
//! Everything here is deterministic given its inputs; the only stochastic
//! input (the uniform sample for investment returns) is drawn through the
//! injected [`RandomSource`] so tests can pin it.

use chrono::{DateTime, Utc};

/// Maximum wizard level.
pub const MAX_LEVEL: i32 = 50;

/// Experience points required per level step.
pub const EXP_PER_LEVEL: i32 = 100;

/// Worst-case investment return rate, in percent.
pub const MIN_RETURN_RATE: f64 = -90.0;

/// Mana and experience earned for working a job to completion.
///
/// The per-hour rate is divided by 60 before multiplying, so rates that are
/// not multiples of 60 lose the sub-unit remainder. That truncation is part
/// of the observable contract; do not reorder the arithmetic.
pub fn job_reward(
    mana_per_hour: i64,
    exp_per_hour: i32,
    duration_minutes: i32,
) -> (i64, i32) {
    let mana = (mana_per_hour / 60) * i64::from(duration_minutes);
    let exp = (exp_per_hour / 60) * duration_minutes;
    (mana, exp)
}

/// Level for a given experience total: one level per 100 exp, capped at 50.
pub fn level_for_exp(exp: i32) -> i32 {
    (exp / EXP_PER_LEVEL + 1).clamp(1, MAX_LEVEL)
}

/// Actual return rate for a maturing investment.
///
/// `unit` is a uniform sample in `[0, 1)`. The variance band scales with the
/// risk level (±2 % per risk point) and the result is floored at −90 % so a
/// position can never be wiped out entirely.
pub fn return_rate(base_rate: f64, risk_level: i32, unit: f64) -> f64 {
    let variance = f64::from(risk_level) * 2.0;
    let adjustment = (unit * 2.0 - 1.0) * variance;
    (base_rate + adjustment).max(MIN_RETURN_RATE)
}

/// Amount credited back for a settled investment, truncated toward zero.
pub fn returned_amount(amount: i64, actual_rate: f64) -> i64 {
    (amount as f64 * (1.0 + actual_rate / 100.0)) as i64
}

/// Wall-clock progress percentage for a progress row at `now`.
///
/// 0 before the start, 100 at or past the expected end, and the truncated
/// elapsed fraction in between. A degenerate window (`end <= start`) counts
/// as already finished.
pub fn progress_at(
    now: DateTime<Utc>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> i32 {
    let elapsed = now - start;
    let total = end - start;

    if elapsed <= chrono::Duration::zero() {
        return 0;
    }
    if total <= chrono::Duration::zero() || elapsed >= total {
        return 100;
    }

    let fraction = elapsed.num_milliseconds() as f64 / total.num_milliseconds() as f64;
    ((fraction * 100.0) as i32).clamp(0, 100)
}

/// Whole minutes worked since `start`, never negative.
pub fn minutes_worked(now: DateTime<Utc>, start: DateTime<Utc>) -> i32 {
    (now - start).num_minutes().max(0) as i32
}

/// A source of uniform samples in `[0, 1)`.
///
/// The production source draws from the thread-local RNG; tests inject a
/// fixed sequence.
pub trait RandomSource: Send + Sync {
    fn unit(&self) -> f64;
}

/// Thread-local RNG-backed source.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn unit(&self) -> f64 {
        rand::random::<f64>()
    }
}

/// A source that always returns the same sample.
#[derive(Debug, Clone, Copy)]
pub struct FixedRandom(pub f64);

impl RandomSource for FixedRandom {
    fn unit(&self) -> f64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_job_reward_exact_hours() {
        // 120 mana/h and 60 exp/h over one hour.
        assert_eq!(job_reward(120, 60, 60), (120, 60));
        // Two hours.
        assert_eq!(job_reward(120, 60, 120), (240, 120));
    }

    #[test]
    fn test_job_reward_truncates_sub_hour_rates() {
        // 90/60 truncates to 1 mana per minute: the remainder is lost.
        assert_eq!(job_reward(90, 90, 60), (60, 60));
        // Rates below 60 per hour pay nothing at all.
        assert_eq!(job_reward(59, 59, 60), (0, 0));
    }

    #[test]
    fn test_level_for_exp_boundaries() {
        assert_eq!(level_for_exp(0), 1);
        assert_eq!(level_for_exp(99), 1);
        assert_eq!(level_for_exp(100), 2);
        assert_eq!(level_for_exp(60), 1);
        assert_eq!(level_for_exp(4_900), 50);
        // Cap holds beyond the last threshold.
        assert_eq!(level_for_exp(1_000_000), MAX_LEVEL);
    }

    #[test]
    fn test_return_rate_bounds() {
        let base = 10.0;
        let risk = 3;
        // unit = 0.5 is the midpoint: no adjustment.
        assert_eq!(return_rate(base, risk, 0.5), base);
        // Extremes stay within base ± 2 * risk.
        assert_eq!(return_rate(base, risk, 0.0), base - 6.0);
        assert!((return_rate(base, risk, 1.0) - (base + 6.0)).abs() < 1e-9);
    }

    #[test]
    fn test_return_rate_floor() {
        // A catastrophic draw on a huge risk level still floors at -90 %.
        assert_eq!(return_rate(-50.0, 100, 0.0), MIN_RETURN_RATE);
    }

    #[test]
    fn test_returned_amount_truncates() {
        assert_eq!(returned_amount(1000, 5.0), 1050);
        // 1 + (-90/100) is 0.0999… in binary floating point, so the floor
        // lands one mana short of a clean tenth. Part of the contract.
        assert_eq!(returned_amount(1000, -90.0), 99);
        // 1000 * 1.0555 = 1055.5 truncates to 1055.
        assert_eq!(returned_amount(1000, 5.55), 1055);
    }

    #[test]
    fn test_progress_at_window() {
        let start = Utc::now();
        let end = start + Duration::minutes(60);

        assert_eq!(progress_at(start, start, end), 0);
        assert_eq!(progress_at(start - Duration::minutes(5), start, end), 0);
        assert_eq!(progress_at(start + Duration::minutes(30), start, end), 50);
        assert_eq!(progress_at(start + Duration::minutes(60), start, end), 100);
        assert_eq!(progress_at(start + Duration::hours(5), start, end), 100);
    }

    #[test]
    fn test_progress_at_truncates() {
        let start = Utc::now();
        let end = start + Duration::minutes(60);
        // 40m30s of 60m = 67.5 % -> 67.
        let now = start + Duration::minutes(40) + Duration::seconds(30);
        assert_eq!(progress_at(now, start, end), 67);
    }

    #[test]
    fn test_progress_at_degenerate_window() {
        let start = Utc::now();
        assert_eq!(progress_at(start + Duration::seconds(1), start, start), 100);
    }

    #[test]
    fn test_minutes_worked_floors_and_clamps() {
        let start = Utc::now();
        assert_eq!(minutes_worked(start + Duration::seconds(90), start), 1);
        assert_eq!(minutes_worked(start - Duration::minutes(3), start), 0);
    }

    #[test]
    fn test_thread_random_in_range() {
        let src = ThreadRandom;
        for _ in 0..100 {
            let u = src.unit();
            assert!((0.0..1.0).contains(&u));
        }
    }
}
