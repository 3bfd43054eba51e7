use crate::core::models::RefreshPolicy;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;

const BACKOFF_FACTOR: u32 = 2;
const SETUP_BASE_DELAY: Duration = Duration::from_secs(60);
const SETUP_MAX_DELAY: Duration = Duration::from_secs(600);

/// When the coordinator should next hit the API.
///
/// `attempts == 1` schedules exactly one refresh interval after
/// `last_evaluated`. Every further attempt adds a doubling step (capped at
/// `backoff_max_step_minutes`) on top, and the accumulated backoff never
/// exceeds `backoff_ceiling_minutes`. Since a failing streak keeps
/// `last_evaluated` at the last success, the accumulation is what spaces the
/// retries out.
pub fn calculate_next_refresh(
    last_evaluated: DateTime<Utc>,
    attempts: u32,
    policy: &RefreshPolicy,
) -> DateTime<Utc> {
    let minutes = policy.rate_minutes.max(0.0) + backoff_offset_minutes(attempts, policy);
    last_evaluated
        .checked_add_signed(minutes_to_duration(minutes))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

pub fn backoff_offset_minutes(attempts: u32, policy: &RefreshPolicy) -> f64 {
    let failures = attempts.saturating_sub(1);
    let ceiling = policy.backoff_ceiling_minutes.max(0.0);
    let max_step = policy.backoff_max_step_minutes.max(0.0);

    let mut offset = 0.0;
    for k in 0..failures {
        let step = backoff_step_minutes(k, policy.backoff_base_minutes, max_step);
        if step <= 0.0 {
            break;
        }
        if step >= max_step {
            // Every remaining step is the capped one
            offset += f64::from(failures - k) * max_step;
            break;
        }
        offset += step;
        if offset >= ceiling {
            break;
        }
    }

    offset.min(ceiling)
}

/// Delay before retrying an account whose startup reported "not ready".
pub fn setup_retry_delay(consecutive_failures: u32) -> Duration {
    if consecutive_failures == 0 {
        return SETUP_BASE_DELAY;
    }

    let factor = BACKOFF_FACTOR.saturating_pow(consecutive_failures - 1);
    let delay_secs = SETUP_BASE_DELAY.as_secs().saturating_mul(factor as u64);

    Duration::from_secs(delay_secs).min(SETUP_MAX_DELAY)
}

fn backoff_step_minutes(index: u32, base: f64, max_step: f64) -> f64 {
    let factor = f64::from(BACKOFF_FACTOR.saturating_pow(index));
    (base.max(0.0) * factor).min(max_step)
}

/// Saturates at `TimeDelta::MAX`; NaN counts as zero.
fn minutes_to_duration(minutes: f64) -> ChronoDuration {
    let millis = (minutes.max(0.0) * 60_000.0).round() as i64;
    ChronoDuration::try_milliseconds(millis).unwrap_or(ChronoDuration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn policy() -> RefreshPolicy {
        RefreshPolicy {
            rate_minutes: 60.0,
            backoff_base_minutes: 1.0,
            backoff_max_step_minutes: 30.0,
            backoff_ceiling_minutes: 240.0,
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_first_attempt_is_refresh_rate() {
        let next = calculate_next_refresh(t0(), 1, &policy());
        assert_eq!(next, t0() + ChronoDuration::minutes(60));
    }

    #[test]
    fn test_backoff_accumulates_doubling_steps() {
        let p = policy();
        assert_eq!(backoff_offset_minutes(1, &p), 0.0);
        assert_eq!(backoff_offset_minutes(2, &p), 1.0);
        assert_eq!(backoff_offset_minutes(3, &p), 3.0);
        assert_eq!(backoff_offset_minutes(4, &p), 7.0);
        assert_eq!(backoff_offset_minutes(5, &p), 15.0);
        // 1 + 2 + 4 + 8 + 16 + 30
        assert_eq!(backoff_offset_minutes(7, &p), 61.0);
        assert_eq!(backoff_offset_minutes(8, &p), 91.0);
    }

    #[test]
    fn test_backoff_is_monotonic_and_capped() {
        let p = policy();
        let ceiling = t0() + ChronoDuration::minutes(60 + 240);

        let mut previous = calculate_next_refresh(t0(), 1, &p);
        for attempts in 2..200 {
            let next = calculate_next_refresh(t0(), attempts, &p);
            assert!(next >= previous, "attempt {attempts} went backwards");
            assert!(next <= ceiling, "attempt {attempts} exceeded the ceiling");
            previous = next;
        }
        assert_eq!(calculate_next_refresh(t0(), u32::MAX, &p), ceiling);
    }

    #[test]
    fn test_zero_base_never_backs_off() {
        let mut p = policy();
        p.backoff_base_minutes = 0.0;
        assert_eq!(backoff_offset_minutes(u32::MAX, &p), 0.0);
    }

    #[test]
    fn test_fractional_rate() {
        let mut p = policy();
        p.rate_minutes = 0.5;
        let next = calculate_next_refresh(t0(), 1, &p);
        assert_eq!(next, t0() + ChronoDuration::seconds(30));
    }

    #[test]
    fn test_unrepresentable_schedule_saturates() {
        let mut p = policy();
        p.rate_minutes = 1e13;
        assert_eq!(calculate_next_refresh(t0(), 1, &p), DateTime::<Utc>::MAX_UTC);

        p.rate_minutes = f64::INFINITY;
        assert_eq!(calculate_next_refresh(t0(), 3, &p), DateTime::<Utc>::MAX_UTC);

        p.rate_minutes = f64::NAN;
        assert_eq!(calculate_next_refresh(t0(), 1, &p), t0());
    }

    #[test]
    fn test_setup_retry_delay() {
        assert_eq!(setup_retry_delay(0), Duration::from_secs(60));
        assert_eq!(setup_retry_delay(1), Duration::from_secs(60));
        assert_eq!(setup_retry_delay(2), Duration::from_secs(120));
        assert_eq!(setup_retry_delay(4), Duration::from_secs(480));
        assert_eq!(setup_retry_delay(10), Duration::from_secs(600));
        assert_eq!(setup_retry_delay(100), Duration::from_secs(600));
    }
}
