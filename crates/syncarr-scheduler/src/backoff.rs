// SPDX-License-Identifier: GPL-3.0-or-later
//! Retry delays for failed tasks.
//!
//! Backoff functions must be non-decreasing in the attempt number.

use chrono::{DateTime, Duration as ChronoDuration, Utc};

/// Highest attempt number `next_retry_delay` will look ahead to.
pub const MAX_BACKOFF_SCAN: u32 = 239;

/// `5 + n^4` seconds: 6, 21, 86, 261, ...
pub fn default_backoff(attempt: u32) -> u64 {
    5u64.saturating_add(u64::from(attempt).saturating_pow(4))
}

/// Delay before the next attempt. Never shorter than `current`.
pub fn next_retry_delay<F>(attempts: u32, current: u64, backoff: F) -> u64
where
    F: Fn(u32) -> u64,
{
    let candidate = backoff(attempts);
    if candidate >= current {
        return candidate;
    }
    (attempts.saturating_add(1)..=MAX_BACKOFF_SCAN)
        .map(&backoff)
        .find(|delay| *delay > current)
        .unwrap_or(current)
}

/// When and after what delay a failed task runs again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySchedule {
    pub run_at: DateTime<Utc>,
    pub delay_secs: u64,
}

/// Plan a retry, or `None` when the attempt ceiling has been reached.
pub fn plan_retry<F>(
    attempts: u32,
    max_attempts: u32,
    current_delay: u64,
    backoff: F,
    now: DateTime<Utc>,
) -> Option<RetrySchedule>
where
    F: Fn(u32) -> u64,
{
    if attempts >= max_attempts {
        return None;
    }
    let delay_secs = next_retry_delay(attempts, current_delay, backoff);
    let run_at = ChronoDuration::try_seconds(i64::try_from(delay_secs).unwrap_or(i64::MAX))
        .and_then(|delay| now.checked_add_signed(delay))
        .unwrap_or(DateTime::<Utc>::MAX_UTC);
    Some(RetrySchedule { run_at, delay_secs })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn default_schedule() {
        assert_eq!(default_backoff(1), 6);
        assert_eq!(default_backoff(2), 21);
        assert_eq!(default_backoff(3), 86);
        assert_eq!(default_backoff(0), 5);
    }

    #[test]
    fn delay_never_shrinks() {
        // A flat backoff below the current delay keeps the current delay
        assert_eq!(next_retry_delay(3, 100, |_| 10), 100);
        // The scan finds the first larger value further along
        assert_eq!(next_retry_delay(1, 50, default_backoff), 86);
        assert_eq!(next_retry_delay(2, 0, default_backoff), 21);
    }

    #[test]
    fn ceiling_stops_retries() {
        let now = Utc::now();
        assert!(plan_retry(3, 3, 0, default_backoff, now).is_none());
        let retry = plan_retry(1, 3, 0, default_backoff, now).unwrap();
        assert_eq!(retry.delay_secs, 6);
        assert_eq!(retry.run_at, now + ChronoDuration::seconds(6));
    }

    proptest! {
        #[test]
        fn replaced_backoff_is_monotone(
            steps in proptest::collection::vec(0u64..1_000, 1..64),
            base in 0u64..10_000,
            attempts in 0u32..300,
            current in 0u64..100_000,
        ) {
            // Build an arbitrary non-decreasing backoff from positive increments
            let table: Vec<u64> = steps
                .iter()
                .scan(base, |acc, step| {
                    *acc += step;
                    Some(*acc)
                })
                .collect();
            let backoff = |n: u32| {
                let idx = (n as usize).min(table.len() - 1);
                table[idx]
            };

            let next = next_retry_delay(attempts, current, backoff);
            prop_assert!(next >= current);
            if backoff(attempts) >= current {
                prop_assert_eq!(next, backoff(attempts));
            }
        }

        #[test]
        fn default_backoff_is_non_decreasing(n in 0u32..10_000) {
            prop_assert!(default_backoff(n + 1) >= default_backoff(n));
        }
    }
}
