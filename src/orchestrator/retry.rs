use std::time::Duration;

use rand::Rng;

/// Exponential backoff for unexpected (non-gate) cycle failures.
///
/// The default retry budget is sized so the backoff delays alone span eight
/// hours; beyond that point the next regular scheduling interval is closer
/// than another retry would be.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

const TOTAL_BACKOFF_TARGET: Duration = Duration::from_secs(8 * 60 * 60);

impl Default for RetryPolicy {
    fn default() -> Self {
        let mut policy = Self {
            max_retries: 0,
            base_delay: Duration::from_secs(30),
            min_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(5 * 60 * 60),
        };
        policy.max_retries = policy.retries_for_total_backoff(TOTAL_BACKOFF_TARGET);
        policy
    }
}

impl RetryPolicy {
    /// Delay before the retry following failed attempt number `attempt`
    /// (zero-based): base delay doubled per attempt, clamped to min..max.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let doubled = self
            .base_delay
            .checked_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX))
            .unwrap_or(self.max_delay);
        doubled.clamp(self.min_delay, self.max_delay)
    }

    /// [`backoff`](Self::backoff) with up to 10% of random spread, so retries
    /// of many devices hitting the same upstream do not synchronize.
    pub fn jittered_backoff(&self, attempt: u32) -> Duration {
        self.backoff(attempt).mul_f64(rand::rng().random_range(1.0..=1.1))
    }

    /// Smallest retry count whose cumulative backoff reaches `total`.
    pub fn retries_for_total_backoff(&self, total: Duration) -> u32 {
        let mut sum = Duration::ZERO;
        let mut retries = 0;
        while sum < total {
            sum += self.backoff(retries);
            retries += 1;
        }
        retries
    }
}
