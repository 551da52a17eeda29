use std::time;

/// The retry policy used to determine how far in the future a failed job
/// becomes eligible again.
#[derive(Copy, Clone, Debug)]
pub struct RetryPolicy {
    /// Base of the exponential backoff: the n-th retry waits base^(n-1) seconds.
    backoff_base: u32,
}

impl RetryPolicy {
    pub fn new(backoff_base: u32) -> Self {
        Self { backoff_base }
    }

    /// Calculate the time until the next retry. `attempt` is 1-based: the
    /// first retry waits base^0 seconds.
    pub fn time_until_next_retry(&self, attempt: u32) -> time::Duration {
        let exponent = attempt.saturating_sub(1);
        let seconds = u64::from(self.backoff_base)
            .checked_pow(exponent)
            .unwrap_or(u64::MAX);

        time::Duration::from_secs(seconds)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { backoff_base: 2 }
    }
}
