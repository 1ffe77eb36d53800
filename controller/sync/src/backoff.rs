use std::time::Duration;

/// Bounded exponential backoff for transient admin API failures.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,

    /// Number of retries after the first attempt.
    pub retries: u32,
}

impl Backoff {
    /// The delay before retry number `retry`, counting from zero.
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(30),
            retries: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_until_capped() {
        let backoff = Backoff::default();
        let delays = (0..7).map(|r| backoff.delay(r).as_secs()).collect::<Vec<_>>();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30]);
    }

    #[test]
    fn large_retry_counts_saturate() {
        let backoff = Backoff::default();
        assert_eq!(backoff.delay(40), Duration::from_secs(30));
    }
}
