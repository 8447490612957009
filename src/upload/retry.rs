use crate::error::SheetPushError;
use std::time::Duration;
use tracing::warn;

/// Exponential backoff for transient remote failures:
/// the wait before attempt `n + 1` is `multiplier * 2^(n - 1)` clamped to `[min_wait, max_wait]`.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub multiplier: Duration,
    pub min_wait: Duration,
    pub max_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 5,
            multiplier: Duration::from_secs(1),
            min_wait: Duration::from_secs(4),
            max_wait: Duration::from_secs(10),
        }
    }
}

/// Outcome of a retried operation and how many attempts it took
#[derive(Debug)]
pub struct Retried<T> {
    pub result: Result<T, SheetPushError>,
    pub attempts: u32,
}

impl RetryPolicy {
    /// Same attempt budget without any waiting, for dry runs and tests.
    pub fn immediate() -> Self {
        RetryPolicy {
            multiplier: Duration::ZERO,
            min_wait: Duration::ZERO,
            max_wait: Duration::ZERO,
            ..RetryPolicy::default()
        }
    }

    /// Delay after the failed attempt number `attempt` (1-based).
    pub fn wait(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.multiplier
            .saturating_mul(factor)
            .max(self.min_wait)
            .min(self.max_wait)
    }

    /// Runs `operation` until it succeeds, fails permanently or the attempt budget is spent.
    /// The operation receives the 1-based attempt number.
    pub fn run<T, F>(&self, description: &str, mut operation: F) -> Retried<T>
    where
        F: FnMut(u32) -> Result<T, SheetPushError>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match operation(attempt) {
                Err(error) if error.is_transient() && attempt < max_attempts => {
                    let delay = self.wait(attempt);
                    warn!(
                        "{} failed with a transient error (attempt {}/{}), retrying in {:?}: {}",
                        description, attempt, max_attempts, delay, error
                    );
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                }
                result => {
                    return Retried {
                        result,
                        attempts: attempt,
                    }
                }
            }
        }
    }
}
