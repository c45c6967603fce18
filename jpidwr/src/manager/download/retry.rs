//! Retry and backoff policy for network fetches.
//!
//! Only transient transport failures are retried. Integrity problems never
//! reach this layer: a consistently mismatching file is a real problem, not
//! noise, and needs an explicit forced refresh.

use std::thread;
use std::time::Duration;

use rand::Rng;

use crate::manager::traits::TransportError;

/// Exponential backoff with full jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Base delay for backoff.
    pub base_delay: Duration,
    /// Upper bound on backoff delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Policy that retries immediately, for tests and local mirrors.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Upper bound of the backoff window after `attempt` failed (1-based).
    pub fn backoff_ceiling(&self, attempt: u32) -> Duration {
        let exp = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(exp).min(self.max_delay)
    }

    /// Delay before the next attempt: uniform in `[0, backoff_ceiling]`.
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let ceiling = self.backoff_ceiling(attempt);
        if ceiling.is_zero() {
            return Duration::ZERO;
        }
        let millis = ceiling.as_millis().min(u64::MAX as u128) as u64;
        Duration::from_millis(rand::rng().random_range(0..=millis))
    }
}

/// Final failure returned once retrying stops.
#[derive(Debug)]
pub struct RetryFailure {
    /// Error from the last attempt.
    pub error: TransportError,
    /// Number of attempts made.
    pub attempts: u32,
}

/// Run `op` until it succeeds, fails permanently, or the policy is spent.
///
/// `op` receives the 1-based attempt number.
pub fn run_with_retry<T, F>(policy: &RetryPolicy, url: &str, mut op: F) -> Result<T, RetryFailure>
where
    F: FnMut(u32) -> Result<T, TransportError>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1u32;
    loop {
        match op(attempt) {
            Ok(value) => return Ok(value),
            Err(error) if error.is_transient() && attempt < max_attempts => {
                let delay = policy.jittered_delay(attempt);
                tracing::warn!(
                    url,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Fetch failed, retrying"
                );
                thread::sleep(delay);
                attempt += 1;
            }
            Err(error) => {
                return Err(RetryFailure {
                    error,
                    attempts: attempt,
                })
            }
        }
    }
}
