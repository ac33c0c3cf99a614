use std::thread;
use std::time::Duration;

use rand::Rng;

use crate::error::BoldError;

/// Upper bound on attempts for any single locator or request.
pub const MAX_ATTEMPTS_CEILING: u32 = 15;

/// Bounded retry with exponential backoff and jitter. Shared by batch
/// submission, page fetching and specimen lookups.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

/// Final error of an operation that used up its attempts.
#[derive(Debug)]
pub struct Exhausted {
    pub attempts: u32,
    pub error: BoldError,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            jitter: true,
        }
    }

    pub fn fetch_default() -> Self {
        Self::new(10, Duration::from_millis(500), Duration::from_secs(30))
    }

    /// Three consecutive failed submissions halt the run.
    pub fn submit_default() -> Self {
        Self::new(3, Duration::from_secs(2), Duration::from_secs(20))
    }

    pub fn no_delay(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: false,
        }
    }

    pub fn validate(&self, name: &str) -> Result<(), BoldError> {
        if self.max_attempts == 0 || self.max_attempts > MAX_ATTEMPTS_CEILING {
            return Err(BoldError::InvalidConfiguration(format!(
                "{name} attempts must be between 1 and {MAX_ATTEMPTS_CEILING}, got {}",
                self.max_attempts
            )));
        }
        if self.base_delay > self.max_delay {
            return Err(BoldError::InvalidConfiguration(format!(
                "{name} base delay exceeds max delay"
            )));
        }
        Ok(())
    }

    /// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`,
    /// capped at `max_delay`, with equal jitter over the upper half.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let raw = self.base_delay.saturating_mul(1u32 << exponent);
        let capped = raw.min(self.max_delay);
        if !self.jitter || capped.is_zero() {
            return capped;
        }
        let half = capped / 2;
        let spread = capped.as_millis().saturating_sub(half.as_millis()) as u64;
        let extra = rand::thread_rng().gen_range(0..=spread);
        half + Duration::from_millis(extra)
    }

    /// Runs `op` until it succeeds, fails with an error `retryable` rejects, or
    /// the attempt budget is spent. `on_retry` sees each failure that will be
    /// retried.
    pub fn run<T, F, P, R>(&self, mut op: F, retryable: P, mut on_retry: R) -> Result<T, Exhausted>
    where
        F: FnMut(u32) -> Result<T, BoldError>,
        P: Fn(&BoldError) -> bool,
        R: FnMut(u32, &BoldError),
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if attempt >= self.max_attempts || !retryable(&error) {
                        return Err(Exhausted {
                            attempts: attempt,
                            error,
                        });
                    }
                    on_retry(attempt, &error);
                    let delay = self.delay_for(attempt);
                    if !delay.is_zero() {
                        thread::sleep(delay);
                    }
                }
            }
        }
    }
}

pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_and_caps() {
        let policy = RetryPolicy {
            jitter: false,
            ..RetryPolicy::new(5, Duration::from_millis(100), Duration::from_millis(350))
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(350));
    }

    #[test]
    fn jitter_stays_in_upper_half() {
        let policy = RetryPolicy::new(5, Duration::from_millis(400), Duration::from_secs(5));
        for _ in 0..50 {
            let delay = policy.delay_for(1);
            assert!(delay >= Duration::from_millis(200));
            assert!(delay <= Duration::from_millis(400));
        }
    }

    #[test]
    fn stops_after_budget() {
        let policy = RetryPolicy::no_delay(3);
        let mut retries = 0;
        let result: Result<(), Exhausted> = policy.run(
            |_| Err(BoldError::Http("reset".into())),
            BoldError::is_retryable,
            |_, _| retries += 1,
        );
        let exhausted = result.unwrap_err();
        assert_eq!(exhausted.attempts, 3);
        assert_eq!(retries, 2);
    }

    #[test]
    fn fatal_errors_are_not_retried() {
        let policy = RetryPolicy::no_delay(5);
        let result: Result<(), Exhausted> = policy.run(
            |_| Err(BoldError::InvalidConfiguration("nope".into())),
            BoldError::is_retryable,
            |_, _| {},
        );
        assert_eq!(result.unwrap_err().attempts, 1);
    }

    #[test]
    fn succeeds_after_transient_failure() {
        let policy = RetryPolicy::no_delay(4);
        let value = policy
            .run(
                |attempt| {
                    if attempt < 3 {
                        Err(BoldError::Timeout("slow".into()))
                    } else {
                        Ok(attempt)
                    }
                },
                BoldError::is_retryable,
                |_, _| {},
            )
            .unwrap();
        assert_eq!(value, 3);
    }

    #[test]
    fn validate_rejects_zero_and_excess() {
        assert!(RetryPolicy::no_delay(0).validate("fetch").is_err());
        assert!(RetryPolicy::no_delay(16).validate("fetch").is_err());
        assert!(RetryPolicy::no_delay(15).validate("fetch").is_ok());
    }
}
