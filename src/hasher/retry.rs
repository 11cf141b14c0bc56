//! Bounded exponential backoff for transient storage failures.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::HashError;
use crate::progress::OperationControl;
use crate::storage::StorageError;

/// Retry schedule for transient read failures.
///
/// The delay before retry `n` (0-based) is
/// `min(initial_backoff * multiplier^n, max_backoff)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub initial_backoff: Duration,
    pub multiplier: f64,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            multiplier: 2.0,
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// A policy that retries without waiting.
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            initial_backoff: Duration::ZERO,
            multiplier: 1.0,
            max_backoff: Duration::ZERO,
        }
    }

    #[must_use]
    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    #[must_use]
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    #[must_use]
    pub fn with_max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = backoff;
        self
    }

    /// Delay before the retry with 0-based index `retry`.
    #[must_use]
    pub fn delay(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let secs = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = secs.min(self.max_backoff.as_secs_f64());
        if capped.is_finite() && capped > 0.0 {
            Duration::from_secs_f64(capped)
        } else if capped > 0.0 {
            self.max_backoff
        } else {
            Duration::ZERO
        }
    }

    /// Run `attempt` until it succeeds, fails permanently, or `max_retries`
    /// retries are used up.
    ///
    /// The closure receives the 1-based attempt number. `control`, when
    /// given, is checked before every attempt and interrupts the backoff
    /// sleep on cancellation.
    ///
    /// Returns the outcome together with the number of attempts made.
    pub fn run<T>(
        &self,
        file_id: &str,
        max_retries: u32,
        control: Option<&OperationControl>,
        mut attempt: impl FnMut(u32) -> Result<T, StorageError>,
    ) -> (Result<T, HashError>, u32) {
        let mut attempts = 0u32;
        loop {
            if control.is_some_and(|c| !c.checkpoint()) {
                return (Err(HashError::Cancelled), attempts);
            }
            attempts += 1;

            let error = match attempt(attempts) {
                Ok(value) => return (Ok(value), attempts),
                Err(e) => e,
            };
            if !error.is_retryable() {
                return (Err(HashError::Storage(error)), attempts);
            }
            if attempts > max_retries {
                return (
                    Err(HashError::RetriesExhausted {
                        file_id: file_id.to_string(),
                        attempts,
                        last: error,
                    }),
                    attempts,
                );
            }

            let delay = self.delay(attempts - 1);
            log::debug!(
                "Transient error on {file_id} (attempt {attempts}/{}), retrying in {delay:?}: {error}",
                max_retries + 1
            );
            let completed = match control {
                Some(c) => c.sleep(delay),
                None => {
                    std::thread::sleep(delay);
                    true
                }
            };
            if !completed {
                return (Err(HashError::Cancelled), attempts);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_default_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(0), Duration::from_secs(1));
        assert_eq!(policy.delay(1), Duration::from_secs(2));
        assert_eq!(policy.delay(2), Duration::from_secs(4));
        assert_eq!(policy.delay(10), Duration::from_secs(30));
        assert_eq!(policy.delay(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_immediate_policy() {
        assert_eq!(RetryPolicy::immediate().delay(5), Duration::ZERO);
    }

    #[test]
    fn test_recovers_after_transient_failures() {
        let (result, attempts) = RetryPolicy::immediate().run("f", 3, None, |n| {
            if n < 3 {
                Err(StorageError::transient("f", "timeout"))
            } else {
                Ok("digest")
            }
        });
        assert_eq!(result.unwrap(), "digest");
        assert_eq!(attempts, 3);
    }

    #[test]
    fn test_exhausts_retries() {
        let (result, attempts) = RetryPolicy::immediate().run("f", 2, None, |_| {
            Err::<(), _>(StorageError::transient("f", "timeout"))
        });
        assert!(matches!(
            result,
            Err(HashError::RetriesExhausted { attempts: 3, .. })
        ));
        assert_eq!(attempts, 3);
    }

    #[test]
    fn test_permanent_error_is_not_retried() {
        let (result, attempts) = RetryPolicy::immediate().run("f", 5, None, |_| {
            Err::<(), _>(StorageError::NotFound("f".into()))
        });
        assert!(matches!(result, Err(HashError::Storage(StorageError::NotFound(_)))));
        assert_eq!(attempts, 1);
    }

    #[test]
    fn test_cancel_interrupts_backoff() {
        let control = OperationControl::new();
        let canceller = control.clone();
        let policy = RetryPolicy::default().with_initial_backoff(Duration::from_secs(20));

        let started = Instant::now();
        let (result, _) = policy.run("f", 3, Some(&control), |_| {
            canceller.cancel();
            Err::<(), _>(StorageError::transient("f", "timeout"))
        });
        assert_eq!(result, Err(HashError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_cancelled_before_first_attempt() {
        let control = OperationControl::new();
        control.cancel();
        let (result, attempts) = RetryPolicy::immediate().run("f", 3, Some(&control), |_| Ok(()));
        assert_eq!(result, Err(HashError::Cancelled));
        assert_eq!(attempts, 0);
    }
}
