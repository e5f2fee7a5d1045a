//! Retry with exponential backoff for transient apt failures.

use crate::error::{Error, Result};
use std::thread;
use std::time::Duration;

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub base_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_factor: f64,
    /// Upper bound on any single delay
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_secs(5),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32, base_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff_factor,
            ..Self::default()
        }
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.base_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }

    /// A config that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }
}

/// Execute an operation, retrying retryable errors with backoff.
///
/// Non-retryable errors are returned immediately. Returns the last error
/// once all attempts are used.
pub fn with_retry<T, F>(config: &RetryConfig, what: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let mut last_error: Option<Error> = None;

    for attempt in 0..config.max_attempts {
        match operation() {
            Ok(result) => return Ok(result),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => {
                if attempt + 1 >= config.max_attempts {
                    last_error = Some(e);
                    break;
                }

                let delay = config.delay_for_attempt(attempt);
                log::warn!(
                    "{what}: attempt {}/{} failed: {e}. Retrying in {}s ({})",
                    attempt + 1,
                    config.max_attempts,
                    delay.as_secs(),
                    e.category().advice()
                );
                thread::sleep(delay);
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| Error::Other(format!("{what}: retry exhausted"))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn fast(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base_delay: Duration::from_millis(1),
            backoff_factor: 1.0,
            max_delay: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_delay_for_attempt() {
        let config = RetryConfig::new(4, Duration::from_secs(5), 2.0);
        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(5));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(10));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(20));
        assert_eq!(config.delay_for_attempt(10), Duration::from_secs(60));
    }

    #[test]
    fn test_non_retryable_error_returns_immediately() {
        let attempts = Cell::new(0);
        let result: Result<()> = with_retry(&fast(3), "install foo", || {
            attempts.set(attempts.get() + 1);
            Err(Error::NotFound {
                name: "foo".to_string(),
            })
        });
        assert!(result.is_err());
        assert_eq!(attempts.get(), 1);
    }

    #[test]
    fn test_lock_contention_eventually_succeeds() {
        let attempts = Cell::new(0);
        let result = with_retry(&fast(3), "install curl", || {
            let current = attempts.get();
            attempts.set(current + 1);
            if current < 2 {
                Err(Error::Locked {
                    message: "Could not get lock".to_string(),
                })
            } else {
                Ok(42)
            }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.get(), 3);
    }

    #[test]
    fn test_all_attempts_fail() {
        let attempts = Cell::new(0);
        let result: Result<()> = with_retry(&fast(3), "install curl", || {
            attempts.set(attempts.get() + 1);
            Err(Error::Network {
                message: "timeout".to_string(),
            })
        });
        assert!(matches!(result, Err(Error::Network { .. })));
        assert_eq!(attempts.get(), 3);
    }

    #[test]
    fn test_no_retry_runs_once() {
        let attempts = Cell::new(0);
        let _: Result<()> = with_retry(&RetryConfig::no_retry(), "install curl", || {
            attempts.set(attempts.get() + 1);
            Err(Error::Network {
                message: "timeout".to_string(),
            })
        });
        assert_eq!(attempts.get(), 1);
    }
}
