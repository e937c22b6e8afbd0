//! Bounded retry for remote connection setup.
//!
//! The policy is explicit (attempt ceiling plus delay strategy) and the
//! outcome is a typed result: either the operation's value or an
//! [`Exhausted`] carrying the attempt count and the last error.

use std::fmt;
use std::thread;
use std::time::Duration;

use serde::Deserialize;

/// Delay strategy between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    /// Same delay before every retry.
    #[default]
    Fixed,
    /// Delay doubles after each failure, capped at `max_delay`.
    Exponential,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    pub backoff: Backoff,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 15,
            delay: Duration::from_secs(1),
            backoff: Backoff::Fixed,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Exponential => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                self.delay.saturating_mul(factor).min(self.max_delay)
            }
        }
    }
}

/// Every attempt failed.
#[derive(Debug)]
pub struct Exhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

impl<E: fmt::Display> fmt::Display for Exhausted<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "gave up after {} attempts: {}",
            self.attempts, self.last_error
        )
    }
}

/// Run `op` until it succeeds or `policy.max_attempts` attempts have failed.
/// Sleeps between attempts only, never after the last one.
pub fn retry<T, E, F>(operation: &str, policy: &RetryPolicy, mut op: F) -> Result<T, Exhausted<E>>
where
    E: fmt::Display,
    F: FnMut() -> Result<T, E>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match op() {
            Ok(value) => {
                if attempt > 1 {
                    log::info!("{operation} succeeded on attempt {attempt}/{max_attempts}");
                }
                return Ok(value);
            }
            Err(e) if attempt >= max_attempts => {
                log::error!("{operation} failed after {attempt} attempts: {e}");
                return Err(Exhausted {
                    attempts: attempt,
                    last_error: e,
                });
            }
            Err(e) => {
                let delay = policy.delay_after(attempt);
                log::warn!(
                    "{operation} failed (attempt {attempt}/{max_attempts}), retrying in {}ms: {e}",
                    delay.as_millis()
                );
                thread::sleep(delay);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instant(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            delay: Duration::ZERO,
            ..RetryPolicy::default()
        }
    }

    #[test]
    fn test_succeeds_first_attempt() {
        let mut calls = 0;
        let result = retry("op", &instant(5), || {
            calls += 1;
            Ok::<_, String>(42)
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_succeeds_after_failures() {
        let mut calls = 0;
        let result = retry("op", &instant(5), || {
            calls += 1;
            if calls < 3 { Err("refused".to_string()) } else { Ok(calls) }
        });
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn test_exhausts_after_max_attempts() {
        let mut calls = 0;
        let err = retry("op", &instant(4), || {
            calls += 1;
            Err::<(), _>(format!("refused #{calls}"))
        })
        .unwrap_err();

        assert_eq!(calls, 4);
        assert_eq!(err.attempts, 4);
        assert_eq!(err.last_error, "refused #4");
        assert_eq!(err.to_string(), "gave up after 4 attempts: refused #4");
    }

    #[test]
    fn test_zero_attempts_still_tries_once() {
        let mut calls = 0;
        let _ = retry("op", &instant(0), || {
            calls += 1;
            Err::<(), _>("refused")
        });
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            delay: Duration::from_millis(100),
            backoff: Backoff::Exponential,
            max_delay: Duration::from_millis(500),
        };
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(400));
        assert_eq!(policy.delay_after(4), Duration::from_millis(500));
        assert_eq!(policy.delay_after(40), Duration::from_millis(500));

        let fixed = RetryPolicy::default();
        assert_eq!(fixed.delay_after(7), Duration::from_secs(1));
    }
}
