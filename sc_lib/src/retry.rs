//! Retry with exponential backoff and attempt-based escalation.
//!
//! A [`RetryPolicy`] is a plain value: the number of attempts, the backoff
//! schedule between them, and how budgets grow with the attempt number.

use crate::cancel::CancelToken;
use anyhow::Result;
use parameters_toml::MAX_ATTEMPTS_LIMIT;
use std::fmt::Display;
use std::ops::Mul;
use std::time::Duration;

/// Result of a single attempt of a retried operation.
#[derive(Debug)]
pub enum Step<T, E> {
    Success(T),
    Retryable(E),
    Fatal(E),
}

/// Why a retried operation gave up.
#[derive(Debug, PartialEq, Eq)]
pub enum RetryError<E> {
    /// Every attempt failed with a retryable error.
    Exhausted { attempts: u32, last: E },
    /// An attempt failed with an error that retrying cannot fix.
    Fatal { attempt: u32, error: E },
    /// The run was interrupted; the last attempt failed and no other was started.
    Cancelled { attempts: u32, last: E },
}

impl<E: Display> Display for RetryError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetryError::Exhausted { attempts, last } => {
                write!(f, "gave up after {attempts} attempts: {last}")
            }
            RetryError::Fatal { attempt, error } => write!(f, "attempt {attempt}: {error}"),
            RetryError::Cancelled { attempts, last } => {
                write!(f, "interrupted after {attempts} attempts: {last}")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(5),
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// A policy that retries immediately.
    pub fn without_backoff(max_attempts: u32) -> Self {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    pub fn from_parameters() -> Result<Self> {
        Ok(RetryPolicy {
            max_attempts: *parameters_toml::max_attempts()?,
            initial_backoff: Duration::from_secs(*parameters_toml::retry_initial_backoff_secs()?),
            max_backoff: Duration::from_secs(*parameters_toml::retry_max_backoff_secs()?),
        })
    }

    /// Delay after failed attempt `attempt`: doubles each time, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// Budget for attempt `attempt` (1-based): the base multiplied by the attempt number.
    pub fn escalate<T: Mul<u32, Output = T>>(&self, base: T, attempt: u32) -> T {
        base * attempt.max(1)
    }

    /// Run `op` until it succeeds, fails fatally, the attempts run out, or
    /// `cancel` is set. `op` receives the 1-based attempt number. Returns the
    /// value and the number of attempts used. Never makes more than
    /// [`MAX_ATTEMPTS_LIMIT`] attempts.
    pub fn run<T, E>(
        &self,
        cancel: &CancelToken,
        mut op: impl FnMut(u32) -> Step<T, E>,
    ) -> Result<(T, u32), RetryError<E>> {
        let max_attempts = self.max_attempts.clamp(1, MAX_ATTEMPTS_LIMIT);
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Step::Success(value) => return Ok((value, attempt)),
                // A failure after an interrupt is put down to the interrupt.
                Step::Retryable(last) | Step::Fatal(last) if cancel.is_cancelled() => {
                    return Err(RetryError::Cancelled {
                        attempts: attempt,
                        last,
                    })
                }
                Step::Fatal(error) => return Err(RetryError::Fatal { attempt, error }),
                Step::Retryable(last) if attempt >= max_attempts => {
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last,
                    })
                }
                Step::Retryable(last) => {
                    cancel.sleep(self.backoff(attempt));
                    if cancel.is_cancelled() {
                        return Err(RetryError::Cancelled {
                            attempts: attempt,
                            last,
                        });
                    }
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_secs(5),
            max_backoff: Duration::from_secs(60),
        };
        let delays: Vec<_> = (1..=6).map(|a| policy.backoff(a).as_secs()).collect();
        assert_eq!(delays, [5, 10, 20, 40, 60, 60]);
        assert_eq!(policy.backoff(100), Duration::from_secs(60));
    }

    #[test]
    fn test_escalate() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.escalate(Duration::from_secs(10), 3), Duration::from_secs(30));
        assert_eq!(policy.escalate(Duration::from_secs(10), 0), Duration::from_secs(10));
    }

    #[test]
    fn test_never_exceeds_max_attempts() {
        let policy = RetryPolicy::without_backoff(3);
        let mut calls = 0;
        let result: Result<((), u32), _> = policy.run(&CancelToken::new(), |_| {
            calls += 1;
            Step::Retryable("transient")
        });
        assert_eq!(calls, 3);
        assert_eq!(
            result,
            Err(RetryError::Exhausted {
                attempts: 3,
                last: "transient"
            })
        );
    }

    #[test]
    fn test_succeeds_on_later_attempt() {
        let policy = RetryPolicy::without_backoff(3);
        let result = policy.run(&CancelToken::new(), |attempt| {
            if attempt < 2 {
                Step::Retryable("transient")
            } else {
                Step::Success(attempt * 10)
            }
        });
        assert_eq!(result, Ok((20, 2)));
    }

    #[test]
    fn test_fatal_stops_immediately() {
        let policy = RetryPolicy::without_backoff(3);
        let mut calls = 0;
        let result: Result<((), u32), _> = policy.run(&CancelToken::new(), |_| {
            calls += 1;
            Step::Fatal("corrupt")
        });
        assert_eq!(calls, 1);
        assert_eq!(
            result,
            Err(RetryError::Fatal {
                attempt: 1,
                error: "corrupt"
            })
        );
    }

    #[test]
    fn test_attempts_capped_at_limit() {
        let policy = RetryPolicy::without_backoff(10);
        let mut calls = 0;
        let result: Result<((), u32), _> = policy.run(&CancelToken::new(), |_| {
            calls += 1;
            Step::Retryable("transient")
        });
        assert_eq!(calls, 3);
        assert!(matches!(result, Err(RetryError::Exhausted { attempts: 3, .. })));
    }

    #[test]
    fn test_cancel_stops_retrying() {
        let policy = RetryPolicy::without_backoff(3);
        let cancel = CancelToken::new();
        let mut calls = 0;
        let result: Result<((), u32), _> = policy.run(&cancel, |_| {
            calls += 1;
            cancel.cancel();
            Step::Fatal("killed by signal 15")
        });
        assert_eq!(calls, 1);
        assert_eq!(
            result,
            Err(RetryError::Cancelled {
                attempts: 1,
                last: "killed by signal 15"
            })
        );
    }

    #[test]
    fn test_cancel_cuts_backoff_short() {
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(30),
            max_backoff: Duration::from_secs(60),
        };
        let cancel = CancelToken::new();
        let start = Instant::now();
        let mut calls = 0;
        let result: Result<((), u32), _> = crossbeam_utils::thread::scope(|s| {
            s.spawn(|_| {
                std::thread::sleep(Duration::from_millis(50));
                cancel.cancel();
            });
            policy.run(&cancel, |_| {
                calls += 1;
                Step::Retryable("connection reset")
            })
        })
        .unwrap();
        assert_eq!(calls, 1);
        assert!(matches!(result, Err(RetryError::Cancelled { attempts: 1, .. })));
        assert!(start.elapsed() < Duration::from_secs(10));
    }
}
