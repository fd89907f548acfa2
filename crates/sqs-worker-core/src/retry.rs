//! Bounded retry with a fixed wait between attempts.

use std::fmt;
use std::future::Future;
use std::time::Duration;

/// How often, and how patiently, an operation is retried.
///
/// An operation runs at most `max_retries + 1` times. The first retry
/// follows the failure immediately; every later retry waits `wait` first.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub wait: Duration,
}

/// Returned once every attempt has failed.
#[derive(Debug, PartialEq, Eq)]
pub struct RetryError<E> {
    pub attempts: u32,
    pub last: E,
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gave up after {} attempt(s): {}", self.attempts, self.last)
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for RetryError<E> {}

impl RetryPolicy {
    pub const fn new(max_retries: u32, wait: Duration) -> Self {
        Self { max_retries, wait }
    }

    /// A single attempt.
    pub const fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// The wait before retry number `retry` (1-based); the first retry does not wait.
    pub fn wait_before(&self, retry: u32) -> Duration {
        if retry >= 2 {
            self.wait
        } else {
            Duration::ZERO
        }
    }

    /// Runs `op` until it succeeds or the retry budget is spent.
    ///
    /// Each failure is logged. On success returns the value along with the
    /// number of attempts used.
    pub async fn run<T, E, F, Fut>(&self, name: &str, mut op: F) -> Result<(T, u32), RetryError<E>>
    where
        E: fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let error = match op().await {
                Ok(value) => return Ok((value, attempts)),
                Err(error) => error,
            };

            let retries_used = attempts - 1;
            if retries_used >= self.max_retries {
                log::error!("{name} failed (attempt {attempts}, giving up): {error}");
                return Err(RetryError {
                    attempts,
                    last: error,
                });
            }
            log::warn!("{name} failed (attempt {attempts}, retrying): {error}");

            let wait = self.wait_before(retries_used + 1);
            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }
        }
    }
}
