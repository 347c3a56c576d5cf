//! Exponential backoff shared by every retrying client.

use std::future::Future;
use std::time::Duration;

/// Retry schedule: `max_attempts` tries, sleeping `initial_delay`,
/// `initial_delay * multiplier`, ... between consecutive tries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial_delay: Duration,
    pub multiplier: u32,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            multiplier: 2,
            max_attempts: 5,
        }
    }
}

/// Every attempt failed; carries the last error.
#[derive(Debug)]
pub struct RetryExhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

impl BackoffPolicy {
    pub fn new(initial_delay: Duration, multiplier: u32, max_attempts: u32) -> Self {
        Self {
            initial_delay,
            multiplier,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Sleeps taken between attempts; one fewer than `max_attempts`.
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        let multiplier = self.multiplier;
        std::iter::successors(Some(self.initial_delay), move |d| Some(d.saturating_mul(multiplier)))
            .take(self.max_attempts.saturating_sub(1) as usize)
    }

    /// Run `op` until it succeeds or the attempt budget is spent.
    ///
    /// `op` receives the 1-based attempt number. On success returns the value
    /// together with the number of attempts used.
    pub async fn retry<T, E, F, Fut>(&self, mut op: F) -> Result<(T, u32), RetryExhausted<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut delays = self.delays();
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok((value, attempt)),
                Err(e) => match delays.next() {
                    Some(delay) => {
                        tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "attempt failed; backing off");
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    None => {
                        return Err(RetryExhausted {
                            attempts: attempt,
                            last_error: e,
                        });
                    }
                },
            }
        }
    }
}
