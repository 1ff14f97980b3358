use crate::error::Error;
use log::warn;
use std::future::Future;
use std::time::Duration;

/// Longest pause between two attempts, whatever the policy computes.
pub const MAX_DELAY: Duration = Duration::from_secs(300);

/// Bounded exponential backoff around a single fallible call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
}

/// The call kept failing: either attempts ran out or the error was not worth retrying.
#[derive(Debug)]
pub struct Exhausted {
    pub attempts: u32,
    pub last_error: Error,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, multiplier: f64) -> Self {
        RetryPolicy {
            max_attempts: max_attempts.max(1),
            base_delay,
            multiplier,
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based), capped
    /// at [`MAX_DELAY`].
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.multiplier.max(1.0).powi(exponent);
        Duration::try_from_secs_f64(self.base_delay.as_secs_f64() * factor)
            .map_or(MAX_DELAY, |delay| delay.min(MAX_DELAY))
    }

    /// Runs `attempt` until it succeeds, fails with a non-transient error, or
    /// `max_attempts` calls have been made.
    ///
    /// # Arguments
    /// * `operation` - Name used in log lines.
    /// * `attempt` - Produces one call per invocation.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut attempt: F) -> Result<T, Exhausted>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempts < self.max_attempts => {
                    let delay = self.delay_for(attempts);
                    warn!(
                        "{} failed (attempt {}/{}): {}; retrying in {:?}",
                        operation, attempts, self.max_attempts, err, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    return Err(Exhausted {
                        attempts,
                        last_error: err,
                    })
                }
            }
        }
    }
}
