//! # Exponential Backoff
//!
//! Bounded retry with exponential backoff for reconciliation units.
//!
//! The delay doubles after every failed attempt, starting at the base delay.
//! With the defaults (1s base, 5 attempts) a unit that never succeeds waits
//! 1s, 2s, 4s and 8s between its attempts: 15 seconds in total before the
//! last error is reported.

use crate::error::ControllerError;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Exponential backoff calculator
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Delay after the first failed attempt
    base: Duration,
    /// Total number of attempts, including the first
    max_attempts: u32,
}

impl ExponentialBackoff {
    /// Create a backoff with the given base delay and attempt ceiling.
    #[must_use]
    pub fn new(base: Duration, max_attempts: u32) -> Self {
        Self { base, max_attempts }
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay to wait after `attempts` failed attempts (1-indexed).
    ///
    /// Sequence with a 1s base: 1s, 2s, 4s, 8s, ...
    #[must_use]
    pub fn delay_after(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(31);
        self.base.saturating_mul(1u32 << exponent)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), 5)
    }
}

/// Run `operation` until it succeeds, fails with an error `is_retryable`
/// rejects, exhausts the attempt ceiling, or `token` is cancelled.
///
/// Returns the number of attempts made alongside the final result. A
/// cancellation observed before an attempt or during a backoff wait yields
/// [`ControllerError::Cancelled`].
pub async fn retry_on_error<T, P, F, Fut>(
    token: &CancellationToken,
    backoff: &ExponentialBackoff,
    is_retryable: P,
    mut operation: F,
) -> (u32, Result<T, ControllerError>)
where
    P: Fn(&ControllerError) -> bool,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ControllerError>>,
{
    let mut attempts = 0;
    loop {
        if token.is_cancelled() {
            return (attempts, Err(ControllerError::Cancelled));
        }

        attempts += 1;
        let error = match operation().await {
            Ok(value) => return (attempts, Ok(value)),
            Err(e) => e,
        };

        if !is_retryable(&error) {
            warn!(attempts, error = %error, "Error is not retryable, giving up");
            return (attempts, Err(error));
        }
        if attempts >= backoff.max_attempts() {
            warn!(attempts, error = %error, "Max attempts reached, giving up");
            return (attempts, Err(error));
        }

        let delay = backoff.delay_after(attempts);
        warn!(
            attempts,
            backoff_seconds = delay.as_secs(),
            error = %error,
            "Retrying after error"
        );

        tokio::select! {
            () = token.cancelled() => return (attempts, Err(ControllerError::Cancelled)),
            () = tokio::time::sleep(delay) => {}
        }
    }
}
