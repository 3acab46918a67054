//! Bounded retry of command attempts.

use tracing::debug;

use crate::error::{EComError, EComResult};

/// Run `attempt` up to `trials` times.
///
/// The closure receives the 1-based attempt number. The loop stops at the first
/// success or at the first error that is not [retryable](EComError::is_retryable);
/// once every trial has failed, the last error is returned.
///
/// # Errors
///
/// [`EComError::InvalidParameter`] if `trials` is zero, otherwise the error of
/// the final attempt.
pub fn retry<T, F>(trials: u32, mut attempt: F) -> EComResult<T>
where
    F: FnMut(u32) -> EComResult<T>,
{
    if trials == 0 {
        return Err(EComError::InvalidParameter(
            "number of trials must be at least 1".into(),
        ));
    }

    let mut last_error = None;
    for trial in 1..=trials {
        match attempt(trial) {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => {
                debug!("Attempt {}/{} failed: {}", trial, trials, e);
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or(EComError::TimedOut))
}
