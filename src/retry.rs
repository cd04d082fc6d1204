use crate::cancel::sleep_with_cancel;
use crate::types::RetryConfig;
use crate::LastFmError;
use std::future::Future;
use tokio::sync::watch;

/// Result of a retry operation with context
#[derive(Debug)]
pub struct RetryResult<T> {
    /// The successful result
    pub result: T,
    /// Number of attempts made, including the successful one
    pub attempts_made: u32,
}

/// Why a retried operation gave up.
#[derive(Debug, PartialEq)]
pub enum RetryFailure {
    /// Every attempt failed with a retryable error.
    Exhausted {
        /// Number of attempts made
        attempts: u32,
        /// Error returned by the final attempt
        last_error: LastFmError,
    },
    /// A non-retryable error (or cancellation) stopped the loop early.
    Aborted(LastFmError),
}

/// Execute an async operation with a bounded, fixed-backoff retry policy.
///
/// The operation runs at most `config.effective_attempts()` times. Between two
/// attempts the helper waits `config.backoff`, waking early if the session is
/// cancelled. Errors for which [`LastFmError::is_retryable`] is false end the
/// loop immediately.
///
/// # Arguments
/// * `config` - Retry configuration
/// * `operation_name` - Name of the operation for logging
/// * `cancel_rx` - Optional cancellation receiver honoured during backoff
/// * `operation` - Async function that returns a Result
/// * `on_retry` - Callback invoked before each backoff with (failed attempt, error)
pub async fn retry_with_backoff<T, F, Fut, OnRetry>(
    config: &RetryConfig,
    operation_name: &str,
    cancel_rx: Option<watch::Receiver<bool>>,
    mut operation: F,
    mut on_retry: OnRetry,
) -> std::result::Result<RetryResult<T>, RetryFailure>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = crate::Result<T>>,
    OnRetry: FnMut(u32, &LastFmError),
{
    let max_attempts = config.effective_attempts();
    let mut attempt = 0;

    loop {
        attempt += 1;
        match operation(attempt).await {
            Ok(result) => {
                if attempt > 1 {
                    log::debug!("{operation_name} succeeded on attempt {attempt}/{max_attempts}");
                }
                return Ok(RetryResult {
                    result,
                    attempts_made: attempt,
                });
            }
            Err(error) if !error.is_retryable() => {
                return Err(RetryFailure::Aborted(error));
            }
            Err(error) => {
                if attempt >= max_attempts {
                    log::warn!(
                        "{operation_name} failed after {attempt} attempts, giving up: {error}"
                    );
                    return Err(RetryFailure::Exhausted {
                        attempts: attempt,
                        last_error: error,
                    });
                }

                log::info!(
                    "{operation_name} failed ({error}). Waiting {}ms before attempt {} of {max_attempts}",
                    config.backoff.as_millis(),
                    attempt + 1,
                );
                on_retry(attempt, &error);

                sleep_with_cancel(cancel_rx.clone(), config.backoff)
                    .await
                    .map_err(RetryFailure::Aborted)?;
            }
        }
    }
}
