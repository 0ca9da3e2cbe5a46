use anyhow::Error;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Runs an async operation up to `attempts` times, sleeping `delay_ms`
/// between failures.
///
/// # Parameters
/// - `operation`: Closure returning a future
/// - `attempts`: Total number of runs (values below 1 are treated as 1)
/// - `delay_ms`: Milliseconds between attempts
///
/// # Returns
/// Either the first successful result or the error from the last attempt
pub async fn with_retry<F, Fut, T>(
    mut operation: F,
    attempts: usize,
    delay_ms: u64,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(val) => return Ok(val),
            Err(err) => {
                if attempt >= attempts {
                    return Err(err);
                }
                debug!(
                    "Attempt {}/{} failed: {}. Retrying...",
                    attempt, attempts, err
                );
                attempt += 1;
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
        }
    }
}
