use std::time::Duration;

use tokio::time::sleep;

use crate::apis::ProviderError;

const BACKOFF_UNIT: Duration = Duration::from_millis(1000);

/// Run `operation` up to `max_attempts + 1` times. After a failed attempt n
/// (1-based, not the last) the wait before the next try is `1000ms * n`.
/// Rate-limit responses follow the same schedule, logged at debug.
pub async fn with_retry<T, F, Fut>(max_attempts: u32, mut operation: F) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, ProviderError>>,
{
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt > max_attempts => return Err(err),
            Err(err) => {
                let delay = BACKOFF_UNIT * attempt;
                if err.is_rate_limit() {
                    tracing::debug!("Rate limited on attempt {}, retrying in {:?}", attempt, delay);
                } else {
                    tracing::warn!("Attempt {} failed ({}), retrying in {:?}", attempt, err, delay);
                }
                sleep(delay).await;
            }
        }
    }
}
