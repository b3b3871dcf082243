use log::{debug, info, warn};
use std::future::Future;
use std::time::Duration;

use crate::error::AppResult;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

/// Runs `operation` until it succeeds, fails with a non-transient error or
/// runs out of attempts. The last error is returned as is.
pub async fn retry_with_exponential_backoff<T, F, Fut>(
    config: &RetryConfig,
    mut operation: F,
) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let mut delay = config.base_delay;
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    info!("Operation succeeded on attempt {}", attempt);
                }
                return Ok(value);
            }
            Err(e) if !e.is_transient() => {
                debug!("Attempt {} failed with non-transient error, not retrying: {}", attempt, e);
                return Err(e);
            }
            Err(e) if attempt >= config.max_attempts => {
                warn!("Operation failed after {} attempts: {}", attempt, e.to_safe_string());
                return Err(e);
            }
            Err(e) => {
                debug!("Attempt {} failed transiently, retrying in {:?}: {}", attempt, delay, e);
                tokio::time::sleep(delay).await;
                delay = std::cmp::min(delay.mul_f64(config.backoff_multiplier), config.max_delay);
                attempt += 1;
            }
        }
    }
}
