//! Retry of rate-limited requests.

use crate::error::ClientError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Default number of extra attempts after a 429
pub const RETRY_COUNT: usize = 1000;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Extra attempts after the first rate-limited one
    pub retry_count: usize,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_count: RETRY_COUNT,
            min_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Random delay in `[min_delay, max_delay]`, spreading out clients that
    /// were throttled at the same moment
    #[must_use]
    pub fn backoff(&self) -> Duration {
        if self.max_delay <= self.min_delay {
            return self.min_delay;
        }
        let min = u64::try_from(self.min_delay.as_millis()).unwrap_or(u64::MAX);
        let max = u64::try_from(self.max_delay.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }
}

/// Run `op`, retrying only on [`ClientError::RateLimited`], at most
/// `retry_count` extra times. Any other outcome is returned as is.
pub async fn retry_rate_limited<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, ClientError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    for attempt in 0..=policy.retry_count {
        match op().await {
            Err(ClientError::RateLimited) => {
                if attempt < policy.retry_count {
                    let delay = policy.backoff();
                    debug!("Rate limited, retrying in {:?} (attempt {})", delay, attempt + 1);
                    tokio::time::sleep(delay).await;
                }
            }
            other => return other,
        }
    }
    Err(ClientError::Exhausted {
        attempts: policy.retry_count + 1,
    })
}
