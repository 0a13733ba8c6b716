//! Capped exponential backoff for registry requests

use crate::error::handlers::HttpErrorHandler;
use crate::error::Result;
use crate::logging::Logger;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Extra attempts after the first one
    pub retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    pub fn new(retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            retries,
            base_delay,
            max_delay,
        }
    }

    pub fn none() -> Self {
        Self::new(0, Duration::ZERO, Duration::ZERO)
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        HttpErrorHandler::retry_delay(attempt, self.base_delay, self.max_delay)
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error, or retries run out
    pub async fn run<T, F, Fut>(&self, output: &Logger, what: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.retries => {
                    let delay = self.delay_for(attempt);
                    output.warning(&format!(
                        "{} failed (attempt {}/{}): {}; retrying in {}",
                        what,
                        attempt + 1,
                        self.retries + 1,
                        err,
                        output.format_duration(delay)
                    ));
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
