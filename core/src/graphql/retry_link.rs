//! Retries operations that failed without a response or with a 5xx.

use async_trait::async_trait;
use tracing::warn;

use crate::error::LinkError;
use crate::graphql::link::{Link, Next};
use crate::graphql::types::{GraphQlResponse, Operation};
use crate::retry::ExponentialBackoff;

pub struct RetryLink {
    max_attempts: u32,
    backoff: ExponentialBackoff,
}

impl RetryLink {
    /// `max_attempts` counts the first attempt; values below 1 behave as 1.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: ExponentialBackoff::default(),
        }
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: ExponentialBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

#[async_trait]
impl Link for RetryLink {
    async fn request(&self, operation: Operation, next: Next<'_>) -> Result<GraphQlResponse, LinkError> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match next.run(operation.clone()).await {
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.backoff.delay(attempt - 1);
                    warn!(
                        operation = operation.name(),
                        attempt,
                        status = ?err.status(),
                        delay_ms = delay.as_millis() as u64,
                        "graphql operation failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                result => return result,
            }
        }
    }
}
