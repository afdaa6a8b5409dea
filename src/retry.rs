//! Bounded retry with exponential backoff around a transport call.

use std::time::Duration;
use tracing::debug;

use crate::config::TransportConfig;
use crate::error::ExportError;
use crate::exporters::Transport;
use crate::record::Batch;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryController {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryController {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay: max_delay.max(base_delay),
        }
    }

    pub fn from_config(config: &TransportConfig) -> Self {
        Self::new(config.max_retries, config.base_delay, config.max_delay)
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before retry number `attempt + 1`: `base * 2^attempt`, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Send `batch`, retrying retryable failures.
    ///
    /// Fatal errors and protocol mismatches return after the first attempt.
    /// The backoff sleeps only suspend the calling task.
    pub async fn send(&self, transport: &dyn Transport, batch: &Batch) -> Result<(), ExportError> {
        let mut attempt = 0;
        loop {
            match transport.send(batch).await {
                Ok(()) => {
                    if attempt > 0 {
                        debug!(
                            signal = %batch.kind(),
                            attempts = attempt + 1,
                            "Export succeeded after retry"
                        );
                    }
                    return Ok(());
                }
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    let delay = self.backoff(attempt);
                    debug!(
                        signal = %batch.kind(),
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Export attempt failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
