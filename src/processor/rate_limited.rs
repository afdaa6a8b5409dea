//! Rate-limited warning logger.
//!
//! Logs at most once per interval and reports how many occurrences were
//! suppressed in between.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

pub(crate) const DEFAULT_LOG_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub(crate) struct RateLimitedLogger {
    min_interval: Duration,
    last_log_time: Mutex<Option<Instant>>,
    suppressed: AtomicU64,
}

impl RateLimitedLogger {
    pub(crate) fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_log_time: Mutex::new(None),
            suppressed: AtomicU64::new(0),
        }
    }

    /// Returns true if the warning was emitted.
    pub(crate) fn warn(&self, message: &str, error: &dyn std::fmt::Display) -> bool {
        let should_log = {
            let mut last = self.last_log_time.lock();
            let now = Instant::now();
            match *last {
                Some(at) if now.duration_since(at) < self.min_interval => false,
                _ => {
                    *last = Some(now);
                    true
                }
            }
        };

        if !should_log {
            self.suppressed.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let suppressed = self.suppressed.swap(0, Ordering::Relaxed);
        if suppressed > 0 {
            tracing::warn!(
                error = %error,
                suppressed_count = suppressed,
                "{} (rate-limited)",
                message
            );
        } else {
            tracing::warn!(error = %error, "{}", message);
        }
        true
    }
}

impl Default for RateLimitedLogger {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_INTERVAL)
    }
}
