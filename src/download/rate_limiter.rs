//! Average-throughput ceiling for a single transfer.
//!
//! The [`RateLimiter`] does not meter individual reads. After each chunk the session
//! reports how many bytes have moved since the transfer started; when the realized
//! average rate is above the ceiling, the limiter sleeps exactly long enough for the
//! average to drop back to it.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use streamfetch_core::download::RateLimiter;
//!
//! let limiter = RateLimiter::new(Some(1000));
//!
//! // 2000 bytes after half a second is 4000 B/s: wait 1.5s to average 1000 B/s.
//! assert_eq!(
//!     limiter.delay_for(2000, Duration::from_millis(500)),
//!     Some(Duration::from_millis(1500))
//! );
//!
//! // Already below the ceiling.
//! assert_eq!(limiter.delay_for(500, Duration::from_secs(1)), None);
//! ```

use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

/// Throughput ceiling in bytes per second. `None` disables throttling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimiter {
    ceiling: Option<u64>,
}

impl RateLimiter {
    /// Creates a limiter for `bytes_per_second`. `None` or `Some(0)` means unlimited.
    #[must_use]
    pub fn new(bytes_per_second: Option<u64>) -> Self {
        Self {
            ceiling: bytes_per_second.filter(|rate| *rate > 0),
        }
    }

    /// Creates a limiter that never sleeps.
    #[must_use]
    pub fn unlimited() -> Self {
        Self { ceiling: None }
    }

    /// Returns the configured ceiling.
    #[must_use]
    pub fn ceiling(&self) -> Option<u64> {
        self.ceiling
    }

    /// Computes how long to sleep so that `bytes` over `elapsed` plus the sleep
    /// averages to the ceiling. `None` when no sleep is needed.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn delay_for(&self, bytes: u64, elapsed: Duration) -> Option<Duration> {
        let ceiling = self.ceiling?;
        if bytes == 0 {
            return None;
        }
        let target = Duration::from_secs_f64(bytes as f64 / ceiling as f64);
        target.checked_sub(elapsed).filter(|d| !d.is_zero())
    }

    /// Sleeps if `bytes` moved since `start` exceed the ceiling's allowance.
    pub async fn throttle(&self, start: Instant, bytes: u64) {
        if let Some(delay) = self.delay_for(bytes, start.elapsed()) {
            trace!(bytes, delay_ms = delay.as_millis(), "rate limit sleep");
            tokio::time::sleep(delay).await;
        }
    }
}
