//! Retry policy for the connect phase of an HTTP transfer.
//!
//! When establishing a connection fails, the error is classified into a [`FailureType`]:
//! - [`FailureType::Transient`] - 5xx responses, timeouts and refused connections
//! - [`FailureType::Permanent`] - everything else, including every other non-2xx status
//!
//! The [`RetryPolicy`] then decides whether another attempt is made and how long to wait,
//! using exponential backoff with jitter. Streaming errors are never retried; once bytes
//! are flowing a failure ends the attempt and leaves the temp file for a later resume.
//!
//! # Example
//!
//! ```
//! use streamfetch_core::download::{
//!     DownloadError, RetryPolicy, FailureType, RetryDecision, classify_error
//! };
//!
//! let policy = RetryPolicy::from_retries(3);
//! let error = DownloadError::http_status("https://example.com/clip.mp4", 503);
//! let failure_type = classify_error(&error);
//!
//! match policy.should_retry(failure_type, 1) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         println!("Retrying in {:?} (attempt {})", delay, attempt);
//!     }
//!     RetryDecision::DoNotRetry { reason } => {
//!         println!("Not retrying: {}", reason);
//!     }
//! }
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument};

use super::DownloadError;
use super::constants::DEFAULT_RETRIES;

/// Default base delay for exponential backoff (1 second).
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default maximum delay cap (30 seconds).
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Default backoff multiplier (doubles each attempt).
const DEFAULT_BACKOFF_MULTIPLIER: f32 = 2.0;

/// Maximum jitter added to delays (500ms). Never more than half the base delay.
const MAX_JITTER: Duration = Duration::from_millis(500);

/// Classification of connect-phase failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Temporary failure that may succeed on retry.
    ///
    /// Examples: 503 Service Unavailable, connect timeout, connection refused.
    Transient,

    /// Failure that won't succeed regardless of retries.
    ///
    /// Examples: 404 Not Found, 403 Forbidden, invalid URL, disk errors.
    Permanent,
}

/// Decision on whether to retry a failed connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be (1-indexed, so first retry is attempt 2).
        attempt: u32,
    },

    /// Do not retry.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Configuration for retry behavior with exponential backoff.
///
/// # Delay Calculation
///
/// ```text
/// delay = min(base_delay * multiplier^(attempt-1), max_delay) + jitter
/// ```
///
/// With defaults, delays are approximately: 1s, 2s, 4s, 8s ... capped at 30s.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt).
    max_attempts: u32,

    /// Base delay for the first retry.
    base_delay: Duration,

    /// Maximum delay cap.
    max_delay: Duration,

    /// Multiplier applied each attempt.
    backoff_multiplier: f32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_retries(DEFAULT_RETRIES)
    }
}

impl RetryPolicy {
    /// Creates a new retry policy with custom settings.
    ///
    /// # Arguments
    ///
    /// * `max_attempts` - Maximum attempts including initial (must be >= 1)
    /// * `base_delay` - Base delay for first retry
    /// * `max_delay` - Maximum delay cap
    /// * `backoff_multiplier` - Multiplier for exponential increase
    #[must_use]
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f32,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            backoff_multiplier,
        }
    }

    /// Creates a policy allowing `retries` retries after the first attempt, with
    /// default delays.
    #[must_use]
    pub fn from_retries(retries: u32) -> Self {
        Self::new(
            retries.saturating_add(1),
            DEFAULT_BASE_DELAY,
            DEFAULT_MAX_DELAY,
            DEFAULT_BACKOFF_MULTIPLIER,
        )
    }

    /// Replaces the base and maximum delays.
    #[must_use]
    pub fn with_delays(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay.max(base_delay);
        self
    }

    /// Returns the maximum number of attempts configured.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the number of retries after the first attempt.
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_attempts - 1
    }

    /// Determines whether to retry a failed attempt.
    ///
    /// # Arguments
    ///
    /// * `failure_type` - Classification of the failure
    /// * `attempt` - The attempt number that just failed (1-indexed)
    #[instrument(skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        if failure_type == FailureType::Permanent {
            return RetryDecision::DoNotRetry {
                reason: "permanent failure - retry would not help".to_string(),
            };
        }

        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let delay = self.calculate_delay(attempt);

        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );

        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    /// Calculates the delay for a retry attempt with exponential backoff and jitter.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let multiplier = f64::from(self.backoff_multiplier);

        // attempt 1 = 2^0 = 1x base
        let exponent = f64::from(attempt.saturating_sub(1));
        let delay_ms = base_ms * multiplier.powf(exponent);

        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);

        Duration::from_millis(capped_ms as u64) + self.calculate_jitter()
    }

    /// Generates random jitter between 0 and the jitter ceiling.
    #[allow(clippy::cast_possible_truncation)]
    fn calculate_jitter(&self) -> Duration {
        let ceiling = MAX_JITTER.min(self.base_delay / 2).as_millis() as u64;
        if ceiling == 0 {
            return Duration::ZERO;
        }
        let jitter_ms = rand::thread_rng().gen_range(0..=ceiling);
        Duration::from_millis(jitter_ms)
    }
}

/// Classifies a connect-phase error for retry decisions.
///
/// | Error | Type |
/// |-------|------|
/// | HTTP 500-599 | Transient |
/// | any other HTTP status | Permanent |
/// | Timeout | Transient |
/// | Network, connect failure | Transient |
/// | Network, request sent but no response (reset, early close) | Transient |
/// | Network, builder or redirect failure | Permanent |
/// | Network, anything else | Permanent |
/// | everything else | Permanent |
#[instrument]
pub fn classify_error(error: &DownloadError) -> FailureType {
    match error {
        DownloadError::HttpStatus { status, .. } if (500..600).contains(status) => {
            FailureType::Transient
        }
        DownloadError::Timeout { .. } => FailureType::Transient,
        DownloadError::Network { source, .. } if is_transient_transport(source) => {
            FailureType::Transient
        }
        _ => FailureType::Permanent,
    }
}

/// True when `send()` failed without a response for a reason a new connection can fix.
fn is_transient_transport(error: &reqwest::Error) -> bool {
    if error.is_builder() || error.is_redirect() {
        return false;
    }
    error.is_connect() || error.is_timeout() || error.is_request()
}
