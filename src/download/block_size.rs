//! Adaptive read size for the HTTP read loop.

use std::time::Duration;

use super::constants::MAX_BLOCK_SIZE;

const NEGLIGIBLE: Duration = Duration::from_millis(1);

/// Picks the next read size from how long the previous read of `bytes` took.
///
/// The result stays within `[max(bytes/2, 1), min(max(bytes*2, 1), 4 MiB)]`. A read
/// faster than a millisecond jumps straight to the upper bound; otherwise the measured
/// rate (bytes per second) is clamped into the window.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn best_block_size(elapsed: Duration, bytes: usize) -> usize {
    let new_min = (bytes / 2).max(1);
    let new_max = bytes.saturating_mul(2).max(1).min(MAX_BLOCK_SIZE);
    if elapsed < NEGLIGIBLE {
        return new_max;
    }
    let rate = bytes as f64 / elapsed.as_secs_f64();
    let rate = if rate >= new_max as f64 {
        new_max
    } else {
        rate as usize
    };
    rate.clamp(new_min.min(new_max), new_max)
}

/// Read-size state for one transfer.
#[derive(Debug, Clone, Copy)]
pub struct BlockSizer {
    current: usize,
    adaptive: bool,
}

impl BlockSizer {
    /// Starts at `initial` bytes. With `adaptive` off the size never changes.
    #[must_use]
    pub fn new(initial: usize, adaptive: bool) -> Self {
        Self {
            current: initial.clamp(1, MAX_BLOCK_SIZE),
            adaptive,
        }
    }

    /// Size of the next read.
    #[must_use]
    pub fn current(&self) -> usize {
        self.current
    }

    /// Records a completed read and returns the size of the next one.
    pub fn observe(&mut self, elapsed: Duration, bytes: usize) -> usize {
        if self.adaptive && bytes > 0 {
            self.current = best_block_size(elapsed, bytes);
        }
        self.current
    }
}
