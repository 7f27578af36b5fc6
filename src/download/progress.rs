//! Progress events and the hooks that receive them.
//!
//! Strategies emit a [`ProgressEvent`] per chunk (HTTP only) and one terminal
//! `Finished` event. Hooks run synchronously in registration order. A hook that
//! returns an error or panics is logged and skipped; it never aborts the transfer.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

/// Error type hooks may return.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// Transfer status carried by a [`ProgressEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    /// Bytes are still flowing.
    Downloading,
    /// The target is complete on disk.
    Finished,
}

/// Snapshot of one job's transfer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    /// Current status.
    pub status: ProgressStatus,
    /// Bytes on disk for this job, resume offset included.
    pub downloaded_bytes: u64,
    /// Expected total, when known.
    pub total_bytes: Option<u64>,
    /// Working file while downloading.
    pub tmpfilename: Option<PathBuf>,
    /// Final target path.
    pub filename: PathBuf,
    /// Estimated time remaining.
    pub eta: Option<Duration>,
    /// Average speed since the transfer started, in bytes per second.
    pub speed: Option<f64>,
    /// Time since the transfer started.
    pub elapsed: Option<Duration>,
}

impl ProgressEvent {
    /// A terminal event for a file of `bytes` bytes.
    #[must_use]
    pub fn finished(filename: impl Into<PathBuf>, bytes: u64) -> Self {
        Self {
            status: ProgressStatus::Finished,
            downloaded_bytes: bytes,
            total_bytes: Some(bytes),
            tmpfilename: None,
            filename: filename.into(),
            eta: None,
            speed: None,
            elapsed: None,
        }
    }

    /// Percent complete, when the total is known.
    #[must_use]
    pub fn percent(&self) -> Option<f64> {
        calc_percent(self.downloaded_bytes, self.total_bytes?)
    }
}

/// Receives progress events.
pub trait ProgressHook: Send + Sync {
    /// Called for every event of every job, in registration order.
    ///
    /// # Errors
    ///
    /// Errors are logged by the reporter and otherwise ignored.
    fn on_progress(&self, event: &ProgressEvent) -> Result<(), HookError>;
}

impl<F> ProgressHook for F
where
    F: Fn(&ProgressEvent) -> Result<(), HookError> + Send + Sync,
{
    fn on_progress(&self, event: &ProgressEvent) -> Result<(), HookError> {
        self(event)
    }
}

/// Ordered set of registered hooks.
#[derive(Clone, Default)]
pub struct ProgressReporter {
    hooks: Vec<Arc<dyn ProgressHook>>,
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

impl ProgressReporter {
    /// Creates a reporter with no hooks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a hook.
    pub fn add_hook(&mut self, hook: impl ProgressHook + 'static) {
        self.hooks.push(Arc::new(hook));
    }

    /// Number of registered hooks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    /// True when no hook is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Delivers `event` to every hook. Failures are logged, never propagated.
    pub fn emit(&self, event: &ProgressEvent) {
        for (index, hook) in self.hooks.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| hook.on_progress(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(hook = index, error = %e, "progress hook failed"),
                Err(_) => warn!(hook = index, "progress hook panicked"),
            }
        }
    }

    /// Starts a per-job event stream.
    #[must_use]
    pub fn job(&self) -> JobProgress<'_> {
        JobProgress {
            reporter: self,
            last_bytes: 0,
            finished: false,
        }
    }
}

/// Per-job view of the reporter that keeps byte counts non-decreasing and
/// remembers whether the terminal event was sent.
#[derive(Debug)]
pub struct JobProgress<'a> {
    reporter: &'a ProgressReporter,
    last_bytes: u64,
    finished: bool,
}

impl JobProgress<'_> {
    /// Emits `event`, clamping its byte count to the last one emitted.
    pub fn emit(&mut self, mut event: ProgressEvent) {
        event.downloaded_bytes = event.downloaded_bytes.max(self.last_bytes);
        self.last_bytes = event.downloaded_bytes;
        if event.status == ProgressStatus::Finished {
            self.finished = true;
        }
        self.reporter.emit(&event);
    }

    /// Whether a `Finished` event has been emitted for this job.
    #[must_use]
    pub fn finished_emitted(&self) -> bool {
        self.finished
    }

    /// Highest byte count emitted so far.
    #[must_use]
    pub fn last_bytes(&self) -> u64 {
        self.last_bytes
    }
}

/// Hook that logs events through `tracing`; installed unless `noprogress` is set.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgressHook;

impl ProgressHook for LogProgressHook {
    fn on_progress(&self, event: &ProgressEvent) -> Result<(), HookError> {
        match event.status {
            ProgressStatus::Downloading => debug!(
                path = %event.filename.display(),
                "{} of {} at {} ETA {}",
                format_percent(event.percent()),
                event
                    .total_bytes
                    .map_or_else(|| "Unknown size".to_string(), format_bytes),
                format_speed(event.speed),
                format_eta(event.eta),
            ),
            ProgressStatus::Finished => info!(
                path = %event.filename.display(),
                bytes = event.downloaded_bytes,
                "100% of {}{}",
                format_bytes(event.downloaded_bytes),
                event
                    .elapsed
                    .map(|e| format!(" in {}", format_seconds(e)))
                    .unwrap_or_default(),
            ),
        }
        Ok(())
    }
}

/// `transferred / total * 100`, undefined for an unknown or zero total.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn calc_percent(transferred: u64, total: u64) -> Option<f64> {
    if total == 0 {
        return None;
    }
    Some(transferred as f64 / total as f64 * 100.0)
}

/// Average speed in bytes per second, undefined below a millisecond or with no bytes.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn calc_speed(elapsed: Duration, bytes: u64) -> Option<f64> {
    if bytes == 0 || elapsed < Duration::from_millis(1) {
        return None;
    }
    Some(bytes as f64 / elapsed.as_secs_f64())
}

/// Time left to move `total - current` bytes at the average rate so far.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn calc_eta(elapsed: Duration, total: u64, current: u64) -> Option<Duration> {
    let rate = calc_speed(elapsed, current)?;
    let remaining = total.saturating_sub(current) as f64;
    Duration::try_from_secs_f64(remaining / rate).ok()
}

/// `1536` → `"1.50KiB"`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 9] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB", "EiB", "ZiB", "YiB"];
    if bytes == 0 {
        return "0.00B".to_string();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2}{}", UNITS[unit])
}

/// `3725s` → `"01:02:05"`, `65s` → `"01:05"`.
#[must_use]
pub fn format_seconds(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (hours, mins, secs) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if hours > 99 {
        "--:--:--".to_string()
    } else if hours == 0 {
        format!("{mins:02}:{secs:02}")
    } else {
        format!("{hours:02}:{mins:02}:{secs:02}")
    }
}

/// Right-aligned percentage, `"Unknown %"` when undefined.
#[must_use]
pub fn format_percent(percent: Option<f64>) -> String {
    percent.map_or_else(|| "Unknown %".to_string(), |p| format!("{p:>5.1}%"))
}

/// `"1.00MiB/s"`, `"Unknown speed"` when undefined.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn format_speed(speed: Option<f64>) -> String {
    speed.map_or_else(
        || "Unknown speed".to_string(),
        |s| format!("{}/s", format_bytes(s as u64)),
    )
}

/// `"00:42"`, `"--:--"` when undefined.
#[must_use]
pub fn format_eta(eta: Option<Duration>) -> String {
    eta.map_or_else(|| "--:--".to_string(), format_seconds)
}
