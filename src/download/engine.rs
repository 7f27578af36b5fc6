//! Download engine: picks a transfer strategy per job and runs it.
//!
//! # Overview
//!
//! One awaited [`DownloadEngine::download`] call handles one job from start to
//! finish. The engine holds no per-job state, so it can be shared behind an `Arc`
//! and used for several jobs concurrently.
//!
//! # Example
//!
//! ```no_run
//! use streamfetch_core::download::{DownloadEngine, DownloadOptions, DownloadRequest, HttpClient};
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = DownloadEngine::new(HttpClient::new(), DownloadOptions::default())?;
//! let report = engine
//!     .download(Path::new("clip.mp4"), DownloadRequest::new("https://example.com/clip.mp4"))
//!     .await?;
//! println!("{} bytes, {} retries", report.bytes, report.retries());
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::client::HttpClient;
use super::error::DownloadError;
use super::external::{ExternalHttpDriver, ManifestDriver, RtmpDriver, StreamDumpDriver};
use super::http::HttpRangeSession;
use super::job::{Completion, DownloadJob, DownloadReport, DownloadRequest};
use super::options::{ConfigError, DownloadOptions};
use super::progress::{LogProgressHook, ProgressEvent, ProgressHook, ProgressReporter};
use super::strategy::{StrategyKind, TransferStrategy};
use super::temp_file::is_stdout;

/// Coordinates the strategies, the options and the progress hooks.
#[derive(Debug)]
pub struct DownloadEngine {
    options: DownloadOptions,
    reporter: ProgressReporter,
    http: HttpRangeSession,
    rtmp: RtmpDriver,
    stream: StreamDumpDriver,
    manifest: ManifestDriver,
    external_http: ExternalHttpDriver,
}

impl DownloadEngine {
    /// Creates an engine that sends HTTP requests through `client`.
    ///
    /// The logging progress hook is installed unless `options.noprogress` is set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the options fail validation.
    pub fn new(client: HttpClient, options: DownloadOptions) -> Result<Self, ConfigError> {
        options.validate()?;
        let mut reporter = ProgressReporter::new();
        if !options.noprogress {
            reporter.add_hook(LogProgressHook);
        }
        Ok(Self {
            options,
            reporter,
            http: HttpRangeSession::new(client),
            rtmp: RtmpDriver::new(),
            stream: StreamDumpDriver::new(),
            manifest: ManifestDriver::new(),
            external_http: ExternalHttpDriver::new(),
        })
    }

    /// Replaces the rtmpdump driver, e.g. to shorten the pause between resume passes.
    #[must_use]
    pub fn with_rtmp_driver(mut self, driver: RtmpDriver) -> Self {
        self.rtmp = driver;
        self
    }

    /// Registers a progress hook. Hooks run in registration order.
    pub fn add_progress_hook(&mut self, hook: impl ProgressHook + 'static) {
        self.reporter.add_hook(hook);
    }

    /// Options in effect.
    #[must_use]
    pub fn options(&self) -> &DownloadOptions {
        &self.options
    }

    fn strategy(&self, kind: StrategyKind) -> &dyn TransferStrategy {
        match kind {
            StrategyKind::Rtmp => &self.rtmp,
            StrategyKind::RtspMms => &self.stream,
            StrategyKind::Manifest => &self.manifest,
            StrategyKind::HttpRange => &self.http,
            StrategyKind::ExternalHttp => &self.external_http,
        }
    }

    /// Swaps native HTTP for the configured external downloader when it can run.
    async fn resolve_http(&self, kind: StrategyKind, target: &Path) -> StrategyKind {
        if kind != StrategyKind::HttpRange || is_stdout(target) {
            return kind;
        }
        let Some(program) = &self.options.external_downloader else {
            return kind;
        };
        if ExternalHttpDriver::available(&self.options).await {
            return StrategyKind::ExternalHttp;
        }
        warn!(
            program = %program.display(),
            "external downloader not available, using native HTTP"
        );
        kind
    }

    /// Downloads `request` to `target`, or to stdout when `target` is `-`.
    ///
    /// Exactly one `Finished` progress event is emitted on success, none on failure.
    ///
    /// # Errors
    ///
    /// Returns the terminal [`DownloadError`] of the chosen strategy. Recoverable
    /// conditions are listed in the report's notices instead.
    #[instrument(skip(self, request), fields(url = %request.url, path = %target.display()))]
    pub async fn download(
        &self,
        target: &Path,
        request: DownloadRequest,
    ) -> Result<DownloadReport, DownloadError> {
        let started = Instant::now();
        let kind = StrategyKind::select(&request.url, request.protocol.as_deref())?;
        debug!(strategy = %kind, "selected strategy");

        let mut job = DownloadJob::new(target, request, self.options.clone());
        let mut progress = self.reporter.job();

        if let Some(bytes) = self.existing_target(target).await {
            info!(path = %target.display(), bytes, "file has already been downloaded");
            progress.emit(ProgressEvent::finished(target, bytes));
            return Ok(DownloadReport {
                path: target.to_path_buf(),
                completion: Completion::AlreadyDownloaded,
                bytes,
                strategy: kind,
                notices: job.into_notices(),
                elapsed: started.elapsed(),
            });
        }

        let kind = self.resolve_http(kind, target).await;
        debug!(strategy = %kind, "resolved strategy");
        self.sleep_before_download().await;

        let outcome = self.strategy(kind).attempt(&mut job, &mut progress).await?;
        if !progress.finished_emitted() {
            progress.emit(ProgressEvent::finished(target, outcome.bytes));
        }

        Ok(DownloadReport {
            path: target.to_path_buf(),
            completion: outcome.completion,
            bytes: outcome.bytes,
            strategy: kind,
            notices: job.into_notices(),
            elapsed: started.elapsed(),
        })
    }

    /// Size of a target that must be left alone, `None` when the job should run.
    async fn existing_target(&self, target: &Path) -> Option<u64> {
        if is_stdout(target) {
            return None;
        }
        let meta = tokio::fs::metadata(target).await.ok()?;
        let skip = self.options.nooverwrites
            || (self.options.continuedl && meta.is_file() && !self.options.nopart);
        skip.then_some(meta.len())
    }

    async fn sleep_before_download(&self) {
        let Some(min) = self.options.sleep_interval else {
            return;
        };
        let max = self.options.max_sleep_interval.unwrap_or(min);
        let secs = if max > min {
            rand::thread_rng().gen_range(min..=max)
        } else {
            min
        };
        if secs > 0.0 {
            info!(seconds = secs, "sleeping before download");
            tokio::time::sleep(Duration::from_secs_f64(secs)).await;
        }
    }
}
