//! Media download engine.
//!
//! This module turns a resolved media URL into a complete file on disk, picking a
//! transfer strategy from the URL:
//!
//! - `rtmp*` URLs are handed to rtmpdump, re-run in resume mode when interrupted
//! - `rtsp`/`mms` URLs are dumped by mplayer or mpv
//! - `.m3u8` manifests are remuxed by ffmpeg or avconv
//! - everything else over HTTP(S) goes through the native resumable session, or
//!   through curl, wget, aria2c, axel or httpie when `external_downloader` is set
//!
//! # Features
//!
//! - Resume from a `.part` temp file with `Range` requests
//! - Retry with exponential backoff during connection setup
//! - Optional throughput ceiling and adaptive read sizes
//! - Progress hooks receiving a stream of [`ProgressEvent`]s
//!
//! # Example
//!
//! ```no_run
//! use streamfetch_core::download::{DownloadEngine, DownloadOptions, DownloadRequest, HttpClient};
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let options = DownloadOptions {
//!     ratelimit: Some(512 * 1024),
//!     ..DownloadOptions::default()
//! };
//! let engine = DownloadEngine::new(HttpClient::new(), options)?;
//! let report = engine
//!     .download(Path::new("talk.mp4"), DownloadRequest::new("https://example.com/talk.mp4"))
//!     .await?;
//! println!("Downloaded: {}", report.path.display());
//! # Ok(())
//! # }
//! ```

mod block_size;
mod client;
pub mod constants;
mod engine;
mod error;
mod external;
mod http;
mod job;
mod options;
pub mod progress;
pub mod rate_limiter;
mod retry;
mod strategy;
mod temp_file;

pub use block_size::{BlockSizer, best_block_size};
pub use client::{ByteRange, HttpClient};
pub use engine::DownloadEngine;
pub use error::DownloadError;
pub use external::{
    ExternalDownloader, ExternalHttpDriver, ManifestDriver, RtmpDriver, StreamDumpDriver,
};
pub use http::HttpRangeSession;
pub use job::{
    Completion, DownloadJob, DownloadReport, DownloadRequest, Notice, TransferOutcome,
};
pub use options::{ConfigError, DownloadOptions, ToolPaths, parse_bytes};
pub use progress::{
    HookError, JobProgress, LogProgressHook, ProgressEvent, ProgressHook, ProgressReporter,
    ProgressStatus,
};
pub use rate_limiter::RateLimiter;
pub use retry::{FailureType, RetryDecision, RetryPolicy, classify_error};
pub use strategy::{StrategyKind, TransferStrategy};
pub use temp_file::{TempFileManager, try_utime};

// Note: we do NOT define module-local Result aliases.
// Use `Result<T, DownloadError>` explicitly in function signatures.
