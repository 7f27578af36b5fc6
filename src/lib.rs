//! Streamfetch Core Library
//!
//! The download stage of a media fetcher: given a resolved media URL and a target
//! path, produce the complete file on disk and report progress along the way.
//!
//! # Architecture
//!
//! - [`download`] - strategy dispatch, the resumable HTTP session, the external
//!   program drivers and the supporting pieces (options, progress, retry)
//!
//! URL extraction and post-processing live outside this crate; callers hand in a
//! [`DownloadRequest`] that already names the media URL.

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod download;
mod user_agent;

// Re-export commonly used types
pub use download::{
    Completion, ConfigError, DownloadEngine, DownloadError, DownloadOptions, DownloadReport,
    DownloadRequest, HttpClient, Notice, ProgressEvent, ProgressHook, ProgressStatus,
    StrategyKind,
};
