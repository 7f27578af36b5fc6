//! Input record, per-job state and the success report.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::options::DownloadOptions;
use super::strategy::StrategyKind;

/// A resolved media URL plus the metadata the transfer strategies understand.
///
/// Produced by an extraction layer; only `url` is required.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DownloadRequest {
    /// Media URL.
    pub url: String,
    /// SWF player URL for RTMP verification.
    pub player_url: Option<String>,
    /// Page the stream is embedded in.
    pub page_url: Option<String>,
    /// RTMP play path.
    pub play_path: Option<String>,
    /// RTMP `tcUrl`.
    pub tc_url: Option<String>,
    /// Whether the RTMP stream is live.
    pub rtmp_live: bool,
    /// RTMP application name.
    pub app: Option<String>,
    /// Flash version string sent by rtmpdump.
    pub flash_version: Option<String>,
    /// Extra AMF connection parameters for rtmpdump.
    pub rtmp_conn: Vec<String>,
    /// Forced rtmpdump protocol.
    pub rtmp_protocol: Option<String>,
    /// User-Agent for this request.
    pub user_agent: Option<String>,
    /// Extra HTTP headers.
    pub http_headers: BTreeMap<String, String>,
    /// Protocol hint overriding URL-based dispatch (`rtmp`, `rtsp`, `mms`, `m3u8`, `http`).
    pub protocol: Option<String>,
    /// Connection already opened by the extraction layer, used for the first
    /// non-range attempt.
    #[serde(skip)]
    pub open_response: Option<reqwest::Response>,
}

impl DownloadRequest {
    /// Request for `url` with no extra metadata.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Headers sent with every HTTP request of this job. Invalid entries are skipped.
    #[must_use]
    pub fn header_map(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.http_headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => warn!(header = %name, "skipping invalid HTTP header"),
            }
        }
        if let Some(ua) = &self.user_agent {
            match HeaderValue::from_str(ua) {
                Ok(value) => {
                    headers.insert(USER_AGENT, value);
                }
                Err(_) => warn!("skipping invalid user agent"),
            }
        }
        headers
    }
}

/// Something the engine recovered from on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    /// A connect attempt failed transiently and will be retried.
    Retrying {
        /// Retry number, starting at 1.
        attempt: u32,
        /// Retry budget.
        max_retries: u32,
        /// Why the attempt failed.
        reason: String,
    },
    /// Resuming an existing temp file.
    ResumingAt {
        /// Byte offset requested.
        offset: u64,
    },
    /// The server ignored or rejected the range; starting over.
    ResumeRejected {
        /// Offset that could not be resumed.
        offset: u64,
    },
    /// A 416 reconciled to "the local file is complete".
    AlreadyComplete {
        /// Bytes on disk.
        bytes: u64,
    },
    /// rtmpdump was interrupted and is re-run in resume mode.
    RtmpResuming {
        /// Bytes on disk before the pass.
        bytes: u64,
    },
    /// rtmpdump stopped making progress near the end; accepted as complete.
    RtmpIncompleteAccepted {
        /// Bytes on disk.
        bytes: u64,
    },
}

/// How a job that succeeded ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Completion {
    /// Bytes were transferred and committed.
    Downloaded,
    /// The target existed and was left alone.
    AlreadyDownloaded,
    /// The server confirmed the partial file was already complete.
    AlreadyComplete,
}

/// What a transfer strategy returns on success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferOutcome {
    /// Bytes on disk at the target.
    pub bytes: u64,
    /// How it ended.
    pub completion: Completion,
}

/// State of one job, owned by the engine for the job's lifetime.
#[derive(Debug)]
pub struct DownloadJob {
    /// Final path.
    pub target: PathBuf,
    /// Input record.
    pub request: DownloadRequest,
    /// Options in effect.
    pub options: DownloadOptions,
    notices: Vec<Notice>,
}

impl DownloadJob {
    /// Creates the job state.
    #[must_use]
    pub fn new(target: impl Into<PathBuf>, request: DownloadRequest, options: DownloadOptions) -> Self {
        Self {
            target: target.into(),
            request,
            options,
            notices: Vec::new(),
        }
    }

    /// Source URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.request.url
    }

    /// Final path.
    #[must_use]
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Records and logs a recovery notice.
    pub fn notify(&mut self, notice: Notice) {
        match &notice {
            Notice::Retrying {
                attempt,
                max_retries,
                reason,
            } => warn!(url = %self.request.url, attempt, max_retries, %reason, "retrying"),
            Notice::ResumeRejected { offset } => {
                warn!(url = %self.request.url, offset, "unable to resume, restarting from zero");
            }
            Notice::AlreadyComplete { bytes } => {
                info!(path = %self.target.display(), bytes, "file is already fully downloaded");
            }
            Notice::ResumingAt { offset } => info!(url = %self.request.url, offset, "resuming"),
            Notice::RtmpResuming { bytes } => {
                warn!(path = %self.target.display(), bytes, "rtmpdump interrupted, resuming");
            }
            Notice::RtmpIncompleteAccepted { bytes } => {
                warn!(path = %self.target.display(), bytes, "rtmpdump stalled near the end, accepting file");
            }
        }
        self.notices.push(notice);
    }

    /// Notices raised so far.
    #[must_use]
    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    pub(crate) fn into_notices(self) -> Vec<Notice> {
        self.notices
    }
}

/// Result of a successful job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DownloadReport {
    /// Final path.
    pub path: PathBuf,
    /// How the job ended.
    pub completion: Completion,
    /// Bytes on disk.
    pub bytes: u64,
    /// Strategy that ran.
    pub strategy: StrategyKind,
    /// Recovery notices, in the order raised.
    pub notices: Vec<Notice>,
    /// Wall time of the job.
    pub elapsed: Duration,
}

impl DownloadReport {
    /// Number of connect retries performed.
    #[must_use]
    pub fn retries(&self) -> usize {
        self.notices
            .iter()
            .filter(|n| matches!(n, Notice::Retrying { .. }))
            .count()
    }
}
