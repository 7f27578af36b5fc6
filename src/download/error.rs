//! Error types for the download engine.
//!
//! Every terminal failure of a job maps onto one [`DownloadError`] variant, so callers
//! can tell a short transfer from an empty one, or a missing tool from a crashed one.
//! Recoverable situations (5xx retries, 416 reconciliation, RTMP resume passes) never
//! surface here; they are reported as notices on the successful result instead.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that end a download job.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Network-level error (DNS resolution, connection refused, TLS errors, broken body).
    #[error("network error downloading {url}: {source}")]
    Network {
        /// The URL being downloaded.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out.
    #[error("timeout downloading {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// Non-2xx HTTP response that was not recovered.
    #[error("HTTP {status} downloading {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The connect phase kept failing with retryable errors until the budget ran out.
    #[error("giving up on {url} after {retries} retries: {source}")]
    RetriesExhausted {
        /// The URL being downloaded.
        url: String,
        /// Number of retries performed.
        retries: u32,
        /// The last retryable failure.
        #[source]
        source: Box<DownloadError>,
    },

    /// Expected size is below the configured minimum.
    #[error("{url} is {size} bytes, smaller than min_filesize {min}")]
    FileTooSmall {
        /// The URL being downloaded.
        url: String,
        /// Expected size in bytes.
        size: u64,
        /// Configured minimum.
        min: u64,
    },

    /// Expected size is above the configured maximum.
    #[error("{url} is {size} bytes, larger than max_filesize {max}")]
    FileTooLarge {
        /// The URL being downloaded.
        url: String,
        /// Expected size in bytes.
        size: u64,
        /// Configured maximum.
        max: u64,
    },

    /// The stream ended before the advertised length was received.
    #[error("content too short for {url}: expected {expected} bytes, got {actual}")]
    ContentTooShort {
        /// The URL being downloaded.
        url: String,
        /// Advertised total in bytes.
        expected: u64,
        /// Bytes actually on disk.
        actual: u64,
    },

    /// The server closed the stream without sending a single byte.
    #[error("no data received from {url}")]
    NoData {
        /// The URL being downloaded.
        url: String,
    },

    /// An external program needed for this protocol could not be invoked.
    #[error("{tool} not found or not executable")]
    ToolMissing {
        /// Program name or path.
        tool: String,
    },

    /// An external program exited unsuccessfully.
    #[error("{tool} exited with {}", exit_code_label(*.code))]
    ToolFailed {
        /// Program name or path.
        tool: String,
        /// Exit code, `None` when killed by a signal.
        code: Option<i32>,
    },

    /// rtmpdump reported that it could not connect to the server.
    #[error("{tool} could not connect to the server")]
    ToolNoConnect {
        /// Program name or path.
        tool: String,
    },

    /// File system error while opening or writing the output.
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Final rename of the temp file failed. The temp file is left in place.
    #[error("unable to rename {from} to {to}: {source}")]
    Rename {
        /// Temp file path.
        from: PathBuf,
        /// Final target path.
        to: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The URL is malformed or uses an unsupported scheme.
    #[error("invalid URL {url}: {reason}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The chosen strategy cannot write to this target.
    #[error("{strategy} downloads cannot write to {target}")]
    UnsupportedTarget {
        /// The requested target path.
        target: PathBuf,
        /// The strategy that refused it.
        strategy: &'static str,
    },
}

fn exit_code_label(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "a signal".to_string(),
    }
}

impl DownloadError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Wraps the last retryable failure once the retry budget is spent.
    pub fn retries_exhausted(url: impl Into<String>, retries: u32, last: DownloadError) -> Self {
        Self::RetriesExhausted {
            url: url.into(),
            retries,
            source: Box::new(last),
        }
    }

    /// Creates a content-too-short error.
    pub fn content_too_short(url: impl Into<String>, expected: u64, actual: u64) -> Self {
        Self::ContentTooShort {
            url: url.into(),
            expected,
            actual,
        }
    }

    /// Creates a no-data error.
    pub fn no_data(url: impl Into<String>) -> Self {
        Self::NoData { url: url.into() }
    }

    /// Creates a missing-tool error.
    pub fn tool_missing(tool: impl Into<String>) -> Self {
        Self::ToolMissing { tool: tool.into() }
    }

    /// Creates a tool-failure error.
    pub fn tool_failed(tool: impl Into<String>, code: Option<i32>) -> Self {
        Self::ToolFailed {
            tool: tool.into(),
            code,
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a rename error.
    pub fn rename(from: impl Into<PathBuf>, to: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Rename {
            from: from.into(),
            to: to.into(),
            source,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Returns true for the size-policy variants.
    #[must_use]
    pub fn is_size_policy(&self) -> bool {
        matches!(self, Self::FileTooSmall { .. } | Self::FileTooLarge { .. })
    }
}

// Note on From trait implementations:
// There is no `From<reqwest::Error>` or `From<std::io::Error>`. Every variant needs the
// url or path the source error lacks, so callers go through the constructors above.

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_download_error_timeout_display() {
        let error = DownloadError::timeout("https://example.com/clip.mp4");
        assert!(error.to_string().contains("timeout"));
        assert!(error.to_string().contains("https://example.com/clip.mp4"));
    }

    #[test]
    fn test_download_error_http_status_display() {
        let error = DownloadError::http_status("https://example.com/clip.mp4", 404);
        let msg = error.to_string();
        assert!(msg.contains("404"), "Expected '404' in: {msg}");
        assert!(
            msg.contains("https://example.com/clip.mp4"),
            "Expected URL in: {msg}"
        );
    }

    #[test]
    fn test_download_error_retries_exhausted_keeps_source() {
        let last = DownloadError::http_status("https://example.com/clip.mp4", 503);
        let error = DownloadError::retries_exhausted("https://example.com/clip.mp4", 3, last);
        let msg = error.to_string();
        assert!(msg.contains("after 3 retries"), "Expected count in: {msg}");
        assert!(msg.contains("HTTP 503"), "Expected cause in: {msg}");

        let source = std::error::Error::source(&error).unwrap();
        assert!(source.to_string().contains("503"));
    }

    #[test]
    fn test_short_content_and_no_data_are_distinct() {
        let short = DownloadError::content_too_short("https://example.com/a", 2000, 1000);
        let empty = DownloadError::no_data("https://example.com/a");
        assert!(short.to_string().contains("expected 2000 bytes, got 1000"));
        assert!(empty.to_string().starts_with("no data"));
        assert!(matches!(short, DownloadError::ContentTooShort { .. }));
        assert!(matches!(empty, DownloadError::NoData { .. }));
    }

    #[test]
    fn test_tool_errors_name_the_tool() {
        let missing = DownloadError::tool_missing("rtmpdump");
        assert_eq!(missing.to_string(), "rtmpdump not found or not executable");

        let failed = DownloadError::tool_failed("ffmpeg", Some(1));
        assert_eq!(failed.to_string(), "ffmpeg exited with exit code 1");

        let killed = DownloadError::tool_failed("mplayer", None);
        assert_eq!(killed.to_string(), "mplayer exited with a signal");
    }

    #[test]
    fn test_download_error_io_display() {
        let io_error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let error = DownloadError::io(PathBuf::from("/tmp/clip.mp4.part"), io_error);
        let msg = error.to_string();
        assert!(msg.contains("/tmp/clip.mp4.part"), "Expected path in: {msg}");
    }

    #[test]
    fn test_rename_error_names_both_paths() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let error = DownloadError::rename("/tmp/a.part", "/tmp/a", io_error);
        let msg = error.to_string();
        assert!(msg.contains("/tmp/a.part"), "Expected temp path in: {msg}");
        assert!(msg.contains("to /tmp/a:"), "Expected target path in: {msg}");
    }

    #[test]
    fn test_size_policy_predicate() {
        let small = DownloadError::FileTooSmall {
            url: "u".into(),
            size: 10,
            min: 20,
        };
        assert!(small.is_size_policy());
        assert!(!DownloadError::no_data("u").is_size_policy());
    }

    #[test]
    fn test_download_error_invalid_url_display() {
        let error = DownloadError::invalid_url("not-a-url", "relative URL without a base");
        let msg = error.to_string();
        assert!(
            msg.contains("invalid URL"),
            "Expected 'invalid URL' in: {msg}"
        );
        assert!(msg.contains("not-a-url"), "Expected URL in: {msg}");
    }
}
