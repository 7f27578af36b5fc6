//! HTTP client context injected into the HTTP range session.
//!
//! The caller owns the [`HttpClient`] (and with it the connection pool and cookie jar)
//! and hands it to the engine. Nothing in the crate configures HTTP globally.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use reqwest::cookie::Jar;
use reqwest::header::{HeaderMap, RANGE};
use tracing::{debug, instrument};

use super::constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use super::error::DownloadError;
use crate::user_agent;

/// A byte range for a `Range` request header. `end` is inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    /// First byte requested.
    pub start: u64,
    /// Last byte requested, open-ended when `None`.
    pub end: Option<u64>,
}

impl ByteRange {
    /// Range from `start` to the end of the resource.
    #[must_use]
    pub fn from_offset(start: u64) -> Self {
        Self { start, end: None }
    }

    /// Closed range `start..=end`.
    #[must_use]
    pub fn closed(start: u64, end: u64) -> Self {
        Self {
            start,
            end: Some(end),
        }
    }

    /// Renders the `Range` header value, e.g. `bytes=1000-`.
    #[must_use]
    pub fn header_value(&self) -> String {
        match self.end {
            Some(end) => format!("bytes={}-{end}", self.start),
            None => format!("bytes={}-", self.start),
        }
    }
}

/// HTTP client for media transfers.
///
/// Created once and reused across jobs to share connection pooling. Automatic
/// response decompression is left off so that `Content-Length` always describes
/// the bytes that end up on disk.
///
/// # Example
///
/// ```no_run
/// use streamfetch_core::download::{ByteRange, HttpClient};
/// use reqwest::header::HeaderMap;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = HttpClient::new();
/// let response = client
///     .get("https://example.com/clip.mp4", &HeaderMap::new(), Some(ByteRange::from_offset(1000)))
///     .await?;
/// println!("status: {}", response.status());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    /// Creates a new HTTP client with default timeouts.
    ///
    /// Default configuration:
    /// - Connect timeout: 30 seconds
    /// - Read timeout: 5 minutes between body reads
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the static
    /// configuration. This should never happen in practice.
    #[must_use]
    pub fn new() -> Self {
        Self::new_with_timeouts(CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS)
    }

    /// Creates a new HTTP client with explicit timeout values.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the supplied
    /// timeout configuration.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new_with_timeouts(connect_timeout_secs: u64, read_timeout_secs: u64) -> Self {
        let client = build_client(None, connect_timeout_secs, read_timeout_secs)
            .expect("failed to build HTTP client with static configuration");
        Self { client }
    }

    /// Creates a new HTTP client that sends and stores cookies through `cookie_jar`.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the static
    /// configuration. This should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    #[instrument(level = "debug", skip(cookie_jar))]
    pub fn with_cookie_jar(cookie_jar: Arc<Jar>) -> Self {
        let client = build_client(Some(cookie_jar), CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS)
            .expect("failed to build HTTP client with static configuration");
        Self { client }
    }

    /// Wraps a client the caller configured itself (proxies, TLS roots, ...).
    #[must_use]
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    /// Returns the underlying reqwest client.
    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Issues a GET, optionally restricted to `range`.
    ///
    /// The status is not checked; the caller decides what a 416 or 5xx means.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Timeout`] when the request times out and
    /// [`DownloadError::Network`] for any other transport failure.
    #[instrument(skip(self, headers), fields(url = %url, range = ?range))]
    pub async fn get(
        &self,
        url: &str,
        headers: &HeaderMap,
        range: Option<ByteRange>,
    ) -> Result<reqwest::Response, DownloadError> {
        let mut request = self.client.get(url).headers(headers.clone());
        if let Some(range) = range {
            request = request.header(RANGE, range.header_value());
        }

        let response = request
            .send()
            .await
            .map_err(|e| map_request_error(url, e))?;

        debug!(status = response.status().as_u16(), "response received");
        Ok(response)
    }
}

/// Maps a reqwest error onto the download error taxonomy.
pub(crate) fn map_request_error(url: &str, error: reqwest::Error) -> DownloadError {
    if error.is_timeout() {
        DownloadError::timeout(url)
    } else {
        DownloadError::network(url, error)
    }
}

fn build_client(
    cookie_jar: Option<Arc<Jar>>,
    connect_timeout_secs: u64,
    read_timeout_secs: u64,
) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder()
        .connect_timeout(Duration::from_secs(connect_timeout_secs))
        .read_timeout(Duration::from_secs(read_timeout_secs))
        .user_agent(user_agent::default_download_user_agent());
    if let Some(jar) = cookie_jar {
        builder = builder.cookie_provider(jar);
    }
    builder.build()
}
