//! Transfer strategy contract and URL dispatch.

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use url::Url;

use super::error::DownloadError;
use super::job::{DownloadJob, TransferOutcome};
use super::progress::JobProgress;

/// The ways a job can be transferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// rtmpdump subprocess.
    Rtmp,
    /// mplayer/mpv stream dump for RTSP and MMS.
    RtspMms,
    /// ffmpeg/avconv remux of an HLS manifest.
    Manifest,
    /// Native resumable HTTP(S) transfer.
    HttpRange,
    /// HTTP(S) transfer delegated to curl, wget, aria2c, axel or httpie.
    ExternalHttp,
}

impl StrategyKind {
    /// Short lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rtmp => "rtmp",
            Self::RtspMms => "rtsp/mms",
            Self::Manifest => "manifest",
            Self::HttpRange => "http",
            Self::ExternalHttp => "external http",
        }
    }

    /// Picks the strategy for `url`, honouring an explicit protocol hint first.
    ///
    /// URL precedence: RTMP-like scheme, then RTSP/MMS scheme, then a `.m3u8` path,
    /// then plain HTTP(S).
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::InvalidUrl`] when the URL cannot be parsed or its
    /// scheme is not supported by any strategy.
    pub fn select(url: &str, protocol_hint: Option<&str>) -> Result<Self, DownloadError> {
        if let Some(kind) = protocol_hint.and_then(Self::from_protocol) {
            return Ok(kind);
        }

        let parsed = Url::parse(url).map_err(|e| DownloadError::invalid_url(url, e.to_string()))?;
        let scheme = parsed.scheme();
        if scheme.starts_with("rtmp") {
            return Ok(Self::Rtmp);
        }
        if matches!(scheme, "rtsp" | "rtspu" | "mms" | "mmsh") {
            return Ok(Self::RtspMms);
        }
        if parsed.path().to_ascii_lowercase().ends_with(".m3u8") {
            return Ok(Self::Manifest);
        }
        if matches!(scheme, "http" | "https") {
            return Ok(Self::HttpRange);
        }
        Err(DownloadError::invalid_url(
            url,
            format!("unsupported scheme {scheme:?}"),
        ))
    }

    fn from_protocol(protocol: &str) -> Option<Self> {
        match protocol {
            p if p.starts_with("rtmp") => Some(Self::Rtmp),
            "rtsp" | "mms" => Some(Self::RtspMms),
            "m3u8" | "m3u8_native" => Some(Self::Manifest),
            "http" | "https" => Some(Self::HttpRange),
            _ => None,
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One way of turning a job into a file on disk.
///
/// Implementations own their temp file handling: they write to the temp name,
/// commit it onto the target, and emit the terminal `Finished` event.
#[async_trait]
pub trait TransferStrategy: Send + Sync {
    /// Which variant this is.
    fn kind(&self) -> StrategyKind;

    /// Runs the transfer once to completion.
    ///
    /// # Errors
    ///
    /// Returns the terminal [`DownloadError`]; recoverable conditions are handled
    /// internally and recorded on `job` as notices.
    async fn attempt(
        &self,
        job: &mut DownloadJob,
        progress: &mut JobProgress<'_>,
    ) -> Result<TransferOutcome, DownloadError>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_precedence() {
        let cases = [
            ("rtmp://example.com/app/stream", StrategyKind::Rtmp),
            ("rtmpe://example.com/app/stream.m3u8", StrategyKind::Rtmp),
            ("rtmpts://example.com/app", StrategyKind::Rtmp),
            ("rtsp://example.com/stream", StrategyKind::RtspMms),
            ("mms://example.com/stream.m3u8", StrategyKind::RtspMms),
            ("https://example.com/master.m3u8?token=1", StrategyKind::Manifest),
            ("https://example.com/INDEX.M3U8", StrategyKind::Manifest),
            ("https://example.com/video.mp4", StrategyKind::HttpRange),
            ("http://example.com/m3u8/video.mp4", StrategyKind::HttpRange),
        ];
        for (url, expected) in cases {
            assert_eq!(StrategyKind::select(url, None).unwrap(), expected, "{url}");
        }
    }

    #[test]
    fn test_protocol_hint_overrides_url() {
        assert_eq!(
            StrategyKind::select("https://example.com/playlist", Some("m3u8_native")).unwrap(),
            StrategyKind::Manifest
        );
        assert_eq!(
            StrategyKind::select("https://example.com/a.m3u8", Some("https")).unwrap(),
            StrategyKind::HttpRange
        );
        // Unknown hints fall back to the URL.
        assert_eq!(
            StrategyKind::select("rtsp://example.com/a", Some("f4m")).unwrap(),
            StrategyKind::RtspMms
        );
    }

    #[test]
    fn test_unsupported_urls_are_invalid() {
        assert!(matches!(
            StrategyKind::select("not a url", None),
            Err(DownloadError::InvalidUrl { .. })
        ));
        let error = StrategyKind::select("ftp://example.com/a.mp4", None).unwrap_err();
        assert!(error.to_string().contains("unsupported scheme"));
    }

    #[test]
    fn test_display_names() {
        assert_eq!(StrategyKind::RtspMms.to_string(), "rtsp/mms");
        assert_eq!(StrategyKind::HttpRange.as_str(), "http");
    }
}
