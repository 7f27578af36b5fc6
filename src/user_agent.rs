//! Default User-Agent for engine HTTP traffic.

/// Project URL for User-Agent identification (RFC 9308).
const PROJECT_UA_URL: &str = "https://github.com/streamfetch/streamfetch";

/// Default User-Agent for download requests (identifies the tool).
#[must_use]
pub(crate) fn default_download_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("streamfetch/{version} (+{PROJECT_UA_URL})")
}
