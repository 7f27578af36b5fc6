//! Typed job configuration.
//!
//! [`DownloadOptions`] carries every recognized option with its default, can be read
//! from JSON (`#[serde(default)]`, so any subset of fields works), and is validated
//! once when the engine is built.

use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Deserializer};
use thiserror::Error;

use super::constants::{
    DEFAULT_BUFFER_SIZE, DEFAULT_PART_SUFFIX, DEFAULT_RESUME_TOLERANCE, DEFAULT_RETRIES,
    MAX_BLOCK_SIZE,
};
use super::external::ExternalDownloader;
use super::retry::{DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY, RetryPolicy};

/// Upper bound accepted for `retries`.
const MAX_RETRIES: u32 = 1000;

/// Errors raised while loading or validating options.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field has an unusable value.
    #[error("invalid option {field}: {reason}")]
    Invalid {
        /// Option name as written in configuration.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// The configuration document could not be parsed.
    #[error("failed to parse options: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Locations of the external programs used by the fallback drivers.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
    /// rtmpdump-compatible binary.
    pub rtmpdump: PathBuf,
    /// mplayer binary for RTSP/MMS.
    pub mplayer: PathBuf,
    /// mpv binary, tried when mplayer is unavailable.
    pub mpv: PathBuf,
    /// ffmpeg binary for manifests.
    pub ffmpeg: PathBuf,
    /// avconv binary, tried when ffmpeg is unavailable.
    pub avconv: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            rtmpdump: PathBuf::from("rtmpdump"),
            mplayer: PathBuf::from("mplayer"),
            mpv: PathBuf::from("mpv"),
            ffmpeg: PathBuf::from("ffmpeg"),
            avconv: PathBuf::from("avconv"),
        }
    }
}

/// Options for download jobs.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DownloadOptions {
    /// Throughput ceiling in bytes per second.
    #[serde(deserialize_with = "de_opt_bytes")]
    pub ratelimit: Option<u64>,
    /// Connect-phase retries after the first attempt.
    pub retries: u32,
    /// Initial read size in bytes.
    #[serde(deserialize_with = "de_bytes")]
    pub buffersize: u64,
    /// Keep the read size fixed at `buffersize`.
    pub noresizebuffer: bool,
    /// Resume partial downloads and skip complete ones.
    pub continuedl: bool,
    /// Write straight to the target instead of a temp file.
    pub nopart: bool,
    /// Temp file suffix.
    pub partsuffix: String,
    /// Do not install the logging progress hook.
    pub noprogress: bool,
    /// Download only the first [`TEST_FILE_SIZE`](super::constants::TEST_FILE_SIZE) bytes.
    pub test: bool,
    /// Abort when the expected size is below this.
    #[serde(deserialize_with = "de_opt_bytes")]
    pub min_filesize: Option<u64>,
    /// Abort when the expected size is above this.
    #[serde(deserialize_with = "de_opt_bytes")]
    pub max_filesize: Option<u64>,
    /// Set the file mtime from `Last-Modified`.
    pub updatetime: bool,
    /// Distance from the resume offset within which a 416 means "already complete".
    pub resume_tolerance: u64,
    /// Base delay of the exponential retry backoff, in milliseconds.
    pub retry_delay_ms: u64,
    /// Cap of the retry backoff, in milliseconds.
    pub retry_max_delay_ms: u64,
    /// Fetch the body in closed ranges of about this many bytes.
    #[serde(deserialize_with = "de_opt_bytes")]
    pub http_chunk_size: Option<u64>,
    /// Never touch an existing target.
    pub nooverwrites: bool,
    /// Minimum seconds to sleep before each download.
    pub sleep_interval: Option<f64>,
    /// Maximum seconds to sleep before each download.
    pub max_sleep_interval: Option<f64>,
    /// Remux manifests into MPEG-TS instead of MP4.
    pub hls_use_mpegts: bool,
    /// Extra arguments for the manifest tool, inserted after `-y`.
    pub external_args: Vec<String>,
    /// External program locations.
    pub tools: ToolPaths,
    /// curl, wget, aria2c, axel or httpie program used for plain HTTP(S) jobs.
    pub external_downloader: Option<PathBuf>,
    /// Extra arguments for the external HTTP downloader.
    pub external_downloader_args: Vec<String>,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            ratelimit: None,
            retries: DEFAULT_RETRIES,
            buffersize: DEFAULT_BUFFER_SIZE as u64,
            noresizebuffer: false,
            continuedl: true,
            nopart: false,
            partsuffix: DEFAULT_PART_SUFFIX.to_string(),
            noprogress: false,
            test: false,
            min_filesize: None,
            max_filesize: None,
            updatetime: true,
            resume_tolerance: DEFAULT_RESUME_TOLERANCE,
            retry_delay_ms: duration_ms(DEFAULT_BASE_DELAY),
            retry_max_delay_ms: duration_ms(DEFAULT_MAX_DELAY),
            http_chunk_size: None,
            nooverwrites: false,
            sleep_interval: None,
            max_sleep_interval: None,
            hls_use_mpegts: false,
            external_args: Vec::new(),
            tools: ToolPaths::default(),
            external_downloader: None,
            external_downloader_args: Vec::new(),
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn duration_ms(duration: Duration) -> u64 {
    duration.as_millis() as u64
}

impl DownloadOptions {
    /// Parses options from JSON and validates them.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed JSON and
    /// [`ConfigError::Invalid`] for out-of-range values.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let options: Self = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    /// Checks value ranges and cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError::Invalid`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffersize == 0 || self.buffersize > MAX_BLOCK_SIZE as u64 {
            return Err(ConfigError::invalid(
                "buffersize",
                format!("must be between 1 and {MAX_BLOCK_SIZE} bytes"),
            ));
        }
        if self.ratelimit == Some(0) {
            return Err(ConfigError::invalid("ratelimit", "must be greater than 0"));
        }
        if let (Some(min), Some(max)) = (self.min_filesize, self.max_filesize)
            && min > max
        {
            return Err(ConfigError::invalid(
                "min_filesize",
                format!("{min} exceeds max_filesize {max}"),
            ));
        }
        if self.partsuffix.is_empty() {
            return Err(ConfigError::invalid("partsuffix", "must not be empty"));
        }
        if self.partsuffix.contains(['/', '\\']) {
            return Err(ConfigError::invalid(
                "partsuffix",
                "must not contain path separators",
            ));
        }
        if self.http_chunk_size == Some(0) {
            return Err(ConfigError::invalid(
                "http_chunk_size",
                "must be greater than 0",
            ));
        }
        if self.retries > MAX_RETRIES {
            return Err(ConfigError::invalid(
                "retries",
                format!("must be at most {MAX_RETRIES}"),
            ));
        }
        if self.retry_delay_ms > self.retry_max_delay_ms {
            return Err(ConfigError::invalid(
                "retry_delay_ms",
                "must not exceed retry_max_delay_ms",
            ));
        }
        if let Some(program) = &self.external_downloader
            && ExternalDownloader::from_program(program).is_none()
        {
            return Err(ConfigError::invalid(
                "external_downloader",
                format!(
                    "unsupported downloader {}; expected one of {}",
                    program.display(),
                    ExternalDownloader::NAMES.join(", ")
                ),
            ));
        }
        self.validate_sleep_interval()
    }

    fn validate_sleep_interval(&self) -> Result<(), ConfigError> {
        match (self.sleep_interval, self.max_sleep_interval) {
            (Some(min), _) if !min.is_finite() || min < 0.0 => Err(ConfigError::invalid(
                "sleep_interval",
                "must be a non-negative number of seconds",
            )),
            (Some(min), Some(max)) if !max.is_finite() || max < min => Err(ConfigError::invalid(
                "max_sleep_interval",
                "must be at least sleep_interval",
            )),
            (None, Some(_)) => Err(ConfigError::invalid(
                "max_sleep_interval",
                "requires sleep_interval",
            )),
            _ => Ok(()),
        }
    }

    /// Retry policy described by `retries` and the delay fields.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from_retries(self.retries).with_delays(
            Duration::from_millis(self.retry_delay_ms),
            Duration::from_millis(self.retry_max_delay_ms),
        )
    }

    /// Initial read size as `usize`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn block_size(&self) -> usize {
        self.buffersize.min(MAX_BLOCK_SIZE as u64) as usize
    }
}

static BYTES_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(\d+(?:\.\d+)?)\s*([kmgtpezy]?)(?:i?b)?\s*$").ok()
});

/// Parses a byte quantity such as `"1024"`, `"50K"`, `"1.5M"` or `"2GiB"`.
///
/// Multipliers are powers of 1024. Returns `None` for anything else.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn parse_bytes(input: &str) -> Option<u64> {
    let caps = BYTES_RE.as_ref()?.captures(input)?;
    let number: f64 = caps.get(1)?.as_str().parse().ok()?;
    let exponent = match caps.get(2).map_or("", |m| m.as_str()).to_ascii_lowercase().as_str() {
        "" => 0,
        "k" => 1,
        "m" => 2,
        "g" => 3,
        "t" => 4,
        "p" => 5,
        "e" => 6,
        "z" => 7,
        "y" => 8,
        _ => return None,
    };
    let value = number * 1024f64.powi(exponent);
    if !value.is_finite() || value > u64::MAX as f64 {
        return None;
    }
    Some(value.round() as u64)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ByteQuantity {
    Number(u64),
    Text(String),
}

impl ByteQuantity {
    fn resolve<E: serde::de::Error>(self) -> Result<u64, E> {
        match self {
            Self::Number(n) => Ok(n),
            Self::Text(text) => parse_bytes(&text)
                .ok_or_else(|| E::custom(format!("invalid byte quantity {text:?}"))),
        }
    }
}

fn de_bytes<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    ByteQuantity::deserialize(deserializer)?.resolve()
}

fn de_opt_bytes<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    Option::<ByteQuantity>::deserialize(deserializer)?
        .map(ByteQuantity::resolve)
        .transpose()
}
