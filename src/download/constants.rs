//! Constants for the download module (timeouts, sizes, retry and tool defaults).

use std::time::Duration;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout between body chunks (5 minutes).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Bytes kept by test mode; reads never go past this.
pub const TEST_FILE_SIZE: u64 = 10_241;

/// Upper bound of the adaptive block size (4 MiB).
pub const MAX_BLOCK_SIZE: usize = 4 * 1024 * 1024;

/// Initial read size when `buffersize` is not configured.
pub const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Default connect-phase retries after the first attempt.
pub const DEFAULT_RETRIES: u32 = 10;

/// Default temp file suffix.
pub const DEFAULT_PART_SUFFIX: &str = ".part";

/// Distance in bytes from the resume offset at which a 416 counts as "already complete".
pub const DEFAULT_RESUME_TOLERANCE: u64 = 100;

/// Target name meaning "write to standard output".
pub const STDOUT_TARGET: &str = "-";

/// Pause between rtmpdump resume passes.
pub const RTMP_RESUME_DELAY: Duration = Duration::from_secs(5);

/// Maximum rtmpdump resume passes per job.
pub const DEFAULT_RTMP_MAX_RESUMES: u32 = 50;

/// An rtmpdump file this large that stops growing is accepted as complete.
pub const RTMP_NEAR_COMPLETE_BYTES: u64 = 1024;

/// Number of trailing stderr lines kept from an external tool for failure logs.
pub const TOOL_STDERR_TAIL: usize = 20;
