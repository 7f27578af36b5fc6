//! Transfers delegated to external programs.
//!
//! Each driver writes into the job's temp file through a child process, waits for it,
//! then commits the temp file and reports its on-disk size. Child stderr is logged at
//! debug level; the tail of it is repeated at warn level when the program fails.

mod downloader;
mod manifest;
mod rtmp;
mod stream;

pub use downloader::{ExternalDownloader, ExternalHttpDriver};
pub use manifest::ManifestDriver;
pub use rtmp::RtmpDriver;
pub use stream::StreamDumpDriver;

use std::collections::VecDeque;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::constants::TOOL_STDERR_TAIL;
use super::error::DownloadError;
use super::job::{DownloadJob, DownloadRequest};
use super::progress::{JobProgress, ProgressEvent};
use super::temp_file::{TempFileManager, is_stdout};

/// Returns true when `program` can be spawned.
///
/// The check's exit status is ignored; several of these tools exit non-zero for
/// `-h`.
pub(crate) async fn check_executable(program: &Path, check_args: &[&str]) -> bool {
    let spawned = Command::new(program)
        .args(check_args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status()
        .await;
    match spawned {
        Ok(_) => true,
        Err(e) => {
            debug!(program = %program.display(), error = %e, "program not available");
            false
        }
    }
}

/// Runs `program` to completion and returns its exit code, `None` when it was
/// killed by a signal.
///
/// # Errors
///
/// Returns [`DownloadError::ToolMissing`] when the program cannot be spawned.
pub(crate) async fn run_tool(program: &Path, args: &[OsString]) -> Result<Option<i32>, DownloadError> {
    let tool = program.display().to_string();
    debug!(%tool, ?args, "spawning");

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            warn!(%tool, error = %e, "failed to spawn");
            DownloadError::tool_missing(&tool)
        })?;

    let mut tail = VecDeque::with_capacity(TOOL_STDERR_TAIL);
    if let Some(stderr) = child.stderr.take() {
        // Stderr may carry raw stream metadata. Drain it to EOF as bytes: dropping
        // the pipe early gets the child killed by SIGPIPE.
        let mut reader = BufReader::new(stderr);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(%tool, error = %e, "stderr read failed");
                    break;
                }
            }
            let line = String::from_utf8_lossy(&buf).trim_end().to_string();
            debug!(%tool, "{line}");
            if tail.len() == TOOL_STDERR_TAIL {
                tail.pop_front();
            }
            tail.push_back(line);
        }
    }

    let status = child
        .wait()
        .await
        .map_err(|_| DownloadError::tool_failed(&tool, None))?;
    if !status.success() {
        for line in &tail {
            warn!(%tool, "{line}");
        }
    }
    debug!(%tool, code = ?status.code(), "exited");
    Ok(status.code())
}

/// The request's extra headers and user agent as `Name: value` lines.
pub(crate) fn header_lines(request: &DownloadRequest) -> Vec<String> {
    let mut lines: Vec<String> = request
        .http_headers
        .iter()
        .map(|(name, value)| format!("{name}: {value}"))
        .collect();
    if let Some(ua) = &request.user_agent {
        lines.push(format!("User-Agent: {ua}"));
    }
    lines
}

/// Size of `path`, 0 when it does not exist.
pub(crate) async fn file_size(path: &Path) -> u64 {
    tokio::fs::metadata(path).await.map_or(0, |meta| meta.len())
}

/// Drivers write through a file name handed to the child, so stdout cannot work.
pub(crate) fn reject_stdout(job: &DownloadJob, strategy: &'static str) -> Result<(), DownloadError> {
    if is_stdout(&job.target) {
        return Err(DownloadError::UnsupportedTarget {
            target: job.target.clone(),
            strategy,
        });
    }
    Ok(())
}

/// Temp-file manager and temp path for `job`.
pub(crate) fn temp_for(job: &DownloadJob) -> (TempFileManager, PathBuf) {
    let temps = TempFileManager::new(job.options.partsuffix.clone(), !job.options.nopart);
    let temp = temps.temp_name(&job.target);
    (temps, temp)
}

/// Commits the temp file and emits the single terminal event.
pub(crate) async fn finalize(
    job: &DownloadJob,
    temps: &TempFileManager,
    temp: &Path,
    progress: &mut JobProgress<'_>,
) -> Result<u64, DownloadError> {
    let bytes = file_size(temp).await;
    temps.commit(temp, &job.target).await?;
    progress.emit(ProgressEvent::finished(&job.target, bytes));
    info!(path = %job.target.display(), bytes, "download complete");
    Ok(bytes)
}
