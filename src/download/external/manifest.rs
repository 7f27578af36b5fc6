//! HLS manifests remuxed by ffmpeg, or avconv when ffmpeg is absent.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::instrument;

use super::{check_executable, finalize, header_lines, reject_stdout, run_tool, temp_for};
use crate::download::constants::TEST_FILE_SIZE;
use crate::download::error::DownloadError;
use crate::download::job::{Completion, DownloadJob, DownloadRequest, TransferOutcome};
use crate::download::options::DownloadOptions;
use crate::download::progress::JobProgress;
use crate::download::strategy::{StrategyKind, TransferStrategy};

/// `-headers` value for ffmpeg, `None` when there is nothing to send.
fn header_block(request: &DownloadRequest) -> Option<String> {
    let block: String = header_lines(request)
        .into_iter()
        .map(|line| line + "\r\n")
        .collect();
    (!block.is_empty()).then_some(block)
}

/// Command line for the remuxer.
pub(crate) fn remux_args(request: &DownloadRequest, options: &DownloadOptions, temp: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-y".into()];
    args.extend(options.external_args.iter().map(OsString::from));

    let is_http = request.url.starts_with("http://") || request.url.starts_with("https://");
    if is_http && let Some(headers) = header_block(request) {
        args.push("-headers".into());
        args.push(headers.into());
    }
    args.push("-i".into());
    args.push(request.url.clone().into());
    if options.test {
        args.push("-fs".into());
        args.push(TEST_FILE_SIZE.to_string().into());
    }

    let format: &[&str] = if options.hls_use_mpegts {
        &["-f", "mpegts", "-c", "copy"]
    } else {
        &["-f", "mp4", "-c", "copy", "-bsf:a", "aac_adtstoasc"]
    };
    args.extend(format.iter().map(OsString::from));
    args.push(temp.into());
    args
}

/// Remuxes HLS manifests into a single file.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManifestDriver;

impl ManifestDriver {
    /// Creates the driver.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    async fn find_remuxer(options: &DownloadOptions) -> Option<PathBuf> {
        for program in [&options.tools.ffmpeg, &options.tools.avconv] {
            if check_executable(program, &["-version"]).await {
                return Some(program.clone());
            }
        }
        None
    }
}

#[async_trait]
impl TransferStrategy for ManifestDriver {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Manifest
    }

    #[instrument(skip_all, fields(url = %job.url(), path = %job.target.display()))]
    async fn attempt(
        &self,
        job: &mut DownloadJob,
        progress: &mut JobProgress<'_>,
    ) -> Result<TransferOutcome, DownloadError> {
        reject_stdout(job, "manifest")?;
        let Some(program) = Self::find_remuxer(&job.options).await else {
            return Err(DownloadError::tool_missing("ffmpeg or avconv"));
        };

        let (temps, temp) = temp_for(job);
        let args = remux_args(&job.request, &job.options, &temp);
        let code = run_tool(&program, &args).await?;
        if code != Some(0) {
            return Err(DownloadError::tool_failed(program.display().to_string(), code));
        }

        let bytes = finalize(job, &temps, &temp, progress).await?;
        Ok(TransferOutcome {
            bytes,
            completion: Completion::Downloaded,
        })
    }
}
