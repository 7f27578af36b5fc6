//! RTSP/MMS stream dump through mplayer, or mpv when mplayer is absent.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::instrument;

use super::{check_executable, finalize, reject_stdout, run_tool, temp_for};
use crate::download::error::DownloadError;
use crate::download::job::{Completion, DownloadJob, TransferOutcome};
use crate::download::progress::JobProgress;
use crate::download::strategy::{StrategyKind, TransferStrategy};

/// Which dumper was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dumper {
    Mplayer,
    Mpv,
}

/// Command line for `dumper`.
pub(crate) fn dump_args(dumper: Dumper, url: &str, temp: &Path) -> Vec<OsString> {
    match dumper {
        Dumper::Mplayer => {
            let mut args: Vec<OsString> = ["-really-quiet", "-vo", "null", "-vc", "dummy", "-dumpstream", "-dumpfile"]
                .into_iter()
                .map(OsString::from)
                .collect();
            args.push(temp.into());
            args.push(url.into());
            args
        }
        Dumper::Mpv => {
            let mut dump = OsString::from("--stream-dump=");
            dump.push(temp);
            vec!["--really-quiet".into(), "--vo=null".into(), dump, url.into()]
        }
    }
}

/// Dumps RTSP and MMS streams to disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamDumpDriver;

impl StreamDumpDriver {
    /// Creates the driver.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    async fn find_dumper(job: &DownloadJob) -> Option<(Dumper, PathBuf)> {
        let tools = &job.options.tools;
        if check_executable(&tools.mplayer, &["-h"]).await {
            return Some((Dumper::Mplayer, tools.mplayer.clone()));
        }
        if check_executable(&tools.mpv, &["-h"]).await {
            return Some((Dumper::Mpv, tools.mpv.clone()));
        }
        None
    }
}

#[async_trait]
impl TransferStrategy for StreamDumpDriver {
    fn kind(&self) -> StrategyKind {
        StrategyKind::RtspMms
    }

    #[instrument(skip_all, fields(url = %job.url(), path = %job.target.display()))]
    async fn attempt(
        &self,
        job: &mut DownloadJob,
        progress: &mut JobProgress<'_>,
    ) -> Result<TransferOutcome, DownloadError> {
        reject_stdout(job, "rtsp/mms")?;
        let Some((dumper, program)) = Self::find_dumper(job).await else {
            return Err(DownloadError::tool_missing("mplayer or mpv"));
        };

        let (temps, temp) = temp_for(job);
        let code = run_tool(&program, &dump_args(dumper, job.url(), &temp)).await?;
        if code != Some(0) {
            return Err(DownloadError::tool_failed(program.display().to_string(), code));
        }
        if !tokio::fs::try_exists(&temp).await.unwrap_or(false) {
            return Err(DownloadError::no_data(job.url()));
        }

        let bytes = finalize(job, &temps, &temp, progress).await?;
        Ok(TransferOutcome {
            bytes,
            completion: Completion::Downloaded,
        })
    }
}
