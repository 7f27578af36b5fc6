//! rtmpdump driver with automatic resume of interrupted dumps.

use std::ffi::OsString;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument};

use super::{check_executable, file_size, finalize, reject_stdout, run_tool, temp_for};
use crate::download::constants::{DEFAULT_RTMP_MAX_RESUMES, RTMP_NEAR_COMPLETE_BYTES, RTMP_RESUME_DELAY};
use crate::download::error::DownloadError;
use crate::download::job::{Completion, DownloadJob, DownloadRequest, Notice, TransferOutcome};
use crate::download::options::DownloadOptions;
use crate::download::progress::JobProgress;
use crate::download::strategy::{StrategyKind, TransferStrategy};

/// rtmpdump exit codes.
const RD_SUCCESS: i32 = 0;
const RD_FAILED: i32 = 1;
const RD_INCOMPLETE: i32 = 2;
const RD_NO_CONNECT: i32 = 3;

/// Runs rtmpdump and re-runs it in resume mode while it reports an interrupted dump.
#[derive(Debug, Clone)]
pub struct RtmpDriver {
    resume_delay: Duration,
    max_resumes: u32,
}

impl Default for RtmpDriver {
    fn default() -> Self {
        Self {
            resume_delay: RTMP_RESUME_DELAY,
            max_resumes: DEFAULT_RTMP_MAX_RESUMES,
        }
    }
}

impl RtmpDriver {
    /// Driver with the standard 5 second pause between resume passes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the pause before each resume pass.
    #[must_use]
    pub fn with_resume_delay(mut self, delay: Duration) -> Self {
        self.resume_delay = delay;
        self
    }

    /// Overrides the maximum number of resume passes.
    #[must_use]
    pub fn with_max_resumes(mut self, max_resumes: u32) -> Self {
        self.max_resumes = max_resumes;
        self
    }
}

/// Arguments shared by the first run and every resume pass.
pub(crate) fn base_args(request: &DownloadRequest, options: &DownloadOptions, temp: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "--verbose".into(),
        "-r".into(),
        request.url.clone().into(),
        "-o".into(),
        temp.into(),
    ];
    let mut push = |flag: &str, value: Option<&str>| {
        if let Some(value) = value {
            args.push(flag.into());
            args.push(value.into());
        }
    };
    push("--swfVfy", request.player_url.as_deref());
    push("--pageUrl", request.page_url.as_deref());
    push("--app", request.app.as_deref());
    push("--playpath", request.play_path.as_deref());
    push("--tcUrl", request.tc_url.as_deref());
    if options.test {
        args.extend([OsString::from("--stop"), OsString::from("1")]);
    }
    if let Some(version) = &request.flash_version {
        args.extend([OsString::from("--flashVer"), OsString::from(version)]);
    }
    if request.rtmp_live {
        args.push("--live".into());
    }
    for conn in &request.rtmp_conn {
        args.extend([OsString::from("--conn"), OsString::from(conn)]);
    }
    if let Some(protocol) = &request.rtmp_protocol {
        args.extend([OsString::from("--protocol"), OsString::from(protocol)]);
    }
    args
}

#[async_trait]
impl TransferStrategy for RtmpDriver {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Rtmp
    }

    #[instrument(skip_all, fields(url = %job.url(), path = %job.target.display()))]
    async fn attempt(
        &self,
        job: &mut DownloadJob,
        progress: &mut JobProgress<'_>,
    ) -> Result<TransferOutcome, DownloadError> {
        reject_stdout(job, "rtmp")?;
        let program = job.options.tools.rtmpdump.clone();
        let tool = program.display().to_string();
        if !check_executable(&program, &["-h"]).await {
            return Err(DownloadError::tool_missing(tool));
        }

        let (temps, temp) = temp_for(job);
        let live = job.request.rtmp_live;
        let test = job.options.test;
        let base = base_args(&job.request, &job.options, &temp);

        let mut args = base.clone();
        if !live && job.options.continuedl {
            args.extend([OsString::from("--resume"), OsString::from("--skip"), OsString::from("1")]);
        }
        let mut code = run_tool(&program, &args).await?;

        let mut passes = 0;
        while matches!(code, Some(RD_FAILED | RD_INCOMPLETE)) && !test && !live {
            if passes >= self.max_resumes {
                debug!(passes, "resume limit reached");
                break;
            }
            passes += 1;

            let before = file_size(&temp).await;
            job.notify(Notice::RtmpResuming { bytes: before });
            tokio::time::sleep(self.resume_delay).await;

            let mut args = base.clone();
            args.push("-e".into());
            if code == Some(RD_FAILED) {
                args.extend([OsString::from("-k"), OsString::from("1")]);
            }
            code = run_tool(&program, &args).await?;

            let after = file_size(&temp).await;
            if before == after && code == Some(RD_FAILED) {
                break;
            }
            if before == after && code == Some(RD_INCOMPLETE) && after > RTMP_NEAR_COMPLETE_BYTES {
                job.notify(Notice::RtmpIncompleteAccepted { bytes: after });
                code = Some(RD_SUCCESS);
                break;
            }
        }

        match code {
            Some(RD_SUCCESS) => {}
            Some(RD_INCOMPLETE) if test => {}
            Some(RD_NO_CONNECT) => return Err(DownloadError::ToolNoConnect { tool }),
            other => return Err(DownloadError::tool_failed(tool, other)),
        }

        let bytes = finalize(job, &temps, &temp, progress).await?;
        Ok(TransferOutcome {
            bytes,
            completion: Completion::Downloaded,
        })
    }
}
