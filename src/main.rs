//! Command-line entry point.
//!
//! Reads one job as JSON on stdin:
//!
//! ```json
//! {"target": "clip.mp4", "request": {"url": "https://example.com/clip.mp4"}, "options": {"ratelimit": "1M"}}
//! ```
//!
//! Progress events are printed as JSON lines on stdout (stderr when the target is
//! `-`), logs go to stderr.

use std::io::{self, Read};
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;
use streamfetch_core::download::HookError;
use streamfetch_core::{DownloadEngine, DownloadOptions, DownloadRequest, HttpClient, ProgressEvent};
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
struct JobInput {
    target: PathBuf,
    request: DownloadRequest,
    #[serde(default)]
    options: DownloadOptions,
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut input = String::new();
    io::stdin()
        .read_to_string(&mut input)
        .context("failed to read job from stdin")?;
    let job: JobInput = serde_json::from_str(&input).context("failed to parse job JSON")?;

    // Priority: RUST_LOG env var > noprogress (warn) > default (info)
    let default_level = if job.options.noprogress { "warn" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?job, "job parsed");

    let mut engine =
        DownloadEngine::new(HttpClient::new(), job.options).context("invalid download options")?;

    let events_to_stderr = job.target.as_os_str() == "-";
    engine.add_progress_hook(move |event: &ProgressEvent| -> Result<(), HookError> {
        let line = serde_json::to_string(event)?;
        if events_to_stderr {
            eprintln!("{line}");
        } else {
            println!("{line}");
        }
        Ok(())
    });

    let report = engine
        .download(&job.target, job.request)
        .await
        .with_context(|| format!("download to {} failed", job.target.display()))?;

    info!(
        path = %report.path.display(),
        bytes = report.bytes,
        strategy = %report.strategy,
        retries = report.retries(),
        completion = ?report.completion,
        "done"
    );
    Ok(())
}
