//! Plain HTTP(S) jobs handed to curl, wget, aria2c, axel or httpie.

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, instrument};

use super::{check_executable, finalize, header_lines, reject_stdout, run_tool, temp_for};
use crate::download::error::DownloadError;
use crate::download::job::{Completion, DownloadJob, DownloadRequest, TransferOutcome};
use crate::download::options::DownloadOptions;
use crate::download::progress::JobProgress;
use crate::download::strategy::{StrategyKind, TransferStrategy};

/// An HTTP download program the engine knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalDownloader {
    Aria2c,
    Axel,
    Curl,
    Httpie,
    Wget,
}

impl ExternalDownloader {
    /// Names accepted by [`from_program`](Self::from_program).
    pub const NAMES: [&'static str; 5] = ["aria2c", "axel", "curl", "httpie", "wget"];

    /// Identifies the tool from a program name or path, ignoring any extension
    /// (`/usr/bin/curl`, `curl.exe`).
    #[must_use]
    pub fn from_program(program: &Path) -> Option<Self> {
        match program.file_stem().and_then(OsStr::to_str)? {
            "aria2c" => Some(Self::Aria2c),
            "axel" => Some(Self::Axel),
            "curl" => Some(Self::Curl),
            "httpie" | "http" => Some(Self::Httpie),
            "wget" => Some(Self::Wget),
            _ => None,
        }
    }

    /// Lowercase tool name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Aria2c => "aria2c",
            Self::Axel => "axel",
            Self::Curl => "curl",
            Self::Httpie => "httpie",
            Self::Wget => "wget",
        }
    }

    /// Binary to spawn for the configured `program`. httpie installs as `http`.
    fn executable(self, program: &Path) -> PathBuf {
        if self == Self::Httpie && program.file_stem() == Some(OsStr::new("httpie")) {
            return program.with_file_name("http");
        }
        program.to_path_buf()
    }

    fn version_arg(self) -> &'static str {
        match self {
            Self::Curl | Self::Axel => "-V",
            Self::Aria2c => "-v",
            Self::Wget | Self::Httpie => "--version",
        }
    }

    /// Command line writing `request` into `temp`.
    pub(crate) fn args(self, request: &DownloadRequest, options: &DownloadOptions, temp: &Path) -> Vec<OsString> {
        match self {
            Self::Curl => curl_args(request, options, temp),
            Self::Wget => wget_args(request, options, temp),
            Self::Aria2c => aria2c_args(request, options, temp),
            Self::Axel => axel_args(request, options, temp),
            Self::Httpie => httpie_args(request, temp),
        }
    }
}

impl fmt::Display for ExternalDownloader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn push_pair(args: &mut Vec<OsString>, flag: &str, value: impl Into<OsString>) {
    args.push(flag.into());
    args.push(value.into());
}

fn push_extra(args: &mut Vec<OsString>, options: &DownloadOptions) {
    args.extend(options.external_downloader_args.iter().map(OsString::from));
}

fn push_url(args: &mut Vec<OsString>, request: &DownloadRequest) {
    args.push("--".into());
    args.push(request.url.clone().into());
}

fn curl_args(request: &DownloadRequest, options: &DownloadOptions, temp: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["--location".into(), "-o".into(), temp.into(), "--compressed".into()];
    for header in header_lines(request) {
        push_pair(&mut args, "--header", header);
    }
    push_pair(&mut args, "--continue-at", if options.continuedl { "-" } else { "0" });
    if options.noprogress {
        args.push("--silent".into());
    }
    if let Some(rate) = options.ratelimit {
        push_pair(&mut args, "--limit-rate", rate.to_string());
    }
    push_pair(&mut args, "--retry", options.retries.to_string());
    if let Some(max) = options.max_filesize {
        push_pair(&mut args, "--max-filesize", max.to_string());
    }
    push_extra(&mut args, options);
    push_url(&mut args, request);
    args
}

fn wget_args(request: &DownloadRequest, options: &DownloadOptions, temp: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-O".into(), temp.into(), "-nv".into(), "--compression=auto".into()];
    for header in header_lines(request) {
        push_pair(&mut args, "--header", header);
    }
    if options.continuedl {
        args.push("--continue".into());
    }
    if let Some(rate) = options.ratelimit {
        push_pair(&mut args, "--limit-rate", rate.to_string());
    }
    // wget counts attempts, and 0 means forever.
    push_pair(&mut args, "--tries", (options.retries + 1).to_string());
    push_extra(&mut args, options);
    push_url(&mut args, request);
    args
}

/// aria2c strips surrounding whitespace from names, so relative ones get a `./` prefix.
fn aria2c_path(path: &Path) -> OsString {
    if path.is_absolute() {
        path.as_os_str().to_owned()
    } else {
        Path::new(".").join(path).into_os_string()
    }
}

fn aria2c_args(request: &DownloadRequest, options: &DownloadOptions, temp: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = Vec::new();
    if options.continuedl {
        args.push("-c".into());
    } else {
        args.push("--allow-overwrite=true".into());
    }
    args.extend(
        [
            "--console-log-level=warn",
            "--summary-interval=0",
            "--download-result=hide",
            "--http-accept-gzip=true",
            "--file-allocation=none",
            "-x16",
            "-j16",
            "-s16",
            "--min-split-size",
            "1M",
        ]
        .into_iter()
        .map(OsString::from),
    );
    for header in header_lines(request) {
        push_pair(&mut args, "--header", header);
    }
    if options.external_downloader_args.is_empty() {
        push_pair(&mut args, "--max-connection-per-server", "4");
    } else {
        push_extra(&mut args, options);
    }
    if let Some(rate) = options.ratelimit {
        push_pair(&mut args, "--max-overall-download-limit", rate.to_string());
    }
    args.push(format!("--max-tries={}", options.retries + 1).into());
    args.push(format!("--remote-time={}", options.updatetime).into());
    args.push(format!("--show-console-readout={}", !options.noprogress).into());

    if let Some(dir) = temp.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        let mut dir = aria2c_path(dir);
        dir.push(std::path::MAIN_SEPARATOR_STR);
        push_pair(&mut args, "--dir", dir);
    }
    if let Some(name) = temp.file_name() {
        push_pair(&mut args, "--out", aria2c_path(Path::new(name)));
    }
    args.push("--auto-file-renaming=false".into());
    push_url(&mut args, request);
    args
}

fn axel_args(request: &DownloadRequest, options: &DownloadOptions, temp: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-o".into(), temp.into()];
    for header in header_lines(request) {
        push_pair(&mut args, "-H", header);
    }
    push_extra(&mut args, options);
    push_url(&mut args, request);
    args
}

fn httpie_args(request: &DownloadRequest, temp: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "--download".into(),
        "--output".into(),
        temp.into(),
        request.url.clone().into(),
    ];
    args.extend(
        header_lines(request)
            .into_iter()
            .map(|line| OsString::from(line.replacen(": ", ":", 1))),
    );
    args
}

/// Hands plain HTTP(S) jobs to the program named by `external_downloader`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExternalHttpDriver;

impl ExternalHttpDriver {
    /// Creates the driver.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// True when a downloader is configured and its program can be spawned.
    pub async fn available(options: &DownloadOptions) -> bool {
        let Some(program) = &options.external_downloader else {
            return false;
        };
        let Some(tool) = ExternalDownloader::from_program(program) else {
            return false;
        };
        check_executable(&tool.executable(program), &[tool.version_arg()]).await
    }
}

#[async_trait]
impl TransferStrategy for ExternalHttpDriver {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ExternalHttp
    }

    #[instrument(skip_all, fields(url = %job.url(), path = %job.target.display()))]
    async fn attempt(
        &self,
        job: &mut DownloadJob,
        progress: &mut JobProgress<'_>,
    ) -> Result<TransferOutcome, DownloadError> {
        reject_stdout(job, "external http")?;
        let Some(configured) = job.options.external_downloader.clone() else {
            return Err(DownloadError::tool_missing("external downloader"));
        };
        let Some(tool) = ExternalDownloader::from_program(&configured) else {
            return Err(DownloadError::tool_missing(configured.display().to_string()));
        };
        let program = tool.executable(&configured);
        debug!(%tool, program = %program.display(), "using external downloader");

        let (temps, temp) = temp_for(job);
        let code = run_tool(&program, &tool.args(&job.request, &job.options, &temp)).await?;
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

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[OsString]) -> Vec<String> {
        args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    fn request() -> DownloadRequest {
        let mut request = DownloadRequest::new("https://example.com/v.mp4");
        request
            .http_headers
            .insert("Referer".to_string(), "https://example.com/".to_string());
        request
    }

    #[test]
    fn test_tool_identified_by_file_stem() {
        let cases = [
            ("curl", Some(ExternalDownloader::Curl)),
            ("/usr/local/bin/wget", Some(ExternalDownloader::Wget)),
            ("aria2c.exe", Some(ExternalDownloader::Aria2c)),
            ("axel", Some(ExternalDownloader::Axel)),
            ("httpie", Some(ExternalDownloader::Httpie)),
            ("ffmpeg", None),
            ("", None),
        ];
        for (program, expected) in cases {
            assert_eq!(ExternalDownloader::from_program(Path::new(program)), expected, "{program}");
        }
    }

    #[test]
    fn test_httpie_runs_http_binary() {
        let tool = ExternalDownloader::Httpie;
        assert_eq!(tool.executable(Path::new("httpie")), PathBuf::from("http"));
        assert_eq!(
            tool.executable(Path::new("/opt/bin/httpie")),
            PathBuf::from("/opt/bin/http")
        );
        assert_eq!(tool.executable(Path::new("/opt/bin/http")), PathBuf::from("/opt/bin/http"));
    }

    #[test]
    fn test_curl_args() {
        let options = DownloadOptions {
            ratelimit: Some(50_000),
            retries: 3,
            max_filesize: Some(1_000_000),
            noprogress: true,
            ..DownloadOptions::default()
        };
        let args = ExternalDownloader::Curl.args(&request(), &options, Path::new("v.mp4.part"));
        assert_eq!(
            strings(&args),
            [
                "--location",
                "-o",
                "v.mp4.part",
                "--compressed",
                "--header",
                "Referer: https://example.com/",
                "--continue-at",
                "-",
                "--silent",
                "--limit-rate",
                "50000",
                "--retry",
                "3",
                "--max-filesize",
                "1000000",
                "--",
                "https://example.com/v.mp4",
            ]
        );
    }

    #[test]
    fn test_curl_restarts_without_continuedl() {
        let options = DownloadOptions {
            continuedl: false,
            ..DownloadOptions::default()
        };
        let args = strings(&ExternalDownloader::Curl.args(&request(), &options, Path::new("t")));
        let at = args.iter().position(|a| a == "--continue-at").unwrap_or(0);
        assert_eq!(args[at + 1], "0");
    }

    #[test]
    fn test_wget_args_count_attempts() {
        let options = DownloadOptions {
            retries: 0,
            external_downloader_args: vec!["--no-verbose".to_string()],
            ..DownloadOptions::default()
        };
        let args = ExternalDownloader::Wget.args(&request(), &options, Path::new("v.part"));
        assert_eq!(
            strings(&args),
            [
                "-O",
                "v.part",
                "-nv",
                "--compression=auto",
                "--header",
                "Referer: https://example.com/",
                "--continue",
                "--tries",
                "1",
                "--no-verbose",
                "--",
                "https://example.com/v.mp4",
            ]
        );
    }

    #[test]
    fn test_aria2c_args_split_dir_and_name() {
        let options = DownloadOptions {
            ratelimit: Some(1024),
            retries: 2,
            ..DownloadOptions::default()
        };
        let temp = Path::new("media").join("v.mp4.part");
        let args = strings(&ExternalDownloader::Aria2c.args(&request(), &options, &temp));

        assert_eq!(args[0], "-c");
        let dir = format!("./media{}", std::path::MAIN_SEPARATOR);
        let expected_tail = [
            "--max-connection-per-server".to_string(),
            "4".to_string(),
            "--max-overall-download-limit".to_string(),
            "1024".to_string(),
            "--max-tries=3".to_string(),
            "--remote-time=true".to_string(),
            "--show-console-readout=true".to_string(),
            "--dir".to_string(),
            dir,
            "--out".to_string(),
            "./v.mp4.part".to_string(),
            "--auto-file-renaming=false".to_string(),
            "--".to_string(),
            "https://example.com/v.mp4".to_string(),
        ];
        assert!(args.ends_with(&expected_tail), "{args:?}");
        assert!(args.contains(&"Referer: https://example.com/".to_string()));
    }

    #[test]
    fn test_aria2c_user_args_replace_default_connections() {
        let options = DownloadOptions {
            continuedl: false,
            external_downloader_args: vec!["-x4".to_string()],
            ..DownloadOptions::default()
        };
        let args = strings(&ExternalDownloader::Aria2c.args(&request(), &options, Path::new("/tmp/v.part")));
        assert_eq!(args[0], "--allow-overwrite=true");
        assert!(args.contains(&"-x4".to_string()));
        assert!(!args.contains(&"--max-connection-per-server".to_string()));
        assert!(args.contains(&"/tmp/".to_string()));
        assert!(args.contains(&"./v.part".to_string()));
    }

    #[test]
    fn test_axel_and_httpie_args() {
        let options = DownloadOptions::default();
        let axel = strings(&ExternalDownloader::Axel.args(&request(), &options, Path::new("v.part")));
        assert_eq!(
            axel,
            ["-o", "v.part", "-H", "Referer: https://example.com/", "--", "https://example.com/v.mp4"]
        );

        let httpie = strings(&ExternalDownloader::Httpie.args(&request(), &options, Path::new("v.part")));
        assert_eq!(
            httpie,
            [
                "--download",
                "--output",
                "v.part",
                "https://example.com/v.mp4",
                "Referer:https://example.com/",
            ]
        );
    }

    #[tokio::test]
    async fn test_unconfigured_downloader_unavailable() {
        assert!(!ExternalHttpDriver::available(&DownloadOptions::default()).await);
        let missing = DownloadOptions {
            external_downloader: Some(PathBuf::from("/nonexistent/curl")),
            ..DownloadOptions::default()
        };
        assert!(!ExternalHttpDriver::available(&missing).await);
    }
}
