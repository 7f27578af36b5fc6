//! Resumable HTTP(S) transfer.
//!
//! # State machine
//!
//! ```text
//! INIT ──> CONNECTING ──> RESUME_CHECK ──> STREAMING ──> FINISHED
//!              ^  │             │               │
//!              │  └─ 5xx ──> RETRYING           ├─ next chunk ──> CONNECTING
//!              └──────────────┘ │               └─ error ──> FAILED
//!                               └─ 416 ──> already complete | restart from 0
//! ```
//!
//! Each connect attempt produces a [`ConnectOutcome`]; fatal conditions come back as
//! `Err`. Only the connect phase is retried. Once bytes are flowing any failure ends
//! the job and the temp file stays on disk for a later resume.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use rand::Rng;
use regex::Regex;
use reqwest::Response;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, HeaderMap, LAST_MODIFIED};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter, Stdout};
use tokio::time::Instant;
use tracing::{debug, info, instrument};

use super::block_size::BlockSizer;
use super::client::{ByteRange, HttpClient, map_request_error};
use super::constants::TEST_FILE_SIZE;
use super::error::DownloadError;
use super::job::{Completion, DownloadJob, Notice, TransferOutcome};
use super::options::DownloadOptions;
use super::progress::{JobProgress, ProgressEvent, ProgressStatus, calc_eta, calc_speed};
use super::rate_limiter::RateLimiter;
use super::retry::{FailureType, RetryDecision, classify_error};
use super::strategy::{StrategyKind, TransferStrategy};
use super::temp_file::{TempFileManager, is_stdout, try_utime};

static CONTENT_RANGE_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"bytes (\d+)-(\d+)?(?:/(\d+))?").ok());

/// Result of one connection attempt.
#[derive(Debug)]
pub(crate) enum ConnectOutcome {
    /// A 2xx response ready to stream.
    Established(Response),
    /// The server confirmed the local temp file already holds everything.
    AlreadyComplete,
    /// A transient failure; the caller consults the retry policy.
    Retryable(DownloadError),
}

/// How a streaming pass ended without error.
#[derive(Debug)]
enum StreamEnd {
    /// Everything was received.
    Finished { last_modified: Option<String> },
    /// A closed-range chunk ended below the total; connect again for the rest.
    NextFragment,
}

/// How the temp file is opened on first write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenMode {
    Write,
    Append,
}

/// Mutable state of one transfer.
#[derive(Debug)]
struct TransferState {
    temp: PathBuf,
    mode: OpenMode,
    resume_offset: u64,
    bytes_transferred: u64,
    total: Option<u64>,
    start: Instant,
    is_resume: bool,
    sink: Option<Sink>,
    block: BlockSizer,
}

impl TransferState {
    async fn new(temp: PathBuf, options: &DownloadOptions) -> Self {
        let mut resume_offset = 0;
        if options.continuedl && !is_stdout(&temp) {
            if let Ok(meta) = tokio::fs::metadata(&temp).await
                && meta.is_file()
            {
                resume_offset = meta.len();
            }
        }
        Self {
            temp,
            mode: if resume_offset > 0 {
                OpenMode::Append
            } else {
                OpenMode::Write
            },
            resume_offset,
            bytes_transferred: resume_offset,
            total: None,
            start: Instant::now(),
            is_resume: resume_offset > 0,
            sink: None,
            block: BlockSizer::new(options.block_size(), !options.noresizebuffer),
        }
    }

    fn restart_from_zero(&mut self) {
        self.resume_offset = 0;
        self.bytes_transferred = 0;
        self.mode = OpenMode::Write;
        self.total = None;
        self.sink = None;
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), DownloadError> {
        if self.sink.is_none() {
            self.sink = Some(Sink::open(&self.temp, self.mode).await?);
            // Later chunks of a multi-request transfer keep appending.
            self.mode = OpenMode::Append;
        }
        match self.sink.as_mut() {
            Some(sink) => sink.write(data, &self.temp).await,
            None => Ok(()),
        }
    }
}

/// Output of a transfer.
#[derive(Debug)]
enum Sink {
    File(BufWriter<File>),
    Stdout(Stdout),
}

impl Sink {
    async fn open(path: &Path, mode: OpenMode) -> Result<Self, DownloadError> {
        if is_stdout(path) {
            return Ok(Self::Stdout(tokio::io::stdout()));
        }
        let mut options = OpenOptions::new();
        match mode {
            OpenMode::Write => options.write(true).create(true).truncate(true),
            OpenMode::Append => options.append(true).create(true),
        };
        let file = options
            .open(path)
            .await
            .map_err(|e| DownloadError::io(path, e))?;
        debug!(path = %path.display(), ?mode, "opened output");
        Ok(Self::File(BufWriter::new(file)))
    }

    async fn write(&mut self, data: &[u8], path: &Path) -> Result<(), DownloadError> {
        let result = match self {
            Self::File(writer) => writer.write_all(data).await,
            Self::Stdout(out) => out.write_all(data).await,
        };
        result.map_err(|e| DownloadError::io(path, e))
    }

    async fn finish(self, path: &Path) -> Result<(), DownloadError> {
        let result = match self {
            Self::File(mut writer) => writer.flush().await,
            Self::Stdout(mut out) => out.flush().await,
        };
        result.map_err(|e| DownloadError::io(path, e))
    }
}

/// Reads a response body in pieces no larger than the requested size.
struct BlockReader {
    stream: BoxStream<'static, reqwest::Result<Bytes>>,
    pending: Bytes,
}

impl BlockReader {
    fn new(response: Response) -> Self {
        Self {
            stream: response.bytes_stream().boxed(),
            pending: Bytes::new(),
        }
    }

    /// Up to `max` bytes; empty at end of body.
    async fn read(&mut self, max: usize) -> reqwest::Result<Bytes> {
        while self.pending.is_empty() {
            match self.stream.next().await {
                Some(chunk) => self.pending = chunk?,
                None => return Ok(Bytes::new()),
            }
        }
        let n = max.min(self.pending.len());
        Ok(self.pending.split_to(n))
    }
}

fn header_str(response: &Response, name: reqwest::header::HeaderName) -> Option<&str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

fn content_length(response: &Response) -> Option<u64> {
    header_str(response, CONTENT_LENGTH).and_then(|v| v.trim().parse().ok())
}

/// Parses `bytes S-E/T` into `(S, E, T)`.
fn parse_content_range(value: &str) -> Option<(u64, Option<u64>, Option<u64>)> {
    let caps = CONTENT_RANGE_RE.as_ref()?.captures(value)?;
    let start = caps.get(1)?.as_str().parse().ok()?;
    let end = caps.get(2).and_then(|m| m.as_str().parse().ok());
    let total = caps.get(3).and_then(|m| m.as_str().parse().ok());
    Some((start, end, total))
}

/// True when a 416's authoritative `length` is close enough to `offset` to call the
/// local file complete.
fn within_tolerance(length: u64, offset: u64, tolerance: u64) -> bool {
    length.saturating_add(tolerance) > offset && length < offset.saturating_add(tolerance)
}

/// Native HTTP(S) strategy built on an injected [`HttpClient`].
#[derive(Debug, Clone)]
pub struct HttpRangeSession {
    client: HttpClient,
}

impl HttpRangeSession {
    /// Creates a session using `client` for every request.
    #[must_use]
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }

    /// Length of the next closed-range request, when chunking or test mode is on.
    ///
    /// Test mode asks for exactly [`TEST_FILE_SIZE`] bytes so range-capable servers
    /// stop early; chunk lengths are drawn from the top 5% of `http_chunk_size`.
    fn next_chunk_len(options: &DownloadOptions) -> Option<u64> {
        if options.test {
            return Some(TEST_FILE_SIZE);
        }
        let chunk = options.http_chunk_size?;
        let low = (chunk - chunk / 20).max(1);
        Some(rand::thread_rng().gen_range(low..=chunk.max(low)))
    }

    #[instrument(skip_all, fields(url = %job.url(), offset = state.resume_offset))]
    async fn establish(
        &self,
        job: &mut DownloadJob,
        state: &mut TransferState,
        headers: &HeaderMap,
    ) -> Result<ConnectOutcome, DownloadError> {
        let url = job.url().to_string();
        let chunk = Self::next_chunk_len(&job.options);

        let range_start = if state.resume_offset > 0 {
            if state.is_resume {
                job.notify(Notice::ResumingAt {
                    offset: state.resume_offset,
                });
                state.is_resume = false;
            }
            state.mode = OpenMode::Append;
            Some(state.resume_offset)
        } else {
            chunk.map(|_| 0)
        };
        let range = range_start.map(|start| match chunk {
            Some(len) => {
                let mut end = start + len - 1;
                if let Some(total) = state.total {
                    end = end.min(total.saturating_sub(1));
                }
                ByteRange::closed(start, end)
            }
            None => ByteRange::from_offset(start),
        });

        let preopened = job.request.open_response.take();
        let response = match (range, preopened) {
            (None, Some(response)) => {
                debug!("reusing pre-opened connection");
                response
            }
            _ => match self.client.get(&url, headers, range).await {
                Ok(response) => response,
                Err(e) => return transient_or_fatal(e),
            },
        };

        let status = response.status().as_u16();
        if status == 416 && state.resume_offset > 0 {
            return self.reconcile_unsatisfiable(job, state, headers).await;
        }
        if (200..300).contains(&status) {
            if let Some(range) = range {
                Self::check_content_range(job, state, &response, range);
            }
            return Ok(ConnectOutcome::Established(response));
        }
        transient_or_fatal(DownloadError::http_status(url, status))
    }

    /// Accepts the range only if the server answered from the requested offset.
    fn check_content_range(
        job: &mut DownloadJob,
        state: &mut TransferState,
        response: &Response,
        range: ByteRange,
    ) {
        let parsed = header_str(response, CONTENT_RANGE).and_then(parse_content_range);
        if let Some((start, end, total)) = parsed
            && start == range.start
        {
            let accepted = match range.end {
                None => true,
                Some(requested_end) => {
                    end == Some(requested_end) || total.is_some_and(|t| t < requested_end)
                }
            };
            if accepted {
                if total.is_some() {
                    state.total = total;
                }
                return;
            }
        }

        if state.resume_offset > 0 {
            job.notify(Notice::ResumeRejected {
                offset: state.resume_offset,
            });
        }
        state.restart_from_zero();
    }

    /// Handles a 416 on a resume request by asking for the whole resource.
    async fn reconcile_unsatisfiable(
        &self,
        job: &mut DownloadJob,
        state: &mut TransferState,
        headers: &HeaderMap,
    ) -> Result<ConnectOutcome, DownloadError> {
        let url = job.url().to_string();
        debug!("range not satisfiable, checking remote length");
        let response = match self.client.get(&url, headers, None).await {
            Ok(response) => response,
            Err(e) => return transient_or_fatal(e),
        };
        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            return transient_or_fatal(DownloadError::http_status(url, status));
        }

        if let Some(length) = content_length(&response)
            && within_tolerance(length, state.resume_offset, job.options.resume_tolerance)
        {
            return Ok(ConnectOutcome::AlreadyComplete);
        }

        job.notify(Notice::ResumeRejected {
            offset: state.resume_offset,
        });
        state.restart_from_zero();
        Ok(ConnectOutcome::Established(response))
    }

    fn check_size_policy(options: &DownloadOptions, url: &str, size: u64) -> Result<(), DownloadError> {
        if let Some(min) = options.min_filesize
            && size < min
        {
            return Err(DownloadError::FileTooSmall {
                url: url.to_string(),
                size,
                min,
            });
        }
        if let Some(max) = options.max_filesize
            && size > max
        {
            return Err(DownloadError::FileTooLarge {
                url: url.to_string(),
                size,
                max,
            });
        }
        Ok(())
    }

    #[instrument(skip_all, fields(url = %job.url(), offset = state.resume_offset))]
    async fn stream(
        &self,
        job: &DownloadJob,
        state: &mut TransferState,
        response: Response,
        progress: &mut JobProgress<'_>,
    ) -> Result<StreamEnd, DownloadError> {
        let url = job.url();
        let options = &job.options;
        let last_modified = header_str(&response, LAST_MODIFIED).map(str::to_string);
        let fragment_start = state.resume_offset;

        let raw_length = content_length(&response);
        let size_hint = state.total.or(raw_length.map(|len| len + fragment_start));
        if let Some(size) = size_hint {
            Self::check_size_policy(options, url, size)?;
        }

        let length = if options.test {
            Some(raw_length.map_or(TEST_FILE_SIZE, |len| len.min(TEST_FILE_SIZE)))
        } else {
            raw_length
        };
        // Short-content is only judged against a length the server advertised.
        let advertised_end = raw_length.and(length).map(|len| len + fragment_start);
        let read_limit = length.map(|len| len + fragment_start);
        if state.total.is_none() {
            state.total = advertised_end;
        }

        let limiter = RateLimiter::new(options.ratelimit);
        let mut body = BlockReader::new(response);
        let mut counter = fragment_start;
        let started = Instant::now();
        let mut before = started;

        loop {
            let mut want = state.block.current();
            if let Some(limit) = read_limit {
                let left = limit.saturating_sub(counter);
                if left == 0 {
                    break;
                }
                want = usize::try_from(left).map_or(want, |left| left.min(want));
            }

            let data = match body.read(want).await {
                Ok(data) => data,
                Err(e) => {
                    state.bytes_transferred = counter;
                    if let Some(sink) = state.sink.take() {
                        sink.finish(&state.temp).await?;
                    }
                    if let Some(end) = advertised_end
                        && counter < end
                        && !e.is_timeout()
                    {
                        return Err(DownloadError::content_too_short(url, end, counter));
                    }
                    return Err(map_request_error(url, e));
                }
            };
            if data.is_empty() {
                break;
            }
            let after = Instant::now();
            counter += data.len() as u64;
            state.bytes_transferred = counter;
            state.write(&data).await?;

            let elapsed = after - started;
            let fresh = counter - fragment_start;
            let total = state.total.or(read_limit);
            progress.emit(ProgressEvent {
                status: ProgressStatus::Downloading,
                downloaded_bytes: counter,
                total_bytes: total,
                tmpfilename: Some(state.temp.clone()),
                filename: job.target.clone(),
                eta: total.and_then(|t| calc_eta(elapsed, t.saturating_sub(fragment_start), fresh)),
                speed: calc_speed(elapsed, fresh),
                elapsed: Some(state.start.elapsed()),
            });

            limiter.throttle(started, fresh).await;
            state.block.observe(after - before, data.len());
            before = after;
        }

        if options.http_chunk_size.is_some()
            && !options.test
            && counter > fragment_start
            && state.total.is_some_and(|total| counter < total)
        {
            debug!(bytes = counter, "chunk complete, requesting next range");
            state.resume_offset = counter;
            return Ok(StreamEnd::NextFragment);
        }

        let Some(sink) = state.sink.take() else {
            return Err(DownloadError::no_data(url));
        };
        sink.finish(&state.temp).await?;

        if let Some(end) = advertised_end
            && counter != end
        {
            return Err(DownloadError::content_too_short(url, end, counter));
        }
        Ok(StreamEnd::Finished { last_modified })
    }

    async fn complete(
        &self,
        job: &DownloadJob,
        state: &TransferState,
        temps: &TempFileManager,
        last_modified: Option<&str>,
        progress: &mut JobProgress<'_>,
    ) -> Result<u64, DownloadError> {
        let bytes = state.bytes_transferred;
        temps.commit(&state.temp, &job.target).await?;
        if job.options.updatetime && !is_stdout(&job.target) {
            try_utime(&job.target, last_modified).await;
        }
        progress.emit(ProgressEvent {
            status: ProgressStatus::Finished,
            downloaded_bytes: bytes,
            total_bytes: Some(bytes),
            tmpfilename: Some(state.temp.clone()),
            filename: job.target.clone(),
            eta: None,
            speed: calc_speed(state.start.elapsed(), bytes),
            elapsed: Some(state.start.elapsed()),
        });
        info!(path = %job.target.display(), bytes, "download complete");
        Ok(bytes)
    }
}

fn transient_or_fatal(error: DownloadError) -> Result<ConnectOutcome, DownloadError> {
    match classify_error(&error) {
        FailureType::Transient => Ok(ConnectOutcome::Retryable(error)),
        FailureType::Permanent => Err(error),
    }
}

#[async_trait]
impl TransferStrategy for HttpRangeSession {
    fn kind(&self) -> StrategyKind {
        StrategyKind::HttpRange
    }

    #[instrument(skip_all, fields(url = %job.url(), path = %job.target.display()))]
    async fn attempt(
        &self,
        job: &mut DownloadJob,
        progress: &mut JobProgress<'_>,
    ) -> Result<TransferOutcome, DownloadError> {
        let temps = TempFileManager::new(job.options.partsuffix.clone(), !job.options.nopart);
        let temp = temps.temp_name(&job.target);
        let headers = job.request.header_map();
        let policy = job.options.retry_policy();
        let mut state = TransferState::new(temp, &job.options).await;
        let mut attempt = 1;

        loop {
            match self.establish(job, &mut state, &headers).await? {
                ConnectOutcome::AlreadyComplete => {
                    let bytes = state.resume_offset;
                    job.notify(Notice::AlreadyComplete { bytes });
                    temps.commit(&state.temp, &job.target).await?;
                    progress.emit(ProgressEvent::finished(&job.target, bytes));
                    return Ok(TransferOutcome {
                        bytes,
                        completion: Completion::AlreadyComplete,
                    });
                }
                ConnectOutcome::Retryable(error) => {
                    match policy.should_retry(FailureType::Transient, attempt) {
                        RetryDecision::Retry { delay, attempt: next } => {
                            job.notify(Notice::Retrying {
                                attempt,
                                max_retries: policy.max_retries(),
                                reason: error.to_string(),
                            });
                            tokio::time::sleep(delay).await;
                            attempt = next;
                        }
                        RetryDecision::DoNotRetry { reason } => {
                            debug!(%reason, "not retrying");
                            if policy.max_retries() == 0 {
                                return Err(error);
                            }
                            return Err(DownloadError::retries_exhausted(
                                job.url(),
                                policy.max_retries(),
                                error,
                            ));
                        }
                    }
                }
                ConnectOutcome::Established(response) => {
                    match self.stream(job, &mut state, response, progress).await? {
                        StreamEnd::NextFragment => {}
                        StreamEnd::Finished { last_modified } => {
                            let bytes = self
                                .complete(job, &state, &temps, last_modified.as_deref(), progress)
                                .await?;
                            return Ok(TransferOutcome {
                                bytes,
                                completion: Completion::Downloaded,
                            });
                        }
                    }
                }
            }
        }
    }
}
