//! Integration tests for the resumable HTTP session, driven through the engine
//! against mock servers.

mod support;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use streamfetch_core::{
    Completion, DownloadError, DownloadOptions, DownloadRequest, Notice, ProgressStatus,
    StrategyKind,
};
use support::socket_guard::{should_skip_socket_bound_test, start_mock_server_or_skip};
use support::{engine_with_recorder, part_path, payload};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use wiremock::matchers::{header, header_exists, method, path};
use wiremock::{Mock, Request, Respond, ResponseTemplate};

/// Serves `body`, honouring `Range: bytes=S-` and `bytes=S-E`.
struct RangeResponder {
    body: Vec<u8>,
}

impl Respond for RangeResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let total = self.body.len();
        let Some(range) = request
            .headers
            .get("range")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("bytes="))
        else {
            return ResponseTemplate::new(200).set_body_bytes(self.body.clone());
        };
        let (start, end) = range.split_once('-').expect("malformed range");
        let start: usize = start.parse().expect("range start");
        if start >= total {
            return ResponseTemplate::new(416);
        }
        let end = if end.is_empty() {
            total - 1
        } else {
            end.parse::<usize>().expect("range end").min(total - 1)
        };
        ResponseTemplate::new(206)
            .insert_header("Content-Range", format!("bytes {start}-{end}/{total}").as_str())
            .set_body_bytes(self.body[start..=end].to_vec())
    }
}

/// 503 for the first `failures` requests, then `body`.
struct FlakyResponder {
    failures: usize,
    calls: AtomicUsize,
    body: Vec<u8>,
}

impl Respond for FlakyResponder {
    fn respond(&self, _: &Request) -> ResponseTemplate {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
            ResponseTemplate::new(503)
        } else {
            ResponseTemplate::new(200).set_body_bytes(self.body.clone())
        }
    }
}

fn fast_retries(retries: u32) -> DownloadOptions {
    DownloadOptions {
        retries,
        retry_delay_ms: 10,
        retry_max_delay_ms: 40,
        ..DownloadOptions::default()
    }
}

#[tokio::test]
async fn test_fresh_download_writes_target_and_reports_progress() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let body = payload(5000);
    Mock::given(method("GET"))
        .and(path("/video.mp4"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("failed to create temp dir");
    let target = dir.path().join("video.mp4");
    let (engine, recorded) = engine_with_recorder(DownloadOptions::default());

    let report = engine
        .download(&target, DownloadRequest::new(format!("{}/video.mp4", server.uri())))
        .await
        .expect("download should succeed");

    assert_eq!(report.completion, Completion::Downloaded);
    assert_eq!(report.strategy, StrategyKind::HttpRange);
    assert_eq!(report.bytes, 5000);
    assert_eq!(std::fs::read(&target).expect("read target"), body);
    assert!(!part_path(&target).exists(), "temp file should be renamed away");

    let events = recorded.events();
    let finished = recorded.finished();
    assert_eq!(finished.len(), 1);
    assert_eq!(finished[0].downloaded_bytes, 5000);
    assert_eq!(events.last().map(|e| e.status), Some(ProgressStatus::Finished));
    assert!(
        events
            .windows(2)
            .all(|w| w[0].downloaded_bytes <= w[1].downloaded_bytes),
        "byte counts must never decrease"
    );
    assert!(events.iter().any(|e| e.status == ProgressStatus::Downloading
        && e.total_bytes == Some(5000)));
}

#[tokio::test]
async fn test_resume_from_partial_file_requests_remaining_bytes() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let body = payload(2000);
    Mock::given(method("GET"))
        .and(path("/clip.flv"))
        .and(header("Range", "bytes=1000-"))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("Content-Range", "bytes 1000-1999/2000")
                .set_body_bytes(body[1000..].to_vec()),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("failed to create temp dir");
    let target = dir.path().join("clip.flv");
    std::fs::write(part_path(&target), &body[..1000]).expect("seed partial file");
    let (engine, recorded) = engine_with_recorder(DownloadOptions::default());

    let report = engine
        .download(&target, DownloadRequest::new(format!("{}/clip.flv", server.uri())))
        .await
        .expect("resume should succeed");

    assert_eq!(report.bytes, 2000);
    assert_eq!(report.notices, vec![Notice::ResumingAt { offset: 1000 }]);
    assert_eq!(std::fs::read(&target).expect("read target"), body);
    let finished = recorded.finished();
    assert_eq!(finished.len(), 1);
    assert_eq!(finished[0].downloaded_bytes, 2000);
    assert!(
        recorded.events().iter().all(|e| e.downloaded_bytes >= 1000),
        "progress starts from the resume offset"
    );
}

#[tokio::test]
async fn test_preopened_response_is_streamed_without_new_request() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let body = payload(1200);
    Mock::given(method("GET"))
        .and(path("/opened.mp4"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let url = format!("{}/opened.mp4", server.uri());
    let opened = reqwest::get(&url).await.expect("open connection");
    let request = DownloadRequest {
        open_response: Some(opened),
        ..DownloadRequest::new(url)
    };

    let dir = TempDir::new().expect("failed to create temp dir");
    let target = dir.path().join("opened.mp4");
    let (engine, recorded) = engine_with_recorder(DownloadOptions::default());

    let report = engine
        .download(&target, request)
        .await
        .expect("pre-opened download should succeed");

    assert_eq!(report.bytes, 1200);
    assert_eq!(std::fs::read(&target).expect("read target"), body);
    assert_eq!(recorded.finished().len(), 1);
    let received = server.received_requests().await.expect("recording enabled");
    assert_eq!(received.len(), 1);
}

#[tokio::test]
async fn test_preopened_response_ignored_when_resuming() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let body = payload(2000);
    Mock::given(method("GET"))
        .and(path("/opened.flv"))
        .and(header("Range", "bytes=800-"))
        .respond_with(RangeResponder { body: body.clone() })
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/opened.flv"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let url = format!("{}/opened.flv", server.uri());
    let opened = reqwest::get(&url).await.expect("open connection");
    let request = DownloadRequest {
        open_response: Some(opened),
        ..DownloadRequest::new(url)
    };

    let dir = TempDir::new().expect("failed to create temp dir");
    let target = dir.path().join("opened.flv");
    std::fs::write(part_path(&target), &body[..800]).expect("seed partial file");
    let (engine, _) = engine_with_recorder(DownloadOptions::default());

    let report = engine
        .download(&target, request)
        .await
        .expect("resume should succeed");

    assert_eq!(report.bytes, 2000);
    assert_eq!(report.notices, vec![Notice::ResumingAt { offset: 800 }]);
    assert_eq!(std::fs::read(&target).expect("read target"), body);
}

#[tokio::test]
async fn test_unsatisfiable_range_within_tolerance_is_already_complete() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(header_exists("Range"))
        .respond_with(ResponseTemplate::new(416))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(payload(1050)))
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("failed to create temp dir");
    let target = dir.path().join("done.mp4");
    std::fs::write(part_path(&target), payload(1000)).expect("seed partial file");
    let (engine, recorded) = engine_with_recorder(DownloadOptions::default());

    let report = engine
        .download(&target, DownloadRequest::new(format!("{}/done.mp4", server.uri())))
        .await
        .expect("416 within tolerance should succeed");

    assert_eq!(report.completion, Completion::AlreadyComplete);
    assert_eq!(report.bytes, 1000);
    assert!(report.notices.contains(&Notice::AlreadyComplete { bytes: 1000 }));
    assert_eq!(std::fs::read(&target).expect("read target"), payload(1000));
    assert_eq!(recorded.finished().len(), 1);
}

#[tokio::test]
async fn test_unsatisfiable_range_outside_tolerance_restarts() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let body = payload(3000);
    Mock::given(method("GET"))
        .and(header_exists("Range"))
        .respond_with(ResponseTemplate::new(416))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("failed to create temp dir");
    let target = dir.path().join("grown.mp4");
    std::fs::write(part_path(&target), vec![0u8; 1000]).expect("seed partial file");
    let (engine, _) = engine_with_recorder(DownloadOptions::default());

    let report = engine
        .download(&target, DownloadRequest::new(format!("{}/grown.mp4", server.uri())))
        .await
        .expect("restart should succeed");

    assert_eq!(report.completion, Completion::Downloaded);
    assert!(report.notices.contains(&Notice::ResumeRejected { offset: 1000 }));
    assert_eq!(std::fs::read(&target).expect("read target"), body);
}

#[tokio::test]
async fn test_ignored_range_restarts_from_zero() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let body = payload(2500);
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("failed to create temp dir");
    let target = dir.path().join("norange.mp4");
    std::fs::write(part_path(&target), vec![9u8; 700]).expect("seed partial file");
    let (engine, _) = engine_with_recorder(DownloadOptions::default());

    let report = engine
        .download(&target, DownloadRequest::new(format!("{}/norange.mp4", server.uri())))
        .await
        .expect("download should succeed");

    assert_eq!(
        report.notices,
        vec![
            Notice::ResumingAt { offset: 700 },
            Notice::ResumeRejected { offset: 700 }
        ]
    );
    assert_eq!(std::fs::read(&target).expect("read target"), body);
}

#[tokio::test]
async fn test_chunked_download_reassembles_ranges() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let body = payload(3500);
    Mock::given(method("GET"))
        .respond_with(RangeResponder { body: body.clone() })
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("failed to create temp dir");
    let target = dir.path().join("chunked.mp4");
    let options = DownloadOptions {
        http_chunk_size: Some(1000),
        ..DownloadOptions::default()
    };
    let (engine, recorded) = engine_with_recorder(options);

    let report = engine
        .download(&target, DownloadRequest::new(format!("{}/chunked.mp4", server.uri())))
        .await
        .expect("chunked download should succeed");

    assert_eq!(report.bytes, 3500);
    assert_eq!(report.retries(), 0);
    assert_eq!(std::fs::read(&target).expect("read target"), body);
    assert_eq!(recorded.finished().len(), 1);
    let requests = server.received_requests().await.expect("recording enabled");
    assert!(requests.len() >= 4, "expected one request per chunk, got {}", requests.len());
    assert!(requests.iter().all(|r| r.headers.contains_key("range")));
}

#[tokio::test]
async fn test_min_filesize_aborts_before_writing() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(payload(1000)))
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("failed to create temp dir");
    let target = dir.path().join("small.mp4");
    let options = DownloadOptions {
        min_filesize: Some(5000),
        ..DownloadOptions::default()
    };
    let (engine, recorded) = engine_with_recorder(options);

    let err = engine
        .download(&target, DownloadRequest::new(format!("{}/small.mp4", server.uri())))
        .await
        .expect_err("should be rejected");

    assert!(matches!(err, DownloadError::FileTooSmall { size: 1000, min: 5000, .. }));
    assert!(err.is_size_policy());
    assert!(!target.exists());
    assert!(!part_path(&target).exists());
    assert!(recorded.events().is_empty());
}

#[tokio::test]
async fn test_max_filesize_aborts_before_writing() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(payload(4096)))
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("failed to create temp dir");
    let target = dir.path().join("big.mp4");
    let options = DownloadOptions {
        max_filesize: Some(4095),
        ..DownloadOptions::default()
    };
    let (engine, _) = engine_with_recorder(options);

    let err = engine
        .download(&target, DownloadRequest::new(format!("{}/big.mp4", server.uri())))
        .await
        .expect_err("should be rejected");

    assert!(matches!(err, DownloadError::FileTooLarge { size: 4096, max: 4095, .. }));
    assert!(!part_path(&target).exists());
}

#[tokio::test]
async fn test_server_errors_are_retried_then_succeed() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let body = payload(1500);
    Mock::given(method("GET"))
        .respond_with(FlakyResponder {
            failures: 2,
            calls: AtomicUsize::new(0),
            body: body.clone(),
        })
        .expect(3)
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("failed to create temp dir");
    let target = dir.path().join("flaky.mp4");
    let (engine, _) = engine_with_recorder(fast_retries(3));

    let report = engine
        .download(&target, DownloadRequest::new(format!("{}/flaky.mp4", server.uri())))
        .await
        .expect("third attempt should succeed");

    assert_eq!(report.retries(), 2);
    assert!(matches!(
        report.notices[0],
        Notice::Retrying { attempt: 1, max_retries: 3, .. }
    ));
    assert_eq!(std::fs::read(&target).expect("read target"), body);
}

#[tokio::test]
async fn test_retry_budget_exhausted() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("failed to create temp dir");
    let target = dir.path().join("down.mp4");
    let (engine, recorded) = engine_with_recorder(fast_retries(2));

    let err = engine
        .download(&target, DownloadRequest::new(format!("{}/down.mp4", server.uri())))
        .await
        .expect_err("should give up");

    match err {
        DownloadError::RetriesExhausted { retries, source, .. } => {
            assert_eq!(retries, 2);
            assert!(matches!(*source, DownloadError::HttpStatus { status: 503, .. }));
        }
        other => panic!("expected RetriesExhausted, got {other:?}"),
    }
    assert!(recorded.finished().is_empty());
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("failed to create temp dir");
    let target = dir.path().join("missing.mp4");
    let (engine, _) = engine_with_recorder(fast_retries(5));

    let err = engine
        .download(&target, DownloadRequest::new(format!("{}/missing.mp4", server.uri())))
        .await
        .expect_err("404 is fatal");

    assert!(matches!(err, DownloadError::HttpStatus { status: 404, .. }));
    assert!(!target.exists());
}

#[tokio::test]
async fn test_test_mode_caps_download() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let body = payload(50_000);
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("failed to create temp dir");
    let target = dir.path().join("sample.mp4");
    let options = DownloadOptions {
        test: true,
        ..DownloadOptions::default()
    };
    let (engine, _) = engine_with_recorder(options);

    let report = engine
        .download(&target, DownloadRequest::new(format!("{}/sample.mp4", server.uri())))
        .await
        .expect("test download should succeed");

    assert_eq!(report.bytes, 10_241);
    assert_eq!(std::fs::read(&target).expect("read target"), &body[..10_241]);
}

#[tokio::test]
async fn test_test_mode_requests_only_the_sample_range() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let body = payload(50_000);
    Mock::given(method("GET"))
        .and(header("Range", "bytes=0-10240"))
        .respond_with(RangeResponder { body: body.clone() })
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("failed to create temp dir");
    let target = dir.path().join("sample.mp4");
    let options = DownloadOptions {
        test: true,
        ..DownloadOptions::default()
    };
    let (engine, recorded) = engine_with_recorder(options);

    let report = engine
        .download(&target, DownloadRequest::new(format!("{}/sample.mp4", server.uri())))
        .await
        .expect("test download should succeed");

    assert_eq!(report.bytes, 10_241);
    assert_eq!(std::fs::read(&target).expect("read target"), &body[..10_241]);
    assert_eq!(recorded.finished().len(), 1);
}

#[tokio::test]
async fn test_ratelimit_slows_transfer() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(payload(4000)))
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("failed to create temp dir");
    let target = dir.path().join("slow.mp4");
    let options = DownloadOptions {
        ratelimit: Some(8000),
        ..DownloadOptions::default()
    };
    let (engine, _) = engine_with_recorder(options);

    let start = Instant::now();
    engine
        .download(&target, DownloadRequest::new(format!("{}/slow.mp4", server.uri())))
        .await
        .expect("download should succeed");

    // 4000 bytes at 8000 B/s.
    assert!(start.elapsed() >= Duration::from_millis(450), "{:?}", start.elapsed());
}

#[tokio::test]
async fn test_premature_close_is_content_too_short() {
    if should_skip_socket_bound_test() {
        return;
    }
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("accept");
        let mut request = [0u8; 2048];
        let _ = socket.read(&mut request).await;
        let _ = socket
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2000\r\n\r\n")
            .await;
        let _ = socket.write_all(&[7u8; 1000]).await;
        let _ = socket.shutdown().await;
    });

    let dir = TempDir::new().expect("failed to create temp dir");
    let target = dir.path().join("cut.mp4");
    let (engine, recorded) = engine_with_recorder(fast_retries(0));

    let err = engine
        .download(&target, DownloadRequest::new(format!("http://{addr}/cut.mp4")))
        .await
        .expect_err("short body must fail");

    match err {
        DownloadError::ContentTooShort { expected, actual, .. } => {
            assert_eq!(expected, 2000);
            assert!(actual < 2000);
        }
        other => panic!("expected ContentTooShort, got {other:?}"),
    }
    assert!(!target.exists());
    assert!(recorded.finished().is_empty());
}

#[tokio::test]
async fn test_connection_closed_before_response_is_retried() {
    if should_skip_socket_bound_test() {
        return;
    }
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let hits = Arc::new(AtomicUsize::new(0));
    let served = Arc::clone(&hits);
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let mut request = [0u8; 2048];
            let _ = socket.read(&mut request).await;
            if served.fetch_add(1, Ordering::SeqCst) == 0 {
                drop(socket);
                continue;
            }
            let _ = socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello")
                .await;
            let _ = socket.shutdown().await;
        }
    });

    let dir = TempDir::new().expect("failed to create temp dir");
    let target = dir.path().join("reset.txt");
    let (engine, _) = engine_with_recorder(fast_retries(3));

    let report = engine
        .download(&target, DownloadRequest::new(format!("http://{addr}/reset.txt")))
        .await
        .expect("second connection should succeed");

    assert_eq!(hits.load(Ordering::SeqCst), 2);
    assert_eq!(report.retries(), 1);
    assert_eq!(std::fs::read(&target).expect("read target"), b"hello");
}

#[tokio::test]
async fn test_nopart_writes_target_directly() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(payload(800)))
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("failed to create temp dir");
    let target = dir.path().join("direct.mp4");
    let options = DownloadOptions {
        nopart: true,
        ..DownloadOptions::default()
    };
    let (engine, recorded) = engine_with_recorder(options);

    engine
        .download(&target, DownloadRequest::new(format!("{}/direct.mp4", server.uri())))
        .await
        .expect("download should succeed");

    assert_eq!(std::fs::read(&target).expect("read target"), payload(800));
    assert!(
        recorded
            .events()
            .iter()
            .filter(|e| e.status == ProgressStatus::Downloading)
            .all(|e| e.tmpfilename.as_deref() == Some(target.as_path()))
    );
}

#[tokio::test]
async fn test_last_modified_sets_mtime() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Last-Modified", "Wed, 21 Oct 2015 07:28:00 GMT")
                .set_body_bytes(payload(100)),
        )
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("failed to create temp dir");
    let target = dir.path().join("dated.mp4");
    let (engine, _) = engine_with_recorder(DownloadOptions::default());

    engine
        .download(&target, DownloadRequest::new(format!("{}/dated.mp4", server.uri())))
        .await
        .expect("download should succeed");

    let modified = std::fs::metadata(&target)
        .and_then(|m| m.modified())
        .expect("mtime");
    let secs = modified
        .duration_since(UNIX_EPOCH)
        .expect("after epoch")
        .as_secs();
    assert_eq!(secs, 1_445_412_480);
    assert!(modified < SystemTime::now());
}

#[tokio::test]
async fn test_request_headers_are_sent() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(header("Referer", "https://example.com/watch"))
        .and(header("User-Agent", "Agent/2.0"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(payload(10)))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("failed to create temp dir");
    let target = dir.path().join("h.mp4");
    let mut request = DownloadRequest::new(format!("{}/h.mp4", server.uri()));
    request
        .http_headers
        .insert("Referer".to_string(), "https://example.com/watch".to_string());
    request.user_agent = Some("Agent/2.0".to_string());
    let (engine, _) = engine_with_recorder(DownloadOptions::default());

    engine
        .download(&target, request)
        .await
        .expect("download should succeed");
}

#[tokio::test]
async fn test_nooverwrites_skips_existing_target() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(payload(10)))
        .expect(0)
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("failed to create temp dir");
    let target = dir.path().join("keep.mp4");
    std::fs::write(&target, b"original").expect("seed target");
    let options = DownloadOptions {
        nooverwrites: true,
        continuedl: false,
        ..DownloadOptions::default()
    };
    let (engine, recorded) = engine_with_recorder(options);

    let report = engine
        .download(&target, DownloadRequest::new(format!("{}/keep.mp4", server.uri())))
        .await
        .expect("skip is a success");

    assert_eq!(report.completion, Completion::AlreadyDownloaded);
    assert_eq!(std::fs::read(&target).expect("read target"), b"original");
    assert_eq!(recorded.finished()[0].downloaded_bytes, 8);
}
