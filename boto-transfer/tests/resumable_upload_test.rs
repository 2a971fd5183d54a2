/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::io::Write;
use std::sync::{Arc, Mutex};

use aws_smithy_runtime::test_util::capture_test_logs::capture_test_logs;
use boto_transfer::error::{Disposition, ErrorKind};
use boto_transfer::io::{InputSource, ProgressReporter};
use boto_transfer::types::{ObjectKey, StaleSessionPolicy};
use boto_transfer::{Client, Config};
use bytes::Bytes;
use http::header::{CONTENT_LENGTH, CONTENT_RANGE};
use http::{HeaderMap, HeaderValue, StatusCode};
use test_common::{md5_etag, temp_file_with, CountingSleep, Exchange, FakeGcsServer};

const ENDPOINT: &str = "http://localhost:4443";
const OBJECT_PATH: &str = "/test-bucket/test-object";

fn key() -> ObjectKey {
    ObjectKey::new("test-bucket", "test-object").with_endpoint(ENDPOINT)
}

fn client(server: &FakeGcsServer, sleep: &CountingSleep) -> Client {
    let config = Config::builder()
        .connection(server.clone())
        .sleep_impl(sleep.shared())
        .build();
    Client::new(config)
}

fn header<'a>(headers: &'a HeaderMap, name: &http::header::HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

#[tokio::test]
async fn test_upload_resumes_after_broken_connection() {
    let server = FakeGcsServer::new();
    server.break_after(5);
    let sleep = CountingSleep::default();
    let client = client(&server, &sleep);
    let source = InputSource::from_bytes(Bytes::from_static(b"0123456789"));

    let mut handler = client.resumable_upload();
    let output = handler
        .send(&key(), &source, &HeaderMap::new(), None)
        .await
        .unwrap();

    assert_eq!(md5_etag(b"0123456789"), output.e_tag());
    assert_eq!(0, output.upload_start_point());
    assert_eq!(Some(Bytes::from_static(b"0123456789")), server.object(OBJECT_PATH));
    assert_eq!(1, server.sessions_started());
    let starts = server.requests_for(Exchange::Start);
    assert!(starts[0].headers.get(CONTENT_LENGTH).is_none());

    let chunks = server.requests_for(Exchange::Chunk);
    assert_eq!(2, chunks.len());
    assert_eq!(&b"01234"[..], &chunks[0].body[..]);
    assert_eq!(&b"56789"[..], &chunks[1].body[..]);
    assert_eq!(
        Some("bytes 5-9/10"),
        header(&chunks[1].headers, &CONTENT_RANGE)
    );
    assert_eq!(Some("5"), header(&chunks[1].headers, &CONTENT_LENGTH));
    assert_eq!(1, sleep.count());
}

#[tokio::test]
async fn test_resume_after_break_at_every_offset() {
    let data = Bytes::from_static(b"0123456789");
    for k in 0..=data.len() {
        let server = FakeGcsServer::new();
        server.break_after(k as u64);
        let client = client(&server, &CountingSleep::default());
        let source = InputSource::from_bytes(data.clone());

        let output = client
            .resumable_upload()
            .send(&key(), &source, &HeaderMap::new(), None)
            .await
            .unwrap();

        assert_eq!(md5_etag(&data), output.e_tag(), "break after {k}");
        assert_eq!(Some(data.clone()), server.object(OBJECT_PATH), "break after {k}");
        let chunks = server.requests_for(Exchange::Chunk);
        assert_eq!(&data[..k], &chunks[0].body[..], "break after {k}");
        let resumed: Vec<u8> = chunks[1..]
            .iter()
            .flat_map(|chunk| chunk.body.iter().copied())
            .collect();
        assert_eq!(&data[k..], &resumed[..], "break after {k}");
    }
}

#[tokio::test]
async fn test_second_send_does_not_resend() {
    let server = FakeGcsServer::new();
    let client = client(&server, &CountingSleep::default());
    let source = InputSource::from_bytes(test_common::rand_data(1000));

    let mut handler = client.resumable_upload();
    let first = handler
        .send(&key(), &source, &HeaderMap::new(), None)
        .await
        .unwrap();
    let received = server.bytes_received();
    assert_eq!(1000, received);

    let second = handler
        .send(&key(), &source, &HeaderMap::new(), None)
        .await
        .unwrap();
    assert_eq!(first.e_tag(), second.e_tag());
    assert_eq!(received, server.bytes_received());
    assert_eq!(1, server.requests_for(Exchange::Chunk).len());
}

#[tokio::test]
async fn test_tracker_resumes_in_new_handler() {
    let dir = tempfile::tempdir().unwrap();
    let tracker = dir.path().join("upload.tracker");
    let server = FakeGcsServer::new();
    // the first process loses the connection and cannot reach the store afterwards
    server
        .break_after(5)
        .script(Exchange::Query, StatusCode::SERVICE_UNAVAILABLE);
    let sleep = CountingSleep::default();
    let client = client(&server, &sleep);
    let file = temp_file_with(b"0123456789");
    let source = InputSource::from_path(file.path());

    let mut first = client
        .resumable_upload()
        .tracker_file(&tracker)
        .num_retries(0);
    let err = first
        .send(&key(), &source, &HeaderMap::new(), None)
        .await
        .unwrap_err();
    assert_eq!(Some(Disposition::AbortCurrentProcess), err.disposition());
    let persisted = std::fs::read_to_string(&tracker).unwrap();
    assert_eq!(
        first.session_uri().unwrap().as_str(),
        persisted.trim_end()
    );

    let mut second = client.resumable_upload().tracker_file(&tracker);
    let output = second
        .send(&key(), &source, &HeaderMap::new(), None)
        .await
        .unwrap();
    assert_eq!(5, output.upload_start_point());
    assert_eq!(1, server.sessions_started());
    let chunks = server.requests_for(Exchange::Chunk);
    assert_eq!(&b"56789"[..], &chunks.last().unwrap().body[..]);
    assert_eq!(Some(Bytes::from_static(b"0123456789")), server.object(OBJECT_PATH));
    assert!(!tracker.exists());
}

#[tokio::test]
async fn test_progress_less_attempts_are_bounded() {
    let server = FakeGcsServer::new();
    for _ in 0..10 {
        server.script(Exchange::Start, StatusCode::SERVICE_UNAVAILABLE);
    }
    let sleep = CountingSleep::default();
    let client = client(&server, &sleep);
    let source = InputSource::from_bytes(Bytes::from_static(b"data"));

    let mut handler = client.resumable_upload().num_retries(3);
    let err = handler
        .send(&key(), &source, &HeaderMap::new(), None)
        .await
        .unwrap_err();

    assert_eq!(
        &ErrorKind::ResumableTransfer(Disposition::AbortCurrentProcess),
        err.kind()
    );
    assert_eq!(4, server.requests_for(Exchange::Start).len());
    assert_eq!(3, sleep.count());
    assert_eq!(1, client.metrics().transfers_failed());
}

#[tokio::test]
async fn test_missing_location_is_retried() {
    let server = FakeGcsServer::new();
    server.omit_location(true);
    let client = client(&server, &CountingSleep::default());
    let source = InputSource::from_bytes(Bytes::from_static(b"data"));

    let mut handler = client.resumable_upload().num_retries(2);
    let err = handler
        .send(&key(), &source, &HeaderMap::new(), None)
        .await
        .unwrap_err();
    assert_eq!(Some(Disposition::AbortCurrentProcess), err.disposition());
    assert_eq!(3, server.requests_for(Exchange::Start).len());
}

#[tokio::test]
async fn test_rejected_session_start_aborts() {
    let server = FakeGcsServer::new();
    server.script(Exchange::Start, StatusCode::FORBIDDEN);
    let client = client(&server, &CountingSleep::default());
    let source = InputSource::from_bytes(Bytes::from_static(b"data"));

    let err = client
        .resumable_upload()
        .send(&key(), &source, &HeaderMap::new(), None)
        .await
        .unwrap_err();
    assert_eq!(Some(Disposition::Abort), err.disposition());
    assert_eq!(1, server.requests().len());
}

#[tokio::test]
async fn test_file_size_change_aborts_and_removes_tracker() {
    let dir = tempfile::tempdir().unwrap();
    let tracker = dir.path().join("upload.tracker");
    let file = temp_file_with(b"0123456789");
    let path = file.path().to_path_buf();

    let server = FakeGcsServer::new();
    server.break_after(5).on_break(move || {
        let mut file = std::fs::OpenOptions::new().append(true).open(path).unwrap();
        file.write_all(b"more").unwrap();
    });
    let client = client(&server, &CountingSleep::default());

    let mut handler = client.resumable_upload().tracker_file(&tracker);
    let err = handler
        .send(
            &key(),
            &InputSource::from_path(file.path()),
            &HeaderMap::new(),
            None,
        )
        .await
        .unwrap_err();

    assert_eq!(
        &ErrorKind::ResumableTransfer(Disposition::Abort),
        err.kind()
    );
    assert!(!tracker.exists());
    assert!(handler.session_uri().is_none());
}

#[tokio::test]
async fn test_zero_length_upload() {
    let server = FakeGcsServer::new();
    let client = client(&server, &CountingSleep::default());
    let source = InputSource::from_bytes(Bytes::new());

    let output = client
        .resumable_upload()
        .send(&key(), &source, &HeaderMap::new(), None)
        .await
        .unwrap();

    assert_eq!(md5_etag(b""), output.e_tag());
    let chunks = server.requests_for(Exchange::Chunk);
    assert_eq!(1, chunks.len());
    assert!(chunks[0].headers.get(CONTENT_RANGE).is_none());
    assert_eq!(Some("0"), header(&chunks[0].headers, &CONTENT_LENGTH));
    assert_eq!(Some(Bytes::new()), server.object(OBJECT_PATH));
}

#[tokio::test]
async fn test_zero_length_upload_reports_progress() {
    let server = FakeGcsServer::new();
    let client = client(&server, &CountingSleep::default());
    let source = InputSource::from_bytes(Bytes::new());

    let calls = Arc::new(Mutex::new(Vec::new()));
    let captured = calls.clone();
    let progress = ProgressReporter::new(move |done, total| {
        captured.lock().unwrap().push((done, total));
    });

    client
        .resumable_upload()
        .send(&key(), &source, &HeaderMap::new(), Some(&progress))
        .await
        .unwrap();

    assert_eq!(vec![(0, 0), (0, 0)], *calls.lock().unwrap());
}

#[tokio::test]
async fn test_content_length_header_is_rejected() {
    let server = FakeGcsServer::new();
    let client = client(&server, &CountingSleep::default());
    let source = InputSource::from_bytes(Bytes::from_static(b"data"));
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_LENGTH, HeaderValue::from_static("4"));

    let err = client
        .resumable_upload()
        .send(&key(), &source, &headers, None)
        .await
        .unwrap_err();
    assert_eq!(Some(Disposition::Abort), err.disposition());
    assert!(server.requests().is_empty());
}

#[tokio::test]
async fn test_invalid_tracker_is_ignored() {
    let (_guard, rx) = capture_test_logs();
    let dir = tempfile::tempdir().unwrap();
    let tracker = dir.path().join("upload.tracker");
    std::fs::write(&tracker, "ftp://example.com/upload\n").unwrap();

    let server = FakeGcsServer::new();
    let client = client(&server, &CountingSleep::default());
    let source = InputSource::from_bytes(Bytes::from_static(b"data"));

    client
        .resumable_upload()
        .tracker_file(&tracker)
        .send(&key(), &source, &HeaderMap::new(), None)
        .await
        .unwrap();

    assert_eq!(1, server.sessions_started());
    assert!(server.requests_for(Exchange::Query).is_empty());
    assert!(rx.contents().contains("invalid session URI"));
}

#[tokio::test]
async fn test_stale_session_starts_over() {
    let dir = tempfile::tempdir().unwrap();
    let tracker = dir.path().join("upload.tracker");
    std::fs::write(
        &tracker,
        format!("{ENDPOINT}{OBJECT_PATH}?upload_id=unknown\n"),
    )
    .unwrap();

    let server = FakeGcsServer::new();
    let client = client(&server, &CountingSleep::default());
    let source = InputSource::from_bytes(Bytes::from_static(b"data"));

    let output = client
        .resumable_upload()
        .tracker_file(&tracker)
        .send(&key(), &source, &HeaderMap::new(), None)
        .await
        .unwrap();

    assert_eq!(md5_etag(b"data"), output.e_tag());
    assert_eq!(1, server.requests_for(Exchange::Query).len());
    assert_eq!(1, server.sessions_started());
    assert!(!tracker.exists());
}

#[tokio::test]
async fn test_stale_session_auth_failure_aborts_with_policy() {
    let dir = tempfile::tempdir().unwrap();
    let tracker = dir.path().join("upload.tracker");
    std::fs::write(
        &tracker,
        format!("{ENDPOINT}{OBJECT_PATH}?upload_id=1\n"),
    )
    .unwrap();

    let server = FakeGcsServer::new();
    server.script(Exchange::Query, StatusCode::UNAUTHORIZED);
    let client = client(&server, &CountingSleep::default());
    let source = InputSource::from_bytes(Bytes::from_static(b"data"));

    let err = client
        .resumable_upload()
        .tracker_file(&tracker)
        .stale_session_policy(StaleSessionPolicy::AbortOnAuthFailure)
        .send(&key(), &source, &HeaderMap::new(), None)
        .await
        .unwrap_err();

    assert_eq!(Some(Disposition::Abort), err.disposition());
    assert_eq!(0, server.sessions_started());
    assert!(!tracker.exists());
}

#[tokio::test]
async fn test_md5_mismatch_deletes_object() {
    let server = FakeGcsServer::new();
    server.override_e_tag("\"00000000000000000000000000000000\"");
    let client = client(&server, &CountingSleep::default());
    let source = InputSource::from_bytes(Bytes::from_static(b"data"));

    let err = client
        .resumable_upload()
        .send(&key(), &source, &HeaderMap::new(), None)
        .await
        .unwrap_err();

    assert_eq!(Some(Disposition::Abort), err.disposition());
    assert!(server.object(OBJECT_PATH).is_none());
    assert!(server
        .requests()
        .iter()
        .any(|r| r.method == http::Method::DELETE));
}

#[tokio::test]
async fn test_progress_callbacks() {
    let server = FakeGcsServer::new();
    let config = Config::builder()
        .connection(server.clone())
        .sleep_impl(CountingSleep::default().shared())
        .buffer_size(100)
        .build();
    let client = Client::new(config);
    let source = InputSource::from_bytes(test_common::rand_data(1000));

    let calls = Arc::new(Mutex::new(Vec::new()));
    let captured = calls.clone();
    let progress = ProgressReporter::new(move |done, total| {
        captured.lock().unwrap().push((done, total));
    })
    .num_cb(-1);

    client
        .resumable_upload()
        .send(&key(), &source, &HeaderMap::new(), Some(&progress))
        .await
        .unwrap();

    let calls = calls.lock().unwrap();
    assert_eq!(Some(&(0, 1000)), calls.first());
    assert_eq!(Some(&(1000, 1000)), calls.last());
    assert!(calls.windows(2).all(|w| w[0].0 <= w[1].0));
    assert!(calls.len() >= 10);
}
