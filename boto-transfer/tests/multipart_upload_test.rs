/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::retry::RetryConfig;
use aws_sdk_s3::operation::abort_multipart_upload::AbortMultipartUploadOutput;
use aws_sdk_s3::operation::complete_multipart_upload::CompleteMultipartUploadOutput;
use aws_sdk_s3::operation::create_multipart_upload::CreateMultipartUploadOutput;
use aws_sdk_s3::operation::list_parts::ListPartsOutput;
use aws_sdk_s3::operation::upload_part::UploadPartOutput;
use aws_sdk_s3::types::{Part, StorageClass};
use aws_smithy_mocks_experimental::{mock, mock_client, Rule, RuleMode};
use aws_smithy_runtime::client::http::test_util::infallible_client_fn;
use aws_smithy_runtime_api::http::StatusCode;
use aws_smithy_types::body::SdkBody;
use boto_transfer::error::{ErrorKind, ServiceErrorCode};
use boto_transfer::operation::multipart_upload::{
    InitiateMultipartUpload, MultipartUpload, UploadedPart,
};
use boto_transfer::types::{ChunkRetryConfig, FailedMultipartUploadPolicy};
use boto_transfer::{Client, Config};
use bytes::Bytes;
use test_common::{rand_data, temp_file_with};

const UPLOAD_ID: &str = "test-upload-id";
const MIB: usize = 1024 * 1024;

fn transfer_client(rule_mode: RuleMode, rules: &[&Rule]) -> Client {
    let s3 = mock_client!(aws_sdk_s3, rule_mode, rules);
    let s3 = aws_sdk_s3::Client::from_conf(
        s3.config()
            .to_builder()
            .http_client(infallible_client_fn(|_req| {
                http_02x::Response::builder().status(200).body("").unwrap()
            }))
            .retry_config(RetryConfig::disabled())
            .build(),
    );
    Client::new(Config::builder().s3_client(s3).build())
}

fn create_rule() -> Rule {
    mock!(aws_sdk_s3::Client::create_multipart_upload).then_output(|| {
        CreateMultipartUploadOutput::builder()
            .upload_id(UPLOAD_ID)
            .build()
    })
}

fn upload_part_rule(part_number: i32) -> Rule {
    mock!(aws_sdk_s3::Client::upload_part)
        .match_requests(move |input| input.part_number() == Some(part_number))
        .then_output(move || {
            UploadPartOutput::builder()
                .e_tag(format!("\"etag-{part_number}\""))
                .build()
        })
}

/// CompleteMultipartUpload can fail after the 200 status line was sent
fn complete_error_rule() -> Rule {
    mock!(aws_sdk_s3::Client::complete_multipart_upload).then_http_response(|| {
        HttpResponse::new(
            StatusCode::try_from(200).unwrap(),
            SdkBody::from(
                "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
                 <Error><Code>InternalError</Code>\
                 <Message>We encountered an internal error. Please try again.</Message>\
                 <RequestId>656c76696e6727732072657175657374</RequestId></Error>",
            ),
        )
    })
}

fn counting_abort_rule(calls: Arc<AtomicUsize>) -> Rule {
    mock!(aws_sdk_s3::Client::abort_multipart_upload)
        .match_requests(|input| input.upload_id() == Some(UPLOAD_ID))
        .then_output(move || {
            calls.fetch_add(1, Ordering::SeqCst);
            AbortMultipartUploadOutput::builder().build()
        })
}

#[tokio::test]
async fn test_initiate_upload_and_complete() {
    let create = mock!(aws_sdk_s3::Client::create_multipart_upload)
        .match_requests(|input| {
            assert_eq!(Some("test-bucket"), input.bucket());
            assert_eq!(Some("test-key"), input.key());
            assert_eq!(Some("text/plain"), input.content_type());
            assert_eq!(Some(&StorageClass::StandardIa), input.storage_class());
            assert_eq!(
                Some("blue"),
                input
                    .metadata()
                    .and_then(|m| m.get("color"))
                    .map(String::as_str)
            );
            true
        })
        .then_output(|| {
            CreateMultipartUploadOutput::builder()
                .upload_id(UPLOAD_ID)
                .build()
        });
    let upload_part = mock!(aws_sdk_s3::Client::upload_part)
        .match_requests(|input| {
            assert_eq!(Some(UPLOAD_ID), input.upload_id());
            assert_eq!(Some(1), input.part_number());
            assert_eq!(Some(11), input.content_length());
            true
        })
        .then_output(|| UploadPartOutput::builder().e_tag("\"etag-1\"").build());
    let complete = mock!(aws_sdk_s3::Client::complete_multipart_upload)
        .match_requests(|input| {
            let parts = input.multipart_upload().unwrap().parts();
            assert_eq!(1, parts.len());
            assert_eq!(Some(1), parts[0].part_number());
            assert_eq!(Some("\"etag-1\""), parts[0].e_tag());
            true
        })
        .then_output(|| {
            CompleteMultipartUploadOutput::builder()
                .e_tag("\"final-etag\"")
                .build()
        });

    let client = transfer_client(RuleMode::Sequential, &[&create, &upload_part, &complete]);
    let coordinator = client.multipart_upload().unwrap();
    let upload = coordinator
        .initiate(
            InitiateMultipartUpload::new("test-bucket", "test-key")
                .content_type("text/plain")
                .storage_class("STANDARD_IA")
                .metadata("color", "blue"),
        )
        .await
        .unwrap();
    assert_eq!(UPLOAD_ID, upload.upload_id());

    let part = coordinator
        .upload_part(&upload, 1, Bytes::from_static(b"hello world"))
        .await
        .unwrap();
    assert_eq!(UploadedPart::new(1, "\"etag-1\""), part);

    let completed = coordinator.complete(&upload, vec![part]).await.unwrap();
    assert_eq!("\"final-etag\"", completed.e_tag());
    assert_eq!(1, completed.parts());
}

#[tokio::test]
async fn test_initiate_validates_request() {
    let create = create_rule();
    let client = transfer_client(RuleMode::Sequential, &[&create]);
    let coordinator = client.multipart_upload().unwrap();

    let err = coordinator
        .initiate(InitiateMultipartUpload::new("bucket", "key").storage_class("CHEAP_AND_FAST"))
        .await
        .unwrap_err();
    assert_eq!(&ErrorKind::InputInvalid, err.kind());

    let err = coordinator
        .initiate(InitiateMultipartUpload::new("bucket", "key").metadata("bad key", "v"))
        .await
        .unwrap_err();
    assert_eq!(&ErrorKind::InputInvalid, err.kind());
}

#[tokio::test]
async fn test_missing_upload_id_is_an_error() {
    let create = mock!(aws_sdk_s3::Client::create_multipart_upload)
        .then_output(|| CreateMultipartUploadOutput::builder().build());
    let client = transfer_client(RuleMode::Sequential, &[&create]);

    let err = client
        .multipart_upload()
        .unwrap()
        .initiate(InitiateMultipartUpload::new("bucket", "key"))
        .await
        .unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::ServiceError(_)));
}

#[tokio::test]
async fn test_part_number_range_is_enforced() {
    let create = create_rule();
    let client = transfer_client(RuleMode::Sequential, &[&create]);
    let coordinator = client.multipart_upload().unwrap();
    let upload = MultipartUpload::new("bucket", "key", UPLOAD_ID);

    for part_number in [0, 10_001] {
        let err = coordinator
            .upload_part(&upload, part_number, Bytes::from_static(b"data"))
            .await
            .unwrap_err();
        assert_eq!(&ErrorKind::InputInvalid, err.kind());
    }

    let err = coordinator
        .complete(
            &upload,
            vec![UploadedPart::new(1, "a"), UploadedPart::new(3, "c")],
        )
        .await
        .unwrap_err();
    assert_eq!(&ErrorKind::InputInvalid, err.kind());
}

#[tokio::test]
async fn test_list_parts_follows_pagination() {
    let first_page = mock!(aws_sdk_s3::Client::list_parts)
        .match_requests(|input| input.part_number_marker().is_none())
        .then_output(|| {
            ListPartsOutput::builder()
                .parts(Part::builder().part_number(1).e_tag("\"a\"").build())
                .parts(Part::builder().part_number(2).e_tag("\"b\"").build())
                .is_truncated(true)
                .next_part_number_marker("2")
                .build()
        });
    let second_page = mock!(aws_sdk_s3::Client::list_parts)
        .match_requests(|input| input.part_number_marker() == Some("2"))
        .then_output(|| {
            ListPartsOutput::builder()
                .parts(Part::builder().part_number(3).e_tag("\"c\"").build())
                .is_truncated(false)
                .build()
        });
    let client = transfer_client(RuleMode::Sequential, &[&first_page, &second_page]);

    let parts = client
        .multipart_upload()
        .unwrap()
        .list_parts(&MultipartUpload::new("bucket", "key", UPLOAD_ID))
        .await
        .unwrap();
    assert_eq!(
        vec![
            UploadedPart::new(1, "\"a\""),
            UploadedPart::new(2, "\"b\""),
            UploadedPart::new(3, "\"c\""),
        ],
        parts
    );
}

#[tokio::test]
async fn test_abort() {
    let calls = Arc::new(AtomicUsize::new(0));
    let abort = counting_abort_rule(calls.clone());
    let client = transfer_client(RuleMode::Sequential, &[&abort]);

    let aborted = client
        .multipart_upload()
        .unwrap()
        .abort(&MultipartUpload::new("bucket", "key", UPLOAD_ID))
        .await
        .unwrap();
    assert_eq!(UPLOAD_ID, aborted.upload_id());
    assert_eq!(1, calls.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_concurrent_upload() {
    let data = rand_data(12 * MIB);
    let file = temp_file_with(&data);

    let create = create_rule();
    let part1 = upload_part_rule(1);
    let part2 = upload_part_rule(2);
    let part3 = upload_part_rule(3);
    let complete = mock!(aws_sdk_s3::Client::complete_multipart_upload)
        .match_requests(|input| {
            let parts: Vec<_> = input
                .multipart_upload()
                .unwrap()
                .parts()
                .iter()
                .map(|p| (p.part_number().unwrap(), p.e_tag().unwrap().to_owned()))
                .collect();
            assert_eq!(
                vec![
                    (1, "\"etag-1\"".to_owned()),
                    (2, "\"etag-2\"".to_owned()),
                    (3, "\"etag-3\"".to_owned()),
                ],
                parts
            );
            true
        })
        .then_output(|| {
            CompleteMultipartUploadOutput::builder()
                .e_tag("\"object-etag-3\"")
                .build()
        });
    let client = transfer_client(
        RuleMode::MatchAny,
        &[&create, &part1, &part2, &part3, &complete],
    );

    let completed = client
        .concurrent_upload()
        .unwrap()
        .part_size(5 * MIB as u64)
        .concurrency(3)
        .upload(file.path(), InitiateMultipartUpload::new("bucket", "key"))
        .await
        .unwrap();

    assert_eq!(3, completed.parts());
    assert_eq!("\"object-etag-3\"", completed.e_tag());
    assert_eq!(1, client.metrics().transfers_completed());
    assert_eq!(12 * MIB as u64, client.metrics().total_bytes_transferred());
}

#[tokio::test]
async fn test_failed_part_aborts_upload() {
    let data = rand_data(12 * MIB);
    let file = temp_file_with(&data);

    let calls = Arc::new(AtomicUsize::new(0));
    let create = create_rule();
    let part1 = upload_part_rule(1);
    // a part response without an ETag can never be completed
    let part2 = mock!(aws_sdk_s3::Client::upload_part)
        .match_requests(|input| input.part_number() == Some(2))
        .then_output(|| UploadPartOutput::builder().build());
    let part3 = upload_part_rule(3);
    let abort = counting_abort_rule(calls.clone());
    let client = transfer_client(
        RuleMode::MatchAny,
        &[&create, &part1, &part2, &part3, &abort],
    );

    let err = client
        .concurrent_upload()
        .unwrap()
        .part_size(5 * MIB as u64)
        .concurrency(2)
        .chunk_retry(ChunkRetryConfig::disabled())
        .upload(file.path(), InitiateMultipartUpload::new("bucket", "key"))
        .await
        .unwrap_err();

    match err.kind() {
        ErrorKind::ChunkFailed(chunk) => assert_eq!(Some(2), chunk.upload_part()),
        other => panic!("unexpected error kind {other:?}"),
    }
    assert_eq!(1, calls.load(Ordering::SeqCst));
    assert_eq!(1, client.metrics().transfers_failed());
}

#[tokio::test]
async fn test_complete_error_in_ok_response() {
    let complete = complete_error_rule();
    let client = transfer_client(RuleMode::Sequential, &[&complete]);

    let err = client
        .multipart_upload()
        .unwrap()
        .complete(
            &MultipartUpload::new("bucket", "key", UPLOAD_ID),
            vec![UploadedPart::new(1, "\"etag-1\"")],
        )
        .await
        .unwrap_err();
    assert_eq!(
        &ErrorKind::ServiceError(ServiceErrorCode::InternalError),
        err.kind()
    );
}

#[tokio::test]
async fn test_failed_complete_aborts_upload() {
    let data = rand_data(6 * MIB);
    let file = temp_file_with(&data);

    let calls = Arc::new(AtomicUsize::new(0));
    let create = create_rule();
    let part1 = upload_part_rule(1);
    let part2 = upload_part_rule(2);
    let complete = complete_error_rule();
    let abort = counting_abort_rule(calls.clone());
    let client = transfer_client(
        RuleMode::MatchAny,
        &[&create, &part1, &part2, &complete, &abort],
    );

    let err = client
        .concurrent_upload()
        .unwrap()
        .part_size(5 * MIB as u64)
        .upload(file.path(), InitiateMultipartUpload::new("bucket", "key"))
        .await
        .unwrap_err();

    assert_eq!(
        &ErrorKind::ServiceError(ServiceErrorCode::InternalError),
        err.kind()
    );
    assert_eq!(1, calls.load(Ordering::SeqCst));
    assert_eq!(1, client.metrics().transfers_failed());
}

#[tokio::test]
async fn test_failed_part_retains_upload() {
    let data = rand_data(6 * MIB);
    let file = temp_file_with(&data);

    let calls = Arc::new(AtomicUsize::new(0));
    let create = create_rule();
    let part1 = mock!(aws_sdk_s3::Client::upload_part)
        .then_output(|| UploadPartOutput::builder().build());
    let abort = counting_abort_rule(calls.clone());
    let client = transfer_client(RuleMode::MatchAny, &[&create, &part1, &abort]);

    client
        .concurrent_upload()
        .unwrap()
        .part_size(5 * MIB as u64)
        .chunk_retry(ChunkRetryConfig::disabled())
        .failed_multipart_upload_policy(FailedMultipartUploadPolicy::Retain)
        .upload(file.path(), InitiateMultipartUpload::new("bucket", "key"))
        .await
        .unwrap_err();

    assert_eq!(0, calls.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_part_size_below_minimum_is_rejected() {
    let file = temp_file_with(b"tiny");
    let create = create_rule();
    let client = transfer_client(RuleMode::Sequential, &[&create]);

    let err = client
        .concurrent_upload()
        .unwrap()
        .part_size(1024)
        .upload(file.path(), InitiateMultipartUpload::new("bucket", "key"))
        .await
        .unwrap_err();
    assert_eq!(&ErrorKind::InputInvalid, err.kind());
}
