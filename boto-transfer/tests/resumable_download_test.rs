/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use boto_transfer::error::{Disposition, ErrorKind};
use boto_transfer::http::header::ByteRange;
use boto_transfer::{Client, Config};
use bytes::Bytes;
use test_common::{md5_etag, rand_data, CountingSleep, InMemoryObject};

fn client(sleep: &CountingSleep) -> Client {
    Client::new(Config::builder().sleep_impl(sleep.shared()).build())
}

#[tokio::test]
async fn test_interrupted_download_resumes_from_local_length() {
    let data = rand_data(10_000);
    let object = InMemoryObject::new(data.clone());
    object.interrupt_after(4_000);
    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("object");

    let sleep = CountingSleep::default();
    let client = client(&sleep);
    let output = client
        .resumable_download()
        .get(&object, &destination, None)
        .await
        .unwrap();

    assert_eq!(10_000, output.size());
    assert_eq!(2, output.parts());
    assert_eq!(&data[..], &std::fs::read(&destination).unwrap()[..]);
    assert_eq!(
        vec![ByteRange::AllFrom(0), ByteRange::AllFrom(4_000)],
        object.requests()
    );
    assert_eq!(1, sleep.count());
    assert_eq!(10_000, client.metrics().total_bytes_transferred());
}

#[tokio::test]
async fn test_matching_tracker_resumes_partial_file() {
    let data = rand_data(10_000);
    let object = InMemoryObject::new(data.clone());
    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("object");
    let tracker = dir.path().join("object.tracker");
    std::fs::write(&destination, &data[..3_000]).unwrap();
    std::fs::write(&tracker, format!("{}\n", md5_etag(&data))).unwrap();

    let client = client(&CountingSleep::default());
    client
        .resumable_download()
        .tracker_file(&tracker)
        .get(&object, &destination, None)
        .await
        .unwrap();

    assert_eq!(vec![ByteRange::AllFrom(3_000)], object.requests());
    assert_eq!(&data[..], &std::fs::read(&destination).unwrap()[..]);
    assert!(!tracker.exists());
    assert_eq!(7_000, client.metrics().total_bytes_transferred());
}

#[tokio::test]
async fn test_stale_tracker_restarts_download() {
    let data = rand_data(10_000);
    let object = InMemoryObject::new(data.clone());
    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("object");
    let tracker = dir.path().join("object.tracker");
    std::fs::write(&destination, rand_data(3_000)).unwrap();
    std::fs::write(&tracker, "\"some-other-version\"\n").unwrap();

    client(&CountingSleep::default())
        .resumable_download()
        .tracker_file(&tracker)
        .get(&object, &destination, None)
        .await
        .unwrap();

    assert_eq!(vec![ByteRange::AllFrom(0)], object.requests());
    assert_eq!(&data[..], &std::fs::read(&destination).unwrap()[..]);
    assert!(!tracker.exists());
}

#[tokio::test]
async fn test_tracker_survives_for_a_later_process() {
    let data = rand_data(5_000);
    let object = InMemoryObject::new(data.clone());
    object.interrupt_after(2_500);
    object.fail_range_at(2_500, 10);
    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("object");
    let tracker = dir.path().join("object.tracker");

    let sleep = CountingSleep::default();
    let client = client(&sleep);
    let err = client
        .resumable_download()
        .tracker_file(&tracker)
        .num_retries(1)
        .get(&object, &destination, None)
        .await
        .unwrap_err();

    assert_eq!(
        &ErrorKind::ResumableTransfer(Disposition::AbortCurrentProcess),
        err.kind()
    );
    // one successful-but-short attempt, then two without progress
    assert_eq!(3, object.requests().len());
    assert_eq!(2, sleep.count());
    assert_eq!(2_500, std::fs::metadata(&destination).unwrap().len());
    assert_eq!(
        format!("{}\n", md5_etag(&data)),
        std::fs::read_to_string(&tracker).unwrap()
    );

    object.fail_range_at(2_500, 0);
    client
        .resumable_download()
        .tracker_file(&tracker)
        .get(&object, &destination, None)
        .await
        .unwrap();

    assert_eq!(Some(&ByteRange::AllFrom(2_500)), object.requests().last());
    assert_eq!(&data[..], &std::fs::read(&destination).unwrap()[..]);
    assert!(!tracker.exists());
    assert_eq!(1, client.metrics().transfers_failed());
    assert_eq!(1, client.metrics().transfers_completed());
}

#[tokio::test]
async fn test_md5_mismatch_deletes_download() {
    let data = rand_data(1_000);
    let object = InMemoryObject::new(data).with_e_tag(Some(md5_etag(b"something else")));
    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("object");

    let err = client(&CountingSleep::default())
        .resumable_download()
        .get(&object, &destination, None)
        .await
        .unwrap_err();

    assert_eq!(
        &ErrorKind::ResumableTransfer(Disposition::Abort),
        err.kind()
    );
    assert!(!destination.exists());
}

#[tokio::test]
async fn test_multipart_e_tag_is_not_verified() {
    let data = rand_data(1_000);
    let object =
        InMemoryObject::new(data.clone()).with_e_tag(Some("\"3858f62230ac3c915f300c664312c11f-2\"".to_owned()));
    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("object");

    client(&CountingSleep::default())
        .resumable_download()
        .get(&object, &destination, None)
        .await
        .unwrap();

    assert_eq!(&data[..], &std::fs::read(&destination).unwrap()[..]);
}

#[tokio::test]
async fn test_zero_byte_object() {
    let object = InMemoryObject::new(Bytes::new());
    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("empty");
    let tracker = dir.path().join("empty.tracker");
    std::fs::write(&tracker, "\"stale\"\n").unwrap();

    let output = client(&CountingSleep::default())
        .resumable_download()
        .tracker_file(&tracker)
        .get(&object, &destination, None)
        .await
        .unwrap();

    assert_eq!(0, output.size());
    assert_eq!(0, output.parts());
    assert_eq!(0, std::fs::metadata(&destination).unwrap().len());
    assert!(object.requests().is_empty());
    assert!(!tracker.exists());
}
