/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */
use std::error::Error;
use std::path::PathBuf;
use std::str::FromStr;
use std::time;

use aws_sdk_s3::error::DisplayErrorContext;
use boto_transfer::config::loader::ConfigLoader;
use boto_transfer::io::{InputSource, ProgressReporter};
use boto_transfer::operation::multipart_upload::InitiateMultipartUpload;
use boto_transfer::types::{ConcurrencySetting, ObjectKey, PartSize};
use clap::{CommandFactory, Parser};

type BoxError = Box<dyn Error + Send + Sync>;

const ONE_MEGABYTE: u64 = 1000 * 1000;

#[derive(Debug, Clone, clap::Parser)]
#[command(name = "cp")]
#[command(about = "Copies a local file to or from Google Cloud Storage or S3.")]
pub struct Args {
    /// Source to copy from <gs://bucket/key | s3://bucket/key | Local>
    #[arg(required = true)]
    source: TransferUri,

    /// Destination to copy to <gs://bucket/key | s3://bucket/key | Local>
    #[arg(required = true)]
    dest: TransferUri,

    /// Number of concurrent part transfers
    #[arg(long, default_value_t = 8)]
    concurrency: usize,

    /// Part size to use
    #[arg(long, default_value_t = 8388608)]
    part_size: u64,

    /// Storage endpoint for gs:// URIs
    #[arg(long, default_value = "https://storage.googleapis.com")]
    endpoint: String,

    /// Tracker file used to resume an interrupted gs:// transfer
    #[arg(long)]
    tracker: Option<PathBuf>,

    /// Report progress on stderr
    #[arg(long, default_value_t = false, action = clap::ArgAction::SetTrue)]
    progress: bool,
}

#[derive(Clone, Debug)]
enum TransferUri {
    /// Local filesystem source/destination
    Local(PathBuf),

    /// Google Cloud Storage object (`gs://bucket/key`)
    Gcs(String, String),

    /// S3 object (`s3://bucket/key`)
    S3(String, String),
}

impl FromStr for TransferUri {
    type Err = BoxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let split = |rest: &str| -> Result<(String, String), BoxError> {
            match rest.split_once('/') {
                Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => {
                    Ok((bucket.to_owned(), key.to_owned()))
                }
                _ => Err(format!("expected <scheme>://bucket/key, got {s}").into()),
            }
        };
        let uri = if let Some(rest) = s.strip_prefix("gs://") {
            let (bucket, key) = split(rest)?;
            TransferUri::Gcs(bucket, key)
        } else if let Some(rest) = s.strip_prefix("s3://") {
            let (bucket, key) = split(rest)?;
            TransferUri::S3(bucket, key)
        } else {
            TransferUri::Local(PathBuf::from(s))
        };
        Ok(uri)
    }
}

fn invalid_arg(message: &str) -> ! {
    Args::command()
        .error(clap::error::ErrorKind::InvalidValue, message)
        .exit()
}

fn progress_reporter(enabled: bool) -> Option<ProgressReporter> {
    enabled.then(|| {
        ProgressReporter::new(|done, total| {
            eprintln!("{done}/{total} bytes");
        })
    })
}

async fn do_gcs_upload(
    client: &boto_transfer::Client,
    args: &Args,
    path: &PathBuf,
    key: ObjectKey,
) -> Result<u64, BoxError> {
    let mut handler = client.resumable_upload();
    if let Some(tracker) = &args.tracker {
        handler = handler.tracker_file(tracker);
    }
    let progress = progress_reporter(args.progress);
    let output = handler
        .send(
            &key,
            &InputSource::from_path(path),
            &http::HeaderMap::new(),
            progress.as_ref(),
        )
        .await?;
    println!("uploaded {key} (etag {})", output.e_tag());
    Ok(tokio::fs::metadata(path).await?.len())
}

async fn do_gcs_download(
    client: &boto_transfer::Client,
    args: &Args,
    key: ObjectKey,
    path: &PathBuf,
) -> Result<u64, BoxError> {
    let object = client.http_object(key.uri().parse()?);
    let mut handler = client.resumable_download();
    if let Some(tracker) = &args.tracker {
        handler = handler.tracker_file(tracker);
    }
    let progress = progress_reporter(args.progress);
    let output = handler.get(&object, path, progress.as_ref()).await?;
    Ok(output.size())
}

async fn do_s3_upload(
    client: &boto_transfer::Client,
    args: &Args,
    path: &PathBuf,
    bucket: &str,
    key: &str,
) -> Result<u64, BoxError> {
    let mut uploader = client.concurrent_upload()?;
    if let Some(progress) = progress_reporter(args.progress) {
        uploader = uploader.progress(progress);
    }
    let completed = uploader
        .upload(path, InitiateMultipartUpload::new(bucket, key))
        .await?;
    println!(
        "uploaded s3://{bucket}/{key} in {} parts (etag {})",
        completed.parts(),
        completed.e_tag()
    );
    Ok(tokio::fs::metadata(path).await?.len())
}

async fn do_s3_download(
    client: &boto_transfer::Client,
    args: &Args,
    bucket: &str,
    key: &str,
    path: &PathBuf,
) -> Result<u64, BoxError> {
    let mut downloader = client.download();
    if let Some(progress) = progress_reporter(args.progress) {
        downloader = downloader.progress(progress);
    }
    let output = downloader.download(client.s3_object(bucket, key)?, path).await?;
    Ok(output.size())
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_thread_ids(true)
        .init();

    let args = Args::parse();
    let config = ConfigLoader::default()
        .concurrency(ConcurrencySetting::Explicit(args.concurrency))
        .part_size(PartSize::Target(args.part_size))
        .multipart_part_size(PartSize::Target(args.part_size))
        .load()
        .await;
    let client = boto_transfer::Client::new(config);

    let start = time::Instant::now();
    let result = match (&args.source, &args.dest) {
        (TransferUri::Local(path), TransferUri::Gcs(bucket, key)) => {
            let key = ObjectKey::new(bucket, key).with_endpoint(&args.endpoint);
            do_gcs_upload(&client, &args, path, key).await
        }
        (TransferUri::Gcs(bucket, key), TransferUri::Local(path)) => {
            let key = ObjectKey::new(bucket, key).with_endpoint(&args.endpoint);
            do_gcs_download(&client, &args, key, path).await
        }
        (TransferUri::Local(path), TransferUri::S3(bucket, key)) => {
            do_s3_upload(&client, &args, path, bucket, key).await
        }
        (TransferUri::S3(bucket, key), TransferUri::Local(path)) => {
            do_s3_download(&client, &args, bucket, key, path).await
        }
        _ => invalid_arg("exactly one of source and destination must be a local path"),
    };

    let size_bytes = match result {
        Ok(size_bytes) => size_bytes,
        Err(err) => {
            eprintln!("transfer failed: {}", DisplayErrorContext(err.as_ref()));
            std::process::exit(1);
        }
    };
    let elapsed = start.elapsed();
    let transfer_size_mb = size_bytes as f64 / ONE_MEGABYTE as f64;
    println!(
        "copied {size_bytes} bytes ({transfer_size_mb:.3} MB) in {elapsed:?} ({:.3} MB/s)",
        transfer_size_mb / elapsed.as_secs_f64()
    );
    Ok(())
}
