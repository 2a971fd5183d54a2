/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use aws_smithy_async::rt::sleep::SharedAsyncSleep;
use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tower::{service_fn, Service, ServiceBuilder, ServiceExt};
use tracing::Instrument;

use super::{
    CompletedUpload, InitiateMultipartUpload, MultipartUpload, MultipartUploadCoordinator,
    UploadedPart, MAX_PART_NUMBER,
};
use crate::config::MIN_MULTIPART_PART_SIZE_BYTES;
use crate::error::{self, ChunkId, Error, ErrorKind};
use crate::io::ProgressReporter;
use crate::middleware::retry::ChunkRetryPolicy;
use crate::types::{ChunkRetryConfig, FailedMultipartUploadPolicy};

/// A slice of the local file uploaded as one part
#[derive(Debug, Clone, Copy)]
struct FilePart {
    part_number: i32,
    offset: u64,
    len: u64,
}

/// Request/input type for our "upload_part" service.
#[derive(Debug, Clone)]
struct UploadPartRequest {
    coordinator: MultipartUploadCoordinator,
    upload: Arc<MultipartUpload>,
    part_number: i32,
    data: Bytes,
}

/// handler (service fn) for a single part
async fn upload_part_handler(request: UploadPartRequest) -> Result<UploadedPart, Error> {
    request
        .coordinator
        .upload_part(&request.upload, request.part_number, request.data)
        .await
}

/// Create a new tower::Service for uploading individual parts
fn upload_part_service(
    retry: &ChunkRetryConfig,
    sleep_impl: SharedAsyncSleep,
) -> impl Service<UploadPartRequest, Response = UploadedPart, Error = Error, Future: Send>
       + Clone
       + Send {
    let svc = service_fn(upload_part_handler);
    ServiceBuilder::new()
        .retry(ChunkRetryPolicy::new(retry, sleep_impl))
        .service(svc)
}

/// Uploads a local file to S3 as concurrently uploaded multipart parts.
#[derive(Debug, Clone)]
pub struct ConcurrentUploader {
    coordinator: MultipartUploadCoordinator,
    part_size: u64,
    concurrency: usize,
    chunk_retry: ChunkRetryConfig,
    failure_policy: FailedMultipartUploadPolicy,
    progress: Option<ProgressReporter>,
}

impl ConcurrentUploader {
    pub(crate) fn new(coordinator: MultipartUploadCoordinator) -> Self {
        let handle = coordinator.handle();
        Self {
            part_size: handle.upload_part_size_bytes(),
            concurrency: handle.num_workers(),
            chunk_retry: *handle.config.chunk_retry(),
            failure_policy: FailedMultipartUploadPolicy::default(),
            progress: None,
            coordinator,
        }
    }

    /// Size of every part but the last; must be at least 5 MiB
    pub fn part_size(mut self, part_size: u64) -> Self {
        self.part_size = part_size;
        self
    }

    /// Number of worker tasks uploading parts
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Retry behavior of individual parts
    pub fn chunk_retry(mut self, chunk_retry: ChunkRetryConfig) -> Self {
        self.chunk_retry = chunk_retry;
        self
    }

    /// What happens to the multipart upload when the transfer fails
    pub fn failed_multipart_upload_policy(mut self, policy: FailedMultipartUploadPolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Report progress as parts are stored
    pub fn progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Upload the file at `path` as described by `request`.
    #[tracing::instrument(skip_all, level = "debug", name = "concurrent-upload")]
    pub async fn upload(
        &self,
        path: impl AsRef<Path>,
        request: InitiateMultipartUpload,
    ) -> Result<CompletedUpload, Error> {
        let metrics = &self.coordinator.handle().metrics;
        metrics.increment_initiated();
        let result = self.upload_inner(path.as_ref(), request).await;
        let bytes = match &result {
            Ok((_, size)) => *size,
            Err(_) => 0,
        };
        metrics.record_outcome(&result, bytes);
        result.map(|(completed, _)| completed)
    }

    async fn upload_inner(
        &self,
        path: &Path,
        request: InitiateMultipartUpload,
    ) -> Result<(CompletedUpload, u64), Error> {
        if self.part_size < MIN_MULTIPART_PART_SIZE_BYTES {
            return Err(error::invalid_input(format!(
                "part size {} is below the {MIN_MULTIPART_PART_SIZE_BYTES} byte minimum",
                self.part_size
            )));
        }
        let size = tokio::fs::metadata(path).await?.len();
        let parts = file_parts(size, self.part_size)?;

        let upload = Arc::new(self.coordinator.initiate(request).await?);
        tracing::debug!(
            "uploading {size} bytes in {} parts to upload {}",
            parts.len(),
            upload.upload_id()
        );

        let uploaded = match self.upload_parts(path, &upload, parts, size).await {
            Ok(uploaded) => uploaded,
            Err(err) => return Err(self.fail(&upload, err).await),
        };
        match self.coordinator.complete(&upload, uploaded).await {
            Ok(completed) => Ok((completed, size)),
            Err(err) => Err(self.fail(&upload, err).await),
        }
    }

    async fn upload_parts(
        &self,
        path: &Path,
        upload: &Arc<MultipartUpload>,
        parts: Vec<FilePart>,
        size: u64,
    ) -> Result<Vec<UploadedPart>, Error> {
        let total_parts = parts.len();
        let (work_tx, work_rx) = async_channel::unbounded();
        for part in parts {
            // the receiver is alive, so sending to an unbounded channel cannot fail
            let _ = work_tx.try_send(part);
        }
        work_tx.close();

        let num_workers = self.concurrency.min(total_parts);
        let cancel = CancellationToken::new();
        let svc = upload_part_service(
            &self.chunk_retry,
            self.coordinator.handle().config.sleep_impl().clone(),
        );
        let (comp_tx, mut comp_rx) = mpsc::channel(num_workers);
        let mut tasks = JoinSet::new();
        for worker_id in 0..num_workers {
            let ctx = WorkerContext {
                path: path.to_path_buf(),
                coordinator: self.coordinator.clone(),
                upload: upload.clone(),
                cancel: cancel.clone(),
            };
            let worker = upload_worker(svc.clone(), ctx, work_rx.clone(), comp_tx.clone());
            tasks.spawn(worker.instrument(tracing::debug_span!("upload-worker", worker_id)));
        }
        drop(comp_tx);
        drop(work_rx);

        let mut progress = self.progress.as_ref().map(|p| {
            p.tracker(size, usize::try_from(self.part_size).unwrap_or(usize::MAX))
        });
        if let Some(progress) = progress.as_mut() {
            progress.start(0);
        }

        let mut uploaded = Vec::with_capacity(total_parts);
        let mut sent = 0u64;
        while uploaded.len() < total_parts {
            let result = match comp_rx.recv().await {
                Some(result) => result,
                None => Err(Error::new(
                    ErrorKind::RuntimeError,
                    "upload workers exited before every part was stored",
                )),
            };
            match result {
                Ok((part, len)) => {
                    sent += len;
                    uploaded.push(part);
                    if let Some(progress) = progress.as_mut() {
                        progress.on_buffer(sent);
                    }
                }
                Err(err) => {
                    cancel.cancel();
                    comp_rx.close();
                    while tasks.join_next().await.is_some() {}
                    return Err(err);
                }
            }
        }

        while let Some(join_result) = tasks.join_next().await {
            join_result?;
        }
        if let Some(progress) = progress.as_mut() {
            progress.finish(sent);
        }
        Ok(uploaded)
    }

    /// Apply the failure policy to `upload` and hand back the error that caused the failure
    async fn fail(&self, upload: &MultipartUpload, err: Error) -> Error {
        tracing::error!("multipart upload {} failed: {err}", upload.upload_id());
        if self.failure_policy == FailedMultipartUploadPolicy::AbortUpload {
            if let Err(abort_err) = self.coordinator.abort(upload).await {
                tracing::warn!(
                    "failed to abort multipart upload {}: {abort_err}",
                    upload.upload_id()
                );
            }
        }
        err
    }
}

/// Split `size` bytes into parts; an empty file is uploaded as a single empty part.
fn file_parts(size: u64, part_size: u64) -> Result<Vec<FilePart>, Error> {
    let count = size.div_ceil(part_size).max(1);
    if count > MAX_PART_NUMBER as u64 {
        return Err(error::invalid_input(format!(
            "{size} bytes need {count} parts of {part_size} bytes, more than {MAX_PART_NUMBER}"
        )));
    }
    Ok((0..count)
        .map(|i| {
            let offset = i * part_size;
            FilePart {
                part_number: i as i32 + 1,
                offset,
                len: part_size.min(size - offset),
            }
        })
        .collect())
}

#[derive(Debug)]
struct WorkerContext {
    path: PathBuf,
    coordinator: MultipartUploadCoordinator,
    upload: Arc<MultipartUpload>,
    cancel: CancellationToken,
}

async fn read_part(file: &mut File, part: &FilePart) -> Result<Bytes, Error> {
    file.seek(SeekFrom::Start(part.offset)).await?;
    let mut buf = vec![0; part.len as usize];
    file.read_exact(&mut buf).await?;
    Ok(Bytes::from(buf))
}

/// Worker loop: each worker reads parts through its own file handle.
async fn upload_worker<S>(
    svc: S,
    ctx: WorkerContext,
    work_rx: async_channel::Receiver<FilePart>,
    comp_tx: mpsc::Sender<Result<(UploadedPart, u64), Error>>,
) where
    S: Service<UploadPartRequest, Response = UploadedPart, Error = Error, Future: Send> + Clone + Send,
{
    let mut file = match File::open(&ctx.path).await {
        Ok(file) => file,
        Err(err) => {
            let _ = comp_tx.send(Err(err.into())).await;
            return;
        }
    };

    loop {
        let part = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => break,
            part = work_rx.recv() => match part {
                Ok(part) => part,
                Err(_) => break,
            },
        };

        let id = ChunkId::Upload(part.part_number);
        let result = match read_part(&mut file, &part).await {
            Ok(data) => {
                let req = UploadPartRequest {
                    coordinator: ctx.coordinator.clone(),
                    upload: ctx.upload.clone(),
                    part_number: part.part_number,
                    data,
                };
                let upload = svc.clone().oneshot(req).instrument(tracing::debug_span!(
                    "upload-part",
                    part_number = part.part_number
                ));
                tokio::select! {
                    biased;
                    _ = ctx.cancel.cancelled() => break,
                    result = upload => result,
                }
            }
            Err(err) => Err(err),
        }
        .map(|uploaded| (uploaded, part.len))
        .map_err(|err| error::chunk_failed(id, err));

        let failed = result.is_err();
        if comp_tx.send(result).await.is_err() || failed {
            break;
        }
    }
}
