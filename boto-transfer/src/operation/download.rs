/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

mod body;
mod output;
mod service;
/// Ranged object sources
pub mod source;
mod worker;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use self::body::Sequencer;
use self::service::{chunk_service, split_parts, StagedPart};
use self::source::{RangeSource, SharedRangeSource};
use self::worker::WorkerContext;
use crate::client::Handle;
use crate::error::{Error, ErrorKind};
use crate::io::progress::ProgressTracker;
use crate::io::ProgressReporter;
use crate::middleware::retry::RetryClassifier;
use crate::types::ChunkRetryConfig;

pub use self::output::DownloadOutput;

/// Downloads an object to a local file as concurrently fetched byte ranges.
///
/// Parts are staged in temporary files next to the destination and appended to it strictly in
/// order, so the destination only ever holds a prefix of the object. On failure every staged
/// part and the partial destination are removed.
#[derive(Clone)]
pub struct ConcurrentDownloader {
    handle: Arc<Handle>,
    part_size: u64,
    concurrency: usize,
    chunk_retry: ChunkRetryConfig,
    retry_classifier: Option<RetryClassifier>,
    progress: Option<ProgressReporter>,
}

impl fmt::Debug for ConcurrentDownloader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrentDownloader")
            .field("part_size", &self.part_size)
            .field("concurrency", &self.concurrency)
            .field("chunk_retry", &self.chunk_retry)
            .field("progress", &self.progress)
            .finish_non_exhaustive()
    }
}

impl ConcurrentDownloader {
    pub(crate) fn new(handle: Arc<Handle>) -> Self {
        Self {
            part_size: handle.download_part_size_bytes(),
            concurrency: handle.num_workers(),
            chunk_retry: *handle.config.chunk_retry(),
            retry_classifier: None,
            progress: None,
            handle,
        }
    }

    /// Size of each ranged request in bytes
    pub fn part_size(mut self, part_size: u64) -> Self {
        self.part_size = part_size.max(1);
        self
    }

    /// Number of worker tasks fetching parts
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Retry behavior of individual parts
    pub fn chunk_retry(mut self, chunk_retry: ChunkRetryConfig) -> Self {
        self.chunk_retry = chunk_retry;
        self
    }

    /// Decide which part failures are retried.
    ///
    /// Errors rejected by `classifier` fail the download on the first attempt without using the
    /// retry budget. By default every error with a retryable [`Error::disposition`] is retried.
    pub fn retry_classifier<F>(mut self, classifier: F) -> Self
    where
        F: Fn(&Error) -> bool + Send + Sync + 'static,
    {
        self.retry_classifier = Some(Arc::new(classifier));
        self
    }

    /// Report progress as parts are appended to the destination
    pub fn progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Download `source` into `destination`, replacing any existing file.
    #[tracing::instrument(skip_all, level = "debug", name = "concurrent-download")]
    pub async fn download<S>(
        &self,
        source: S,
        destination: impl AsRef<Path>,
    ) -> Result<DownloadOutput, Error>
    where
        S: RangeSource + 'static,
    {
        let metrics = &self.handle.metrics;
        metrics.increment_initiated();
        let result = self
            .download_inner(Arc::new(source), destination.as_ref())
            .await;
        let bytes = result.as_ref().map(DownloadOutput::size).unwrap_or(0);
        metrics.record_outcome(&result, bytes);
        result
    }

    async fn download_inner(
        &self,
        source: SharedRangeSource,
        destination: &Path,
    ) -> Result<DownloadOutput, Error> {
        let meta = source.object_meta().await?;
        let total = meta.size();
        let mut progress = self.progress.as_ref().map(|p| {
            p.tracker(
                total,
                usize::try_from(self.part_size).unwrap_or(usize::MAX),
            )
        });
        if let Some(progress) = progress.as_mut() {
            progress.start(0);
        }

        let mut file = File::create(destination).await?;
        if total == 0 {
            file.flush().await?;
            if let Some(progress) = progress.as_mut() {
                progress.finish(0);
            }
            return Ok(DownloadOutput {
                size: 0,
                parts: 0,
                e_tag: meta.e_tag().map(str::to_owned),
            });
        }

        let (work_tx, work_rx) = async_channel::unbounded();
        let mut total_parts = 0u64;
        for part in split_parts(total, self.part_size) {
            // the receiver is alive, so sending to an unbounded channel cannot fail
            let _ = work_tx.try_send(part);
            total_parts += 1;
        }
        work_tx.close();

        let num_workers = self.concurrency.min(total_parts as usize);
        tracing::debug!(
            "downloading {total} bytes in {total_parts} parts with {num_workers} workers"
        );

        let cancel = CancellationToken::new();
        let ctx = WorkerContext {
            source,
            staging_dir: staging_dir(destination),
            cancel: cancel.clone(),
        };
        let svc = chunk_service(
            &self.chunk_retry,
            self.retry_classifier.clone(),
            self.handle.config.sleep_impl().clone(),
        );
        let (comp_tx, mut comp_rx) = mpsc::channel(num_workers);
        let mut tasks = JoinSet::new();
        for worker_id in 0..num_workers {
            let worker =
                worker::download_parts(svc.clone(), ctx.clone(), work_rx.clone(), comp_tx.clone());
            tasks.spawn(worker.instrument(tracing::debug_span!("download-worker", worker_id)));
        }
        drop(comp_tx);
        drop(work_rx);

        let assembled = assemble(&mut file, &mut comp_rx, total_parts, progress.as_mut()).await;
        if let Err(err) = assembled {
            tracing::debug!("download failed, cleaning up: {err}");
            cancel.cancel();
            comp_rx.close();
            // drop staged parts that are already queued
            while comp_rx.recv().await.is_some() {}
            while tasks.join_next().await.is_some() {}
            drop(file);
            if let Err(remove_err) = tokio::fs::remove_file(destination).await {
                tracing::warn!(
                    "failed to remove partial download {}: {remove_err}",
                    destination.display()
                );
            }
            return Err(err);
        }

        file.flush().await?;
        while let Some(join_result) = tasks.join_next().await {
            join_result?;
        }
        if let Some(progress) = progress.as_mut() {
            progress.finish(total);
        }

        Ok(DownloadOutput {
            size: total,
            parts: total_parts,
            e_tag: meta.e_tag().map(str::to_owned),
        })
    }
}

/// Staging files live next to the destination so appending never crosses a filesystem
fn staging_dir(destination: &Path) -> PathBuf {
    match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Receive `total_parts` results and append them to `file` in part order.
async fn assemble(
    file: &mut File,
    comp_rx: &mut mpsc::Receiver<Result<StagedPart, Error>>,
    total_parts: u64,
    mut progress: Option<&mut ProgressTracker>,
) -> Result<(), Error> {
    let mut sequencer = Sequencer::new();
    let mut received = 0u64;
    let mut written = 0u64;

    while received < total_parts {
        let Some(result) = comp_rx.recv().await else {
            return Err(Error::new(
                ErrorKind::RuntimeError,
                "download workers exited before every part was fetched",
            ));
        };
        received += 1;
        sequencer.push(result?);

        while let Some(part) = sequencer.pop_next() {
            append_part(file, &part).await?;
            written += part.size;
            tracing::trace!(
                "appended part {} ({written} bytes written, {} parts pending)",
                part.index,
                sequencer.pending()
            );
            if let Some(progress) = progress.as_deref_mut() {
                progress.on_buffer(written);
            }
        }
    }
    Ok(())
}

async fn append_part(file: &mut File, part: &StagedPart) -> Result<(), Error> {
    let mut staged = File::open(&part.path).await?;
    tokio::io::copy(&mut staged, file).await?;
    Ok(())
}
