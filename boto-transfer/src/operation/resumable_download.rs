/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::client::Handle;
use crate::error::{self, Disposition, Error};
use crate::http::header::ByteRange;
use crate::io::{InputSource, ProgressReporter, TrackerFile};
use crate::middleware::retry::{orchestrate, ProgressRetry, Resumable};
use crate::operation::download::source::RangeSource;
use crate::operation::download::DownloadOutput;

/// Downloads an object sequentially into a local file, resuming from the length of the file.
///
/// With a tracker file the object's ETag is persisted, and a later handler only resumes a
/// partial file when the object still has the same ETag.
#[derive(Debug)]
pub struct ResumableDownloadHandler {
    handle: Arc<Handle>,
    tracker: Option<TrackerFile>,
    num_retries: usize,
}

impl ResumableDownloadHandler {
    pub(crate) fn new(handle: Arc<Handle>) -> Self {
        let num_retries = handle.config.num_retries();
        Self {
            handle,
            tracker: None,
            num_retries,
        }
    }

    /// Persist the object's ETag to `path` so a partial download can be resumed later.
    pub fn tracker_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.tracker = Some(TrackerFile::new(path));
        self
    }

    /// Number of consecutive attempts without progress tolerated before giving up.
    pub fn num_retries(mut self, num_retries: usize) -> Self {
        self.num_retries = num_retries;
        self
    }

    /// Download `source` into `destination`.
    #[tracing::instrument(skip_all, level = "debug", name = "resumable-download")]
    pub async fn get(
        &mut self,
        source: &dyn RangeSource,
        destination: impl AsRef<Path>,
        progress: Option<&ProgressReporter>,
    ) -> Result<DownloadOutput, Error> {
        let metrics = &self.handle.metrics;
        metrics.increment_initiated();
        let result = self.get_inner(source, destination.as_ref(), progress).await;
        let fetched = match &result {
            Ok((_, fetched)) => *fetched,
            Err(_) => 0,
        };
        metrics.record_outcome(&result, fetched);
        result.map(|(output, _)| output)
    }

    async fn get_inner(
        &self,
        source: &dyn RangeSource,
        destination: &Path,
        progress: Option<&ProgressReporter>,
    ) -> Result<(DownloadOutput, u64), Error> {
        let meta = source.object_meta().await?;
        let total = meta.size();
        let e_tag = meta.e_tag().map(str::to_owned);

        if total == 0 {
            File::create(destination).await?;
            self.remove_tracker().await;
            return Ok((
                DownloadOutput {
                    size: 0,
                    parts: 0,
                    e_tag,
                },
                0,
            ));
        }

        let local_len = self.resume_point(destination, total, e_tag.as_deref()).await?;
        let mut retry = ProgressRetry::new(self.num_retries, self.handle.config.sleep_impl().clone());
        let mut attempt = DownloadAttempt {
            source,
            destination,
            tracker: self.tracker.as_ref(),
            buffer_size: self.handle.config.buffer_size(),
            progress,
            total,
            local_len,
            requests: 0,
        };
        orchestrate(&mut retry, &mut attempt).await?;
        let requests = attempt.requests;
        tracing::debug!(
            attempts = retry.attempts(),
            "download complete, resumed from byte {local_len}"
        );

        self.remove_tracker().await;
        if let Some(expected) = e_tag.as_deref().and_then(plain_md5) {
            let actual = InputSource::from_path(destination).md5_hex().await?;
            if actual != expected {
                tracing::error!("MD5 of downloaded file {actual} does not match ETag {expected}");
                if let Err(err) = tokio::fs::remove_file(destination).await {
                    tracing::warn!("failed to remove corrupt download: {err}");
                }
                return Err(error::resumable(
                    Disposition::Abort,
                    format!("MD5 signature doesn't match ETag ({actual} vs {expected})"),
                ));
            }
        }

        Ok((
            DownloadOutput {
                size: total,
                parts: requests,
                e_tag,
            },
            total - local_len,
        ))
    }

    /// Decide where to start: the length of the local file when the tracker matches the
    /// object, otherwise 0 with the file truncated and the tracker rewritten.
    async fn resume_point(
        &self,
        destination: &Path,
        total: u64,
        e_tag: Option<&str>,
    ) -> Result<u64, Error> {
        if let (Some(tracker), Some(e_tag)) = (&self.tracker, e_tag) {
            if tracker.load().await.as_deref() == Some(e_tag) {
                match tokio::fs::metadata(destination).await {
                    Ok(local) if local.len() <= total => {
                        tracing::debug!("resuming download at byte {}", local.len());
                        return Ok(local.len());
                    }
                    Ok(local) => tracing::warn!(
                        "local file is larger ({}) than the object ({total}), restarting download",
                        local.len()
                    ),
                    Err(_) => {}
                }
            }
        }

        File::create(destination).await?;
        if let (Some(tracker), Some(e_tag)) = (&self.tracker, e_tag) {
            tracker.save(e_tag).await?;
        }
        Ok(0)
    }

    async fn remove_tracker(&self) {
        if let Some(tracker) = &self.tracker {
            tracker.remove().await;
        }
    }
}

/// The ETag as a lowercase MD5 hex digest, when it is one (multipart ETags are not)
fn plain_md5(e_tag: &str) -> Option<String> {
    let digest = e_tag.trim_matches('"');
    (digest.len() == 32 && digest.bytes().all(|b| b.is_ascii_hexdigit()))
        .then(|| digest.to_ascii_lowercase())
}

struct DownloadAttempt<'a> {
    source: &'a dyn RangeSource,
    destination: &'a Path,
    tracker: Option<&'a TrackerFile>,
    buffer_size: usize,
    progress: Option<&'a ProgressReporter>,
    total: u64,
    local_len: u64,
    requests: u64,
}

#[async_trait]
impl Resumable for DownloadAttempt<'_> {
    type Output = ();

    fn bytes_confirmed(&self) -> u64 {
        self.local_len
    }

    async fn attempt(&mut self) -> Result<(), Error> {
        let mut file = OpenOptions::new()
            .append(true)
            .open(self.destination)
            .await?;
        self.local_len = file.metadata().await?.len();
        if self.local_len == self.total {
            return Ok(());
        }

        let mut progress = self
            .progress
            .map(|p| p.tracker(self.total, self.buffer_size));
        if let Some(progress) = progress.as_mut() {
            progress.start(self.local_len);
        }

        self.requests += 1;
        let mut body = self
            .source
            .get_range(ByteRange::AllFrom(self.local_len))
            .await?;
        let written = async {
            while let Some(chunk) = body.next().await {
                let chunk = chunk.map_err(error::transport)?;
                if self.local_len + chunk.len() as u64 > self.total {
                    return Err(error::resumable(
                        Disposition::Abort,
                        "received more bytes than the object size",
                    ));
                }
                file.write_all(&chunk).await?;
                self.local_len += chunk.len() as u64;
                if let Some(progress) = progress.as_mut() {
                    progress.on_buffer(self.local_len);
                }
            }
            Ok(())
        }
        .await;
        file.flush().await?;
        written?;

        if self.local_len < self.total {
            return Err(error::transport(format!(
                "connection closed after {} of {} bytes",
                self.local_len, self.total
            )));
        }
        if let Some(progress) = progress.as_mut() {
            progress.finish(self.local_len);
        }
        Ok(())
    }

    async fn discard(&mut self) {
        if let Some(tracker) = self.tracker {
            tracker.remove().await;
        }
    }
}
