/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */
use std::path::{Path, PathBuf};

use tempfile::TempPath;
use tokio::io::AsyncWriteExt;
use tower::{service_fn, Service, ServiceBuilder};
use tracing::Instrument;

use super::source::SharedRangeSource;
use crate::error;
use crate::http::header::ByteRange;
use crate::middleware::retry::{ChunkRetryPolicy, RetryClassifier};
use crate::types::ChunkRetryConfig;
use aws_smithy_async::rt::sleep::SharedAsyncSleep;

/// One byte range of the object, addressed by its 0-based index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct DownloadPart {
    pub(super) index: u64,
    /// first byte (inclusive)
    pub(super) start: u64,
    /// last byte (inclusive)
    pub(super) end: u64,
}

impl DownloadPart {
    /// Size of this part in bytes
    pub(super) fn size(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// Split `total` bytes into parts of `part_size`; the last part may be shorter.
pub(super) fn split_parts(total: u64, part_size: u64) -> impl Iterator<Item = DownloadPart> {
    let total_parts = total.div_ceil(part_size);
    (0..total_parts).map(move |index| {
        let start = index * part_size;
        DownloadPart {
            index,
            start,
            end: (start + part_size).min(total) - 1,
        }
    })
}

/// Request/input type for our "chunk" service.
#[derive(Debug, Clone)]
pub(super) struct ChunkRequest {
    pub(super) source: SharedRangeSource,
    pub(super) part: DownloadPart,
    /// directory the part is staged in
    pub(super) staging_dir: PathBuf,
}

/// A part fully written to its own temporary file.
///
/// The file is deleted when the value is dropped.
#[derive(Debug)]
pub(crate) struct StagedPart {
    pub(crate) index: u64,
    pub(crate) size: u64,
    pub(crate) path: TempPath,
}

async fn staging_file(dir: &Path, index: u64) -> Result<(tokio::fs::File, TempPath), error::Error> {
    let dir = dir.to_path_buf();
    let named = tokio::task::spawn_blocking(move || {
        tempfile::Builder::new()
            .prefix(&format!(".part-{index}-"))
            .tempfile_in(dir)
    })
    .await??;
    let (file, path) = named.into_parts();
    Ok((tokio::fs::File::from_std(file), path))
}

/// handler (service fn) for a single chunk
async fn download_chunk_handler(request: ChunkRequest) -> Result<StagedPart, error::Error> {
    let part = request.part;
    let (mut file, path) = staging_file(&request.staging_dir, part.index).await?;

    let mut body = request
        .source
        .get_range(ByteRange::Inclusive(part.start, part.end))
        .await?;

    let mut written = 0u64;
    async {
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(error::transport)?;
            written += chunk.len() as u64;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok::<_, error::Error>(())
    }
    .instrument(tracing::trace_span!("write-part", index = part.index))
    .await?;

    if written != part.size() {
        return Err(error::transport(format!(
            "part {} returned {written} bytes, expected {}",
            part.index,
            part.size()
        )));
    }
    tracing::trace!("staged part {} ({written} bytes) at {:?}", part.index, path);

    Ok(StagedPart {
        index: part.index,
        size: written,
        path,
    })
}

/// Create a new tower::Service for downloading individual parts of an object
pub(super) fn chunk_service(
    retry: &ChunkRetryConfig,
    classifier: Option<RetryClassifier>,
    sleep_impl: SharedAsyncSleep,
) -> impl Service<ChunkRequest, Response = StagedPart, Error = error::Error, Future: Send>
       + Clone
       + Send {
    let svc = service_fn(download_chunk_handler);
    let mut policy = ChunkRetryPolicy::new(retry, sleep_impl);
    if let Some(classifier) = classifier {
        policy = policy.with_classifier(classifier);
    }
    ServiceBuilder::new().retry(policy).service(svc)
}

#[cfg(test)]
mod tests {
    use super::{split_parts, DownloadPart};

    #[test]
    fn test_split_parts() {
        let parts: Vec<_> = split_parts(4_500_000, 1_000_000).collect();
        assert_eq!(5, parts.len());
        assert_eq!(
            DownloadPart {
                index: 4,
                start: 4_000_000,
                end: 4_499_999
            },
            parts[4]
        );
        assert_eq!(500_000, parts[4].size());
        assert!(parts.iter().take(4).all(|p| p.size() == 1_000_000));

        assert_eq!(0, split_parts(0, 10).count());
        let exact: Vec<_> = split_parts(20, 10).collect();
        assert_eq!(2, exact.len());
        assert_eq!(19, exact[1].end);
    }
}
