/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */
use std::path::PathBuf;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower::{Service, ServiceExt};
use tracing::Instrument;

use super::service::{ChunkRequest, DownloadPart, StagedPart};
use super::source::SharedRangeSource;
use crate::error::{self, ChunkId, Error};

/// Everything a download worker shares with its siblings
#[derive(Debug, Clone)]
pub(super) struct WorkerContext {
    pub(super) source: SharedRangeSource,
    pub(super) staging_dir: PathBuf,
    pub(super) cancel: CancellationToken,
}

/// Worker loop: pull parts off the work queue until it is closed and drained, the coordinator
/// cancels, or a part fails.
pub(super) async fn download_parts<S>(
    svc: S,
    ctx: WorkerContext,
    work_rx: async_channel::Receiver<DownloadPart>,
    comp_tx: mpsc::Sender<Result<StagedPart, Error>>,
) where
    S: Service<ChunkRequest, Response = StagedPart, Error = Error, Future: Send> + Clone + Send,
{
    loop {
        let part = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => {
                tracing::trace!("worker cancelled");
                break;
            }
            part = work_rx.recv() => match part {
                Ok(part) => part,
                // queue closed and drained
                Err(_) => break,
            },
        };

        let req = ChunkRequest {
            source: ctx.source.clone(),
            part,
            staging_dir: ctx.staging_dir.clone(),
        };
        let chunk = svc
            .clone()
            .oneshot(req)
            .instrument(tracing::debug_span!("download-chunk", index = part.index));
        // dropping an in-flight chunk deletes its staging file
        let result = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => break,
            result = chunk => {
                result.map_err(|err| error::chunk_failed(ChunkId::Download(part.index), err))
            }
        };

        let failed = result.is_err();
        if let Err(err) = comp_tx.send(result).await {
            tracing::debug!(error = ?err, "part result send failed, channel closed");
            break;
        }
        if failed {
            break;
        }
    }
    tracing::trace!("req channel closed, worker finished");
}
