/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use aws_smithy_async::rt::sleep::{AsyncSleep, SharedAsyncSleep, Sleep};

use crate::error::{self, Disposition, Error};
use crate::types::ChunkRetryConfig;

/// Largest exponent used for the progress-less backoff
const MAX_BACKOFF_EXPONENT: usize = 20;

/// A transfer that can be attempted repeatedly, each attempt picking up from the progress the
/// previous ones made.
#[async_trait]
pub(crate) trait Resumable: Send {
    type Output: Send;

    /// Bytes durably transferred so far, as last observed
    fn bytes_confirmed(&self) -> u64;

    /// Run one attempt
    async fn attempt(&mut self) -> Result<Self::Output, Error>;

    /// Forget any persisted resumption state, called when the transfer can never be resumed
    async fn discard(&mut self);
}

/// Retry budget of a resumable transfer.
///
/// The budget is spent only by attempts that fail without moving the confirmed byte count
/// forward, so a slow but progressing transfer is never cut off.
#[derive(Debug)]
pub(crate) struct ProgressRetry {
    num_retries: usize,
    attempt_count: usize,
    progress_less_iterations: usize,
    sleep_impl: SharedAsyncSleep,
}

impl ProgressRetry {
    pub(crate) fn new(num_retries: usize, sleep_impl: SharedAsyncSleep) -> Self {
        Self {
            num_retries,
            attempt_count: 0,
            progress_less_iterations: 0,
            sleep_impl,
        }
    }

    /// Attempts made so far
    pub(crate) fn attempts(&self) -> usize {
        self.attempt_count
    }

    /// Account for a retryable failure and compute the delay before the next attempt.
    fn on_retryable_failure(&mut self, before: u64, after: u64) -> Result<Duration, Error> {
        if after > before {
            self.progress_less_iterations = 0;
        } else {
            self.progress_less_iterations += 1;
        }

        if self.progress_less_iterations > self.num_retries {
            return Err(error::resumable(
                Disposition::AbortCurrentProcess,
                format!(
                    "too many resumable transfer attempts failed without progress ({} attempts)",
                    self.attempt_count
                ),
            ));
        }

        let exponent = self.progress_less_iterations.min(MAX_BACKOFF_EXPONENT) as i32;
        Ok(Duration::from_secs_f64(fastrand::f64() * 2f64.powi(exponent)))
    }
}

/// Drive `resumable` to completion, retrying transient failures with randomized exponential
/// backoff until the progress-less retry budget runs out.
pub(crate) async fn orchestrate<R>(
    retry: &mut ProgressRetry,
    resumable: &mut R,
) -> Result<R::Output, Error>
where
    R: Resumable,
{
    loop {
        let before = resumable.bytes_confirmed();
        retry.attempt_count += 1;
        let err = match resumable.attempt().await {
            Ok(output) => return Ok(output),
            Err(err) => err,
        };

        match err.disposition() {
            Some(Disposition::AbortCurrentProcess) => {
                tracing::debug!("giving up in this process, tracker retained: {err}");
                return Err(err);
            }
            Some(Disposition::Abort) => {
                tracing::error!("aborting transfer: {err}");
                resumable.discard().await;
                return Err(err);
            }
            Some(disposition @ (Disposition::StartOver | Disposition::WaitBeforeRetry)) => {
                let after = resumable.bytes_confirmed();
                let delay = retry.on_retryable_failure(before, after).inspect_err(|_| {
                    tracing::debug!("last failure before giving up: {err}");
                })?;
                tracing::debug!(
                    attempt = retry.attempt_count,
                    progress_less = retry.progress_less_iterations,
                    "{disposition:?} after failure ({err}); confirmed {before} -> {after}, sleeping {delay:?}"
                );
                retry.sleep_impl.sleep(delay).await;
            }
            None => return Err(err),
        }
    }
}

/// Decides whether a failed chunk is worth retrying
pub(crate) type RetryClassifier = Arc<dyn Fn(&Error) -> bool + Send + Sync>;

/// Fixed-count, fixed-delay `tower::retry::Policy` for individual download chunks and
/// multipart parts.
#[derive(Clone)]
pub(crate) struct ChunkRetryPolicy {
    /// retries left; the first attempt is not counted
    remaining_attempts: usize,
    delay: Duration,
    sleep_impl: SharedAsyncSleep,
    classifier: RetryClassifier,
}

impl ChunkRetryPolicy {
    pub(crate) fn new(config: &ChunkRetryConfig, sleep_impl: SharedAsyncSleep) -> Self {
        Self {
            remaining_attempts: config.max_attempts().saturating_sub(1),
            delay: config.delay(),
            sleep_impl,
            classifier: Arc::new(Error::is_retryable),
        }
    }

    /// Retry only errors matching `classifier`
    pub(crate) fn with_classifier(mut self, classifier: RetryClassifier) -> Self {
        self.classifier = classifier;
        self
    }
}

impl fmt::Debug for ChunkRetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkRetryPolicy")
            .field("remaining_attempts", &self.remaining_attempts)
            .field("delay", &self.delay)
            .finish_non_exhaustive()
    }
}

impl<Req, Res> tower::retry::Policy<Req, Res, Error> for ChunkRetryPolicy
where
    Req: Clone,
{
    type Future = Sleep;

    fn retry(&mut self, _req: &mut Req, result: &mut Result<Res, Error>) -> Option<Self::Future> {
        let err = result.as_ref().err()?;
        if !(self.classifier)(err) || self.remaining_attempts == 0 {
            return None;
        }
        self.remaining_attempts -= 1;
        tracing::debug!(
            remaining = self.remaining_attempts,
            "retrying chunk in {:?} after: {err}",
            self.delay
        );
        Some(self.sleep_impl.sleep(self.delay))
    }

    fn clone_request(&mut self, req: &Req) -> Option<Req> {
        Some(req.clone())
    }
}
