/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::cmp;
use std::sync::Arc;

use aws_smithy_async::rt::sleep::{SharedAsyncSleep, TokioSleep};

use crate::http::{Connection, ReqwestConnection, SharedConnection};
use crate::metrics::unit::ByteUnit;
use crate::types::{ChunkRetryConfig, ConcurrencySetting, PartSize, StaleSessionPolicy};

pub mod loader;

/// Minimum upload part size in bytes
pub(crate) const MIN_MULTIPART_PART_SIZE_BYTES: u64 = 5 * ByteUnit::Mebibyte.as_bytes_u64();

/// Default number of progress-less retries for resumable transfers
pub(crate) const DEFAULT_NUM_RETRIES: usize = 5;

/// Default size of the buffer used to stream resumable uploads
pub(crate) const DEFAULT_BUFFER_SIZE: usize = 8 * ByteUnit::Kibibyte.as_bytes_usize();

/// Configuration for a [`Client`](crate::client::Client)
#[derive(Debug, Clone)]
pub struct Config {
    connection: SharedConnection,
    s3_client: Option<aws_sdk_s3::Client>,
    num_retries: usize,
    buffer_size: usize,
    part_size: PartSize,
    multipart_part_size: PartSize,
    concurrency: ConcurrencySetting,
    chunk_retry: ChunkRetryConfig,
    stale_session_policy: StaleSessionPolicy,
    sleep_impl: SharedAsyncSleep,
}

impl Config {
    /// Create a new `Config` builder
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// The connection used for plain HTTP transfers (resumable uploads, ranged GETs)
    pub fn connection(&self) -> &SharedConnection {
        &self.connection
    }

    /// The Amazon S3 client used for multipart uploads and S3 sourced downloads, if any
    pub fn s3_client(&self) -> Option<&aws_sdk_s3::Client> {
        self.s3_client.as_ref()
    }

    /// Number of consecutive attempts without progress a resumable transfer tolerates
    pub fn num_retries(&self) -> usize {
        self.num_retries
    }

    /// Size of each buffer streamed by a resumable upload
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Target part size for concurrent ranged downloads
    pub fn part_size(&self) -> &PartSize {
        &self.part_size
    }

    /// Target part size for multipart uploads
    pub fn multipart_part_size(&self) -> &PartSize {
        &self.multipart_part_size
    }

    /// Returns the concurrency setting to use for individual transfer operations.
    pub fn concurrency(&self) -> &ConcurrencySetting {
        &self.concurrency
    }

    /// Retry settings for download chunks and multipart parts
    pub fn chunk_retry(&self) -> &ChunkRetryConfig {
        &self.chunk_retry
    }

    /// How resumable uploads treat a persisted session that is no longer usable
    pub fn stale_session_policy(&self) -> StaleSessionPolicy {
        self.stale_session_policy
    }

    /// The sleep implementation used for backoff delays
    pub fn sleep_impl(&self) -> &SharedAsyncSleep {
        &self.sleep_impl
    }
}

/// Fluent style builder for [Config]
#[derive(Debug, Clone, Default)]
pub struct Builder {
    connection: Option<SharedConnection>,
    s3_client: Option<aws_sdk_s3::Client>,
    num_retries: Option<usize>,
    buffer_size: Option<usize>,
    part_size: PartSize,
    multipart_part_size: PartSize,
    concurrency: ConcurrencySetting,
    chunk_retry: ChunkRetryConfig,
    stale_session_policy: StaleSessionPolicy,
    sleep_impl: Option<SharedAsyncSleep>,
}

impl Builder {
    /// Set the connection used for plain HTTP transfers.
    ///
    /// Default is a [`ReqwestConnection`].
    pub fn connection(mut self, connection: impl Connection + 'static) -> Self {
        self.connection = Some(Arc::new(connection));
        self
    }

    /// Set an already shared connection.
    pub fn shared_connection(mut self, connection: SharedConnection) -> Self {
        self.connection = Some(connection);
        self
    }

    /// Set an explicit S3 client to use.
    pub fn s3_client(mut self, client: aws_sdk_s3::Client) -> Self {
        self.s3_client = Some(client);
        self
    }

    /// Number of consecutive attempts without progress a resumable transfer tolerates
    /// before giving up in the current process. Default is 5.
    pub fn num_retries(mut self, num_retries: usize) -> Self {
        self.num_retries = Some(num_retries);
        self
    }

    /// Size of each buffer streamed by a resumable upload. Default is 8 KiB.
    ///
    /// A zero size is replaced by the default.
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = Some(buffer_size).filter(|size| *size > 0);
        self
    }

    /// The size of each byte range fetched by a concurrent download.
    ///
    /// Default is [PartSize::Auto] (4 MiB).
    pub fn part_size(mut self, part_size: PartSize) -> Self {
        self.part_size = part_size;
        self
    }

    /// The target size of each part of a multipart upload.
    ///
    /// The minimum part size is 5 MiB, any part size less than that will be rounded up.
    /// Default is [PartSize::Auto] (10 MiB).
    pub fn multipart_part_size(self, part_size: PartSize) -> Self {
        let part_size = match part_size {
            PartSize::Target(part_size) => {
                PartSize::Target(cmp::max(part_size, MIN_MULTIPART_PART_SIZE_BYTES))
            }
            tps => tps,
        };

        self.set_multipart_part_size(part_size)
    }

    /// Target part size for a multipart upload.
    ///
    /// NOTE: This does not validate the setting and is meant for internal use only.
    pub(crate) fn set_multipart_part_size(mut self, part_size: PartSize) -> Self {
        self.multipart_part_size = part_size;
        self
    }

    /// Set the number of workers a concurrent transfer may use.
    ///
    /// Default is [ConcurrencySetting::Auto].
    pub fn concurrency(mut self, concurrency: ConcurrencySetting) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Retry settings for individual download chunks and multipart parts.
    pub fn chunk_retry(mut self, chunk_retry: ChunkRetryConfig) -> Self {
        self.chunk_retry = chunk_retry;
        self
    }

    /// How resumable uploads treat a persisted session that is no longer usable.
    pub fn stale_session_policy(mut self, policy: StaleSessionPolicy) -> Self {
        self.stale_session_policy = policy;
        self
    }

    /// The sleep implementation used for backoff delays. Default is [`TokioSleep`].
    pub fn sleep_impl(mut self, sleep_impl: SharedAsyncSleep) -> Self {
        self.sleep_impl = Some(sleep_impl);
        self
    }

    /// Consumes the builder and constructs a [`Config`](crate::config::Config)
    pub fn build(self) -> Config {
        Config {
            connection: self
                .connection
                .unwrap_or_else(|| Arc::new(ReqwestConnection::default())),
            s3_client: self.s3_client,
            num_retries: self.num_retries.unwrap_or(DEFAULT_NUM_RETRIES),
            buffer_size: self.buffer_size.unwrap_or(DEFAULT_BUFFER_SIZE),
            part_size: self.part_size,
            multipart_part_size: self.multipart_part_size,
            concurrency: self.concurrency,
            chunk_retry: self.chunk_retry,
            stale_session_policy: self.stale_session_policy,
            sleep_impl: self
                .sleep_impl
                .unwrap_or_else(|| SharedAsyncSleep::new(TokioSleep::new())),
        }
    }
}
