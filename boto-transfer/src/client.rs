/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::sync::Arc;

use crate::error::{self, Error};
use crate::http::Connection;
use crate::metrics::unit::ByteUnit;
use crate::metrics::TransferMetrics;
use crate::operation::download::source::{HttpObject, S3Object};
use crate::operation::download::ConcurrentDownloader;
use crate::operation::multipart_upload::{ConcurrentUploader, MultipartUploadCoordinator};
use crate::operation::resumable_download::ResumableDownloadHandler;
use crate::operation::resumable_upload::ResumableUploadHandler;
use crate::types::{ConcurrencySetting, PartSize};
use crate::{Config, DEFAULT_CONCURRENCY};

/// Transfer client.
///
/// Cheap to clone; every clone shares the same connection, configuration and metrics.
#[derive(Debug, Clone)]
pub struct Client {
    pub(crate) handle: Arc<Handle>,
}

/// Whatever is needed to carry out operations: config and metrics
#[derive(Debug)]
pub(crate) struct Handle {
    pub(crate) config: Config,
    pub(crate) metrics: TransferMetrics,
}

impl Handle {
    /// Get the concrete number of workers to use based on the concurrency setting.
    pub(crate) fn num_workers(&self) -> usize {
        match self.config.concurrency() {
            ConcurrencySetting::Explicit(concurrency) => (*concurrency).max(1),
            ConcurrencySetting::Auto => DEFAULT_CONCURRENCY,
        }
    }

    /// Get the concrete part size to use for concurrent downloads
    pub(crate) fn download_part_size_bytes(&self) -> u64 {
        match self.config.part_size() {
            PartSize::Auto => 4 * ByteUnit::Mebibyte.as_bytes_u64(),
            PartSize::Target(explicit) => (*explicit).max(1),
        }
    }

    /// Get the concrete target part size to use for multipart uploads
    pub(crate) fn upload_part_size_bytes(&self) -> u64 {
        match self.config.multipart_part_size() {
            PartSize::Auto => 10 * ByteUnit::Mebibyte.as_bytes_u64(),
            PartSize::Target(explicit) => *explicit,
        }
    }

    pub(crate) fn connection(&self) -> &dyn Connection {
        self.config.connection().as_ref()
    }

    pub(crate) fn s3_client(&self) -> Result<&aws_sdk_s3::Client, Error> {
        self.config
            .s3_client()
            .ok_or_else(|| error::invalid_input("no S3 client configured"))
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        tracing::debug!(
            "Client metrics summary - Transfers initiated: {}, completed: {}, failed: {}, total bytes: {}",
            self.metrics.transfers_initiated(),
            self.metrics.transfers_completed(),
            self.metrics.transfers_failed(),
            ByteUnit::display(self.metrics.total_bytes_transferred())
        );
    }
}

impl Client {
    /// Creates a new client from a transfer config.
    pub fn new(config: Config) -> Client {
        let handle = Arc::new(Handle {
            config,
            metrics: TransferMetrics::new(),
        });
        Client { handle }
    }

    /// Returns the client's configuration
    pub fn config(&self) -> &Config {
        &self.handle.config
    }

    /// Returns the client's metrics
    pub fn metrics(&self) -> &TransferMetrics {
        &self.handle.metrics
    }

    /// Upload an object through the Google Cloud Storage resumable upload protocol.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use boto_transfer::io::InputSource;
    /// use boto_transfer::types::ObjectKey;
    ///
    /// async fn upload(client: &boto_transfer::Client) -> Result<(), boto_transfer::error::Error> {
    ///     let mut handler = client
    ///         .resumable_upload()
    ///         .tracker_file("/tmp/my-object.tracker");
    ///     let output = handler
    ///         .send(
    ///             &ObjectKey::new("my-bucket", "my-object"),
    ///             &InputSource::from_path("my-object"),
    ///             &http::HeaderMap::new(),
    ///             None,
    ///         )
    ///         .await?;
    ///     println!("uploaded {}", output.e_tag());
    ///     Ok(())
    /// }
    /// ```
    pub fn resumable_upload(&self) -> ResumableUploadHandler {
        ResumableUploadHandler::new(self.handle.clone())
    }

    /// Download an object sequentially, resuming from the length of the local file.
    pub fn resumable_download(&self) -> ResumableDownloadHandler {
        ResumableDownloadHandler::new(self.handle.clone())
    }

    /// Download an object as concurrently fetched byte ranges.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// async fn download(client: &boto_transfer::Client) -> Result<(), boto_transfer::error::Error> {
    ///     let object = client.s3_object("my-bucket", "my-key")?;
    ///     let output = client
    ///         .download()
    ///         .download(object, "/tmp/my-key")
    ///         .await?;
    ///     println!("downloaded {} bytes in {} parts", output.size(), output.parts());
    ///     Ok(())
    /// }
    /// ```
    pub fn download(&self) -> ConcurrentDownloader {
        ConcurrentDownloader::new(self.handle.clone())
    }

    /// Drive the individual requests of an S3 multipart upload.
    ///
    /// Fails with an invalid input error when the config has no S3 client.
    pub fn multipart_upload(&self) -> Result<MultipartUploadCoordinator, Error> {
        MultipartUploadCoordinator::new(self.handle.clone())
    }

    /// Upload a local file to S3 as concurrently uploaded multipart parts.
    ///
    /// Fails with an invalid input error when the config has no S3 client.
    pub fn concurrent_upload(&self) -> Result<ConcurrentUploader, Error> {
        Ok(ConcurrentUploader::new(self.multipart_upload()?))
    }

    /// A ranged source fetched with plain HTTP requests through the configured connection
    pub fn http_object(&self, uri: http::Uri) -> HttpObject {
        HttpObject::new(self.handle.config.connection().clone(), uri)
    }

    /// A ranged source fetched through the configured S3 client
    pub fn s3_object(
        &self,
        bucket: impl Into<String>,
        key: impl Into<String>,
    ) -> Result<S3Object, Error> {
        Ok(S3Object::new(self.handle.s3_client()?.clone(), bucket, key))
    }
}
