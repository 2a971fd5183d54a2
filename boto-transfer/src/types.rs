/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::fmt;
use std::time::Duration;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// The target part size for an upload or download request.
#[derive(Debug, Clone, Default)]
pub enum PartSize {
    /// Automatically configure an optimal target part size based on the execution environment.
    #[default]
    Auto,

    /// Target part size explicitly given.
    ///
    /// NOTE: multipart uploads round this up to the 5 MiB minimum part size.
    Target(u64),
}

/// The concurrency settings to use for a single upload or download request.
#[derive(Debug, Clone, Default)]
pub enum ConcurrencySetting {
    /// Automatically configure an optimal concurrency setting based on the execution environment.
    #[default]
    Auto,

    /// Explicitly configured number of workers.
    Explicit(usize),
}

/// What a resumable upload does when the persisted session no longer answers a state query
/// with a resumable status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum StaleSessionPolicy {
    /// Start a new session for any unexpected status.
    #[default]
    Restart,

    /// Start a new session unless the store rejected the credentials (401/403), in which case
    /// the upload fails and the tracker is removed.
    AbortOnAuthFailure,
}

/// Policy for how to handle a failed multipart upload
///
/// Default is to abort the upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FailedMultipartUploadPolicy {
    /// Abort the upload on any individual part failure
    #[default]
    AbortUpload,
    /// Retain any uploaded parts. The upload ID will be available in the response.
    Retain,
}

/// Retry settings for individual download chunks and multipart parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRetryConfig {
    max_attempts: usize,
    delay: Duration,
}

impl ChunkRetryConfig {
    /// Create a new retry configuration.
    ///
    /// `max_attempts` is the total number of fetches per chunk, the first one included. Zero is
    /// treated as one.
    pub const fn new(max_attempts: usize, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// A configuration that never retries
    pub const fn disabled() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Total attempts allowed per chunk
    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Delay between attempts
    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl Default for ChunkRetryConfig {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(5))
    }
}

const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";

/// Characters left unescaped in object names: the unreserved set plus the path separator.
const OBJECT_NAME: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Address of an object in a Google Cloud Storage compatible store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectKey {
    endpoint: String,
    bucket: String,
    name: String,
}

impl ObjectKey {
    /// Address `name` in `bucket` on the default storage endpoint
    pub fn new(bucket: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_owned(),
            bucket: bucket.into(),
            name: name.into(),
        }
    }

    /// Use a different endpoint, e.g. `http://localhost:4443` for an emulator
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_owned();
        self
    }

    /// The bucket holding the object
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// The object name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The endpoint requests are sent to
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Full URI of the object
    pub fn uri(&self) -> String {
        format!(
            "{}/{}/{}",
            self.endpoint,
            self.bucket,
            utf8_percent_encode(&self.name, OBJECT_NAME)
        )
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gs://{}/{}", self.bucket, self.name)
    }
}
