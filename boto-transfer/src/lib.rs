/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

/* Automatically managed default lints */
#![cfg_attr(docsrs, feature(doc_auto_cfg))]
/* End of automatically managed default lints */

//! Resumable, multipart and concurrent ranged object transfers.
//!
//! The crate drives large object transfers against remote object stores:
//!
//! - [`ResumableUploadHandler`](operation::resumable_upload::ResumableUploadHandler) speaks the
//!   Google Cloud Storage resumable upload protocol and can pick an upload back up in a later
//!   process through a tracker file.
//! - [`ResumableDownloadHandler`](operation::resumable_download::ResumableDownloadHandler)
//!   resumes an interrupted download from the length of the local file.
//! - [`ConcurrentDownloader`](operation::download::ConcurrentDownloader) splits an object into
//!   byte ranges, fetches them in parallel and reassembles them in order.
//! - [`MultipartUploadCoordinator`](operation::multipart_upload::MultipartUploadCoordinator)
//!   and [`ConcurrentUploader`](operation::multipart_upload::ConcurrentUploader) drive S3
//!   multipart uploads.
//!
//! Requests go through a caller supplied [`Connection`](http::Connection), owned by a
//! [`Client`].

#![warn(
    missing_debug_implementations,
    missing_docs,
    rustdoc::missing_crate_level_docs,
    unreachable_pub,
    rust_2018_idioms
)]

pub(crate) const DEFAULT_CONCURRENCY: usize = 10;

/// Error types emitted by `boto-transfer`
pub mod error;

/// Common types used by `boto-transfer`
pub mod types;

/// Types and helpers for I/O
pub mod io;

/// HTTP connection abstraction and helpers
pub mod http;

/// Transfer client
pub mod client;

/// Transfer operations
pub mod operation;

/// Transfer configuration
pub mod config;

/// Metrics and units
pub mod metrics;

pub(crate) mod middleware;

pub use self::client::Client;
pub use self::config::Config;
