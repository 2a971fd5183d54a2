/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

/// Resumable uploads over the Google Cloud Storage resumable upload protocol
pub mod resumable_upload;

/// Sequential downloads resumed from the length of the local file
pub mod resumable_download;

/// Concurrent ranged downloads
pub mod download;

/// S3 multipart uploads
pub mod multipart_upload;
