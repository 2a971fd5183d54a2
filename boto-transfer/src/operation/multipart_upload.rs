/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

mod concurrent;

pub use self::concurrent::ConcurrentUploader;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart, StorageClass};
use bytes::Bytes;
use tracing::Instrument;

use crate::client::Handle;
use crate::error::{self, Error};

/// Highest part number S3 accepts
pub const MAX_PART_NUMBER: i32 = 10_000;

/// Request to begin a multipart upload.
#[derive(Debug, Clone, Default)]
#[non_exhaustive]
pub struct InitiateMultipartUpload {
    bucket: String,
    key: String,
    content_type: Option<String>,
    storage_class: Option<String>,
    metadata: HashMap<String, String>,
}

impl InitiateMultipartUpload {
    /// Upload to `key` in `bucket`
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            ..Default::default()
        }
    }

    /// `Content-Type` of the assembled object
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Storage class name, e.g. `STANDARD_IA`
    pub fn storage_class(mut self, storage_class: impl Into<String>) -> Self {
        self.storage_class = Some(storage_class.into());
        self
    }

    /// Add a user metadata entry, sent as `x-amz-meta-<key>`
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Bucket of the upload
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Key of the upload
    pub fn key(&self) -> &str {
        &self.key
    }

    fn validated_storage_class(&self) -> Result<Option<StorageClass>, Error> {
        match self.storage_class.as_deref() {
            None => Ok(None),
            Some(name) if StorageClass::values().contains(&name) => {
                Ok(Some(StorageClass::from(name)))
            }
            Some(name) => Err(error::invalid_input(format!(
                "invalid storage class: {name:?}"
            ))),
        }
    }

    fn validate_metadata(&self) -> Result<(), Error> {
        for key in self.metadata.keys() {
            let header = format!("x-amz-meta-{key}");
            if key.is_empty() || http::HeaderName::from_bytes(header.as_bytes()).is_err() {
                return Err(error::invalid_input(format!(
                    "invalid metadata key: {key:?}"
                )));
            }
        }
        Ok(())
    }
}

/// An initiated multipart upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartUpload {
    bucket: String,
    key: String,
    upload_id: String,
}

impl MultipartUpload {
    /// Refer to an existing upload, e.g. one listed by another process
    pub fn new(
        bucket: impl Into<String>,
        key: impl Into<String>,
        upload_id: impl Into<String>,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            upload_id: upload_id.into(),
        }
    }

    /// Bucket of the upload
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Key of the upload
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Upload ID assigned by S3
    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }
}

/// A part stored by S3
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedPart {
    part_number: i32,
    e_tag: String,
}

impl UploadedPart {
    /// Describe part `part_number` stored with `e_tag`
    pub fn new(part_number: i32, e_tag: impl Into<String>) -> Self {
        Self {
            part_number,
            e_tag: e_tag.into(),
        }
    }

    /// 1-based part number
    pub fn part_number(&self) -> i32 {
        self.part_number
    }

    /// ETag of the part
    pub fn e_tag(&self) -> &str {
        &self.e_tag
    }
}

/// Result of completing a multipart upload
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct CompletedUpload {
    e_tag: String,
    parts: usize,
}

impl CompletedUpload {
    /// ETag of the assembled object
    pub fn e_tag(&self) -> &str {
        &self.e_tag
    }

    /// Number of parts the object was assembled from
    pub fn parts(&self) -> usize {
        self.parts
    }
}

/// Result of aborting a multipart upload
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct AbortedUpload {
    upload_id: String,
}

impl AbortedUpload {
    /// The aborted upload ID
    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }
}

/// Drives the individual requests of S3 multipart uploads.
#[derive(Debug, Clone)]
pub struct MultipartUploadCoordinator {
    handle: Arc<Handle>,
    client: aws_sdk_s3::Client,
}

impl MultipartUploadCoordinator {
    pub(crate) fn new(handle: Arc<Handle>) -> Result<Self, Error> {
        let client = handle.s3_client()?.clone();
        Ok(Self { handle, client })
    }

    pub(crate) fn handle(&self) -> &Arc<Handle> {
        &self.handle
    }

    /// Begin a multipart upload.
    #[tracing::instrument(skip_all, level = "debug", name = "initiate-multipart-upload")]
    pub async fn initiate(&self, request: InitiateMultipartUpload) -> Result<MultipartUpload, Error> {
        let storage_class = request.validated_storage_class()?;
        request.validate_metadata()?;

        let metadata = (!request.metadata.is_empty()).then(|| request.metadata.clone());
        let resp = self
            .client
            .create_multipart_upload()
            .bucket(&request.bucket)
            .key(&request.key)
            .set_content_type(request.content_type.clone())
            .set_storage_class(storage_class)
            .set_metadata(metadata)
            .send()
            .await?;

        let upload_id = resp
            .upload_id
            .ok_or_else(|| error::incomplete_response("the upload ID"))?;
        tracing::debug!("initiated multipart upload {upload_id}");
        Ok(MultipartUpload {
            bucket: request.bucket,
            key: request.key,
            upload_id,
        })
    }

    /// Upload part `part_number` of `upload`.
    pub async fn upload_part(
        &self,
        upload: &MultipartUpload,
        part_number: i32,
        data: Bytes,
    ) -> Result<UploadedPart, Error> {
        if !(1..=MAX_PART_NUMBER).contains(&part_number) {
            return Err(error::invalid_input(format!(
                "part number {part_number} is outside 1..={MAX_PART_NUMBER}"
            )));
        }

        let content_length = data.len() as i64;
        let resp = self
            .client
            .upload_part()
            .bucket(&upload.bucket)
            .key(&upload.key)
            .upload_id(&upload.upload_id)
            .part_number(part_number)
            .content_length(content_length)
            .body(ByteStream::from(data))
            .send()
            .instrument(tracing::debug_span!("send-upload-part", part_number))
            .await?;

        let e_tag = resp
            .e_tag
            .ok_or_else(|| error::incomplete_response("the part ETag"))?;
        tracing::trace!("completed upload of part number {part_number}");
        Ok(UploadedPart { part_number, e_tag })
    }

    /// Assemble `upload` from `parts`.
    ///
    /// When a part number appears more than once the last entry wins. The remaining part
    /// numbers must run contiguously from 1.
    #[tracing::instrument(skip_all, level = "debug", name = "complete-multipart-upload")]
    pub async fn complete(
        &self,
        upload: &MultipartUpload,
        parts: impl IntoIterator<Item = UploadedPart>,
    ) -> Result<CompletedUpload, Error> {
        let parts = ordered_parts(parts)?;
        let num_parts = parts.len();
        let completed = parts
            .into_iter()
            .map(|part| {
                CompletedPart::builder()
                    .part_number(part.part_number)
                    .e_tag(part.e_tag)
                    .build()
            })
            .collect();

        let resp = self
            .client
            .complete_multipart_upload()
            .bucket(&upload.bucket)
            .key(&upload.key)
            .upload_id(&upload.upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed))
                    .build(),
            )
            .send()
            .await?;

        let e_tag = resp
            .e_tag
            .ok_or_else(|| error::incomplete_response("the completed object ETag"))?;
        tracing::debug!("completed multipart upload {} ({num_parts} parts)", upload.upload_id);
        Ok(CompletedUpload {
            e_tag,
            parts: num_parts,
        })
    }

    /// Abort `upload`, discarding every stored part.
    #[tracing::instrument(skip_all, level = "debug", name = "abort-multipart-upload")]
    pub async fn abort(&self, upload: &MultipartUpload) -> Result<AbortedUpload, Error> {
        self.client
            .abort_multipart_upload()
            .bucket(&upload.bucket)
            .key(&upload.key)
            .upload_id(&upload.upload_id)
            .send()
            .await?;
        tracing::debug!("aborted multipart upload {}", upload.upload_id);
        Ok(AbortedUpload {
            upload_id: upload.upload_id.clone(),
        })
    }

    /// List the parts S3 holds for `upload`, following pagination.
    pub async fn list_parts(&self, upload: &MultipartUpload) -> Result<Vec<UploadedPart>, Error> {
        let mut parts = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let resp = self
                .client
                .list_parts()
                .bucket(&upload.bucket)
                .key(&upload.key)
                .upload_id(&upload.upload_id)
                .set_part_number_marker(marker.take())
                .send()
                .await?;

            for part in resp.parts() {
                match (part.part_number(), part.e_tag()) {
                    (Some(part_number), Some(e_tag)) => {
                        parts.push(UploadedPart::new(part_number, e_tag))
                    }
                    _ => return Err(error::incomplete_response("a listed part number or ETag")),
                }
            }

            if !resp.is_truncated().unwrap_or(false) {
                break;
            }
            match resp.next_part_number_marker {
                Some(next) => marker = Some(next),
                None => return Err(error::incomplete_response("the next part number marker")),
            }
        }
        Ok(parts)
    }
}

/// De-duplicate (last wins), sort and validate parts for completion.
fn ordered_parts(
    parts: impl IntoIterator<Item = UploadedPart>,
) -> Result<Vec<UploadedPart>, Error> {
    let by_number: BTreeMap<i32, UploadedPart> = parts
        .into_iter()
        .map(|part| (part.part_number, part))
        .collect();
    if by_number.is_empty() {
        return Err(error::invalid_input(
            "cannot complete a multipart upload without parts",
        ));
    }
    for (expected, number) in (1..).zip(by_number.keys()) {
        if *number != expected {
            return Err(error::invalid_input(format!(
                "parts are not contiguous: expected part {expected}, found {number}"
            )));
        }
    }
    Ok(by_number.into_values().collect())
}

#[cfg(test)]
mod tests {
    use super::{ordered_parts, InitiateMultipartUpload, UploadedPart};
    use crate::error::ErrorKind;

    #[test]
    fn test_ordered_parts_dedupes_and_sorts() {
        let parts = ordered_parts(vec![
            UploadedPart::new(2, "b"),
            UploadedPart::new(1, "a"),
            UploadedPart::new(2, "b2"),
        ])
        .unwrap();
        assert_eq!(
            vec![UploadedPart::new(1, "a"), UploadedPart::new(2, "b2")],
            parts
        );
    }

    #[test]
    fn test_ordered_parts_rejects_gaps() {
        let err = ordered_parts(vec![UploadedPart::new(1, "a"), UploadedPart::new(3, "c")])
            .unwrap_err();
        assert_eq!(&ErrorKind::InputInvalid, err.kind());

        let err = ordered_parts(vec![UploadedPart::new(2, "b")]).unwrap_err();
        assert_eq!(&ErrorKind::InputInvalid, err.kind());

        let err = ordered_parts(Vec::new()).unwrap_err();
        assert_eq!(&ErrorKind::InputInvalid, err.kind());
    }

    #[test]
    fn test_initiate_validation() {
        let request = InitiateMultipartUpload::new("bucket", "key").storage_class("STANDARD_IA");
        assert!(request.validated_storage_class().unwrap().is_some());

        let request = InitiateMultipartUpload::new("bucket", "key").storage_class("SHINY");
        assert!(request.validated_storage_class().is_err());

        let request = InitiateMultipartUpload::new("bucket", "key").metadata("ok-key", "v");
        assert!(request.validate_metadata().is_ok());
        let request = InitiateMultipartUpload::new("bucket", "key").metadata("bad key", "v");
        assert!(request.validate_metadata().is_err());
    }
}
