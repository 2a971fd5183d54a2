/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use http::header::{CONTENT_LENGTH, ETAG, RANGE};
use http::{Method, Request, StatusCode, Uri};

use crate::error::{self, Error};
use crate::http::header::{ByteRange, Range};
use crate::http::{Body, SharedConnection};

/// Size and identity of a remote object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    size: u64,
    e_tag: Option<String>,
}

impl ObjectMeta {
    /// Describe an object of `size` bytes
    pub fn new(size: u64, e_tag: Option<String>) -> Self {
        Self { size, e_tag }
    }

    /// Object size in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Entity tag of the object, if the store reported one
    pub fn e_tag(&self) -> Option<&str> {
        self.e_tag.as_deref()
    }
}

/// A remote object that can be read in byte ranges.
#[async_trait]
pub trait RangeSource: Send + Sync + fmt::Debug {
    /// Fetch the object's size and ETag
    async fn object_meta(&self) -> Result<ObjectMeta, Error>;

    /// Fetch the bytes of `range`
    async fn get_range(&self, range: ByteRange) -> Result<Body, Error>;
}

/// A [`RangeSource`] shared between download workers
pub type SharedRangeSource = Arc<dyn RangeSource>;

#[async_trait]
impl<T> RangeSource for Arc<T>
where
    T: RangeSource + ?Sized,
{
    async fn object_meta(&self) -> Result<ObjectMeta, Error> {
        self.as_ref().object_meta().await
    }

    async fn get_range(&self, range: ByteRange) -> Result<Body, Error> {
        self.as_ref().get_range(range).await
    }
}

/// An object addressed by URI and read with `HEAD` and ranged `GET` requests.
#[derive(Debug, Clone)]
pub struct HttpObject {
    conn: SharedConnection,
    uri: Uri,
}

impl HttpObject {
    /// Read the object at `uri` through `conn`
    pub fn new(conn: SharedConnection, uri: Uri) -> Self {
        Self { conn, uri }
    }
}

#[async_trait]
impl RangeSource for HttpObject {
    async fn object_meta(&self) -> Result<ObjectMeta, Error> {
        let request = Request::builder()
            .method(Method::HEAD)
            .uri(self.uri.clone())
            .body(Body::empty())?;
        let response = self.conn.send(request).await?;
        if response.status() != StatusCode::OK {
            return Err(error::unexpected_status(
                response.status(),
                &format!("fetching metadata of {}", self.uri),
            ));
        }

        let headers = response.headers();
        let size = headers
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse().ok())
            .ok_or_else(|| error::incomplete_response("a usable Content-Length"))?;
        let e_tag = headers
            .get(ETAG)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        Ok(ObjectMeta::new(size, e_tag))
    }

    async fn get_range(&self, range: ByteRange) -> Result<Body, Error> {
        let request = Request::builder()
            .method(Method::GET)
            .uri(self.uri.clone())
            .header(RANGE, Range::bytes(range).to_string())
            .body(Body::empty())?;
        let response = self.conn.send(request).await?;
        match response.status() {
            StatusCode::PARTIAL_CONTENT => Ok(response.into_body()),
            status => Err(error::unexpected_status(
                status,
                &format!("fetching {} of {}", Range::bytes(range), self.uri),
            )),
        }
    }
}

/// An Amazon S3 object read with `HeadObject` and ranged `GetObject` requests.
#[derive(Debug, Clone)]
pub struct S3Object {
    client: aws_sdk_s3::Client,
    bucket: String,
    key: String,
}

impl S3Object {
    /// Read `key` in `bucket` with `client`
    pub fn new(client: aws_sdk_s3::Client, bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

fn byte_stream_body(stream: ByteStream) -> Body {
    Body::from_stream(futures_util::stream::unfold(stream, |mut stream| async move {
        stream.next().await.map(|chunk| (chunk, stream))
    }))
}

#[async_trait]
impl RangeSource for S3Object {
    async fn object_meta(&self) -> Result<ObjectMeta, Error> {
        let output = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&self.key)
            .send()
            .await?;
        let size = output
            .content_length()
            .and_then(|len| u64::try_from(len).ok())
            .ok_or_else(|| error::incomplete_response("the HeadObject content length"))?;
        Ok(ObjectMeta::new(size, output.e_tag().map(str::to_owned)))
    }

    async fn get_range(&self, range: ByteRange) -> Result<Body, Error> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&self.key)
            .range(Range::bytes(range))
            .send()
            .await?;
        Ok(byte_stream_body(output.body))
    }
}
