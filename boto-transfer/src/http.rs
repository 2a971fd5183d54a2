/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::stream::{BoxStream, Stream, StreamExt};

use crate::error::{BoxError, Error};

pub mod header;

mod connection;
pub use connection::ReqwestConnection;

/// A connection able to issue a single HTTP request.
///
/// Implementations own pooling, TLS and authentication. Network level failures (timeouts,
/// resets, broken pipes) must be reported as [`ErrorKind::Transport`](crate::error::ErrorKind)
/// errors; any response that was received, whatever its status, is returned as `Ok`.
#[async_trait]
pub trait Connection: Send + Sync + fmt::Debug {
    /// Send `request` and return the response head with a streaming body
    async fn send(&self, request: ::http::Request<Body>) -> Result<::http::Response<Body>, Error>;
}

/// A [`Connection`] shared between handlers
pub type SharedConnection = Arc<dyn Connection>;

/// Request or response body
pub struct Body {
    inner: Inner,
}

enum Inner {
    Once(Option<Bytes>),
    Streaming(BoxStream<'static, Result<Bytes, BoxError>>),
}

impl Body {
    /// An empty body
    pub fn empty() -> Self {
        Self {
            inner: Inner::Once(None),
        }
    }

    /// A body streamed from `stream`
    pub fn from_stream<S, E>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Into<BoxError>,
    {
        Self {
            inner: Inner::Streaming(stream.map(|chunk| chunk.map_err(Into::into)).boxed()),
        }
    }

    /// The next chunk of data, `None` once the body is exhausted
    pub async fn next(&mut self) -> Option<Result<Bytes, BoxError>> {
        match &mut self.inner {
            Inner::Once(data) => data.take().filter(|data| !data.is_empty()).map(Ok),
            Inner::Streaming(stream) => stream.next().await,
        }
    }

    /// Read the remaining body into memory
    pub async fn collect(mut self) -> Result<Bytes, BoxError> {
        if let Inner::Once(data) = &mut self.inner {
            return Ok(data.take().unwrap_or_default());
        }
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }

    /// The body data if it is already fully in memory
    pub(crate) fn try_into_bytes(self) -> Result<Bytes, Self> {
        match self.inner {
            Inner::Once(data) => Ok(data.unwrap_or_default()),
            inner => Err(Self { inner }),
        }
    }

    /// Convert into a stream of chunks
    pub fn into_stream(self) -> BoxStream<'static, Result<Bytes, BoxError>> {
        match self.inner {
            Inner::Once(data) => {
                futures_util::stream::iter(data.filter(|data| !data.is_empty()).map(Ok)).boxed()
            }
            Inner::Streaming(stream) => stream,
        }
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            Inner::Once(data) => f
                .debug_struct("Body")
                .field("len", &data.as_ref().map_or(0, Bytes::len))
                .finish(),
            Inner::Streaming(_) => f.debug_struct("Body").field("streaming", &true).finish(),
        }
    }
}

impl From<Bytes> for Body {
    fn from(value: Bytes) -> Self {
        Self {
            inner: Inner::Once(Some(value)),
        }
    }
}

impl From<Vec<u8>> for Body {
    fn from(value: Vec<u8>) -> Self {
        Bytes::from(value).into()
    }
}

impl From<&'static str> for Body {
    fn from(value: &'static str) -> Self {
        Bytes::from_static(value.as_bytes()).into()
    }
}

impl From<String> for Body {
    fn from(value: String) -> Self {
        Bytes::from(value).into()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::Body;

    #[tokio::test]
    async fn test_collect_streaming_body() {
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"01234")),
            Ok(Bytes::from_static(b"56789")),
        ];
        let body = Body::from_stream(futures_util::stream::iter(chunks));
        assert_eq!(&b"0123456789"[..], &body.collect().await.unwrap()[..]);
    }

    #[tokio::test]
    async fn test_empty_body_yields_nothing() {
        let mut body = Body::empty();
        assert!(body.next().await.is_none());
        let mut body = Body::from("");
        assert!(body.next().await.is_none());
        assert!(Body::from("abc").collect().await.unwrap() == "abc");
    }
}
