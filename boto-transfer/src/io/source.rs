/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt};

use crate::error::{self, BoxError, Disposition, Error};
use crate::http::Body;
use crate::io::progress::ProgressTracker;

/// Data to upload: a local file or an in-memory buffer.
///
/// The source is re-opened for every attempt so a retried upload can pick up from any offset.
#[derive(Debug, Clone)]
pub struct InputSource {
    inner: RawSource,
}

#[derive(Debug, Clone)]
enum RawSource {
    Path(PathBuf),
    Buf(Bytes),
}

type SourceReader = Box<dyn AsyncRead + Send + Unpin>;

impl InputSource {
    /// Upload the file at `path`
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        Self {
            inner: RawSource::Path(path.as_ref().to_path_buf()),
        }
    }

    /// Upload an in-memory buffer
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        Self {
            inner: RawSource::Buf(data.into()),
        }
    }

    /// Current size of the source in bytes
    pub async fn size(&self) -> Result<u64, Error> {
        match &self.inner {
            RawSource::Path(path) => Ok(tokio::fs::metadata(path).await?.len()),
            RawSource::Buf(data) => Ok(data.len() as u64),
        }
    }

    /// Open the source positioned at `offset`
    pub(crate) async fn reader_at(&self, offset: u64) -> Result<SourceReader, Error> {
        match &self.inner {
            RawSource::Path(path) => {
                let mut file = tokio::fs::File::open(path).await?;
                file.seek(SeekFrom::Start(offset)).await?;
                Ok(Box::new(file))
            }
            RawSource::Buf(data) => {
                let start = (offset as usize).min(data.len());
                Ok(Box::new(std::io::Cursor::new(data.slice(start..))))
            }
        }
    }

    /// Hex encoded MD5 digest of the whole source
    pub async fn md5_hex(&self) -> Result<String, Error> {
        let mut reader = self.reader_at(0).await?;
        let mut ctx = md5::Context::new();
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            ctx.consume(&buf[..n]);
        }
        Ok(format!("{:x}", ctx.compute()))
    }
}

/// Byte accounting of one streamed upload attempt
#[derive(Debug, Default)]
pub(crate) struct SendStats {
    bytes_read: AtomicU64,
    changed: AtomicBool,
}

impl SendStats {
    /// Bytes handed to the connection so far
    pub(crate) fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Acquire)
    }

    /// Whether the source ended early or grew while it was being streamed
    pub(crate) fn source_changed(&self) -> bool {
        self.changed.load(Ordering::Acquire)
    }
}

struct SourceBodyState {
    reader: SourceReader,
    offset: u64,
    remaining: u64,
    buffer_size: usize,
    progress: Option<ProgressTracker>,
    stats: Arc<SendStats>,
    started: bool,
}

impl SourceBodyState {
    fn source_changed(&self, detail: &str) -> BoxError {
        self.stats.changed.store(true, Ordering::Release);
        tracing::error!("source {detail} while streaming at offset {}", self.offset);
        error::resumable(
            Disposition::Abort,
            format!("file changed during upload: {detail}"),
        )
        .into()
    }

    async fn next_chunk(&mut self) -> Result<Option<Bytes>, BoxError> {
        if !self.started {
            self.started = true;
            if let Some(progress) = &mut self.progress {
                progress.start(self.offset);
                // nothing left to stream, so the transfer completes right away
                if self.remaining == 0 {
                    progress.finish(self.offset);
                }
            }
        }
        if self.remaining == 0 {
            return Ok(None);
        }

        let want = self.remaining.min(self.buffer_size as u64) as usize;
        let mut buf = vec![0u8; want];
        let n = self.reader.read(&mut buf).await?;
        if n == 0 {
            return Err(self.source_changed("ended early"));
        }
        buf.truncate(n);
        self.offset += n as u64;
        self.remaining -= n as u64;

        if self.remaining == 0 {
            // the declared length is about to be satisfied, make sure the source did not grow
            let mut extra = [0u8; 1];
            if self.reader.read(&mut extra).await? != 0 {
                return Err(self.source_changed("grew"));
            }
        }

        self.stats.bytes_read.fetch_add(n as u64, Ordering::AcqRel);
        if let Some(progress) = &mut self.progress {
            progress.on_buffer(self.offset);
            if self.remaining == 0 {
                progress.finish(self.offset);
            }
        }
        tracing::trace!("streamed {n} bytes, {} remaining", self.remaining);
        Ok(Some(Bytes::from(buf)))
    }
}

/// Build a request body streaming `len` bytes from `reader`, which is positioned at `offset`.
pub(crate) fn source_body(
    reader: SourceReader,
    offset: u64,
    len: u64,
    buffer_size: usize,
    progress: Option<ProgressTracker>,
) -> (Body, Arc<SendStats>) {
    let stats = Arc::new(SendStats::default());
    let state = SourceBodyState {
        reader,
        offset,
        remaining: len,
        buffer_size: buffer_size.max(1),
        progress,
        stats: stats.clone(),
        started: false,
    };

    let stream = futures_util::stream::unfold(Some(state), |state| async move {
        let mut state = state?;
        match state.next_chunk().await {
            Ok(Some(chunk)) => Some((Ok(chunk), Some(state))),
            Ok(None) => None,
            Err(err) => Some((Err(err), None)),
        }
    });
    (Body::from_stream(stream), stats)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use bytes::Bytes;

    use super::{source_body, InputSource};

    #[tokio::test]
    async fn test_stream_from_offset() {
        let source = InputSource::from_bytes(Bytes::from_static(b"0123456789"));
        assert_eq!(10, source.size().await.unwrap());
        let reader = source.reader_at(5).await.unwrap();
        let (body, stats) = source_body(reader, 5, 5, 2, None);
        let data = body.collect().await.unwrap();
        assert_eq!(&b"56789"[..], &data[..]);
        assert_eq!(5, stats.bytes_read());
        assert!(!stats.source_changed());
    }

    #[tokio::test]
    async fn test_detects_short_source() {
        let source = InputSource::from_bytes(Bytes::from_static(b"01234"));
        let reader = source.reader_at(0).await.unwrap();
        let (body, stats) = source_body(reader, 0, 8, 4, None);
        assert!(body.collect().await.is_err());
        assert!(stats.source_changed());
    }

    #[tokio::test]
    async fn test_detects_grown_source() {
        let source = InputSource::from_bytes(Bytes::from_static(b"0123456789"));
        let reader = source.reader_at(0).await.unwrap();
        let (body, stats) = source_body(reader, 0, 6, 4, None);
        assert!(body.collect().await.is_err());
        assert!(stats.source_changed());
    }

    #[tokio::test]
    async fn test_file_source_md5() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"0123456789").unwrap();
        let source = InputSource::from_path(file.path());
        assert_eq!(
            "781e5e245d69b566979b86e28d23f2c7",
            source.md5_hex().await.unwrap()
        );
        let reader = source.reader_at(7).await.unwrap();
        let (body, _) = source_body(reader, 7, 3, 8, None);
        assert_eq!(&b"789"[..], &body.collect().await.unwrap()[..]);
    }
}
