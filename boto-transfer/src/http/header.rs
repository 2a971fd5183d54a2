/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

//! Typed `Range` and `Content-Range` header values.

use std::fmt;
use std::str::FromStr;

use crate::error::{self, Error};

/// Header carrying the resumable upload protocol command
pub const X_GOOG_RESUMABLE: &str = "x-goog-resumable";

/// A single byte range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// Bytes `start..=end`
    Inclusive(u64, u64),
    /// All bytes from the given offset to the end
    AllFrom(u64),
    /// The last `n` bytes
    Last(u64),
}

impl ByteRange {
    /// Number of bytes covered, when known without the object size
    pub fn len(&self) -> Option<u64> {
        match self {
            ByteRange::Inclusive(start, end) => Some(end - start + 1),
            ByteRange::Last(n) => Some(*n),
            ByteRange::AllFrom(_) => None,
        }
    }

    /// First byte offset, when known without the object size
    pub fn start(&self) -> Option<u64> {
        match self {
            ByteRange::Inclusive(start, _) | ByteRange::AllFrom(start) => Some(*start),
            ByteRange::Last(_) => None,
        }
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ByteRange::Inclusive(start, end) => write!(f, "{start}-{end}"),
            ByteRange::AllFrom(start) => write!(f, "{start}-"),
            ByteRange::Last(n) => write!(f, "-{n}"),
        }
    }
}

/// `Range` header value (`bytes=<range>`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range(pub ByteRange);

impl Range {
    /// `Range` for the given bytes
    pub fn bytes(range: ByteRange) -> Self {
        Self(range)
    }

    /// `Range` for bytes `start..=end`
    pub fn bytes_inclusive(start: u64, end: u64) -> Self {
        Self(ByteRange::Inclusive(start, end))
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bytes={}", self.0)
    }
}

impl From<Range> for String {
    fn from(value: Range) -> Self {
        value.to_string()
    }
}

fn parse_offset(value: &str, header: &str) -> Result<u64, Error> {
    value
        .trim()
        .parse()
        .map_err(|err| error::invalid_input(format!("invalid {header} offset {value:?}: {err}")))
}

impl FromStr for Range {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let spec = s
            .trim()
            .strip_prefix("bytes=")
            .ok_or_else(|| error::invalid_input(format!("unsupported range unit: {s:?}")))?;
        if spec.contains(',') {
            return Err(error::invalid_input(format!(
                "multiple ranges are not supported: {s:?}"
            )));
        }
        let (start, end) = spec
            .split_once('-')
            .ok_or_else(|| error::invalid_input(format!("malformed range: {s:?}")))?;

        let range = match (start.trim(), end.trim()) {
            ("", "") => return Err(error::invalid_input(format!("malformed range: {s:?}"))),
            ("", last) => ByteRange::Last(parse_offset(last, "range")?),
            (start, "") => ByteRange::AllFrom(parse_offset(start, "range")?),
            (start, end) => {
                let start = parse_offset(start, "range")?;
                let end = parse_offset(end, "range")?;
                if end < start {
                    return Err(error::invalid_input(format!("inverted range: {s:?}")));
                }
                ByteRange::Inclusive(start, end)
            }
        };
        Ok(Range(range))
    }
}

/// `Content-Range` header value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentRange {
    /// `bytes <start>-<end>/<total>`
    Bytes {
        /// first byte offset
        start: u64,
        /// last byte offset (inclusive)
        end: u64,
        /// total object size
        total: u64,
    },
    /// `bytes */<total>`: no bytes in this message, asks for (or reports) the stored range
    Unsatisfied {
        /// total object size
        total: u64,
    },
}

impl ContentRange {
    /// Content range for the bytes `start..total` of an object of `total` bytes.
    ///
    /// Returns the unsatisfied form when there is nothing left to send.
    pub fn remaining(start: u64, total: u64) -> Self {
        if start >= total {
            ContentRange::Unsatisfied { total }
        } else {
            ContentRange::Bytes {
                start,
                end: total - 1,
                total,
            }
        }
    }
}

impl fmt::Display for ContentRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentRange::Bytes { start, end, total } => write!(f, "bytes {start}-{end}/{total}"),
            ContentRange::Unsatisfied { total } => write!(f, "bytes */{total}"),
        }
    }
}

impl FromStr for ContentRange {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let spec = s
            .trim()
            .strip_prefix("bytes ")
            .ok_or_else(|| error::invalid_input(format!("unsupported content range: {s:?}")))?;
        let (range, total) = spec
            .split_once('/')
            .ok_or_else(|| error::invalid_input(format!("malformed content range: {s:?}")))?;
        let total = parse_offset(total, "content range")?;
        if range.trim() == "*" {
            return Ok(ContentRange::Unsatisfied { total });
        }
        let (start, end) = range
            .split_once('-')
            .ok_or_else(|| error::invalid_input(format!("malformed content range: {s:?}")))?;
        Ok(ContentRange::Bytes {
            start: parse_offset(start, "content range")?,
            end: parse_offset(end, "content range")?,
            total,
        })
    }
}
