/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::fmt;

use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};

/// A boxed error that is `Send` and `Sync`.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors returned by this library
///
/// NOTE: Use [`aws_sdk_s3::error::DisplayErrorContext`] or similar to display
/// the entire error cause/source chain.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    source: BoxError,
}

/// General categories of transfer errors.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Operation input validation issues
    InputInvalid,

    /// Local I/O errors (reading the source, writing the destination or a tracker file)
    IOError,

    /// Some kind of internal runtime issue (e.g. task failure, closed channel, etc)
    RuntimeError,

    /// Network level failure talking to the remote store (timeout, connection reset, broken pipe)
    Transport,

    /// The remote store answered with an error response
    ServiceError(ServiceErrorCode),

    /// Resource not found (e.g. bucket, key, multipart upload ID not found)
    NotFound,

    /// Failed to upload or download a chunk of an object
    ChunkFailed(ChunkFailed),

    /// A resumable transfer failed; the disposition says what the caller may do about it
    ResumableTransfer(Disposition),

    /// The operation was cancelled because a sibling unit of work failed
    OperationCancelled,
}

/// What a failed resumable transfer attempt means for the transfer as a whole.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Disposition {
    /// The remote session is unknown or stale; a brand new session has to be started.
    StartOver,

    /// Transient failure; the transfer is retried after a backoff delay.
    WaitBeforeRetry,

    /// Give up in the current process but keep the tracker file, a later process may resume.
    AbortCurrentProcess,

    /// Give up and delete the tracker file, the transfer cannot be resumed.
    Abort,
}

/// Stores information about failed chunk
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ChunkFailed {
    id: ChunkId,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum ChunkId {
    /// Part index of a ranged download (0-based)
    Download(u64),
    /// Part number of a multipart upload (1-based)
    Upload(i32),
}

impl ChunkFailed {
    /// The index of the part that failed for a download operation
    pub fn download_part(&self) -> Option<u64> {
        match self.id {
            ChunkId::Download(idx) => Some(idx),
            _ => None,
        }
    }

    /// The part number that failed for a multipart upload operation
    pub fn upload_part(&self) -> Option<i32> {
        match self.id {
            ChunkId::Upload(part_number) => Some(part_number),
            _ => None,
        }
    }
}

/// Error codes returned by the remote store.
///
/// Wire codes are mapped through a fixed table; anything not in the table is kept verbatim in
/// [`ServiceErrorCode::Unknown`].
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum ServiceErrorCode {
    /// Access to the resource was denied
    AccessDenied,
    /// The request was malformed or inconsistent with the resource state
    BadRequest,
    /// A multipart part other than the last one was smaller than the minimum part size
    EntityTooSmall,
    /// The store hit an internal error
    InternalError,
    /// An argument of the request was invalid
    InvalidArgument,
    /// A part referenced on completion could not be found or its ETag did not match
    InvalidPart,
    /// The parts given on completion were not in ascending order
    InvalidPartOrder,
    /// The storage class is not valid
    InvalidStorageClass,
    /// The bucket does not exist
    NoSuchBucket,
    /// The object does not exist
    NoSuchKey,
    /// The multipart upload does not exist (aborted or completed)
    NoSuchUpload,
    /// A precondition of the request did not hold
    PreconditionFailed,
    /// The connection was idle too long
    RequestTimeout,
    /// The store is temporarily unavailable
    ServiceUnavailable,
    /// Too many requests, reduce the request rate
    SlowDown,
    /// The request was not authenticated
    Unauthorized,
    /// Any code not listed above
    Unknown(String),
}

const ERROR_CODES: &[(&str, ServiceErrorCode)] = &[
    ("AccessDenied", ServiceErrorCode::AccessDenied),
    ("BadRequest", ServiceErrorCode::BadRequest),
    ("EntityTooSmall", ServiceErrorCode::EntityTooSmall),
    ("InternalError", ServiceErrorCode::InternalError),
    ("InvalidArgument", ServiceErrorCode::InvalidArgument),
    ("InvalidPart", ServiceErrorCode::InvalidPart),
    ("InvalidPartOrder", ServiceErrorCode::InvalidPartOrder),
    ("InvalidStorageClass", ServiceErrorCode::InvalidStorageClass),
    ("NoSuchBucket", ServiceErrorCode::NoSuchBucket),
    ("NoSuchKey", ServiceErrorCode::NoSuchKey),
    ("NoSuchUpload", ServiceErrorCode::NoSuchUpload),
    ("PreconditionFailed", ServiceErrorCode::PreconditionFailed),
    ("RequestTimeout", ServiceErrorCode::RequestTimeout),
    ("ServiceUnavailable", ServiceErrorCode::ServiceUnavailable),
    ("SlowDown", ServiceErrorCode::SlowDown),
    ("Unauthorized", ServiceErrorCode::Unauthorized),
];

impl ServiceErrorCode {
    /// Map a wire error code (e.g. `NoSuchUpload`) to its variant
    pub fn from_code(code: &str) -> Self {
        ERROR_CODES
            .iter()
            .find(|(wire, _)| *wire == code)
            .map(|(_, variant)| variant.clone())
            .unwrap_or_else(|| ServiceErrorCode::Unknown(code.to_owned()))
    }

    /// Map an HTTP status of an error response that carried no error document
    pub fn from_status(status: http::StatusCode) -> Self {
        match status.as_u16() {
            400 => ServiceErrorCode::BadRequest,
            401 => ServiceErrorCode::Unauthorized,
            403 => ServiceErrorCode::AccessDenied,
            404 => ServiceErrorCode::NoSuchKey,
            408 => ServiceErrorCode::RequestTimeout,
            412 => ServiceErrorCode::PreconditionFailed,
            429 => ServiceErrorCode::SlowDown,
            500 => ServiceErrorCode::InternalError,
            503 => ServiceErrorCode::ServiceUnavailable,
            _ => ServiceErrorCode::Unknown(status.as_str().to_owned()),
        }
    }

    /// The wire representation of this code
    pub fn as_str(&self) -> &str {
        match self {
            ServiceErrorCode::Unknown(code) => code.as_str(),
            known => ERROR_CODES
                .iter()
                .find(|(_, variant)| variant == known)
                .map(|(wire, _)| *wire)
                .unwrap_or("Unknown"),
        }
    }

    /// Whether a request failing with this code is worth retrying as is
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ServiceErrorCode::InternalError
                | ServiceErrorCode::RequestTimeout
                | ServiceErrorCode::ServiceUnavailable
                | ServiceErrorCode::SlowDown
        )
    }
}

impl fmt::Display for ServiceErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Creates a new transfer [`Error`] from a known kind of error as well as an arbitrary error
    /// source.
    pub fn new<E>(kind: ErrorKind, err: E) -> Error
    where
        E: Into<BoxError>,
    {
        Error {
            kind,
            source: err.into(),
        }
    }

    /// Returns the corresponding [`ErrorKind`] for this error.
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// How a resumable transfer should react to this error.
    ///
    /// `None` means the error is not retryable and is surfaced to the caller as is.
    pub fn disposition(&self) -> Option<Disposition> {
        match &self.kind {
            ErrorKind::ResumableTransfer(disposition) => Some(*disposition),
            ErrorKind::Transport | ErrorKind::IOError => Some(Disposition::WaitBeforeRetry),
            ErrorKind::ServiceError(code) if code.is_retryable() => {
                Some(Disposition::WaitBeforeRetry)
            }
            _ => None,
        }
    }

    /// Returns true if the failed unit of work can be attempted again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.disposition(),
            Some(Disposition::StartOver | Disposition::WaitBeforeRetry)
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ErrorKind::InputInvalid => write!(f, "invalid input"),
            ErrorKind::IOError => write!(f, "I/O error"),
            ErrorKind::RuntimeError => write!(f, "runtime error"),
            ErrorKind::Transport => write!(f, "transport error"),
            ErrorKind::ServiceError(code) => write!(f, "service error ({code})"),
            ErrorKind::NotFound => write!(f, "resource not found"),
            ErrorKind::ChunkFailed(chunk_failed) => {
                write!(f, "failed to process chunk {:?}", chunk_failed.id)
            }
            ErrorKind::ResumableTransfer(disposition) => {
                write!(f, "resumable transfer failed ({disposition:?}): {}", self.source)
            }
            ErrorKind::OperationCancelled => write!(f, "operation cancelled"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::new(ErrorKind::IOError, value)
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(value: tokio::task::JoinError) -> Self {
        Self::new(ErrorKind::RuntimeError, value)
    }
}

impl From<http::Error> for Error {
    fn from(value: http::Error) -> Self {
        Self::new(ErrorKind::InputInvalid, value)
    }
}

impl From<aws_smithy_types::byte_stream::error::Error> for Error {
    fn from(value: aws_smithy_types::byte_stream::error::Error) -> Self {
        Self::new(ErrorKind::Transport, value)
    }
}

impl<E, R> From<SdkError<E, R>> for Error
where
    E: std::error::Error + ProvideErrorMetadata + Send + Sync + 'static,
    R: Send + Sync + fmt::Debug + 'static,
{
    fn from(value: SdkError<E, R>) -> Self {
        let kind = match &value {
            SdkError::ConstructionFailure(_) => ErrorKind::InputInvalid,
            SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
                ErrorKind::Transport
            }
            _ => match value.code() {
                Some("NotFound" | "NoSuchKey" | "NoSuchUpload" | "NoSuchBucket") => {
                    ErrorKind::NotFound
                }
                Some(code) => ErrorKind::ServiceError(ServiceErrorCode::from_code(code)),
                None => ErrorKind::ServiceError(ServiceErrorCode::Unknown("Unknown".to_owned())),
            },
        };

        Error::new(kind, value)
    }
}

pub(crate) fn invalid_input<E>(err: E) -> Error
where
    E: Into<BoxError>,
{
    Error::new(ErrorKind::InputInvalid, err)
}

pub(crate) fn transport<E>(err: E) -> Error
where
    E: Into<BoxError>,
{
    Error::new(ErrorKind::Transport, err)
}

pub(crate) fn chunk_failed<E>(id: ChunkId, err: E) -> Error
where
    E: Into<BoxError>,
{
    Error::new(ErrorKind::ChunkFailed(ChunkFailed { id }), err)
}

pub(crate) fn resumable<E>(disposition: Disposition, err: E) -> Error
where
    E: Into<BoxError>,
{
    Error::new(ErrorKind::ResumableTransfer(disposition), err)
}

/// Build an error for an unexpected HTTP response status.
pub(crate) fn unexpected_status(status: http::StatusCode, context: &str) -> Error {
    let message = format!("unexpected status {status} {context}");
    if status == http::StatusCode::NOT_FOUND {
        return Error::new(ErrorKind::NotFound, message);
    }
    Error::new(
        ErrorKind::ServiceError(ServiceErrorCode::from_status(status)),
        message,
    )
}

/// A response that parsed but lacks a field the operation depends on.
pub(crate) fn incomplete_response(what: &str) -> Error {
    Error::new(
        ErrorKind::ServiceError(ServiceErrorCode::Unknown("IncompleteResponse".to_owned())),
        format!("response is missing {what}"),
    )
}

pub(crate) fn from_kind<E>(kind: ErrorKind) -> impl FnOnce(E) -> Error
where
    E: Into<BoxError>,
{
    |err| Error::new(kind, err)
}

static CANCELLATION_ERROR: &str =
    "at least one unit of work failed, cancelling all ongoing requests";

pub(crate) fn operation_cancelled() -> Error {
    Error::new(ErrorKind::OperationCancelled, CANCELLATION_ERROR)
}
