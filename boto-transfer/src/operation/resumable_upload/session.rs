/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

//! Wire exchanges of the resumable upload protocol.

use std::fmt;
use std::str::FromStr;

use http::header::{HeaderMap, HeaderValue, CONTENT_LENGTH, CONTENT_RANGE, ETAG, LOCATION, RANGE};
use http::{Method, Request, StatusCode, Uri};

use crate::error::{self, Disposition, Error};
use crate::http::header::{ByteRange, ContentRange, Range, X_GOOG_RESUMABLE};
use crate::http::{Body, Connection};
use crate::types::ObjectKey;

/// URI of a resumable upload session, as returned in the `Location` of the session start.
///
/// Only `http`/`https` URIs with a host and an `upload_id` query parameter are accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUri {
    uri: Uri,
}

impl SessionUri {
    /// The session URI as a string
    pub fn as_str(&self) -> String {
        self.uri.to_string()
    }

    pub(crate) fn uri(&self) -> &Uri {
        &self.uri
    }
}

impl FromStr for SessionUri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || error::invalid_input(format!("invalid session URI: {s:?}"));
        let uri: Uri = s.trim().parse().map_err(|_| invalid())?;

        let scheme_ok = uri.scheme_str().is_some_and(|scheme| {
            scheme.eq_ignore_ascii_case("http") || scheme.eq_ignore_ascii_case("https")
        });
        let host_ok = uri.host().is_some_and(|host| !host.is_empty());
        let has_upload_id = uri.query().is_some_and(|query| {
            query
                .split('&')
                .any(|pair| pair.split('=').next() == Some("upload_id"))
        });

        if scheme_ok && host_ok && has_upload_id {
            Ok(SessionUri { uri })
        } else {
            Err(invalid())
        }
    }
}

impl fmt::Display for SessionUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.uri, f)
    }
}

/// What the store reports about a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum ServerState {
    /// Every byte was received and the object is finalized
    Complete { e_tag: Option<String> },
    /// The store holds the first `confirmed` bytes
    Incomplete { confirmed: u64 },
    /// The store answered with an unexpected status
    Rejected(StatusCode),
}

fn header_str<'a>(headers: &'a HeaderMap, name: &http::header::HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn length_header(len: u64) -> HeaderValue {
    HeaderValue::from(len)
}

/// Begin a new session for `key`.
pub(super) async fn start(
    conn: &dyn Connection,
    key: &ObjectKey,
    headers: &HeaderMap,
) -> Result<SessionUri, Error> {
    if headers.contains_key(CONTENT_LENGTH) {
        return Err(error::resumable(
            Disposition::Abort,
            "attempt to specify Content-Length header (disallowed)",
        ));
    }

    let mut request = Request::builder()
        .method(Method::POST)
        .uri(key.uri())
        .body(Body::empty())?;
    request.headers_mut().extend(headers.clone());
    request
        .headers_mut()
        .insert(X_GOOG_RESUMABLE, HeaderValue::from_static("start"));

    tracing::debug!("starting new resumable upload for {key}");
    let response = conn.send(request).await?;
    let status = response.status();
    match status {
        StatusCode::INTERNAL_SERVER_ERROR | StatusCode::SERVICE_UNAVAILABLE => {
            return Err(error::resumable(
                Disposition::WaitBeforeRetry,
                format!("got status {status} from attempt to start resumable upload, will retry"),
            ))
        }
        StatusCode::OK | StatusCode::CREATED => {}
        _ => {
            return Err(error::resumable(
                Disposition::Abort,
                format!("got status {status} from attempt to start resumable upload, aborting"),
            ))
        }
    }

    let location = header_str(response.headers(), &LOCATION).ok_or_else(|| {
        error::resumable(
            Disposition::WaitBeforeRetry,
            "no session URI found in resumable upload start response",
        )
    })?;
    location.parse::<SessionUri>().map_err(|err| {
        error::resumable(
            Disposition::Abort,
            format!("resumable upload start returned an unusable session URI: {err}"),
        )
    })
}

/// Ask the store how much of the session it holds.
///
/// A 308 with an unparseable `Range` fails with [`Disposition::StartOver`].
pub(super) async fn query(
    conn: &dyn Connection,
    session: &SessionUri,
    total: u64,
) -> Result<ServerState, Error> {
    let request = Request::builder()
        .method(Method::PUT)
        .uri(session.uri().clone())
        .header(
            CONTENT_RANGE,
            ContentRange::Unsatisfied { total }.to_string(),
        )
        .header(CONTENT_LENGTH, length_header(0))
        .body(Body::empty())?;

    let response = conn.send(request).await?;
    let status = response.status();
    let state = match status {
        StatusCode::OK | StatusCode::CREATED => ServerState::Complete {
            e_tag: header_str(response.headers(), &ETAG).map(str::to_owned),
        },
        StatusCode::PERMANENT_REDIRECT => match header_str(response.headers(), &RANGE) {
            None => ServerState::Incomplete { confirmed: 0 },
            Some(value) => match Range::from_str(value) {
                Ok(Range(ByteRange::Inclusive(_, end))) => {
                    ServerState::Incomplete { confirmed: end + 1 }
                }
                _ => {
                    return Err(error::resumable(
                        Disposition::StartOver,
                        format!("couldn't parse upload server state range {value:?}"),
                    ))
                }
            },
        },
        status => ServerState::Rejected(status),
    };
    tracing::trace!("session state query answered {status}: {state:?}");
    Ok(state)
}

/// Send bytes `start..total` of the object; returns the ETag of the finalized object.
pub(super) async fn put_bytes(
    conn: &dyn Connection,
    session: &SessionUri,
    body: Body,
    start: u64,
    total: u64,
) -> Result<String, Error> {
    let mut request = Request::builder()
        .method(Method::PUT)
        .uri(session.uri().clone())
        .header(CONTENT_LENGTH, length_header(total - start))
        .body(body)?;
    if total > 0 {
        request.headers_mut().insert(
            CONTENT_RANGE,
            HeaderValue::try_from(ContentRange::remaining(start, total).to_string())
                .map_err(error::invalid_input)?,
        );
    }

    tracing::debug!("sending bytes {start}..{total} to {session}");
    let response = conn.send(request).await?;
    let status = response.status();
    match status {
        StatusCode::OK | StatusCode::CREATED => header_str(response.headers(), &ETAG)
            .map(str::to_owned)
            .ok_or_else(|| {
                error::resumable(
                    Disposition::Abort,
                    "resumable upload completed without an ETag",
                )
            }),
        StatusCode::REQUEST_TIMEOUT
        | StatusCode::INTERNAL_SERVER_ERROR
        | StatusCode::SERVICE_UNAVAILABLE => Err(error::resumable(
            Disposition::WaitBeforeRetry,
            format!("got response code {status} while attempting upload"),
        )),
        _ => Err(error::resumable(
            Disposition::Abort,
            format!("got response code {status} while attempting upload"),
        )),
    }
}

/// Remove an object that was uploaded with the wrong content.
pub(super) async fn delete_object(conn: &dyn Connection, key: &ObjectKey) -> Result<(), Error> {
    let request = Request::builder()
        .method(Method::DELETE)
        .uri(key.uri())
        .body(Body::empty())?;
    let response = conn.send(request).await?;
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(error::unexpected_status(status, &format!("deleting {key}")))
    }
}
