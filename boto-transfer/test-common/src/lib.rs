/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

//! Fakes and helpers shared by the `boto-transfer` integration tests.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::io::Write;
use std::iter;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use aws_smithy_async::rt::sleep::{AsyncSleep, SharedAsyncSleep, Sleep};
use boto_transfer::error::{Error, ErrorKind};
use boto_transfer::http::header::{ByteRange, ContentRange, X_GOOG_RESUMABLE};
use boto_transfer::http::{Body, Connection};
use boto_transfer::operation::download::source::{ObjectMeta, RangeSource};
use bytes::{Bytes, BytesMut};
use http::header::{CONTENT_LENGTH, CONTENT_RANGE, ETAG, LOCATION, RANGE};
use http::{Method, Request, Response, StatusCode};
use tempfile::NamedTempFile;

/// Random alphanumeric bytes
pub fn rand_data(size: usize) -> Bytes {
    iter::repeat_with(fastrand::alphanumeric)
        .take(size)
        .map(|x| x as u8)
        .collect::<Vec<_>>()
        .into()
}

/// A temporary file holding `data`
pub fn temp_file_with(data: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(data).unwrap();
    file.flush().unwrap();
    file
}

/// Quoted hex MD5 of `data`, the way the fake stores report ETags
pub fn md5_etag(data: &[u8]) -> String {
    format!("\"{:x}\"", md5::compute(data))
}

/// Sleep implementation that returns immediately and counts the sleeps requested
#[derive(Debug, Clone, Default)]
pub struct CountingSleep {
    count: Arc<AtomicUsize>,
}

impl CountingSleep {
    /// Share this sleep with a client config
    pub fn shared(&self) -> SharedAsyncSleep {
        SharedAsyncSleep::new(self.clone())
    }

    /// Number of sleeps requested so far
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl AsyncSleep for CountingSleep {
    fn sleep(&self, _duration: Duration) -> Sleep {
        self.count.fetch_add(1, Ordering::SeqCst);
        Sleep::new(async {})
    }
}

fn transport_error(msg: &str) -> Error {
    Error::new(ErrorKind::Transport, msg.to_owned())
}

/// Which resumable upload exchange a scripted status applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Exchange {
    /// `POST` with `x-goog-resumable: start`
    Start,
    /// `PUT` with `Content-Range: bytes */N` and no body
    Query,
    /// `PUT` carrying object bytes
    Chunk,
}

/// A request as received by [`FakeGcsServer`]
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// Exchange the request was classified as, `None` for plain object requests
    pub exchange: Option<Exchange>,
    /// Request method
    pub method: Method,
    /// Request headers
    pub headers: http::HeaderMap,
    /// Bytes of the body that reached the server
    pub body: Bytes,
}

#[derive(Debug, Default)]
struct Session {
    path: String,
    data: Vec<u8>,
    e_tag: Option<String>,
}

type Hook = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct ServerState {
    next_upload_id: u64,
    sessions: HashMap<String, Session>,
    objects: HashMap<String, Bytes>,
    scripted: HashMap<Exchange, VecDeque<StatusCode>>,
    break_after: VecDeque<u64>,
    on_break: Option<Hook>,
    e_tag_override: Option<String>,
    omit_location: bool,
    requests: Vec<RecordedRequest>,
}

/// In-memory fake of a Google Cloud Storage endpoint: resumable upload sessions, object
/// `HEAD`/ranged `GET`, and `DELETE`.
#[derive(Clone, Default)]
pub struct FakeGcsServer {
    state: Arc<Mutex<ServerState>>,
}

impl fmt::Debug for FakeGcsServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FakeGcsServer").finish_non_exhaustive()
    }
}

impl FakeGcsServer {
    /// A new server with no objects or sessions
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer the next `exchange` with `status` instead of processing it
    pub fn script(&self, exchange: Exchange, status: StatusCode) -> &Self {
        let mut state = self.state.lock().unwrap();
        state.scripted.entry(exchange).or_default().push_back(status);
        self
    }

    /// Reset the connection of the next chunk `PUT` after the server received `bytes` bytes of
    /// its body. Calls queue up, one per chunk request.
    pub fn break_after(&self, bytes: u64) -> &Self {
        self.state.lock().unwrap().break_after.push_back(bytes);
        self
    }

    /// Run `hook` the next time a connection is reset
    pub fn on_break(&self, hook: impl FnOnce() + Send + 'static) -> &Self {
        self.state.lock().unwrap().on_break = Some(Box::new(hook));
        self
    }

    /// Report `e_tag` for every finalized upload instead of the MD5 of the data
    pub fn override_e_tag(&self, e_tag: impl Into<String>) -> &Self {
        self.state.lock().unwrap().e_tag_override = Some(e_tag.into());
        self
    }

    /// Answer session starts without a `Location` header
    pub fn omit_location(&self, omit: bool) -> &Self {
        self.state.lock().unwrap().omit_location = omit;
        self
    }

    /// Store an object directly, e.g. as a download source
    pub fn put_object(&self, path: impl Into<String>, data: Bytes) {
        self.state.lock().unwrap().objects.insert(path.into(), data);
    }

    /// The finalized object at `path` (e.g. `/bucket/name`)
    pub fn object(&self, path: &str) -> Option<Bytes> {
        self.state.lock().unwrap().objects.get(path).cloned()
    }

    /// Number of sessions started so far
    pub fn sessions_started(&self) -> u64 {
        self.state.lock().unwrap().next_upload_id
    }

    /// Every request received so far
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    /// Requests received for `exchange`
    pub fn requests_for(&self, exchange: Exchange) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.exchange == Some(exchange))
            .collect()
    }

    /// Sum of object bytes received in chunk `PUT` bodies
    pub fn bytes_received(&self) -> u64 {
        self.requests_for(Exchange::Chunk)
            .iter()
            .map(|r| r.body.len() as u64)
            .sum()
    }

    fn record(
        &self,
        exchange: Option<Exchange>,
        parts: &http::request::Parts,
        body: Bytes,
    ) {
        self.state.lock().unwrap().requests.push(RecordedRequest {
            exchange,
            method: parts.method.clone(),
            headers: parts.headers.clone(),
            body,
        });
    }

    fn scripted(&self, exchange: Exchange) -> Option<StatusCode> {
        let mut state = self.state.lock().unwrap();
        state.scripted.get_mut(&exchange)?.pop_front()
    }

    fn start_session(&self, parts: &http::request::Parts) -> Response<Body> {
        let mut state = self.state.lock().unwrap();
        state.next_upload_id += 1;
        let upload_id = state.next_upload_id.to_string();
        let path = parts.uri.path().to_owned();
        state.sessions.insert(
            upload_id.clone(),
            Session {
                path: path.clone(),
                ..Default::default()
            },
        );

        let mut response = Response::builder().status(StatusCode::OK);
        if !state.omit_location {
            let authority = parts.uri.authority().map(|a| a.as_str()).unwrap_or("localhost");
            let scheme = parts.uri.scheme_str().unwrap_or("http");
            response = response.header(
                LOCATION,
                format!("{scheme}://{authority}{path}?upload_id={upload_id}"),
            );
        }
        response.body(Body::empty()).unwrap()
    }

    fn session_state(&self, upload_id: &str) -> Response<Body> {
        let state = self.state.lock().unwrap();
        let Some(session) = state.sessions.get(upload_id) else {
            return status_response(StatusCode::NOT_FOUND);
        };
        if let Some(e_tag) = &session.e_tag {
            return Response::builder()
                .status(StatusCode::OK)
                .header(ETAG, e_tag.as_str())
                .body(Body::empty())
                .unwrap();
        }
        let mut response = Response::builder().status(StatusCode::PERMANENT_REDIRECT);
        if !session.data.is_empty() {
            response = response.header(RANGE, format!("bytes=0-{}", session.data.len() - 1));
        }
        response.body(Body::empty()).unwrap()
    }

    async fn receive_chunk(
        &self,
        upload_id: &str,
        parts: &http::request::Parts,
        mut body: Body,
    ) -> Result<Response<Body>, Error> {
        let (start, total) = match header_str(&parts.headers, &CONTENT_RANGE) {
            None => (0, 0),
            Some(value) => match value.parse::<ContentRange>() {
                Ok(ContentRange::Bytes { start, total, .. }) => (start, total),
                Ok(ContentRange::Unsatisfied { total }) => (total, total),
                Err(_) => return Ok(status_response(StatusCode::BAD_REQUEST)),
            },
        };

        {
            let mut state = self.state.lock().unwrap();
            let Some(session) = state.sessions.get_mut(upload_id) else {
                return Ok(status_response(StatusCode::NOT_FOUND));
            };
            if start > session.data.len() as u64 {
                return Ok(status_response(StatusCode::BAD_REQUEST));
            }
            session.data.truncate(start as usize);
        }

        let limit = self.state.lock().unwrap().break_after.pop_front();
        let mut received = BytesMut::new();
        let mut broken = false;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|err| transport_error(&err.to_string()))?;
            received.extend_from_slice(&chunk);
            if let Some(limit) = limit {
                if received.len() as u64 >= limit {
                    received.truncate(limit as usize);
                    broken = true;
                    break;
                }
            }
        }
        let received = received.freeze();
        self.record(Some(Exchange::Chunk), parts, received.clone());

        let hook = {
            let mut guard = self.state.lock().unwrap();
            let state = &mut *guard;
            let session = state.sessions.get_mut(upload_id).expect("session exists");
            session.data.extend_from_slice(&received);

            // the object is finalized once every byte arrived, even if the response is lost
            let mut e_tag = None;
            if session.data.len() as u64 == total {
                let data = Bytes::copy_from_slice(&session.data);
                let finalized = state
                    .e_tag_override
                    .clone()
                    .unwrap_or_else(|| md5_etag(&data));
                session.e_tag = Some(finalized.clone());
                state.objects.insert(session.path.clone(), data);
                e_tag = Some(finalized);
            }
            if !broken {
                return Ok(match e_tag {
                    Some(e_tag) => Response::builder()
                        .status(StatusCode::OK)
                        .header(ETAG, e_tag)
                        .body(Body::empty())
                        .unwrap(),
                    None => status_response(StatusCode::PERMANENT_REDIRECT),
                });
            }
            state.on_break.take()
        };
        if let Some(hook) = hook {
            hook();
        }
        Err(transport_error("connection reset by peer"))
    }

    fn head_object(&self, path: &str) -> Response<Body> {
        match self.object(path) {
            Some(data) => Response::builder()
                .status(StatusCode::OK)
                .header(CONTENT_LENGTH, data.len())
                .header(ETAG, md5_etag(&data))
                .body(Body::empty())
                .unwrap(),
            None => status_response(StatusCode::NOT_FOUND),
        }
    }

    fn get_object(&self, path: &str, headers: &http::HeaderMap) -> Response<Body> {
        let Some(data) = self.object(path) else {
            return status_response(StatusCode::NOT_FOUND);
        };
        let range = header_str(headers, &RANGE)
            .and_then(|value| value.parse::<boto_transfer::http::header::Range>().ok());
        match range {
            None => Response::new(Body::from(data)),
            Some(range) => match slice(&data, range.0) {
                Some(bytes) => Response::builder()
                    .status(StatusCode::PARTIAL_CONTENT)
                    .body(Body::from(bytes))
                    .unwrap(),
                None => status_response(StatusCode::RANGE_NOT_SATISFIABLE),
            },
        }
    }
}

fn header_str<'a>(headers: &'a http::HeaderMap, name: &http::header::HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn status_response(status: StatusCode) -> Response<Body> {
    Response::builder()
        .status(status)
        .body(Body::empty())
        .unwrap()
}

fn upload_id(uri: &http::Uri) -> Option<String> {
    uri.query()?
        .split('&')
        .find_map(|pair| pair.strip_prefix("upload_id="))
        .map(str::to_owned)
}

/// The bytes of `data` selected by `range`, `None` when unsatisfiable
pub fn slice(data: &Bytes, range: ByteRange) -> Option<Bytes> {
    let len = data.len() as u64;
    let (start, end) = match range {
        ByteRange::Inclusive(start, end) => (start, end.min(len.saturating_sub(1))),
        ByteRange::AllFrom(start) => (start, len.saturating_sub(1)),
        ByteRange::Last(n) => (len.saturating_sub(n), len.saturating_sub(1)),
    };
    if start >= len {
        return None;
    }
    Some(data.slice(start as usize..=end as usize))
}

#[async_trait]
impl Connection for FakeGcsServer {
    async fn send(&self, request: Request<Body>) -> Result<Response<Body>, Error> {
        let (parts, body) = request.into_parts();

        if parts.method == Method::POST
            && header_str(&parts.headers, &http::header::HeaderName::from_static(X_GOOG_RESUMABLE))
                == Some("start")
        {
            self.record(Some(Exchange::Start), &parts, Bytes::new());
            if let Some(status) = self.scripted(Exchange::Start) {
                return Ok(status_response(status));
            }
            return Ok(self.start_session(&parts));
        }

        if parts.method == Method::PUT {
            let Some(upload_id) = upload_id(&parts.uri) else {
                return Ok(status_response(StatusCode::BAD_REQUEST));
            };
            let is_query = header_str(&parts.headers, &CONTENT_RANGE)
                .is_some_and(|value| value.starts_with("bytes */"))
                && header_str(&parts.headers, &CONTENT_LENGTH) == Some("0");
            if is_query {
                self.record(Some(Exchange::Query), &parts, Bytes::new());
                if let Some(status) = self.scripted(Exchange::Query) {
                    return Ok(status_response(status));
                }
                return Ok(self.session_state(&upload_id));
            }
            if let Some(status) = self.scripted(Exchange::Chunk) {
                let _ = body.collect().await;
                self.record(Some(Exchange::Chunk), &parts, Bytes::new());
                return Ok(status_response(status));
            }
            return self.receive_chunk(&upload_id, &parts, body).await;
        }

        self.record(None, &parts, Bytes::new());
        let path = parts.uri.path().to_owned();
        let response = match parts.method {
            Method::HEAD => self.head_object(&path),
            Method::GET => self.get_object(&path, &parts.headers),
            Method::DELETE => {
                let removed = self.state.lock().unwrap().objects.remove(&path);
                match removed {
                    Some(_) => status_response(StatusCode::NO_CONTENT),
                    None => status_response(StatusCode::NOT_FOUND),
                }
            }
            _ => status_response(StatusCode::METHOD_NOT_ALLOWED),
        };
        Ok(response)
    }
}

#[derive(Debug, Default)]
struct ObjectFaults {
    /// remaining failures keyed by the first byte of the failing range
    fail_at: HashMap<u64, usize>,
    /// bytes served before the next response is cut short
    interrupt_after: VecDeque<u64>,
    requests: Vec<ByteRange>,
}

/// An in-memory [`RangeSource`] with optional random latency and fault injection.
#[derive(Debug, Clone)]
pub struct InMemoryObject {
    data: Bytes,
    e_tag: Option<String>,
    max_latency: Option<Duration>,
    faults: Arc<Mutex<ObjectFaults>>,
}

impl InMemoryObject {
    /// An object holding `data` with the MD5 of the data as ETag
    pub fn new(data: Bytes) -> Self {
        Self {
            e_tag: Some(md5_etag(&data)),
            data,
            max_latency: None,
            faults: Arc::default(),
        }
    }

    /// Replace the ETag
    pub fn with_e_tag(mut self, e_tag: Option<String>) -> Self {
        self.e_tag = e_tag;
        self
    }

    /// Delay every ranged response by a random duration up to `max`, scrambling the order in
    /// which concurrent requests complete
    pub fn with_random_latency(mut self, max: Duration) -> Self {
        self.max_latency = Some(max);
        self
    }

    /// Fail the next `times` requests for ranges starting at `start`
    pub fn fail_range_at(&self, start: u64, times: usize) {
        self.faults.lock().unwrap().fail_at.insert(start, times);
    }

    /// Cut the next response short after `bytes` bytes. Calls queue up, one per request.
    pub fn interrupt_after(&self, bytes: u64) {
        self.faults.lock().unwrap().interrupt_after.push_back(bytes);
    }

    /// Ranges requested so far
    pub fn requests(&self) -> Vec<ByteRange> {
        self.faults.lock().unwrap().requests.clone()
    }
}

#[async_trait]
impl RangeSource for InMemoryObject {
    async fn object_meta(&self) -> Result<ObjectMeta, Error> {
        Ok(ObjectMeta::new(self.data.len() as u64, self.e_tag.clone()))
    }

    async fn get_range(&self, range: ByteRange) -> Result<Body, Error> {
        if let Some(max) = self.max_latency {
            let millis = fastrand::u64(0..=max.as_millis() as u64);
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }

        let interrupt = {
            let mut faults = self.faults.lock().unwrap();
            faults.requests.push(range);
            if let Some(start) = range.start() {
                if let Some(remaining) = faults.fail_at.get_mut(&start) {
                    if *remaining > 0 {
                        *remaining -= 1;
                        return Err(transport_error("injected range failure"));
                    }
                }
            }
            faults.interrupt_after.pop_front()
        };

        let Some(bytes) = slice(&self.data, range) else {
            return Err(Error::new(
                ErrorKind::InputInvalid,
                format!("range {range} not satisfiable"),
            ));
        };
        match interrupt {
            None => Ok(Body::from(bytes)),
            Some(limit) => {
                let served = bytes.slice(..(limit as usize).min(bytes.len()));
                let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
                    Ok(served),
                    Err(std::io::Error::new(
                        std::io::ErrorKind::ConnectionReset,
                        "connection reset by peer",
                    )),
                ];
                Ok(Body::from_stream(futures_util::stream::iter(chunks)))
            }
        }
    }
}
