/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use http::{HeaderMap, StatusCode};

use crate::client::Handle;
use crate::error::{self, Disposition, Error};
use crate::io::source::source_body;
use crate::io::{InputSource, ProgressReporter, TrackerFile};
use crate::middleware::retry::{orchestrate, ProgressRetry, Resumable};
use crate::types::{ObjectKey, StaleSessionPolicy};

mod session;
use session::ServerState;
pub use session::SessionUri;

/// Result of a completed resumable upload
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct ResumableUploadOutput {
    e_tag: String,
    upload_start_point: u64,
}

impl ResumableUploadOutput {
    /// ETag of the uploaded object as returned by the store
    pub fn e_tag(&self) -> &str {
        &self.e_tag
    }

    /// Offset the first attempt of this handler started sending from
    pub fn upload_start_point(&self) -> u64 {
        self.upload_start_point
    }
}

/// Session state kept across `send` calls of one handler
#[derive(Debug, Default)]
struct UploadSession {
    uri: Option<SessionUri>,
    confirmed: u64,
    tracker_loaded: bool,
    upload_start_point: Option<u64>,
}

/// Uploads an object with the Google Cloud Storage resumable upload protocol.
///
/// Instantiate one handler per uploaded object. With a tracker file the session URI survives
/// the process, and a later handler given the same tracker picks the upload up where the
/// store says it stopped.
#[derive(Debug)]
pub struct ResumableUploadHandler {
    handle: Arc<Handle>,
    tracker: Option<TrackerFile>,
    num_retries: usize,
    stale_session_policy: StaleSessionPolicy,
    session: UploadSession,
}

impl ResumableUploadHandler {
    pub(crate) fn new(handle: Arc<Handle>) -> Self {
        let num_retries = handle.config.num_retries();
        let stale_session_policy = handle.config.stale_session_policy();
        Self {
            handle,
            tracker: None,
            num_retries,
            stale_session_policy,
            session: UploadSession::default(),
        }
    }

    /// Persist the session URI to `path` so the upload can be resumed by another process.
    pub fn tracker_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.tracker = Some(TrackerFile::new(path));
        self.session.tracker_loaded = false;
        self
    }

    /// Number of consecutive attempts without progress tolerated before giving up.
    pub fn num_retries(mut self, num_retries: usize) -> Self {
        self.num_retries = num_retries;
        self
    }

    /// How a persisted session that no longer answers with a resumable status is treated.
    pub fn stale_session_policy(mut self, policy: StaleSessionPolicy) -> Self {
        self.stale_session_policy = policy;
        self
    }

    /// The current session URI, `None` until a session was established or loaded
    pub fn session_uri(&self) -> Option<&SessionUri> {
        self.session.uri.as_ref()
    }

    /// Offset the first attempt of this handler started sending from
    pub fn upload_start_point(&self) -> Option<u64> {
        self.session.upload_start_point
    }

    async fn load_tracker(&mut self) {
        if self.session.tracker_loaded {
            return;
        }
        self.session.tracker_loaded = true;
        let Some(tracker) = &self.tracker else {
            return;
        };
        let Some(token) = tracker.load().await else {
            return;
        };
        match token.parse::<SessionUri>() {
            Ok(uri) => {
                tracing::debug!("loaded session {uri} from {}", tracker.path().display());
                self.session.uri = Some(uri);
                self.session.confirmed = 0;
            }
            Err(_) => tracing::warn!(
                "invalid session URI ({token}) found in tracker file {}, restarting upload from scratch",
                tracker.path().display()
            ),
        }
    }

    /// Upload `source` to `key`.
    ///
    /// `headers` are sent with the session start request (e.g. `Content-Type`); a
    /// `Content-Length` header is rejected. Calling `send` again after a success does not resend
    /// any bytes and returns the same ETag.
    #[tracing::instrument(skip_all, level = "debug", name = "resumable-upload", fields(key = %key))]
    pub async fn send(
        &mut self,
        key: &ObjectKey,
        source: &InputSource,
        headers: &HeaderMap,
        progress: Option<&ProgressReporter>,
    ) -> Result<ResumableUploadOutput, Error> {
        let handle = self.handle.clone();
        handle.metrics.increment_initiated();

        let result = self.send_inner(key, source, headers, progress).await;
        let sent = match &result {
            Ok(output) => self
                .session
                .confirmed
                .saturating_sub(output.upload_start_point),
            Err(_) => 0,
        };
        handle.metrics.record_outcome(&result, sent);
        result
    }

    async fn send_inner(
        &mut self,
        key: &ObjectKey,
        source: &InputSource,
        headers: &HeaderMap,
        progress: Option<&ProgressReporter>,
    ) -> Result<ResumableUploadOutput, Error> {
        self.load_tracker().await;

        let total = source.size().await?;
        let md5 = source.md5_hex().await?;
        let sleep_impl = self.handle.config.sleep_impl().clone();
        let mut retry = ProgressRetry::new(self.num_retries, sleep_impl);

        let mut attempt = UploadAttempt {
            handle: &self.handle,
            tracker: self.tracker.as_ref(),
            stale_session_policy: self.stale_session_policy,
            session: &mut self.session,
            key,
            source,
            headers,
            progress,
            total,
            md5,
        };
        let output = orchestrate(&mut retry, &mut attempt).await?;
        tracing::debug!(attempts = retry.attempts(), "resumable upload of {key} complete");
        Ok(output)
    }
}

/// One `send` call, attempted until it completes or fails for good
struct UploadAttempt<'a> {
    handle: &'a Handle,
    tracker: Option<&'a TrackerFile>,
    stale_session_policy: StaleSessionPolicy,
    session: &'a mut UploadSession,
    key: &'a ObjectKey,
    source: &'a InputSource,
    headers: &'a HeaderMap,
    progress: Option<&'a ProgressReporter>,
    total: u64,
    md5: String,
}

impl UploadAttempt<'_> {
    /// Resume the persisted session or start a new one.
    ///
    /// Returns the ETag when the store reports the upload as already finalized.
    async fn resume_or_start(&mut self) -> Result<Option<String>, Error> {
        if let Some(uri) = self.session.uri.clone() {
            match session::query(self.handle.connection(), &uri, self.total).await {
                Ok(ServerState::Complete { e_tag }) => {
                    tracing::debug!("session {uri} already complete");
                    self.session.confirmed = self.total;
                    return e_tag.map(Some).ok_or_else(|| {
                        error::resumable(
                            Disposition::Abort,
                            "completed upload session reported no ETag",
                        )
                    });
                }
                Ok(ServerState::Incomplete { confirmed }) => {
                    tracing::debug!("resuming session {uri}, store has {confirmed} bytes");
                    self.session.confirmed = confirmed;
                    return Ok(None);
                }
                Ok(ServerState::Rejected(status)) => {
                    let auth_failure =
                        status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN;
                    let policy = self.stale_session_policy;
                    if auth_failure && policy == StaleSessionPolicy::AbortOnAuthFailure {
                        return Err(error::resumable(
                            Disposition::Abort,
                            format!("session state query was refused with status {status}"),
                        ));
                    }
                    tracing::debug!("unable to resume session {uri} ({status}), starting over");
                }
                Err(err) if err.disposition() == Some(Disposition::StartOver) => {
                    tracing::debug!("unable to resume session {uri} ({err}), starting over");
                }
                Err(err) => return Err(err),
            }
        }

        self.start_new_session().await?;
        Ok(None)
    }

    async fn start_new_session(&mut self) -> Result<(), Error> {
        self.session.confirmed = 0;
        let uri = session::start(self.handle.connection(), self.key, self.headers).await?;
        tracing::debug!("started session {uri}");
        self.session.uri = Some(uri.clone());
        if let Some(tracker) = self.tracker {
            tracker.save(&uri.as_str()).await?;
        }
        Ok(())
    }

    /// Stream the bytes the store does not have yet
    async fn send_remaining(&mut self, uri: &SessionUri) -> Result<String, Error> {
        let start = self.session.confirmed.min(self.total);
        let buffer_size = self.handle.config.buffer_size();
        let reader = self.source.reader_at(start).await?;
        let progress = self
            .progress
            .map(|reporter| reporter.tracker(self.total, buffer_size));
        let (body, stats) = source_body(reader, start, self.total - start, buffer_size, progress);

        let conn = self.handle.connection();
        let result = session::put_bytes(conn, uri, body, start, self.total).await;
        if stats.source_changed() {
            return Err(error::resumable(
                Disposition::Abort,
                format!(
                    "file changed during upload: read {} of {} expected bytes",
                    stats.bytes_read(),
                    self.total - start
                ),
            ));
        }

        match result {
            Ok(e_tag) => Ok(e_tag),
            Err(err) => Err(self.after_failed_send(uri, err).await),
        }
    }

    /// Query the session after a failed send so the retry loop sees the progress it made.
    async fn after_failed_send(&mut self, uri: &SessionUri, err: Error) -> Error {
        match session::query(self.handle.connection(), uri, self.total).await {
            Ok(ServerState::Incomplete { confirmed }) => {
                if confirmed < self.session.confirmed {
                    tracing::warn!(
                        "store reports {confirmed} bytes, fewer than the {} previously confirmed",
                        self.session.confirmed
                    );
                }
                self.session.confirmed = confirmed;
                err
            }
            Ok(ServerState::Rejected(StatusCode::BAD_REQUEST)) => error::resumable(
                Disposition::Abort,
                format!(
                    "got 400 response from server state query after failed resumable upload attempt \
                     ({err}); the request may be invalid or the file size changed between attempts"
                ),
            ),
            Ok(_) => err,
            Err(query_err) => {
                tracing::debug!("state query after failed send also failed: {query_err}");
                err
            }
        }
    }

    /// Compare the store's ETag with the local MD5; delete the object on mismatch.
    async fn verify(&mut self, e_tag: String) -> Result<ResumableUploadOutput, Error> {
        let remote = e_tag.trim_matches(|c| c == '"' || c == '\'');
        if remote != self.md5 {
            tracing::error!(
                "md5 mismatch for {}: local {} remote {remote}, deleting object",
                self.key,
                self.md5
            );
            if let Err(err) = session::delete_object(self.handle.connection(), self.key).await {
                tracing::warn!("couldn't delete corrupt object {}: {err}", self.key);
            }
            return Err(error::resumable(
                Disposition::Abort,
                "file changed during upload: md5 signature doesn't match etag \
                 (incorrect uploaded object deleted)",
            ));
        }

        Ok(ResumableUploadOutput {
            e_tag,
            upload_start_point: self.session.upload_start_point.unwrap_or_default(),
        })
    }
}

#[async_trait]
impl Resumable for UploadAttempt<'_> {
    type Output = ResumableUploadOutput;

    fn bytes_confirmed(&self) -> u64 {
        self.session.confirmed
    }

    async fn attempt(&mut self) -> Result<ResumableUploadOutput, Error> {
        let size = self.source.size().await?;
        if size != self.total {
            return Err(error::resumable(
                Disposition::Abort,
                format!(
                    "file size changed during upload: expected {} bytes, found {size}",
                    self.total
                ),
            ));
        }

        let e_tag = match self.resume_or_start().await? {
            Some(e_tag) => {
                self.session.upload_start_point.get_or_insert(self.total);
                e_tag
            }
            None => {
                self.session
                    .upload_start_point
                    .get_or_insert(self.session.confirmed);
                let uri = self.session.uri.clone().ok_or_else(|| {
                    error::Error::new(error::ErrorKind::RuntimeError, "no upload session")
                })?;
                self.send_remaining(&uri).await?
            }
        };

        self.session.confirmed = self.total;
        if let Some(tracker) = self.tracker {
            tracker.remove().await;
        }
        self.verify(e_tag).await
    }

    async fn discard(&mut self) {
        self.session.uri = None;
        self.session.confirmed = 0;
        if let Some(tracker) = self.tracker {
            tracker.remove().await;
        }
    }
}
