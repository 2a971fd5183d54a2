/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{self, Disposition, Error};

/// A local file holding a single resumption token (an upload session URI or a download ETag).
///
/// The file holds exactly one line. Loading never fails: a missing or unreadable tracker is
/// treated as absent. Saving failures abort the transfer since a token that cannot be persisted
/// cannot be resumed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerFile {
    path: PathBuf,
}

impl TrackerFile {
    /// Track a transfer in the file at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the tracker file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted token, if any.
    pub async fn load(&self) -> Option<String> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => {
                let token = contents.lines().next().unwrap_or_default().trim();
                if token.is_empty() {
                    None
                } else {
                    Some(token.to_owned())
                }
            }
            Err(err) if err.kind() == IoErrorKind::NotFound => None,
            Err(err) => {
                tracing::warn!(
                    "couldn't read tracker file {}: {err}; restarting transfer from scratch",
                    self.path.display()
                );
                None
            }
        }
    }

    /// Persist `token`, replacing any previous one.
    pub async fn save(&self, token: &str) -> Result<(), Error> {
        tokio::fs::write(&self.path, format!("{token}\n"))
            .await
            .map_err(|err| {
                tracing::error!("couldn't write tracker file {}: {err}", self.path.display());
                error::resumable(
                    Disposition::Abort,
                    format!(
                        "couldn't write tracker file {}: {err}; the transfer cannot be resumed",
                        self.path.display()
                    ),
                )
            })
    }

    /// Delete the tracker file. A missing file is not an error.
    pub async fn remove(&self) {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => tracing::trace!("removed tracker file {}", self.path.display()),
            Err(err) if err.kind() == IoErrorKind::NotFound => {}
            Err(err) => tracing::warn!(
                "couldn't remove tracker file {}: {err}",
                self.path.display()
            ),
        }
    }
}
