/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

/// Output from downloading an object to a local file
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadOutput {
    pub(crate) size: u64,
    pub(crate) parts: u64,
    pub(crate) e_tag: Option<String>,
}

impl DownloadOutput {
    /// Size of the object in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Number of ranged requests the object was fetched in
    pub fn parts(&self) -> u64 {
        self.parts
    }

    /// ETag of the downloaded object
    pub fn e_tag(&self) -> Option<&str> {
        self.e_tag.as_deref()
    }
}
