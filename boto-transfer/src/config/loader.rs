/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use crate::config::Builder;
use crate::http::Connection;
use crate::types::{ChunkRetryConfig, ConcurrencySetting, PartSize};
use crate::Config;

/// Environment variable overriding the resumable transfer retry budget
pub const NUM_RETRIES_ENV_VAR: &str = "BOTO_TRANSFER_NUM_RETRIES";

/// Load transfer [`Config`] from the environment.
#[derive(Default, Debug)]
pub struct ConfigLoader {
    builder: Builder,
    num_retries: Option<usize>,
}

impl ConfigLoader {
    /// Number of consecutive attempts without progress a resumable transfer tolerates.
    ///
    /// Takes precedence over the `BOTO_TRANSFER_NUM_RETRIES` environment variable.
    pub fn num_retries(mut self, num_retries: usize) -> Self {
        self.num_retries = Some(num_retries);
        self
    }

    /// The size of each byte range fetched by a concurrent download.
    pub fn part_size(mut self, part_size: PartSize) -> Self {
        self.builder = self.builder.part_size(part_size);
        self
    }

    /// The target size of each part of a multipart upload, at least 5 MiB.
    pub fn multipart_part_size(mut self, part_size: PartSize) -> Self {
        self.builder = self.builder.multipart_part_size(part_size);
        self
    }

    /// Set the number of workers a concurrent transfer may use.
    pub fn concurrency(mut self, concurrency: ConcurrencySetting) -> Self {
        self.builder = self.builder.concurrency(concurrency);
        self
    }

    /// Retry settings for individual download chunks and multipart parts.
    pub fn chunk_retry(mut self, chunk_retry: ChunkRetryConfig) -> Self {
        self.builder = self.builder.chunk_retry(chunk_retry);
        self
    }

    /// Set the connection used for plain HTTP transfers.
    pub fn connection(mut self, connection: impl Connection + 'static) -> Self {
        self.builder = self.builder.connection(connection);
        self
    }

    /// Load the default configuration
    ///
    /// If fields have been overridden during builder construction, the override values will be
    /// used. Otherwise, the default values for each field will be provided.
    pub async fn load(self) -> Config {
        let shared_config = aws_config::from_env().load().await;
        let s3_client = aws_sdk_s3::Client::new(&shared_config);
        let mut builder = self.builder.s3_client(s3_client);

        let num_retries = self.num_retries.or_else(|| {
            parse_num_retries(std::env::var(NUM_RETRIES_ENV_VAR).ok().as_deref())
        });
        if let Some(num_retries) = num_retries {
            builder = builder.num_retries(num_retries);
        }
        builder.build()
    }
}

fn parse_num_retries(value: Option<&str>) -> Option<usize> {
    let value = value?;
    match value.trim().parse() {
        Ok(num_retries) => Some(num_retries),
        Err(err) => {
            tracing::warn!("ignoring {NUM_RETRIES_ENV_VAR}={value:?}: {err}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::parse_num_retries;

    #[test]
    fn test_parse_num_retries() {
        assert_eq!(Some(7), parse_num_retries(Some("7")));
        assert_eq!(Some(0), parse_num_retries(Some(" 0 ")));
        assert_eq!(None, parse_num_retries(Some("many")));
        assert_eq!(None, parse_num_retries(None));
    }
}
