/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use async_trait::async_trait;

use super::{Body, Connection};
use crate::error::{self, Error};

/// [`Connection`] backed by a pooled [`reqwest::Client`].
#[derive(Debug, Clone, Default)]
pub struct ReqwestConnection {
    client: reqwest::Client,
}

impl ReqwestConnection {
    /// Wrap an existing client, e.g. one configured with proxies or default auth headers
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn map_reqwest_error(err: reqwest::Error) -> Error {
    if err.is_builder() {
        error::invalid_input(err)
    } else {
        error::transport(err)
    }
}

#[async_trait]
impl Connection for ReqwestConnection {
    async fn send(&self, request: ::http::Request<Body>) -> Result<::http::Response<Body>, Error> {
        let (parts, body) = request.into_parts();
        let body = match body.try_into_bytes() {
            Ok(data) => reqwest::Body::from(data),
            Err(body) => reqwest::Body::wrap_stream(body.into_stream()),
        };

        tracing::trace!("sending {} {}", parts.method, parts.uri);
        let response = self
            .client
            .request(parts.method, parts.uri.to_string())
            .headers(parts.headers)
            .body(body)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        let headers = response.headers().clone();
        let mut mapped = ::http::Response::new(Body::from_stream(response.bytes_stream()));
        *mapped.status_mut() = status;
        *mapped.headers_mut() = headers;
        Ok(mapped)
    }
}
