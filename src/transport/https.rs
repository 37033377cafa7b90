// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 U.S. Federal Government (in countries where recognized)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Pooled HTTPS transport backed by `reqwest`.

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use url::Url;

use super::{RawResponse, SubmitRequest, Transport, TransportFault, TransportSession};
use crate::binding::{ChannelBinding, ChannelBindingProvider};
use crate::config::EstClientConfig;
use crate::error::{EstError, Result};
use crate::tls;

/// Transport that reuses a pooled `reqwest` client.
///
/// Connections are pooled, so there is no single TLS session to bind a
/// request to; proof-of-possession needs [`SessionTransport`](super::SessionTransport).
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpTransport {
    /// Build a transport from client configuration.
    pub fn new(config: &EstClientConfig) -> Result<Self> {
        Ok(Self {
            client: tls::build_http_client(config)?,
            base_url: config.server_url.clone(),
        })
    }

    /// Wrap an existing reqwest client.
    pub fn with_client(client: reqwest::Client, base_url: Url) -> Self {
        Self { client, base_url }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn connect(&self) -> std::result::Result<Box<dyn TransportSession>, TransportFault> {
        Ok(Box::new(HttpSession {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
        }))
    }
}

struct HttpSession {
    client: reqwest::Client,
    base_url: Url,
}

impl ChannelBindingProvider for HttpSession {
    fn current_binding(&self) -> Result<ChannelBinding> {
        Err(EstError::binding_unavailable(
            "pooled HTTP transport does not expose TLS session material",
        ))
    }
}

#[async_trait]
impl TransportSession for HttpSession {
    async fn submit(
        &mut self,
        request: &SubmitRequest,
    ) -> std::result::Result<RawResponse, TransportFault> {
        let mut url = self.base_url.clone();
        url.set_path(&request.path);

        tracing::debug!("POST {}", url);

        let mut builder = self
            .client
            .post(url)
            .header(CONTENT_TYPE, request.content_type)
            .body(request.body.clone());

        if let Some(ref authorization) = request.authorization {
            builder = builder.header(AUTHORIZATION, authorization.as_str());
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(map_reqwest_error)?;

        Ok(RawResponse::new(status, headers, body))
    }
}

fn map_reqwest_error(e: reqwest::Error) -> TransportFault {
    if e.is_timeout() {
        TransportFault::Timeout
    } else if e.is_connect() {
        TransportFault::connect(e.to_string())
    } else {
        TransportFault::http(e.to_string())
    }
}
