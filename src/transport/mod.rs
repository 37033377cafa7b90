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

//! Transport abstraction for submitting enrollment requests.
//!
//! The enrollment core only needs to POST a body to an EST path and read the
//! raw response back. A [`Transport`] opens a [`TransportSession`] over a
//! trust-anchored TLS connection; the session submits requests and, when the
//! underlying connection allows it, exposes the channel binding used for
//! proof-of-possession.
//!
//! Two implementations ship with the crate:
//!
//! - [`HttpTransport`]: pooled `reqwest` client, no channel binding
//! - [`SessionTransport`]: one rustls connection per session with an RFC 9266
//!   `tls-exporter` binding

mod https;
mod session;

pub use self::https::HttpTransport;
pub use self::session::SessionTransport;

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use thiserror::Error;

use crate::auth::Authorization;
use crate::binding::ChannelBindingProvider;

/// Network or TLS layer failure.
///
/// Distinct from a rejection: the server never made a protocol decision.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportFault {
    /// Could not establish the TCP connection.
    #[error("connection failed: {0}")]
    Connect(String),

    /// TLS handshake or trust-anchor validation failed.
    #[error("TLS failure: {0}")]
    Tls(String),

    /// HTTP exchange failed after the connection was established.
    #[error("HTTP failure: {0}")]
    Http(String),

    /// A single attempt exceeded the per-request timeout.
    #[error("request timed out")]
    Timeout,

    /// The overall enrollment deadline passed.
    #[error("enrollment deadline exceeded")]
    DeadlineExceeded,

    /// The caller cancelled the enrollment.
    #[error("enrollment cancelled")]
    Cancelled,
}

impl TransportFault {
    /// Create a connection fault.
    pub fn connect(msg: impl Into<String>) -> Self {
        Self::Connect(msg.into())
    }

    /// Create a TLS fault.
    pub fn tls(msg: impl Into<String>) -> Self {
        Self::Tls(msg.into())
    }

    /// Create an HTTP fault.
    pub fn http(msg: impl Into<String>) -> Self {
        Self::Http(msg.into())
    }
}

/// One POST of an enrollment body.
#[derive(Clone)]
pub struct SubmitRequest {
    /// Absolute EST path, e.g. `/.well-known/est/simpleenroll`.
    pub path: String,

    /// Content-Type of the body.
    pub content_type: &'static str,

    /// Base64 encoded body.
    pub body: String,

    /// Authorization header for this submission.
    pub authorization: Option<Authorization>,
}

impl fmt::Debug for SubmitRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubmitRequest")
            .field("path", &self.path)
            .field("content_type", &self.content_type)
            .field("body_len", &self.body.len())
            .field("authorization", &self.authorization.is_some())
            .finish()
    }
}

/// Raw HTTP response as seen by the transport.
#[derive(Debug, Clone)]
pub struct RawResponse {
    /// HTTP status.
    pub status: StatusCode,

    /// Response headers.
    pub headers: HeaderMap,

    /// Response body.
    pub body: Bytes,
}

impl RawResponse {
    /// Create a response from parts.
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    /// First value of a header as a string, if present and valid.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// All values of a header that are valid strings.
    pub fn header_all(&self, name: &str) -> Vec<&str> {
        self.headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect()
    }
}

/// Opens sessions to the EST server.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a new session to the server.
    async fn connect(&self) -> Result<Box<dyn TransportSession>, TransportFault>;

    /// Whether sessions from this transport can derive a channel binding.
    fn supports_channel_binding(&self) -> bool {
        false
    }
}

/// An open, trust-anchored session to the EST server.
#[async_trait]
pub trait TransportSession: ChannelBindingProvider + Send {
    /// Submit one request and wait for its response.
    async fn submit(&mut self, request: &SubmitRequest) -> Result<RawResponse, TransportFault>;
}
