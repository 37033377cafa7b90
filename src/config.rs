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

//! Configuration types for the enrollment client.
//!
//! This module provides configuration structures for setting up an
//! [`EnrollmentClient`](crate::EnrollmentClient): server URL, trust anchors,
//! TLS client identity, and the timing knobs used by the enrollment poller.

use std::time::Duration;
use url::Url;

/// Default grace added to a server supplied retry time.
pub const DEFAULT_RETRY_GRACE: Duration = Duration::from_secs(1);

/// Default minimum wait between deferred polls.
pub const DEFAULT_RETRY_FLOOR: Duration = Duration::from_secs(1);

/// Default per-request network timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for an enrollment client.
#[derive(Clone)]
pub struct EstClientConfig {
    /// EST server base URL (e.g., "https://est.example.com").
    pub server_url: Url,

    /// Optional CA label for multi-CA deployments.
    ///
    /// When set, the EST path becomes `/.well-known/est/{ca_label}/{operation}`.
    pub ca_label: Option<String>,

    /// Client identity for TLS client certificate authentication.
    pub client_identity: Option<ClientIdentity>,

    /// Trust anchor configuration for server certificate verification.
    pub trust_anchors: TrustAnchors,

    /// TLS protocol versions to offer.
    pub tls_version: TlsVersion,

    /// Overall enrollment deadline. `Duration::ZERO` means unbounded.
    pub timeout: Duration,

    /// Timeout for a single network exchange.
    pub request_timeout: Duration,

    /// Grace added to the server's retry time before polling again.
    pub retry_grace: Duration,

    /// Minimum wait for a deferred enrollment.
    pub retry_floor: Duration,

    /// Use a transport that can derive a TLS channel binding.
    ///
    /// Required for proof-of-possession enrollment (RFC 7030 Section 3.5).
    pub channel_binding: bool,

    /// Additional HTTP headers to include in requests.
    pub additional_headers: Vec<(String, String)>,
}

impl std::fmt::Debug for EstClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EstClientConfig")
            .field("server_url", &self.server_url)
            .field("ca_label", &self.ca_label)
            .field("client_identity", &self.client_identity.is_some())
            .field("trust_anchors", &self.trust_anchors)
            .field("tls_version", &self.tls_version)
            .field("timeout", &self.timeout)
            .field("request_timeout", &self.request_timeout)
            .field("retry_grace", &self.retry_grace)
            .field("retry_floor", &self.retry_floor)
            .field("channel_binding", &self.channel_binding)
            .finish()
    }
}

impl EstClientConfig {
    /// Create a new configuration builder.
    pub fn builder() -> EstClientConfigBuilder {
        EstClientConfigBuilder::new()
    }

    /// EST path for an operation, including the optional CA label.
    pub fn operation_path(&self, operation: &str) -> String {
        match self.ca_label {
            Some(ref label) => format!("/.well-known/est/{}/{}", label, operation),
            None => format!("/.well-known/est/{}", operation),
        }
    }

    /// Build the EST operation URL.
    pub fn build_url(&self, operation: &str) -> Url {
        let mut url = self.server_url.clone();
        url.set_path(&self.operation_path(operation));
        url
    }

    /// Whether the enrollment has an overall deadline.
    pub fn has_deadline(&self) -> bool {
        !self.timeout.is_zero()
    }
}

/// Builder for [`EstClientConfig`].
#[derive(Default)]
pub struct EstClientConfigBuilder {
    server_url: Option<Url>,
    ca_label: Option<String>,
    client_identity: Option<ClientIdentity>,
    trust_anchors: Option<TrustAnchors>,
    tls_version: TlsVersion,
    timeout: Option<Duration>,
    request_timeout: Option<Duration>,
    retry_grace: Option<Duration>,
    retry_floor: Option<Duration>,
    channel_binding: bool,
    additional_headers: Vec<(String, String)>,
}

impl EstClientConfigBuilder {
    /// Create a new configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the EST server URL.
    pub fn server_url(mut self, url: impl AsRef<str>) -> Result<Self, url::ParseError> {
        self.server_url = Some(Url::parse(url.as_ref())?);
        Ok(self)
    }

    /// Set the EST server URL from a pre-parsed URL.
    pub fn server_url_parsed(mut self, url: Url) -> Self {
        self.server_url = Some(url);
        self
    }

    /// Set the CA label for multi-CA deployments.
    pub fn ca_label(mut self, label: impl Into<String>) -> Self {
        self.ca_label = Some(label.into());
        self
    }

    /// Set the client identity for TLS client authentication.
    pub fn client_identity(mut self, identity: ClientIdentity) -> Self {
        self.client_identity = Some(identity);
        self
    }

    /// Use Mozilla's root CA store (webpki-roots) for server verification.
    pub fn trust_webpki_roots(mut self) -> Self {
        self.trust_anchors = Some(TrustAnchors::WebPki);
        self
    }

    /// Use explicit CA certificates (PEM) for server verification.
    pub fn trust_explicit(mut self, ca_pem: impl Into<Vec<u8>>) -> Self {
        self.trust_anchors = Some(TrustAnchors::Explicit(ca_pem.into()));
        self
    }

    /// Accept any server certificate (insecure, for testing only).
    pub fn trust_any_insecure(mut self) -> Self {
        self.trust_anchors = Some(TrustAnchors::InsecureAcceptAny);
        self
    }

    /// Restrict the TLS protocol version.
    pub fn tls_version(mut self, version: TlsVersion) -> Self {
        self.tls_version = version;
        self
    }

    /// Set the overall enrollment deadline. `Duration::ZERO` disables it.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the per-request network timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Set the grace added to server supplied retry times.
    pub fn retry_grace(mut self, grace: Duration) -> Self {
        self.retry_grace = Some(grace);
        self
    }

    /// Set the minimum wait for deferred enrollments.
    pub fn retry_floor(mut self, floor: Duration) -> Self {
        self.retry_floor = Some(floor);
        self
    }

    /// Use a transport that can derive a TLS channel binding.
    pub fn enable_channel_binding(mut self) -> Self {
        self.channel_binding = true;
        self
    }

    /// Add an additional HTTP header to all requests.
    pub fn add_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.additional_headers.push((name.into(), value.into()));
        self
    }

    /// Build the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the server URL is not set or is not HTTPS.
    pub fn build(self) -> Result<EstClientConfig, &'static str> {
        let server_url = self.server_url.ok_or("server_url is required")?;
        if server_url.scheme() != "https" && server_url.scheme() != "http" {
            return Err("server_url must be an http(s) URL");
        }

        Ok(EstClientConfig {
            server_url,
            ca_label: self.ca_label,
            client_identity: self.client_identity,
            trust_anchors: self.trust_anchors.unwrap_or(TrustAnchors::WebPki),
            tls_version: self.tls_version,
            timeout: self.timeout.unwrap_or(Duration::ZERO),
            request_timeout: self.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT),
            retry_grace: self.retry_grace.unwrap_or(DEFAULT_RETRY_GRACE),
            retry_floor: self.retry_floor.unwrap_or(DEFAULT_RETRY_FLOOR),
            channel_binding: self.channel_binding,
            additional_headers: self.additional_headers,
        })
    }
}

/// Client identity for TLS client certificate authentication.
#[derive(Clone)]
pub struct ClientIdentity {
    /// PEM-encoded certificate chain.
    ///
    /// The client certificate should be first, followed by any intermediate certificates.
    pub cert_pem: Vec<u8>,

    /// PEM-encoded private key.
    pub key_pem: Vec<u8>,
}

impl ClientIdentity {
    /// Create a new client identity from PEM-encoded data.
    pub fn new(cert_pem: impl Into<Vec<u8>>, key_pem: impl Into<Vec<u8>>) -> Self {
        Self {
            cert_pem: cert_pem.into(),
            key_pem: key_pem.into(),
        }
    }

    /// Create a client identity from file paths.
    pub fn from_files(
        cert_path: impl AsRef<std::path::Path>,
        key_path: impl AsRef<std::path::Path>,
    ) -> std::io::Result<Self> {
        let cert_pem = std::fs::read(cert_path)?;
        let key_pem = std::fs::read(key_path)?;
        Ok(Self { cert_pem, key_pem })
    }
}

/// Trust anchor configuration for server certificate verification.
#[derive(Clone)]
pub enum TrustAnchors {
    /// Use Mozilla's root CA store (webpki-roots).
    WebPki,

    /// Use explicit CA certificates (PEM-encoded bundle).
    Explicit(Vec<u8>),

    /// Accept any server certificate (insecure, for testing only).
    ///
    /// **WARNING**: This disables all server certificate verification.
    InsecureAcceptAny,
}

impl std::fmt::Debug for TrustAnchors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WebPki => write!(f, "WebPki"),
            Self::Explicit(pem) => write!(f, "Explicit({} bytes)", pem.len()),
            Self::InsecureAcceptAny => write!(f, "InsecureAcceptAny"),
        }
    }
}

/// TLS protocol versions offered to the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TlsVersion {
    /// TLS 1.2 or 1.3.
    #[default]
    Any,
    /// TLS 1.2 only.
    Tls12,
    /// TLS 1.3 only.
    Tls13,
}

impl std::str::FromStr for TlsVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TLSv1.2" | "1.2" => Ok(Self::Tls12),
            "TLSv1.3" | "1.3" => Ok(Self::Tls13),
            "any" => Ok(Self::Any),
            other => Err(format!("unsupported TLS version '{}'", other)),
        }
    }
}
