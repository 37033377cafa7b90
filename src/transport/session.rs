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

//! Single-connection transport that can derive a TLS channel binding.
//!
//! Each session owns one rustls connection with HTTP/1.1 on top. The RFC 9266
//! `tls-exporter` value is exported right after the handshake and stays
//! valid for as long as the session is open.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{AUTHORIZATION, CONTENT_TYPE, HOST, USER_AGENT};
use http::{HeaderMap, HeaderValue, Method, Request};
use http_body_util::{BodyExt, Full};
use hyper::client::conn::http1::SendRequest;
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use rustls::ClientConfig;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_rustls::TlsConnector;
use url::{Host, Url};

use super::{RawResponse, SubmitRequest, Transport, TransportFault, TransportSession};
use crate::binding::{ChannelBinding, ChannelBindingProvider, TLS_EXPORTER_LABEL, TLS_EXPORTER_LEN};
use crate::config::EstClientConfig;
use crate::error::{EstError, Result};
use crate::tls;

/// Transport that opens a dedicated TLS connection per session.
#[derive(Clone)]
pub struct SessionTransport {
    tls_config: Arc<ClientConfig>,
    address: String,
    server_name: ServerName<'static>,
    authority: String,
    request_timeout: Duration,
    default_headers: HeaderMap,
}

impl SessionTransport {
    /// Build a transport from client configuration.
    ///
    /// # Errors
    ///
    /// Fails if the server URL is not `https` or the TLS configuration is invalid.
    pub fn new(config: &EstClientConfig) -> Result<Self> {
        Self::with_tls_config(config, tls::build_rustls_config(config)?)
    }

    /// Build a transport with a caller supplied rustls configuration.
    pub fn with_tls_config(config: &EstClientConfig, tls_config: Arc<ClientConfig>) -> Result<Self> {
        let url = &config.server_url;
        if url.scheme() != "https" {
            return Err(EstError::config(
                "channel binding requires an https server URL",
            ));
        }

        let (address, server_name) = resolve_target(url)?;
        let host = url.host_str().unwrap_or_default();
        let authority = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };

        Ok(Self {
            tls_config,
            address,
            server_name,
            authority,
            request_timeout: config.request_timeout,
            default_headers: tls::build_default_headers(&config.additional_headers),
        })
    }

    async fn open(&self) -> std::result::Result<SessionConnection, TransportFault> {
        let tcp = TcpStream::connect(&self.address)
            .await
            .map_err(|e| TransportFault::connect(format!("{}: {}", self.address, e)))?;

        let connector = TlsConnector::from(self.tls_config.clone());
        let tls_stream = connector
            .connect(self.server_name.clone(), tcp)
            .await
            .map_err(|e| TransportFault::tls(e.to_string()))?;

        let binding = {
            let (_, connection) = tls_stream.get_ref();
            match connection.export_keying_material(
                [0u8; TLS_EXPORTER_LEN],
                TLS_EXPORTER_LABEL,
                None,
            ) {
                Ok(material) => Some(material),
                Err(e) => {
                    tracing::warn!("TLS exporter unavailable on this session: {}", e);
                    None
                }
            }
        };

        let (sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(tls_stream))
            .await
            .map_err(|e| TransportFault::http(format!("HTTP handshake failed: {}", e)))?;

        let task = tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::debug!("EST session connection closed: {}", e);
            }
        });

        Ok(SessionConnection {
            sender,
            task,
            binding,
            authority: self.authority.clone(),
            request_timeout: self.request_timeout,
            default_headers: self.default_headers.clone(),
        })
    }
}

#[async_trait]
impl Transport for SessionTransport {
    async fn connect(&self) -> std::result::Result<Box<dyn TransportSession>, TransportFault> {
        tracing::debug!("Opening TLS session to {}", self.address);

        let session = tokio::time::timeout(self.request_timeout, self.open())
            .await
            .map_err(|_| TransportFault::Timeout)??;

        Ok(Box::new(session))
    }

    fn supports_channel_binding(&self) -> bool {
        true
    }
}

/// Split a URL into a socket address and the TLS server name.
fn resolve_target(url: &Url) -> Result<(String, ServerName<'static>)> {
    let port = url
        .port_or_known_default()
        .ok_or_else(|| EstError::config("server URL has no port"))?;

    match url.host() {
        Some(Host::Domain(domain)) => {
            let name = ServerName::try_from(domain.to_string())
                .map_err(|e| EstError::config(format!("invalid server name '{}': {}", domain, e)))?;
            Ok((format!("{}:{}", domain, port), name))
        }
        Some(Host::Ipv4(ip)) => Ok((
            format!("{}:{}", ip, port),
            ServerName::IpAddress(std::net::IpAddr::V4(ip).into()),
        )),
        Some(Host::Ipv6(ip)) => Ok((
            format!("[{}]:{}", ip, port),
            ServerName::IpAddress(std::net::IpAddr::V6(ip).into()),
        )),
        None => Err(EstError::config("server URL has no host")),
    }
}

struct SessionConnection {
    sender: SendRequest<Full<Bytes>>,
    task: JoinHandle<()>,
    binding: Option<[u8; TLS_EXPORTER_LEN]>,
    authority: String,
    request_timeout: Duration,
    default_headers: HeaderMap,
}

impl SessionConnection {
    async fn exchange(
        &mut self,
        request: &SubmitRequest,
    ) -> std::result::Result<RawResponse, TransportFault> {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(request.path.as_str())
            .header(HOST, self.authority.as_str())
            .header(CONTENT_TYPE, request.content_type)
            .header(USER_AGENT, crate::USER_AGENT);

        if let Some(headers) = builder.headers_mut() {
            headers.extend(self.default_headers.clone());
            if let Some(ref authorization) = request.authorization {
                let value = HeaderValue::from_str(authorization.as_str())
                    .map_err(|e| TransportFault::http(format!("invalid authorization: {}", e)))?;
                headers.insert(AUTHORIZATION, value);
            }
        }

        let http_request = builder
            .body(Full::new(Bytes::from(request.body.clone())))
            .map_err(|e| TransportFault::http(e.to_string()))?;

        self.sender
            .ready()
            .await
            .map_err(|e| TransportFault::http(format!("session closed: {}", e)))?;

        let response = self
            .sender
            .send_request(http_request)
            .await
            .map_err(|e| TransportFault::http(e.to_string()))?;

        let (parts, body) = response.into_parts();
        let body = body
            .collect()
            .await
            .map_err(|e| TransportFault::http(format!("failed to read body: {}", e)))?
            .to_bytes();

        Ok(RawResponse::new(parts.status, parts.headers, body))
    }
}

impl ChannelBindingProvider for SessionConnection {
    fn current_binding(&self) -> Result<ChannelBinding> {
        self.binding
            .map(|material| ChannelBinding::new(material.to_vec()))
            .ok_or_else(|| EstError::binding_unavailable("TLS exporter failed for this session"))
    }
}

#[async_trait]
impl TransportSession for SessionConnection {
    async fn submit(
        &mut self,
        request: &SubmitRequest,
    ) -> std::result::Result<RawResponse, TransportFault> {
        tracing::debug!("POST {}{}", self.authority, request.path);

        tokio::time::timeout(self.request_timeout, self.exchange(request))
            .await
            .map_err(|_| TransportFault::Timeout)?
    }
}

impl Drop for SessionConnection {
    fn drop(&mut self) {
        self.task.abort();
    }
}
