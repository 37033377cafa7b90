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

//! Integration tests for proof-of-possession enrollment (RFC 7030 Section 3.5)
//!
//! wiremock cannot expose TLS session secrets, so these tests run a small
//! rustls server that checks each CSR against its own `tls-exporter` value.

use std::sync::Arc;
use std::time::Duration;

use base64::prelude::*;
use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_rustls::TlsAcceptor;

use crate::integration::{enrollment_key, fixtures, CONTENT_TYPE_PKCS7_CERTS_ONLY};
use usg_est_enroll::binding::{TLS_EXPORTER_LABEL, TLS_EXPORTER_LEN};
use usg_est_enroll::{
    EnrollOptions, EnrollmentClient, EnrollmentOutcome, EnrollmentRequest, EstClientConfig,
    NoAuth, RejectReason,
};

/// What the server saw on one connection.
struct Observed {
    exporter: Vec<u8>,
    challenge_password: Option<String>,
}

fn server_config() -> (Arc<rustls::ServerConfig>, String) {
    let key = rcgen::KeyPair::generate().unwrap();
    let cert = rcgen::CertificateParams::new(vec!["localhost".to_string()])
        .unwrap()
        .self_signed(&key)
        .unwrap();

    let config = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .unwrap()
    .with_no_client_auth()
    .with_single_cert(
        vec![cert.der().clone()],
        PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key.serialize_der())),
    )
    .unwrap();

    (Arc::new(config), cert.pem())
}

/// Read one HTTP/1.1 request, returning its body.
async fn read_request<S: AsyncReadExt + Unpin>(stream: &mut S) -> Vec<u8> {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];

    let head_end = loop {
        let n = stream.read(&mut buf).await.unwrap();
        assert!(n > 0, "connection closed before request head");
        data.extend_from_slice(&buf[..n]);
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&data[..head_end]).to_ascii_lowercase();
    let content_length = head
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while data.len() < head_end + content_length {
        let n = stream.read(&mut buf).await.unwrap();
        assert!(n > 0, "connection closed before request body");
        data.extend_from_slice(&buf[..n]);
    }

    data[head_end..head_end + content_length].to_vec()
}

/// Serve one connection per entry in `responses`, reporting what was seen.
fn spawn_server(
    listener: TcpListener,
    config: Arc<rustls::ServerConfig>,
    responses: Vec<String>,
) -> mpsc::UnboundedReceiver<Observed> {
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let acceptor = TlsAcceptor::from(config);
        for response in responses {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut tls = acceptor.accept(tcp).await.unwrap();

            let exporter = tls
                .get_ref()
                .1
                .export_keying_material([0u8; TLS_EXPORTER_LEN], TLS_EXPORTER_LABEL, None)
                .unwrap()
                .to_vec();

            let body = read_request(&mut tls).await;
            let der = BASE64_STANDARD.decode(&body).unwrap();
            let csr = EnrollmentRequest::from_der(der).unwrap();

            tx.send(Observed {
                exporter,
                challenge_password: csr.challenge_password().map(String::from),
            })
            .unwrap();

            tls.write_all(response.as_bytes()).await.unwrap();
            tls.flush().await.unwrap();
        }
    });

    rx
}

fn http_response(status: &str, headers: &[(&str, &str)], body: &str) -> String {
    let mut response = format!("HTTP/1.1 {}\r\n", status);
    for (name, value) in headers {
        response.push_str(&format!("{}: {}\r\n", name, value));
    }
    response.push_str(&format!("content-length: {}\r\n\r\n{}", body.len(), body));
    response
}

async fn pop_client(port: u16, ca_pem: String) -> EnrollmentClient {
    let config = EstClientConfig::builder()
        .server_url(format!("https://localhost:{}", port))
        .unwrap()
        .trust_explicit(ca_pem)
        .enable_channel_binding()
        .retry_grace(Duration::ZERO)
        .retry_floor(Duration::from_millis(50))
        .timeout(Duration::from_secs(30))
        .build()
        .unwrap();

    EnrollmentClient::new(config).await.unwrap()
}

#[tokio::test]
async fn test_pop_binding_matches_server_session() {
    let (server_config, ca_pem) = server_config();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let issued = fixtures::certs_only_base64(&[fixtures::certificate("pop-device")]);
    let mut observed = spawn_server(
        listener,
        server_config,
        vec![http_response(
            "200 OK",
            &[("content-type", CONTENT_TYPE_PKCS7_CERTS_ONLY)],
            &issued,
        )],
    );

    let client = pop_client(port, ca_pem).await;
    let outcome = client
        .enroll_with_proof_of_possession(
            "pop-device",
            enrollment_key().await,
            &mut NoAuth,
            EnrollOptions::default(),
        )
        .await
        .unwrap();

    assert!(outcome.is_issued(), "unexpected outcome: {}", outcome);

    let seen = observed.recv().await.unwrap();
    assert_eq!(
        seen.challenge_password.as_deref(),
        Some(BASE64_STANDARD.encode(&seen.exporter).as_str())
    );
}

#[tokio::test]
async fn test_pop_rebinds_after_deferral() {
    let (server_config, ca_pem) = server_config();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let issued = fixtures::certs_only_base64(&[fixtures::certificate("pop-device")]);
    let mut observed = spawn_server(
        listener,
        server_config,
        vec![
            http_response("202 Accepted", &[("retry-after", "0")], ""),
            http_response(
                "200 OK",
                &[("content-type", CONTENT_TYPE_PKCS7_CERTS_ONLY)],
                &issued,
            ),
        ],
    );

    let client = pop_client(port, ca_pem).await;
    let outcome = client
        .enroll_with_proof_of_possession(
            "pop-device",
            enrollment_key().await,
            &mut NoAuth,
            EnrollOptions::default(),
        )
        .await
        .unwrap();
    assert!(outcome.is_issued(), "unexpected outcome: {}", outcome);

    let first = observed.recv().await.unwrap();
    let second = observed.recv().await.unwrap();

    // Each submission carries the binding of its own session
    assert_ne!(first.exporter, second.exporter);
    for seen in [&first, &second] {
        assert_eq!(
            seen.challenge_password.as_deref(),
            Some(BASE64_STANDARD.encode(&seen.exporter).as_str())
        );
    }
}

#[tokio::test]
async fn test_pop_server_rejection_is_terminal() {
    let (server_config, ca_pem) = server_config();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let _observed = spawn_server(
        listener,
        server_config,
        vec![http_response(
            "400 Bad Request",
            &[("content-type", "text/plain")],
            "channel binding mismatch",
        )],
    );

    let client = pop_client(port, ca_pem).await;
    let outcome = client
        .enroll_with_proof_of_possession(
            "pop-device",
            enrollment_key().await,
            &mut NoAuth,
            EnrollOptions::default(),
        )
        .await
        .unwrap();

    match outcome {
        EnrollmentOutcome::Rejected(reason) => {
            assert_eq!(reason, RejectReason::server(400, "channel binding mismatch"));
        }
        other => panic!("Expected Rejected, got {:?}", other),
    }
}
