//! Integration tests for network error handling

use std::time::Duration;

use crate::integration::enrollment_key;
use usg_est_enroll::{
    EnrollOptions, EnrollmentClient, EnrollmentOutcome, EstClientConfig, EstClientConfigBuilder,
    NoAuth, TransportFault,
};

async fn enroll_at(
    url: &str,
    config: impl FnOnce(EstClientConfigBuilder) -> EstClientConfigBuilder,
) -> EnrollmentOutcome {
    let builder = EstClientConfig::builder()
        .server_url(url)
        .expect("Valid URL")
        .request_timeout(Duration::from_secs(2));
    let client = EnrollmentClient::new(config(builder).build().expect("Valid config"))
        .await
        .expect("Client creation failed");

    client
        .enroll(
            "network.example.com",
            enrollment_key().await,
            &mut NoAuth,
            EnrollOptions::default(),
        )
        .await
        .expect("enroll returned a construction error")
}

#[tokio::test]
async fn test_connection_refused() {
    // Bind and drop a listener so the port is known to be closed
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let outcome = enroll_at(&format!("http://127.0.0.1:{}", port), |b| b).await;

    // A network fault is terminal, not an error
    assert!(
        matches!(outcome.transport_fault(), Some(TransportFault::Connect(_))),
        "got {:?}",
        outcome
    );
}

#[tokio::test]
async fn test_connection_refused_on_session_transport() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let outcome = enroll_at(&format!("https://127.0.0.1:{}", port), |b| {
        b.enable_channel_binding()
    })
    .await;

    assert!(
        matches!(outcome.transport_fault(), Some(TransportFault::Connect(_))),
        "got {:?}",
        outcome
    );
}

#[tokio::test]
async fn test_untrusted_server_certificate() {
    // A TLS server whose certificate is not in the trust store
    let key = rcgen::KeyPair::generate().unwrap();
    let cert = rcgen::CertificateParams::new(vec!["localhost".to_string()])
        .unwrap()
        .self_signed(&key)
        .unwrap();
    let server_config = rustls::ServerConfig::builder_with_provider(std::sync::Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .unwrap()
    .with_no_client_auth()
    .with_single_cert(
        vec![cert.der().clone()],
        rustls::pki_types::PrivateKeyDer::Pkcs8(key.serialize_der().into()),
    )
    .unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let acceptor = tokio_rustls::TlsAcceptor::from(std::sync::Arc::new(server_config));
        while let Ok((tcp, _)) = listener.accept().await {
            let _ = acceptor.accept(tcp).await;
        }
    });

    let other_ca = rcgen::CertificateParams::new(vec!["localhost".to_string()])
        .unwrap()
        .self_signed(&rcgen::KeyPair::generate().unwrap())
        .unwrap()
        .pem();

    let outcome = enroll_at(&format!("https://localhost:{}", port), |b| {
        b.trust_explicit(other_ca).enable_channel_binding()
    })
    .await;

    assert!(
        matches!(outcome.transport_fault(), Some(TransportFault::Tls(_))),
        "got {:?}",
        outcome
    );
}
