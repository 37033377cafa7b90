//! TLS configuration helpers for the enrollment transports.
//!
//! Both transports verify the server against the configured trust anchors.
//! The reqwest client backs [`HttpTransport`](crate::transport::HttpTransport);
//! the rustls config backs [`SessionTransport`](crate::transport::SessionTransport),
//! which needs the raw connection to export keying material.

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{self, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};

use crate::config::{ClientIdentity, EstClientConfig, TlsVersion, TrustAnchors};
use crate::error::{EstError, Result};

// RFC 7030 Section 3.3.1 requires TLS 1.1 or later; TLS 1.1 is deprecated so
// the floor is 1.2.

/// Build a reqwest Client with the appropriate TLS configuration.
pub fn build_http_client(config: &EstClientConfig) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .timeout(config.request_timeout)
        .user_agent(crate::USER_AGENT)
        .use_rustls_tls();

    match &config.trust_anchors {
        TrustAnchors::WebPki => {
            builder = builder.tls_built_in_root_certs(true);
        }
        TrustAnchors::Explicit(ca_pem) => {
            builder = builder.tls_built_in_root_certs(false);
            for cert in parse_pem_certificates(ca_pem)? {
                let cert = reqwest::Certificate::from_der(&cert)
                    .map_err(|e| EstError::tls(format!("Failed to parse CA certificate: {}", e)))?;
                builder = builder.add_root_certificate(cert);
            }
        }
        TrustAnchors::InsecureAcceptAny => {
            builder = builder
                .tls_built_in_root_certs(false)
                .danger_accept_invalid_certs(true);
        }
    }

    if let Some(ref identity) = config.client_identity {
        builder = builder.identity(build_reqwest_identity(identity)?);
    }

    builder = match config.tls_version {
        TlsVersion::Any => builder.min_tls_version(reqwest::tls::Version::TLS_1_2),
        TlsVersion::Tls12 => builder
            .min_tls_version(reqwest::tls::Version::TLS_1_2)
            .max_tls_version(reqwest::tls::Version::TLS_1_2),
        TlsVersion::Tls13 => builder.min_tls_version(reqwest::tls::Version::TLS_1_3),
    };

    builder = builder.default_headers(build_default_headers(&config.additional_headers));

    builder
        .build()
        .map_err(|e| EstError::tls(format!("Failed to build HTTP client: {}", e)))
}

/// Turn configured extra headers into a header map, skipping invalid ones.
pub fn build_default_headers(additional: &[(String, String)]) -> http::HeaderMap {
    let mut headers = http::HeaderMap::new();
    for (name, value) in additional {
        match (
            http::HeaderName::try_from(name.as_str()),
            http::HeaderValue::try_from(value.as_str()),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => tracing::warn!("Ignoring invalid additional header: {}", name),
        }
    }
    headers
}

/// Build a reqwest Identity from PEM-encoded certificate and key.
fn build_reqwest_identity(identity: &ClientIdentity) -> Result<reqwest::Identity> {
    let mut pem_data = identity.cert_pem.clone();
    pem_data.extend_from_slice(b"\n");
    pem_data.extend_from_slice(&identity.key_pem);

    reqwest::Identity::from_pem(&pem_data)
        .map_err(|e| EstError::tls(format!("Failed to create client identity: {}", e)))
}

/// Build a rustls ClientConfig for a binding-capable session.
pub fn build_rustls_config(config: &EstClientConfig) -> Result<Arc<ClientConfig>> {
    let provider = Arc::new(crypto::ring::default_provider());

    let versions: &[&'static rustls::SupportedProtocolVersion] = match config.tls_version {
        TlsVersion::Any => rustls::DEFAULT_VERSIONS,
        TlsVersion::Tls12 => &[&rustls::version::TLS12],
        TlsVersion::Tls13 => &[&rustls::version::TLS13],
    };

    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(versions)
        .map_err(|e| EstError::tls(format!("Unsupported TLS version: {}", e)))?;

    let builder = match config.trust_anchors {
        TrustAnchors::InsecureAcceptAny => builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert(provider))),
        _ => builder.with_root_certificates(build_root_store(&config.trust_anchors)?),
    };

    let tls_config = if let Some(ref identity) = config.client_identity {
        let (certs, key) = parse_client_identity(identity)?;
        builder
            .with_client_auth_cert(certs, key)
            .map_err(|e| EstError::tls(format!("Failed to configure client auth: {}", e)))?
    } else {
        builder.with_no_client_auth()
    };

    Ok(Arc::new(tls_config))
}

/// Build a rustls RootCertStore from trust anchor configuration.
fn build_root_store(trust_anchors: &TrustAnchors) -> Result<rustls::RootCertStore> {
    let mut root_store = rustls::RootCertStore::empty();

    match trust_anchors {
        TrustAnchors::WebPki => {
            root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        }
        TrustAnchors::Explicit(ca_pem) => {
            for cert in parse_pem_certificates(ca_pem)? {
                root_store
                    .add(cert)
                    .map_err(|e| EstError::tls(format!("Failed to add CA cert: {}", e)))?;
            }
        }
        TrustAnchors::InsecureAcceptAny => {}
    }

    Ok(root_store)
}

/// Skips server certificate checks but still verifies handshake signatures.
#[derive(Debug)]
struct AcceptAnyServerCert(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

/// Parse PEM-encoded certificates.
pub fn parse_pem_certificates(pem_data: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = std::io::BufReader::new(pem_data);
    let certs: Vec<_> = rustls_pemfile::certs(&mut reader)
        .filter_map(|result| result.ok())
        .collect();

    if certs.is_empty() {
        return Err(EstError::invalid_pem("No certificates found in PEM data"));
    }

    Ok(certs)
}

/// Parse a PEM-encoded private key.
pub fn parse_pem_private_key(pem_data: &[u8]) -> Result<PrivateKeyDer<'static>> {
    let mut reader = std::io::BufReader::new(pem_data);

    loop {
        match rustls_pemfile::read_one(&mut reader) {
            Ok(Some(rustls_pemfile::Item::Pkcs8Key(key))) => {
                return Ok(PrivateKeyDer::Pkcs8(key));
            }
            Ok(Some(rustls_pemfile::Item::Pkcs1Key(key))) => {
                return Ok(PrivateKeyDer::Pkcs1(key));
            }
            Ok(Some(rustls_pemfile::Item::Sec1Key(key))) => {
                return Ok(PrivateKeyDer::Sec1(key));
            }
            Ok(Some(_)) => continue,
            Ok(None) => break,
            Err(e) => {
                return Err(EstError::invalid_pem(format!("Failed to parse PEM: {}", e)));
            }
        }
    }

    Err(EstError::invalid_pem("No private key found in PEM data"))
}

fn parse_client_identity(
    identity: &ClientIdentity,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
    let certs = parse_pem_certificates(&identity.cert_pem)?;
    let key = parse_pem_private_key(&identity.key_pem)?;
    Ok((certs, key))
}
