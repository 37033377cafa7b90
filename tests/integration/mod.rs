//! Integration test utilities and helpers
//!
//! This module provides common test infrastructure for enrollment integration
//! tests: a wiremock-backed EST server, certificate fixtures and client
//! helpers.

mod errors;

use std::time::Duration;

use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use usg_est_enroll::hsm::EnrollmentKey;
use usg_est_enroll::{Certificate, EnrollmentClient, EstClientConfig};

/// Content types used in EST protocol
pub const CONTENT_TYPE_PKCS7_CERTS_ONLY: &str = "application/pkcs7-mime; smime-type=certs-only";
pub const CONTENT_TYPE_PKCS10: &str = "application/pkcs10";

/// EST operation paths
pub const PATH_SIMPLEENROLL: &str = "/.well-known/est/simpleenroll";
pub const PATH_SIMPLEREENROLL: &str = "/.well-known/est/simplereenroll";

/// Mock EST server builder for integration tests
pub struct MockEstServer {
    server: MockServer,
}

impl MockEstServer {
    /// Create a new mock EST server
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        Self { server }
    }

    /// Get the base URL of the mock server
    pub fn url(&self) -> String {
        self.server.uri()
    }

    /// Get a reference to the inner MockServer for custom mocking
    pub fn inner(&self) -> &MockServer {
        &self.server
    }

    /// Mock a successful enrollment response (HTTP 200)
    pub async fn mock_enroll_success(&self, operation_path: &str, certs_base64: &str) {
        Mock::given(method("POST"))
            .and(path(operation_path))
            .respond_with(issued_response(certs_base64))
            .mount(&self.server)
            .await;
    }

    /// Mock a successful enrollment that only answers authenticated requests
    pub async fn mock_enroll_success_authenticated(&self, certs_base64: &str) {
        Mock::given(method("POST"))
            .and(path(PATH_SIMPLEENROLL))
            .and(header_exists("authorization"))
            .respond_with(issued_response(certs_base64))
            .mount(&self.server)
            .await;
    }

    /// Mock `times` deferred responses (HTTP 202) ahead of later mocks
    pub async fn mock_enroll_pending(&self, retry_after: &str, times: u64) {
        Mock::given(method("POST"))
            .and(path(PATH_SIMPLEENROLL))
            .respond_with(ResponseTemplate::new(202).insert_header("Retry-After", retry_after))
            .up_to_n_times(times)
            .mount(&self.server)
            .await;
    }

    /// Mock an authentication required response (HTTP 401)
    pub async fn mock_enroll_auth_required(&self, challenge: &str) {
        Mock::given(method("POST"))
            .and(path(PATH_SIMPLEENROLL))
            .respond_with(ResponseTemplate::new(401).insert_header("WWW-Authenticate", challenge))
            .mount(&self.server)
            .await;
    }

    /// Mock a server error response
    pub async fn mock_server_error(&self, status: u16, message: &str) {
        Mock::given(method("POST"))
            .and(path(PATH_SIMPLEENROLL))
            .respond_with(
                ResponseTemplate::new(status)
                    .set_body_raw(message.as_bytes().to_vec(), "text/plain"),
            )
            .mount(&self.server)
            .await;
    }

    /// Mock a success status with an arbitrary body and content type
    pub async fn mock_enroll_body(&self, body: &str, content_type: &str) {
        Mock::given(method("POST"))
            .and(path(PATH_SIMPLEENROLL))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(body.as_bytes().to_vec(), content_type),
            )
            .mount(&self.server)
            .await;
    }

    /// Requests received so far
    pub async fn requests(&self) -> Vec<wiremock::Request> {
        self.server.received_requests().await.unwrap_or_default()
    }
}

fn issued_response(certs_base64: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .set_body_raw(certs_base64.as_bytes().to_vec(), CONTENT_TYPE_PKCS7_CERTS_ONLY)
        .insert_header("Content-Transfer-Encoding", "base64")
}

/// Client pointed at the mock server with short retry timing
pub async fn client_for(mock: &MockEstServer) -> EnrollmentClient {
    let config = EstClientConfig::builder()
        .server_url(mock.url())
        .expect("Valid URL")
        .retry_grace(Duration::ZERO)
        .retry_floor(Duration::from_millis(50))
        .timeout(Duration::from_secs(30))
        .build()
        .expect("Valid config");

    EnrollmentClient::new(config)
        .await
        .expect("Client creation failed")
}

/// Fresh software enrollment key
pub async fn enrollment_key() -> EnrollmentKey {
    EnrollmentKey::generate_software(None)
        .await
        .expect("Key generation failed")
}

/// Test fixture helpers
pub mod fixtures {
    use der::Decode;
    use usg_est_enroll::types::encode_certs_only;
    use usg_est_enroll::Certificate;

    /// Self-signed certificate with the given common name
    pub fn certificate(cn: &str) -> Certificate {
        let key = rcgen::KeyPair::generate().expect("key");
        let mut params = rcgen::CertificateParams::new(vec![]).expect("params");
        params
            .distinguished_name
            .push(rcgen::DnType::CommonName, cn);
        let cert = params.self_signed(&key).expect("self-signed");
        Certificate::from_der(cert.der()).expect("decode")
    }

    /// Base64 certs-only body for the given certificates
    pub fn certs_only_base64(certs: &[Certificate]) -> String {
        encode_certs_only(certs).expect("encode certs-only")
    }
}

/// Common name of a certificate's subject
pub fn subject_cn(cert: &Certificate) -> Option<String> {
    use const_oid::db::rfc4519::CN;

    cert.tbs_certificate
        .subject
        .0
        .iter()
        .flat_map(|rdn| rdn.0.iter())
        .find(|atv| atv.oid == CN)
        .and_then(|atv| std::str::from_utf8(atv.value.value()).ok())
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_server_starts() {
        let mock_server = MockEstServer::start().await;
        assert!(!mock_server.url().is_empty());
        assert!(mock_server.url().starts_with("http://"));
    }

    #[test]
    fn test_fixture_round_trips_subject() {
        let cert = fixtures::certificate("fixture.example.com");
        assert_eq!(subject_cn(&cert).as_deref(), Some("fixture.example.com"));
    }
}
