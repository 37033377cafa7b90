//! Integration tests for protocol error handling

use crate::integration::{client_for, enrollment_key, fixtures, MockEstServer};
use usg_est_enroll::{EnrollOptions, EnrollmentOutcome, NoAuth, RejectReason};

async fn enroll_against(mock: &MockEstServer) -> EnrollmentOutcome {
    client_for(mock)
        .await
        .enroll(
            "protocol.example.com",
            enrollment_key().await,
            &mut NoAuth,
            EnrollOptions::default(),
        )
        .await
        .expect("enroll failed")
}

#[tokio::test]
async fn test_invalid_content_type() {
    let mock = MockEstServer::start().await;

    // Mock success status with the wrong content type
    mock.mock_enroll_body("<html>hello</html>", "text/html").await;

    match enroll_against(&mock).await {
        EnrollmentOutcome::Rejected(RejectReason::MalformedResponse(msg)) => {
            assert!(msg.contains("text/html"), "message: {}", msg);
        }
        other => panic!("Expected MalformedResponse, got {:?}", other),
    }
}

#[tokio::test]
async fn test_malformed_body() {
    let mock = MockEstServer::start().await;
    mock.mock_enroll_body("not-valid-base64!!!", "application/pkcs7-mime")
        .await;

    assert!(matches!(
        enroll_against(&mock).await,
        EnrollmentOutcome::Rejected(RejectReason::MalformedResponse(_))
    ));
}

#[tokio::test]
async fn test_empty_issuance() {
    let mock = MockEstServer::start().await;
    mock.mock_enroll_body(
        &fixtures::certs_only_base64(&[]),
        "application/pkcs7-mime; smime-type=certs-only",
    )
    .await;

    assert_eq!(
        enroll_against(&mock).await.rejection(),
        Some(&RejectReason::EmptyIssuance)
    );
}

#[tokio::test]
async fn test_server_error_is_not_retried() {
    let mock = MockEstServer::start().await;
    mock.mock_server_error(500, "Internal CA failure").await;

    let outcome = enroll_against(&mock).await;

    assert_eq!(
        outcome.rejection(),
        Some(&RejectReason::server(500, "Internal CA failure"))
    );
    assert_eq!(mock.requests().await.len(), 1);
}

#[tokio::test]
async fn test_policy_rejection_keeps_server_message() {
    let mock = MockEstServer::start().await;
    mock.mock_server_error(403, "policy-denied").await;

    match enroll_against(&mock).await {
        EnrollmentOutcome::Rejected(RejectReason::Server { status, message }) => {
            assert_eq!(status, 403);
            assert_eq!(message, "policy-denied");
        }
        other => panic!("Expected Server rejection, got {:?}", other),
    }
}

#[tokio::test]
async fn test_not_found_without_body_uses_reason_phrase() {
    use wiremock::matchers::method;
    use wiremock::{Mock, ResponseTemplate};

    let mock = MockEstServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(404))
        .mount(mock.inner())
        .await;

    assert_eq!(
        enroll_against(&mock).await.rejection(),
        Some(&RejectReason::server(404, "Not Found"))
    );
}
