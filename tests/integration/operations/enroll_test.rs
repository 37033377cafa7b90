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

//! Integration tests for POST /simpleenroll operation

use base64::prelude::*;
use std::time::Instant;

use crate::integration::{
    client_for, enrollment_key, fixtures, subject_cn, MockEstServer, CONTENT_TYPE_PKCS10,
    PATH_SIMPLEENROLL,
};
use usg_est_enroll::{
    EnrollOptions, EnrollmentMode, EnrollmentOutcome, EnrollmentRequest,
    EnrollmentRequestBuilder, EstError, NoAuth,
};

#[tokio::test]
async fn test_successful_enrollment() {
    // Start mock server
    let mock = MockEstServer::start().await;

    // Mock successful enrollment with leaf and issuer in wire order
    let leaf = fixtures::certificate("test-device.example.com");
    let issuer = fixtures::certificate("Test Issuing CA");
    mock.mock_enroll_success(
        PATH_SIMPLEENROLL,
        &fixtures::certs_only_base64(&[leaf.clone(), issuer.clone()]),
    )
    .await;

    let client = client_for(&mock).await;

    // Test: Simple enroll
    let outcome = client
        .enroll(
            "test-device.example.com",
            enrollment_key().await,
            &mut NoAuth,
            EnrollOptions::default(),
        )
        .await
        .expect("enroll failed");

    // Assert: Should succeed with both certificates in server order
    match outcome {
        EnrollmentOutcome::Issued(certs) => {
            assert_eq!(certs.len(), 2);
            let all: Vec<_> = certs.iter().collect();
            assert_eq!(all[0], &leaf);
            assert_eq!(all[1], &issuer);
        }
        other => panic!("Expected Issued, got {:?}", other),
    }
}

#[tokio::test]
async fn test_request_is_base64_pkcs10() {
    let mock = MockEstServer::start().await;
    mock.mock_enroll_success(
        PATH_SIMPLEENROLL,
        &fixtures::certs_only_base64(&[fixtures::certificate("device-42")]),
    )
    .await;

    let client = client_for(&mock).await;
    client
        .enroll(
            "device-42",
            enrollment_key().await,
            &mut NoAuth,
            EnrollOptions::default(),
        )
        .await
        .expect("enroll failed");

    let requests = mock.requests().await;
    assert_eq!(requests.len(), 1);

    let request = &requests[0];
    assert_eq!(
        request.headers.get("content-type").unwrap().to_str().unwrap(),
        CONTENT_TYPE_PKCS10
    );

    // Body should decode to a CSR for the requested identity, without a
    // challenge password in simple mode
    let der = BASE64_STANDARD.decode(&request.body).expect("base64 body");
    let csr = EnrollmentRequest::from_der(der).expect("valid CSR");
    assert_eq!(csr.subject().to_string(), "CN=device-42");
    assert!(csr.challenge_password().is_none());
}

#[tokio::test]
async fn test_deferred_then_issued() {
    let mock = MockEstServer::start().await;

    // Two deferrals before the certificate is ready
    mock.mock_enroll_pending("1", 2).await;
    mock.mock_enroll_success(
        PATH_SIMPLEENROLL,
        &fixtures::certs_only_base64(&[fixtures::certificate("deferred.example.com")]),
    )
    .await;

    let client = client_for(&mock).await;
    let started = Instant::now();

    let outcome = client
        .enroll(
            "deferred.example.com",
            enrollment_key().await,
            &mut NoAuth,
            EnrollOptions::default(),
        )
        .await
        .expect("enroll failed");

    // Each deferral waits out Retry-After before polling again
    assert!(started.elapsed().as_millis() >= 1900);
    assert_eq!(mock.requests().await.len(), 3);

    let certs = outcome.into_certificates().expect("issued");
    assert_eq!(
        subject_cn(certs.first().unwrap()).as_deref(),
        Some("deferred.example.com")
    );
}

#[tokio::test]
async fn test_deferred_polls_resubmit_same_request() {
    let mock = MockEstServer::start().await;
    mock.mock_enroll_pending("0", 1).await;
    mock.mock_enroll_success(
        PATH_SIMPLEENROLL,
        &fixtures::certs_only_base64(&[fixtures::certificate("a")]),
    )
    .await;

    let client = client_for(&mock).await;
    let outcome = client
        .enroll(
            "device-42",
            enrollment_key().await,
            &mut NoAuth,
            EnrollOptions::default(),
        )
        .await
        .unwrap();
    assert!(outcome.is_issued());

    let requests = mock.requests().await;
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].body, requests[1].body);
}

#[tokio::test]
async fn test_enroll_prebuilt_request() {
    let mock = MockEstServer::start().await;
    mock.mock_enroll_success(
        PATH_SIMPLEENROLL,
        &fixtures::certs_only_base64(&[fixtures::certificate("prebuilt")]),
    )
    .await;

    let request = EnrollmentRequestBuilder::new(enrollment_key().await)
        .build("CN=prebuilt,O=Example", EnrollmentMode::Simple, None)
        .await
        .unwrap();
    let expected = request.to_base64();

    let client = client_for(&mock).await;
    let outcome = client
        .enroll_request(request, &mut NoAuth, EnrollOptions::default())
        .await
        .unwrap();

    assert!(outcome.is_issued());
    let requests = mock.requests().await;
    assert_eq!(String::from_utf8_lossy(&requests[0].body), expected);
}

#[tokio::test]
async fn test_invalid_identity_sends_nothing() {
    let mock = MockEstServer::start().await;
    let client = client_for(&mock).await;

    let result = client
        .enroll(
            "   ",
            enrollment_key().await,
            &mut NoAuth,
            EnrollOptions::default(),
        )
        .await;

    assert!(matches!(result, Err(EstError::InvalidIdentity(_))));
    assert!(mock.requests().await.is_empty());
}

#[tokio::test]
async fn test_pop_requires_binding_transport() {
    let mock = MockEstServer::start().await;
    let client = client_for(&mock).await;

    // The pooled HTTP transport cannot derive a channel binding
    let result = client
        .enroll_with_proof_of_possession(
            "device-42",
            enrollment_key().await,
            &mut NoAuth,
            EnrollOptions::default(),
        )
        .await;

    assert!(matches!(result, Err(EstError::BindingUnavailable(_))));
    assert!(mock.requests().await.is_empty());
}
