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

//! Integration tests for POST /simplereenroll operation

use std::time::Duration;

use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

use crate::integration::{
    enrollment_key, fixtures, subject_cn, MockEstServer, PATH_SIMPLEENROLL, PATH_SIMPLEREENROLL,
};
use usg_est_enroll::{EnrollOptions, EnrollmentClient, EstClientConfig, NoAuth};

#[tokio::test]
async fn test_successful_reenrollment() {
    let mock = MockEstServer::start().await;
    mock.mock_enroll_success(
        PATH_SIMPLEREENROLL,
        &fixtures::certs_only_base64(&[fixtures::certificate("renewed.example.com")]),
    )
    .await;

    let client = crate::integration::client_for(&mock).await;

    let outcome = client
        .enroll(
            "renewed.example.com",
            enrollment_key().await,
            &mut NoAuth,
            EnrollOptions::reenroll(),
        )
        .await
        .expect("reenroll failed");

    let certs = outcome.into_certificates().expect("issued");
    assert_eq!(
        subject_cn(certs.first().unwrap()).as_deref(),
        Some("renewed.example.com")
    );

    // Only the re-enrollment endpoint was contacted
    let requests = mock.requests().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].url.path(), PATH_SIMPLEREENROLL);
}

#[tokio::test]
async fn test_reenroll_uses_ca_label() {
    let mock = MockEstServer::start().await;
    let labelled = "/.well-known/est/arbitraryLabel1/simplereenroll";
    mock.mock_enroll_success(
        labelled,
        &fixtures::certs_only_base64(&[fixtures::certificate("labelled")]),
    )
    .await;

    let config = EstClientConfig::builder()
        .server_url(mock.url())
        .unwrap()
        .ca_label("arbitraryLabel1")
        .build()
        .unwrap();
    let client = EnrollmentClient::new(config).await.unwrap();

    let outcome = client
        .enroll(
            "labelled",
            enrollment_key().await,
            &mut NoAuth,
            EnrollOptions::reenroll(),
        )
        .await
        .unwrap();

    assert!(outcome.is_issued());
}

#[tokio::test]
async fn test_reenroll_deferral_follows_same_state_machine() {
    let mock = MockEstServer::start().await;

    Mock::given(method("POST"))
        .and(path(PATH_SIMPLEREENROLL))
        .respond_with(ResponseTemplate::new(202).insert_header("Retry-After", "0"))
        .up_to_n_times(1)
        .mount(mock.inner())
        .await;
    mock.mock_enroll_success(
        PATH_SIMPLEREENROLL,
        &fixtures::certs_only_base64(&[fixtures::certificate("renewed")]),
    )
    .await;

    let config = EstClientConfig::builder()
        .server_url(mock.url())
        .unwrap()
        .retry_grace(Duration::ZERO)
        .retry_floor(Duration::from_millis(50))
        .build()
        .unwrap();
    let client = EnrollmentClient::new(config).await.unwrap();

    let outcome = client
        .enroll(
            "renewed",
            enrollment_key().await,
            &mut NoAuth,
            EnrollOptions::reenroll(),
        )
        .await
        .unwrap();

    assert!(outcome.is_issued());
    let requests = mock.requests().await;
    assert_eq!(requests.len(), 2);
    assert!(requests.iter().all(|r| r.url.path() != PATH_SIMPLEENROLL));
}
