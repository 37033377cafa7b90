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

//! Classification of enrollment responses (RFC 7030 Section 4.2.3).

use std::time::{Duration, SystemTime};

use http::header::{CONTENT_TYPE, RETRY_AFTER, WWW_AUTHENTICATE};
use http::StatusCode;

use crate::auth::AuthChallenge;
use crate::config::DEFAULT_RETRY_FLOOR;
use crate::transport::{RawResponse, TransportFault};
use crate::types::{
    content_types, parse_certs_only, CertificateCollection, EnrollmentOutcome, RejectReason,
};

/// Longest server error message kept in a rejection.
const MAX_MESSAGE_LEN: usize = 512;

/// Latest retry time accepted from `Retry-After`, relative to now. Longer
/// values are clamped.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// A decoded response.
///
/// A challenge is not an outcome: the poller answers it and resubmits.
#[derive(Debug, Clone)]
pub enum Decoded {
    /// Protocol decision or transport fault.
    Outcome(EnrollmentOutcome),

    /// HTTP 401 with the challenges offered by the server.
    Challenge(Vec<AuthChallenge>),
}

/// Maps raw responses to [`Decoded`] values.
#[derive(Debug, Clone, Copy)]
pub struct ResponseDecoder {
    retry_floor: Duration,
}

impl Default for ResponseDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_FLOOR)
    }
}

impl ResponseDecoder {
    /// Create a decoder that defers by at least `retry_floor` when the server
    /// gives no usable `Retry-After`.
    pub fn new(retry_floor: Duration) -> Self {
        Self { retry_floor }
    }

    /// Decode a transport result against the current wall clock.
    pub fn decode(&self, result: Result<RawResponse, TransportFault>) -> Decoded {
        match result {
            Ok(response) => self.decode_at(&response, SystemTime::now()),
            Err(fault) => Decoded::Outcome(EnrollmentOutcome::TransportError(fault)),
        }
    }

    /// Decode a response received at `now`.
    pub fn decode_at(&self, response: &RawResponse, now: SystemTime) -> Decoded {
        let status = response.status;

        if status == StatusCode::ACCEPTED {
            let not_before = match response.header(RETRY_AFTER.as_str()) {
                Some(value) => parse_retry_after(value, now).unwrap_or_else(|| {
                    tracing::debug!("Unparseable Retry-After '{}', using floor", value);
                    now + self.retry_floor
                }),
                None => now + self.retry_floor,
            };
            return Decoded::Outcome(EnrollmentOutcome::Deferred { not_before });
        }

        if status == StatusCode::UNAUTHORIZED {
            let challenges = response
                .header_all(WWW_AUTHENTICATE.as_str())
                .into_iter()
                .flat_map(AuthChallenge::parse_all)
                .collect();
            return Decoded::Challenge(challenges);
        }

        if status.is_success() {
            return Decoded::Outcome(decode_issued(response));
        }

        Decoded::Outcome(EnrollmentOutcome::Rejected(RejectReason::server(
            status.as_u16(),
            error_message(response),
        )))
    }
}

fn decode_issued(response: &RawResponse) -> EnrollmentOutcome {
    if let Some(content_type) = response.header(CONTENT_TYPE.as_str()) {
        if !content_type
            .trim()
            .to_ascii_lowercase()
            .starts_with(content_types::PKCS7_MIME)
        {
            return EnrollmentOutcome::Rejected(RejectReason::malformed(format!(
                "unexpected content type '{}'",
                content_type
            )));
        }
    }

    match parse_certs_only(&response.body) {
        Ok(certs) if certs.is_empty() => EnrollmentOutcome::Rejected(RejectReason::EmptyIssuance),
        Ok(certs) => EnrollmentOutcome::Issued(CertificateCollection::new(certs)),
        Err(e) => EnrollmentOutcome::Rejected(RejectReason::malformed(e.to_string())),
    }
}

/// Parse `Retry-After` as delta-seconds or an HTTP-date.
///
/// The result is never later than `now + MAX_RETRY_AFTER`.
pub fn parse_retry_after(value: &str, now: SystemTime) -> Option<SystemTime> {
    let value = value.trim();
    let ceiling = now.checked_add(MAX_RETRY_AFTER)?;

    let not_before = if let Ok(seconds) = value.parse::<u64>() {
        now.checked_add(Duration::from_secs(seconds.min(MAX_RETRY_AFTER.as_secs())))?
    } else {
        chrono::DateTime::parse_from_rfc2822(value)
            .ok()
            .map(SystemTime::from)?
    };

    Some(not_before.min(ceiling))
}

fn error_message(response: &RawResponse) -> String {
    let body = String::from_utf8_lossy(&response.body);
    let body = body.trim();

    if body.is_empty() {
        return response
            .status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string();
    }

    body.chars().take(MAX_MESSAGE_LEN).collect()
}
