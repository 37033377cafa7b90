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

//! EST enrollment result types and PKCS#7 utilities.

mod pkcs7;

pub use pkcs7::{encode_certs_only, parse_certs_only, CertificateCollection};

use std::fmt;
use std::time::SystemTime;

use crate::transport::TransportFault;

/// Result of one enrollment exchange.
///
/// `Issued`, `Rejected` and `TransportError` are terminal. `Deferred` is only
/// ever observed by the poller; the public operations never return it.
#[derive(Debug, Clone)]
pub enum EnrollmentOutcome {
    /// The server issued the certificate collection.
    Issued(CertificateCollection),

    /// The server accepted the request but has no certificate yet.
    Deferred {
        /// Point in time before which the server will not have a result.
        not_before: SystemTime,
    },

    /// The server declined the request.
    Rejected(RejectReason),

    /// Client or network-layer fault.
    TransportError(TransportFault),
}

impl EnrollmentOutcome {
    /// Returns true for `Issued`, `Rejected` and `TransportError`.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Deferred { .. })
    }

    /// Returns true if certificates were issued.
    pub fn is_issued(&self) -> bool {
        matches!(self, Self::Issued(_))
    }

    /// Returns the issued certificates, if any.
    pub fn certificates(&self) -> Option<&CertificateCollection> {
        match self {
            Self::Issued(certs) => Some(certs),
            _ => None,
        }
    }

    /// Consume the outcome, returning the issued certificates if any.
    pub fn into_certificates(self) -> Option<CertificateCollection> {
        match self {
            Self::Issued(certs) => Some(certs),
            _ => None,
        }
    }

    /// Returns the rejection reason if the server declined the request.
    pub fn rejection(&self) -> Option<&RejectReason> {
        match self {
            Self::Rejected(reason) => Some(reason),
            _ => None,
        }
    }

    /// Returns the transport fault if the exchange failed below the protocol.
    pub fn transport_fault(&self) -> Option<&TransportFault> {
        match self {
            Self::TransportError(fault) => Some(fault),
            _ => None,
        }
    }
}

impl fmt::Display for EnrollmentOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Issued(certs) => write!(f, "issued {} certificate(s)", certs.len()),
            Self::Deferred { not_before } => {
                let wait = not_before
                    .duration_since(SystemTime::now())
                    .unwrap_or_default();
                write!(f, "deferred for {}ms", wait.as_millis())
            }
            Self::Rejected(reason) => write!(f, "rejected: {}", reason),
            Self::TransportError(fault) => write!(f, "transport error: {}", fault),
        }
    }
}

/// Why the server declined an enrollment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// The authenticated resubmission was also refused.
    AuthenticationFailed,

    /// The server reported success but returned no certificate.
    EmptyIssuance,

    /// The server's success response could not be decoded.
    MalformedResponse(String),

    /// The server returned an error status.
    Server {
        /// HTTP status code.
        status: u16,
        /// Error message from the response body or status line.
        message: String,
    },
}

impl RejectReason {
    /// Create a server rejection with status and message.
    pub fn server(status: u16, message: impl Into<String>) -> Self {
        Self::Server {
            status,
            message: message.into(),
        }
    }

    /// Create a malformed response rejection.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedResponse(msg.into())
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AuthenticationFailed => write!(f, "authentication failed"),
            Self::EmptyIssuance => write!(f, "no certificate in enrollment response"),
            Self::MalformedResponse(msg) => write!(f, "malformed response: {}", msg),
            Self::Server { status, message } => write!(f, "server error {}: {}", status, message),
        }
    }
}

/// Enrollment flavour for a single call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollmentMode {
    /// Plain PKCS#10 enrollment.
    Simple,

    /// CSR bound to the TLS session it is submitted over.
    ProofOfPossession,
}

/// Content types used in EST protocol.
pub mod content_types {
    /// PKCS#10 CSR content type.
    pub const PKCS10: &str = "application/pkcs10";

    /// PKCS#7/CMS content type.
    pub const PKCS7_MIME: &str = "application/pkcs7-mime";

    /// PKCS#7 certs-only content type with smime-type parameter.
    pub const PKCS7_CERTS_ONLY: &str = "application/pkcs7-mime; smime-type=certs-only";
}

/// EST operation paths.
pub mod operations {
    /// Simple enrollment endpoint.
    pub const SIMPLE_ENROLL: &str = "simpleenroll";

    /// Simple re-enrollment endpoint.
    pub const SIMPLE_REENROLL: &str = "simplereenroll";

    /// Operation name for an enrollment call.
    pub fn enrollment(reenroll: bool) -> &'static str {
        if reenroll {
            SIMPLE_REENROLL
        } else {
            SIMPLE_ENROLL
        }
    }
}
