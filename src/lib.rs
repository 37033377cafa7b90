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

//! # usg-est-enroll
//!
//! The enrollment core of an RFC 7030 EST (Enrollment over Secure Transport)
//! client: build a signed PKCS#10 request, submit it, answer HTTP
//! authentication challenges, poll through deferred issuance, and decode the
//! issued certificate collection.
//!
//! ## Features
//!
//! - **Async-first design** using Tokio, with cancellation and an overall deadline
//! - **Simple enrollment and re-enrollment** (`simpleenroll`, `simplereenroll`)
//! - **Deferred issuance**: `202 Accepted` + `Retry-After` polled to completion
//! - **HTTP Basic and Digest auth** (RFC 7617, RFC 7616)
//! - **Proof-of-possession**: CSR bound to the TLS session via the RFC 9266
//!   `tls-exporter` channel binding
//! - **Pluggable key providers**: the private key never leaves its [`hsm::KeyProvider`]
//!
//! ## Quick Start
//!
//! ```no_run
//! use usg_est_enroll::auth::{BasicAuth, Credentials};
//! use usg_est_enroll::hsm::EnrollmentKey;
//! use usg_est_enroll::{EnrollOptions, EnrollmentClient, EnrollmentOutcome, EstClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EstClientConfig::builder()
//!         .server_url("https://est.example.com")?
//!         .build()?;
//!
//!     let client = EnrollmentClient::new(config).await?;
//!     let key = EnrollmentKey::generate_software(None).await?;
//!     let mut auth = BasicAuth::new(Credentials::new("estuser", "estpwd"));
//!
//!     match client
//!         .enroll("device.example.com", key, &mut auth, EnrollOptions::default())
//!         .await?
//!     {
//!         EnrollmentOutcome::Issued(certs) => println!("Issued {} certificate(s)", certs.len()),
//!         other => println!("Enrollment failed: {}", other),
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Proof-of-Possession
//!
//! ```no_run
//! use usg_est_enroll::auth::NoAuth;
//! use usg_est_enroll::hsm::EnrollmentKey;
//! use usg_est_enroll::{EnrollOptions, EnrollmentClient, EstClientConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EstClientConfig::builder()
//!     .server_url("https://est.example.com")?
//!     .enable_channel_binding()
//!     .build()?;
//!
//! let client = EnrollmentClient::new(config).await?;
//! let key = EnrollmentKey::generate_software(None).await?;
//!
//! let outcome = client
//!     .enroll_with_proof_of_possession("device-42", key, &mut NoAuth, EnrollOptions::default())
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Cargo Features
//!
//! - `cli` (default): builds the `est-enroll` binary
//!
//! ## RFC 7030 Compliance
//!
//! This library implements:
//! - Section 3.2.3: HTTP-based client authentication
//! - Section 3.5: Linking identity and proof-of-possession
//! - Section 4.2: Simple Enrollment (`enroll`, `enroll_with_proof_of_possession`)
//! - Section 4.2.2: Simple Re-enrollment (`EnrollOptions::reenroll`)
//! - Section 4.2.3: Deferred issuance via `Retry-After`

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod auth;
pub mod binding;
pub mod client;
pub mod config;
pub mod csr;
pub mod error;
pub mod hsm;
pub mod operations;
pub mod tls;
pub mod transport;
pub mod types;

// Re-export main types at crate root for convenience
pub use auth::{AuthProvider, BasicAuth, Credentials, DigestAuth, NoAuth};
pub use binding::{ChannelBinding, ChannelBindingProvider};
pub use client::{EnrollOptions, EnrollmentClient};
pub use config::{ClientIdentity, EstClientConfig, EstClientConfigBuilder, TlsVersion, TrustAnchors};
pub use csr::{EnrollmentRequest, EnrollmentRequestBuilder};
pub use error::{EstError, Result};
pub use transport::TransportFault;
pub use types::{CertificateCollection, EnrollmentMode, EnrollmentOutcome, RejectReason};

// Re-export for callers handling issued certificates and cancellation
pub use tokio_util::sync::CancellationToken;
pub use x509_cert::Certificate;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// User-Agent string for HTTP requests.
pub const USER_AGENT: &str = concat!("usg-est-enroll/", env!("CARGO_PKG_VERSION"));
