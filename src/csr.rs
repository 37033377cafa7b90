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

//! PKCS#10 enrollment request construction.
//!
//! The CSR is assembled field by field and signed through a
//! [`KeyProvider`](crate::hsm::KeyProvider), so the private key never has to
//! leave its provider. For proof-of-possession the TLS channel binding is
//! written into the challenge-password attribute before signing (RFC 7030
//! Section 3.5), which ties the signature to one TLS session.

use std::str::FromStr;

use base64::prelude::*;
use const_oid::db::rfc4519::CN;
use const_oid::ObjectIdentifier;
use der::asn1::{Any, BitString, PrintableStringRef, SetOfVec, Utf8StringRef};
use der::{Decode, Encode};
use spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned};
use x509_cert::attr::{Attribute, AttributeTypeAndValue};
use x509_cert::name::{Name, RdnSequence, RelativeDistinguishedName};
use x509_cert::request::{CertReq, CertReqInfo, Version};

use crate::binding::ChannelBinding;
use crate::error::{EstError, Result};
use crate::hsm::EnrollmentKey;
use crate::types::EnrollmentMode;

/// PKCS#9 challengePassword attribute.
pub const CHALLENGE_PASSWORD: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.7");

/// Upper bound on a commonName (RFC 5280 ub-common-name).
const MAX_COMMON_NAME_LEN: usize = 64;

/// A signed PKCS#10 request ready for submission.
#[derive(Clone, PartialEq, Eq)]
pub struct EnrollmentRequest {
    subject: Name,
    public_key: SubjectPublicKeyInfoOwned,
    signature_algorithm: AlgorithmIdentifierOwned,
    challenge_password: Option<String>,
    mode: EnrollmentMode,
    der: Vec<u8>,
}

impl EnrollmentRequest {
    /// Wrap an externally built, DER-encoded CSR for simple enrollment.
    pub fn from_der(der: impl Into<Vec<u8>>) -> Result<Self> {
        let der = der.into();
        let csr = CertReq::from_der(&der)
            .map_err(|e| EstError::csr(format!("Failed to parse CSR: {}", e)))?;

        let challenge_password = csr
            .info
            .attributes
            .iter()
            .find(|attr| attr.oid == CHALLENGE_PASSWORD)
            .and_then(|attr| attr.values.iter().next())
            .and_then(|value| value.decode_as::<PrintableStringRef<'_>>().ok())
            .map(|value| value.as_str().to_string());

        Ok(Self {
            subject: csr.info.subject,
            public_key: csr.info.public_key,
            signature_algorithm: csr.algorithm,
            challenge_password,
            mode: EnrollmentMode::Simple,
            der,
        })
    }

    /// Subject distinguished name.
    pub fn subject(&self) -> &Name {
        &self.subject
    }

    /// Public key being certified.
    pub fn public_key(&self) -> &SubjectPublicKeyInfoOwned {
        &self.public_key
    }

    /// Algorithm the request is signed with.
    pub fn signature_algorithm(&self) -> &AlgorithmIdentifierOwned {
        &self.signature_algorithm
    }

    /// Mode the request was built for.
    pub fn mode(&self) -> EnrollmentMode {
        self.mode
    }

    /// Channel binding carried in the challenge-password attribute, base64.
    pub fn proof_of_possession(&self) -> Option<&str> {
        match self.mode {
            EnrollmentMode::ProofOfPossession => self.challenge_password.as_deref(),
            EnrollmentMode::Simple => None,
        }
    }

    /// Raw challenge-password attribute, whatever mode the request is in.
    ///
    /// A server checking proof-of-possession compares this against its own
    /// view of the session binding.
    pub fn challenge_password(&self) -> Option<&str> {
        self.challenge_password.as_deref()
    }

    /// DER-encoded CSR.
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Base64 body as sent to the server.
    pub fn to_base64(&self) -> String {
        BASE64_STANDARD.encode(&self.der)
    }
}

impl std::fmt::Debug for EnrollmentRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnrollmentRequest")
            .field("subject", &self.subject.to_string())
            .field("mode", &self.mode)
            .field("der_len", &self.der.len())
            .finish()
    }
}

/// Builds signed enrollment requests for one key.
///
/// # Example
///
/// ```no_run
/// use usg_est_enroll::csr::EnrollmentRequestBuilder;
/// use usg_est_enroll::hsm::EnrollmentKey;
/// use usg_est_enroll::types::EnrollmentMode;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let key = EnrollmentKey::generate_software(None).await?;
/// let request = EnrollmentRequestBuilder::new(key)
///     .build("device-42", EnrollmentMode::Simple, None)
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct EnrollmentRequestBuilder {
    key: EnrollmentKey,
}

impl EnrollmentRequestBuilder {
    /// Create a builder that signs with `key`.
    pub fn new(key: EnrollmentKey) -> Self {
        Self { key }
    }

    /// The key requests are built for.
    pub fn key(&self) -> &EnrollmentKey {
        &self.key
    }

    /// Build and sign a request for `identity`.
    ///
    /// `identity` is either a bare common name or an RFC 4514 distinguished
    /// name (`CN=device,O=Example`). A binding is required in
    /// proof-of-possession mode and rejected in simple mode.
    ///
    /// # Errors
    ///
    /// [`EstError::InvalidIdentity`], [`EstError::BindingRequired`],
    /// [`EstError::UnexpectedBinding`], or [`EstError::SigningFailure`] from
    /// the key provider.
    pub async fn build(
        &self,
        identity: &str,
        mode: EnrollmentMode,
        binding: Option<&ChannelBinding>,
    ) -> Result<EnrollmentRequest> {
        let subject = subject_name(identity)?;

        let challenge_password = match (mode, binding) {
            (EnrollmentMode::ProofOfPossession, Some(binding)) => {
                Some(binding.to_challenge_password())
            }
            (EnrollmentMode::ProofOfPossession, None) => return Err(EstError::BindingRequired),
            (EnrollmentMode::Simple, Some(_)) => return Err(EstError::UnexpectedBinding),
            (EnrollmentMode::Simple, None) => None,
        };

        let provider = &self.key.provider;
        let handle = &self.key.handle;

        let public_key = provider
            .public_key(handle)
            .await
            .map_err(into_signing_failure)?;
        let signature_algorithm = provider
            .algorithm_identifier(handle)
            .await
            .map_err(into_signing_failure)?;

        let mut attributes = SetOfVec::new();
        if let Some(ref password) = challenge_password {
            attributes.insert(challenge_password_attribute(password)?)?;
        }

        let info = CertReqInfo {
            version: Version::V1,
            subject: subject.clone(),
            public_key: public_key.clone(),
            attributes,
        };

        let info_der = info.to_der()?;
        let signature = provider
            .sign(handle, &info_der)
            .await
            .map_err(into_signing_failure)?;

        let csr = CertReq {
            info,
            algorithm: signature_algorithm.clone(),
            signature: BitString::from_bytes(&signature)?,
        };

        let der = csr
            .to_der()
            .map_err(|e| EstError::csr(format!("Failed to encode CSR: {}", e)))?;

        tracing::debug!("Built {:?} request for {}", mode, subject);

        Ok(EnrollmentRequest {
            subject,
            public_key,
            signature_algorithm,
            challenge_password,
            mode,
            der,
        })
    }
}

/// Turn an identity into an X.500 subject name.
fn subject_name(identity: &str) -> Result<Name> {
    let identity = identity.trim();
    if identity.is_empty() {
        return Err(EstError::invalid_identity("identity is empty"));
    }

    if identity.contains('=') {
        let name = Name::from_str(identity)
            .map_err(|e| EstError::invalid_identity(format!("'{}': {}", identity, e)))?;
        if name.0.is_empty() {
            return Err(EstError::invalid_identity("distinguished name is empty"));
        }
        return Ok(name);
    }

    if identity.chars().count() > MAX_COMMON_NAME_LEN {
        return Err(EstError::invalid_identity(format!(
            "common name longer than {} characters",
            MAX_COMMON_NAME_LEN
        )));
    }

    let value = Utf8StringRef::new(identity)
        .map_err(|e| EstError::invalid_identity(e.to_string()))?;
    let atv = AttributeTypeAndValue {
        oid: CN,
        value: Any::encode_from(&value)
            .map_err(|e| EstError::invalid_identity(e.to_string()))?,
    };
    let rdn = RelativeDistinguishedName(
        SetOfVec::try_from(vec![atv]).map_err(|e| EstError::invalid_identity(e.to_string()))?,
    );

    Ok(RdnSequence(vec![rdn]))
}

fn challenge_password_attribute(password: &str) -> Result<Attribute> {
    let value = PrintableStringRef::new(password)
        .map_err(|e| EstError::csr(format!("Invalid challenge password: {}", e)))?;

    let mut values = SetOfVec::new();
    values.insert(Any::encode_from(&value)?)?;

    Ok(Attribute {
        oid: CHALLENGE_PASSWORD,
        values,
    })
}

/// Key provider errors surface as signing failures; existing ones pass through.
fn into_signing_failure(err: EstError) -> EstError {
    match err {
        EstError::SigningFailure(_) => err,
        other => EstError::signing(other.to_string()),
    }
}
