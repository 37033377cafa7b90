//! PKCS#7/CMS certs-only utilities.
//!
//! EST returns issued certificates as a base64 "certs-only" SignedData. The
//! certificate set is walked element by element rather than through a DER
//! `SET OF`, which would reorder it: callers see certificates in the order
//! the server sent them.

use base64::prelude::*;
use cms::content_info::ContentInfo;
use const_oid::db::rfc5911::{ID_DATA, ID_SIGNED_DATA};
use der::{Any, AnyRef, Decode, Encode, Reader, SliceReader, Tag, TagNumber, Tagged};
use x509_cert::Certificate;

use crate::error::{EstError, Result};

/// `[0] IMPLICIT CertificateSet` inside SignedData.
const CERTIFICATES_TAG: Tag = Tag::ContextSpecific {
    constructed: true,
    number: TagNumber::N0,
};

/// Ordered collection of certificates returned by an enrollment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertificateCollection {
    /// The certificates, in the order received.
    pub certificates: Vec<Certificate>,
}

impl CertificateCollection {
    /// Create a new certificate collection.
    pub fn new(certificates: Vec<Certificate>) -> Self {
        Self { certificates }
    }

    /// Returns true if the collection is empty.
    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }

    /// Returns the number of certificates.
    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    /// The first certificate, conventionally the one issued to the client.
    pub fn first(&self) -> Option<&Certificate> {
        self.certificates.first()
    }

    /// Iterate over the certificates.
    pub fn iter(&self) -> impl Iterator<Item = &Certificate> {
        self.certificates.iter()
    }

    /// Re-encode as a base64 PKCS#7 certs-only body.
    pub fn to_certs_only(&self) -> Result<String> {
        encode_certs_only(&self.certificates)
    }
}

impl IntoIterator for CertificateCollection {
    type Item = Certificate;
    type IntoIter = std::vec::IntoIter<Certificate>;

    fn into_iter(self) -> Self::IntoIter {
        self.certificates.into_iter()
    }
}

impl<'a> IntoIterator for &'a CertificateCollection {
    type Item = &'a Certificate;
    type IntoIter = std::slice::Iter<'a, Certificate>;

    fn into_iter(self) -> Self::IntoIter {
        self.certificates.iter()
    }
}

/// Parse a base64 PKCS#7 certs-only response body.
pub fn parse_certs_only(body: &[u8]) -> Result<Vec<Certificate>> {
    let der_bytes = decode_base64(body)?;

    let content_info = ContentInfo::from_der(&der_bytes)
        .map_err(|e| EstError::cms_parsing(format!("Failed to parse ContentInfo: {}", e)))?;

    if content_info.content_type != ID_SIGNED_DATA {
        return Err(EstError::cms_parsing(format!(
            "Expected SignedData OID, got {}",
            content_info.content_type
        )));
    }

    let signed_data = content_info
        .content
        .to_der()
        .map_err(|e| EstError::cms_parsing(format!("Failed to encode content: {}", e)))?;

    certificates_in_wire_order(&signed_data)
        .map_err(|e| EstError::cms_parsing(format!("Failed to parse SignedData: {}", e)))
}

/// Encode certificates as a base64 PKCS#7 certs-only body, keeping their order.
pub fn encode_certs_only(certificates: &[Certificate]) -> Result<String> {
    let mut cert_bytes = Vec::new();
    for cert in certificates {
        cert.encode_to_vec(&mut cert_bytes).map_err(|e| {
            EstError::certificate_parsing(format!("Failed to encode certificate: {}", e))
        })?;
    }

    let fields = [
        1u8.to_der()?,
        Any::new(Tag::Set, Vec::<u8>::new())?.to_der()?,
        Any::new(Tag::Sequence, ID_DATA.to_der()?)?.to_der()?,
        Any::new(CERTIFICATES_TAG, cert_bytes)?.to_der()?,
        Any::new(Tag::Set, Vec::<u8>::new())?.to_der()?,
    ]
    .concat();

    let content_info = ContentInfo {
        content_type: ID_SIGNED_DATA,
        content: Any::new(Tag::Sequence, fields)?,
    };

    Ok(BASE64_STANDARD.encode(content_info.to_der()?))
}

/// Decode base64 data, handling various line ending formats.
fn decode_base64(data: &[u8]) -> Result<Vec<u8>> {
    let cleaned: Vec<u8> = data
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();

    BASE64_STANDARD.decode(&cleaned).map_err(EstError::Base64)
}

/// Walk SignedData and pull certificates out of the `[0]` set in order.
fn certificates_in_wire_order(signed_data: &[u8]) -> der::Result<Vec<Certificate>> {
    let mut reader = SliceReader::new(signed_data)?;

    let certificates = reader.sequence(|seq| {
        // version, digestAlgorithms, encapContentInfo
        for _ in 0..3 {
            AnyRef::decode(seq)?;
        }

        let mut certificates = Vec::new();
        while !seq.is_finished() {
            let field = AnyRef::decode(seq)?;
            if field.tag() == CERTIFICATES_TAG {
                certificates = decode_certificate_set(field.value())?;
            }
        }
        Ok(certificates)
    })?;

    reader.finish(certificates)
}

fn decode_certificate_set(bytes: &[u8]) -> der::Result<Vec<Certificate>> {
    let mut reader = SliceReader::new(bytes)?;
    let mut certificates = Vec::new();

    while !reader.is_finished() {
        let choice = AnyRef::decode(&mut reader)?;

        // CertificateChoices may also carry attribute or other certificate
        // formats; only plain X.509 is a SEQUENCE.
        if choice.tag() != Tag::Sequence {
            tracing::warn!("Skipping non-X.509 certificate choice with tag {}", choice.tag());
            continue;
        }

        certificates.push(Certificate::from_der(&choice.to_der()?)?);
    }

    Ok(certificates)
}
