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

//! Key providers that hold the enrollment key and sign requests.
//!
//! The enrollment core never touches private key material. It asks a
//! [`KeyProvider`] for the public key and for signatures over the CSR body,
//! so keys can live in software, an HSM, a TPM or a remote KMS.
//!
//! # Example
//!
//! ```no_run
//! use usg_est_enroll::hsm::{KeyAlgorithm, KeyProvider, SoftwareKeyProvider};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = SoftwareKeyProvider::new();
//!
//! let handle = provider
//!     .generate_key_pair(KeyAlgorithm::EcdsaP256, Some("device-key"))
//!     .await?;
//!
//! let public_key = provider.public_key(&handle).await?;
//! let signature = provider.sign(&handle, b"data to sign").await?;
//! # Ok(())
//! # }
//! ```

mod software;

pub use software::SoftwareKeyProvider;

use std::sync::Arc;

use async_trait::async_trait;
use spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned};

use crate::error::Result;

/// Handle to a key stored in a key provider.
///
/// An opaque reference; the key material stays inside the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyHandle {
    id: Vec<u8>,
    algorithm: KeyAlgorithm,
    label: Option<String>,
}

impl KeyHandle {
    /// Create a new key handle.
    pub fn new(id: Vec<u8>, algorithm: KeyAlgorithm, label: Option<String>) -> Self {
        Self {
            id,
            algorithm,
            label,
        }
    }

    /// Get the key algorithm.
    pub fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }

    /// Human-readable label, if any.
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Get the key ID (opaque, provider-specific).
    pub fn id(&self) -> &[u8] {
        &self.id
    }
}

/// Supported key algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum KeyAlgorithm {
    /// ECDSA with P-256 curve (secp256r1 / prime256v1), signed with SHA-256.
    EcdsaP256,
}

impl KeyAlgorithm {
    /// Get a string representation of the algorithm.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EcdsaP256 => "ECDSA-P256",
        }
    }
}

/// Trait for cryptographic key providers (software, HSM, TPM, cloud KMS, etc.).
///
/// Operations are asynchronous so remote signers fit the same interface.
/// Failures surface as [`EstError::SigningFailure`](crate::EstError::SigningFailure).
#[async_trait]
pub trait KeyProvider: Send + Sync {
    /// Generate a new key pair in the provider's storage.
    async fn generate_key_pair(
        &self,
        algorithm: KeyAlgorithm,
        label: Option<&str>,
    ) -> Result<KeyHandle>;

    /// Public key for a handle, as SubjectPublicKeyInfo.
    async fn public_key(&self, handle: &KeyHandle) -> Result<SubjectPublicKeyInfoOwned>;

    /// Sign `data` with the private key identified by `handle`.
    ///
    /// The provider hashes the data itself. ECDSA signatures are returned
    /// DER-encoded (ECDSA-Sig-Value).
    async fn sign(&self, handle: &KeyHandle, data: &[u8]) -> Result<Vec<u8>>;

    /// Signature AlgorithmIdentifier to place in the CSR.
    async fn algorithm_identifier(&self, handle: &KeyHandle) -> Result<AlgorithmIdentifierOwned>;

    /// Find a key by label.
    async fn find_key(&self, label: &str) -> Result<Option<KeyHandle>>;

    /// Delete a key.
    async fn delete_key(&self, handle: &KeyHandle) -> Result<()>;
}

/// Signer and key used for one enrollment.
#[derive(Clone)]
pub struct EnrollmentKey {
    /// Provider holding the private key.
    pub provider: Arc<dyn KeyProvider>,

    /// Key to enroll.
    pub handle: KeyHandle,
}

impl EnrollmentKey {
    /// Bundle a provider and one of its keys.
    pub fn new(provider: Arc<dyn KeyProvider>, handle: KeyHandle) -> Self {
        Self { provider, handle }
    }

    /// Generate a fresh P-256 key in an in-memory provider.
    pub async fn generate_software(label: Option<&str>) -> Result<Self> {
        let provider = Arc::new(SoftwareKeyProvider::new());
        let handle = provider
            .generate_key_pair(KeyAlgorithm::EcdsaP256, label)
            .await?;
        Ok(Self { provider, handle })
    }
}

impl std::fmt::Debug for EnrollmentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnrollmentKey")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}
