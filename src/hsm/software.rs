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

//! Software-based (in-memory) key provider implementation.
//!
//! Intended for development, testing and the command-line tool.
//!
//! # Security Considerations
//!
//! **WARNING**: private keys live in process memory. They are not protected
//! by a hardware boundary and are lost when the process exits. Use a
//! hardware-backed [`KeyProvider`] where that matters.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use const_oid::db::rfc5912::ECDSA_WITH_SHA_256;
use der::Decode;
use p256::ecdsa::signature::Signer;
use p256::ecdsa::{DerSignature, SigningKey};
use p256::pkcs8::{DecodePrivateKey, EncodePublicKey};
use rand_core::OsRng;
use spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned};

use super::{KeyAlgorithm, KeyHandle, KeyProvider};
use crate::error::{EstError, Result};

struct StoredKey {
    signing_key: SigningKey,
    label: Option<String>,
}

/// Software key provider that stores P-256 keys in memory.
///
/// Keys are kept in a map behind an `Arc<RwLock<>>`; clones share storage.
#[derive(Clone, Default)]
pub struct SoftwareKeyProvider {
    keys: Arc<RwLock<HashMap<Vec<u8>, StoredKey>>>,
    next_id: Arc<RwLock<u64>>,
}

impl SoftwareKeyProvider {
    /// Create a new, empty software key provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Import an existing PKCS#8 PEM P-256 private key.
    pub fn import_pkcs8_pem(&self, pem: &str, label: Option<&str>) -> Result<KeyHandle> {
        let signing_key = SigningKey::from_pkcs8_pem(pem)
            .map_err(|e| EstError::signing(format!("Failed to import key: {}", e)))?;
        self.store(signing_key, label)
    }

    fn next_key_id(&self) -> Result<Vec<u8>> {
        let mut id = self.next_id.write().map_err(|_| lock_poisoned())?;
        let current = *id;
        *id += 1;
        Ok(current.to_be_bytes().to_vec())
    }

    fn store(&self, signing_key: SigningKey, label: Option<&str>) -> Result<KeyHandle> {
        let id = self.next_key_id()?;
        let mut keys = self.keys.write().map_err(|_| lock_poisoned())?;

        if let Some(label) = label {
            if keys.values().any(|k| k.label.as_deref() == Some(label)) {
                return Err(EstError::signing(format!(
                    "Key with label '{}' already exists",
                    label
                )));
            }
        }

        keys.insert(
            id.clone(),
            StoredKey {
                signing_key,
                label: label.map(String::from),
            },
        );

        Ok(KeyHandle::new(
            id,
            KeyAlgorithm::EcdsaP256,
            label.map(String::from),
        ))
    }

    fn with_key<T>(&self, handle: &KeyHandle, f: impl FnOnce(&SigningKey) -> Result<T>) -> Result<T> {
        let keys = self.keys.read().map_err(|_| lock_poisoned())?;
        let stored = keys
            .get(handle.id())
            .ok_or_else(|| EstError::signing(format!("Key not found: {:?}", handle.id())))?;
        f(&stored.signing_key)
    }
}

fn lock_poisoned() -> EstError {
    EstError::signing("software key store lock poisoned")
}

#[async_trait]
impl KeyProvider for SoftwareKeyProvider {
    async fn generate_key_pair(
        &self,
        algorithm: KeyAlgorithm,
        label: Option<&str>,
    ) -> Result<KeyHandle> {
        match algorithm {
            KeyAlgorithm::EcdsaP256 => {
                let signing_key = SigningKey::random(&mut OsRng);
                let handle = self.store(signing_key, label)?;
                tracing::debug!("Generated {} key {:?}", algorithm.as_str(), handle.label());
                Ok(handle)
            }
        }
    }

    async fn public_key(&self, handle: &KeyHandle) -> Result<SubjectPublicKeyInfoOwned> {
        self.with_key(handle, |key| {
            let der = key
                .verifying_key()
                .to_public_key_der()
                .map_err(|e| EstError::signing(format!("Failed to encode public key: {}", e)))?;
            SubjectPublicKeyInfoOwned::from_der(der.as_bytes())
                .map_err(|e| EstError::signing(format!("Failed to parse public key: {}", e)))
        })
    }

    async fn sign(&self, handle: &KeyHandle, data: &[u8]) -> Result<Vec<u8>> {
        self.with_key(handle, |key| {
            let signature: DerSignature = key
                .try_sign(data)
                .map_err(|e| EstError::signing(e.to_string()))?;
            Ok(signature.as_bytes().to_vec())
        })
    }

    async fn algorithm_identifier(&self, handle: &KeyHandle) -> Result<AlgorithmIdentifierOwned> {
        match handle.algorithm() {
            KeyAlgorithm::EcdsaP256 => Ok(AlgorithmIdentifierOwned {
                oid: ECDSA_WITH_SHA_256,
                parameters: None,
            }),
        }
    }

    async fn find_key(&self, label: &str) -> Result<Option<KeyHandle>> {
        let keys = self.keys.read().map_err(|_| lock_poisoned())?;

        Ok(keys
            .iter()
            .find(|(_, stored)| stored.label.as_deref() == Some(label))
            .map(|(id, _)| {
                KeyHandle::new(id.clone(), KeyAlgorithm::EcdsaP256, Some(label.to_string()))
            }))
    }

    async fn delete_key(&self, handle: &KeyHandle) -> Result<()> {
        let mut keys = self.keys.write().map_err(|_| lock_poisoned())?;

        if keys.remove(handle.id()).is_some() {
            Ok(())
        } else {
            Err(EstError::signing(format!(
                "Key not found for deletion: {:?}",
                handle.id()
            )))
        }
    }
}
