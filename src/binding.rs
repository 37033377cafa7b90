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

//! TLS channel binding for proof-of-possession enrollment.
//!
//! RFC 7030 Section 3.5 ties a CSR to the TLS session that carries it by
//! placing a channel binding value in the CSR's challenge-password attribute
//! before the CSR is signed. The value is derived from the session's
//! handshake secrets, so a captured CSR cannot be replayed over another
//! connection.

use std::fmt;

use base64::prelude::*;

use crate::error::Result;

/// RFC 9266 exporter label for the `tls-exporter` channel binding type.
pub const TLS_EXPORTER_LABEL: &[u8] = b"EXPORTER-Channel-Binding";

/// Length of a `tls-exporter` channel binding in bytes.
pub const TLS_EXPORTER_LEN: usize = 32;

/// Channel binding bytes for one TLS session.
///
/// Only valid while the session it was derived from is open. The value is
/// deliberately not `Clone`: each request takes it from its own session.
#[derive(PartialEq, Eq)]
pub struct ChannelBinding(Vec<u8>);

impl ChannelBinding {
    /// Wrap raw channel binding bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Raw binding bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Base64 form placed in the CSR challenge-password attribute.
    pub fn to_challenge_password(&self) -> String {
        BASE64_STANDARD.encode(&self.0)
    }
}

impl fmt::Debug for ChannelBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelBinding({} bytes)", self.0.len())
    }
}

/// Source of the channel binding for the active secure session.
pub trait ChannelBindingProvider {
    /// Channel binding of the current session.
    ///
    /// Fails with [`EstError::BindingUnavailable`](crate::EstError::BindingUnavailable)
    /// when the session cannot provide one.
    fn current_binding(&self) -> Result<ChannelBinding>;
}
