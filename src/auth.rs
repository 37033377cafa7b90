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

//! HTTP authentication strategies for enrollment requests.
//!
//! RFC 7030 Section 3.2.3 allows HTTP-based client authentication alongside
//! (or instead of) TLS client certificates. Each scheme is an
//! [`AuthProvider`]; the poller asks it for an `Authorization` header before
//! the first submission and again when the server answers with a challenge.
//!
//! - [`NoAuth`]: never sends credentials
//! - [`BasicAuth`]: sends the same credentials on every submission
//! - [`DigestAuth`]: probes without credentials, then answers the server's
//!   digest challenge (RFC 7616, RFC 2617 legacy mode)

use std::fmt;

use base64::prelude::*;
use md5::Md5;
use rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha256, Sha512_256};

use crate::error::{EstError, Result};

/// Value of an `Authorization` header. Never printed by `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct Authorization(String);

impl Authorization {
    /// Wrap a complete header value, e.g. `Basic dXNlcjpwYXNz`.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Header value.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Authentication scheme of the header.
    pub fn scheme(&self) -> &str {
        self.0.split_whitespace().next().unwrap_or("")
    }
}

impl fmt::Debug for Authorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Authorization({} <redacted>)", self.scheme())
    }
}

/// Credential bundle for HTTP authentication.
#[derive(Clone)]
pub struct Credentials {
    /// Realm to answer with instead of the one the server names.
    pub realm: Option<String>,

    /// Username (may be empty for password-only auth).
    pub principal: String,

    secret: String,
}

impl Credentials {
    /// Create new credentials.
    pub fn new(principal: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            realm: None,
            principal: principal.into(),
            secret: secret.into(),
        }
    }

    /// Set the realm override.
    pub fn with_realm(mut self, realm: impl Into<String>) -> Self {
        let realm = realm.into();
        self.realm = (!realm.is_empty()).then_some(realm);
        self
    }

    /// Parse `realm:user:password` or `user:password`.
    pub fn parse(value: &str) -> Result<Self> {
        let parts: Vec<&str> = value.splitn(3, ':').collect();
        match parts.as_slice() {
            [realm, user, password] => Ok(Self::new(*user, *password).with_realm(*realm)),
            [user, password] => Ok(Self::new(*user, *password)),
            _ => Err(EstError::config(
                "credentials must be <realm:user:password> or <user:password>",
            )),
        }
    }

    /// Password.
    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("realm", &self.realm)
            .field("principal", &self.principal)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Request line the credentials are computed for.
#[derive(Debug, Clone, Copy)]
pub struct RequestTarget<'a> {
    /// HTTP method.
    pub method: &'a str,

    /// Request URI as sent on the request line.
    pub uri: &'a str,
}

/// One challenge from a `WWW-Authenticate` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    /// Authentication scheme, e.g. `Digest`.
    pub scheme: String,

    params: Vec<(String, String)>,
}

impl AuthChallenge {
    /// Parse every challenge in a `WWW-Authenticate` header value.
    pub fn parse_all(header: &str) -> Vec<AuthChallenge> {
        let mut challenges = Vec::new();
        let mut rest = header;

        loop {
            rest = rest.trim_start_matches(|c: char| c == ',' || c.is_whitespace());
            if rest.is_empty() {
                break;
            }

            let end = rest
                .find(|c: char| c == ',' || c.is_whitespace())
                .unwrap_or(rest.len());
            let mut challenge = AuthChallenge {
                scheme: rest[..end].to_string(),
                params: Vec::new(),
            };
            rest = &rest[end..];

            loop {
                rest = rest.trim_start_matches(|c: char| c == ',' || c.is_whitespace());
                let name_end = rest
                    .find(|c: char| c == '=' || c == ',' || c.is_whitespace())
                    .unwrap_or(rest.len());
                let after_name = rest[name_end..].trim_start();
                if name_end == 0 || !after_name.starts_with('=') {
                    // Start of the next challenge, or the end of the header.
                    break;
                }

                let name = rest[..name_end].to_ascii_lowercase();
                let after_eq = after_name[1..].trim_start();
                let (value, remaining) = match after_eq.strip_prefix('"') {
                    Some(quoted) => parse_quoted(quoted),
                    None => {
                        let end = after_eq
                            .find(|c: char| c == ',' || c.is_whitespace())
                            .unwrap_or(after_eq.len());
                        (after_eq[..end].to_string(), &after_eq[end..])
                    }
                };
                challenge.params.push((name, value));
                rest = remaining;
            }

            challenges.push(challenge);
        }

        challenges
    }

    /// Returns true if this challenge uses the given scheme.
    pub fn is_scheme(&self, scheme: &str) -> bool {
        self.scheme.eq_ignore_ascii_case(scheme)
    }

    /// Value of an auth-param, matched case-insensitively.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Realm named by the server.
    pub fn realm(&self) -> Option<&str> {
        self.param("realm")
    }
}

/// Read a quoted-string body (opening quote already consumed).
fn parse_quoted(input: &str) -> (String, &str) {
    let mut value = String::new();
    let mut escaped = false;

    for (i, c) in input.char_indices() {
        if escaped {
            value.push(c);
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == '"' {
            return (value, &input[i + 1..]);
        } else {
            value.push(c);
        }
    }

    (value, "")
}

/// Produces credentials for enrollment submissions.
///
/// `challenge` is called with `None` before the first submission of an
/// attempt and with the server's challenges after a 401. Returning `None`
/// after a challenge ends the attempt with `AuthenticationFailed`.
pub trait AuthProvider: Send {
    /// Scheme name for logging.
    fn scheme(&self) -> &'static str;

    /// Authorization for the next submission.
    fn challenge(
        &mut self,
        target: &RequestTarget<'_>,
        challenges: Option<&[AuthChallenge]>,
    ) -> Option<Authorization>;
}

/// No HTTP authentication.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAuth;

impl AuthProvider for NoAuth {
    fn scheme(&self) -> &'static str {
        "none"
    }

    fn challenge(
        &mut self,
        _target: &RequestTarget<'_>,
        _challenges: Option<&[AuthChallenge]>,
    ) -> Option<Authorization> {
        None
    }
}

/// HTTP Basic authentication (RFC 7617).
#[derive(Debug, Clone)]
pub struct BasicAuth {
    credentials: Credentials,
}

impl BasicAuth {
    /// Create a Basic auth provider.
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }
}

impl AuthProvider for BasicAuth {
    fn scheme(&self) -> &'static str {
        "basic"
    }

    fn challenge(
        &mut self,
        _target: &RequestTarget<'_>,
        _challenges: Option<&[AuthChallenge]>,
    ) -> Option<Authorization> {
        let credentials = BASE64_STANDARD.encode(format!(
            "{}:{}",
            self.credentials.principal,
            self.credentials.secret()
        ));
        Some(Authorization::new(format!("Basic {}", credentials)))
    }
}

/// Hash algorithms accepted in a digest challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    /// MD5 (RFC 2617 default).
    Md5,
    /// SHA-256 (RFC 7616).
    Sha256,
    /// SHA-512/256 (RFC 7616).
    Sha512_256,
}

impl DigestAlgorithm {
    /// Parse an `algorithm` parameter, returning the hash and whether the
    /// `-sess` variant was requested.
    pub fn parse(name: &str) -> Option<(Self, bool)> {
        let upper = name.to_ascii_uppercase();
        let (base, session) = match upper.strip_suffix("-SESS") {
            Some(base) => (base, true),
            None => (upper.as_str(), false),
        };

        let algorithm = match base {
            "MD5" => Self::Md5,
            "SHA-256" => Self::Sha256,
            "SHA-512-256" => Self::Sha512_256,
            _ => return None,
        };
        Some((algorithm, session))
    }

    fn hash(self, input: &str) -> String {
        match self {
            Self::Md5 => hex_digest::<Md5>(input),
            Self::Sha256 => hex_digest::<Sha256>(input),
            Self::Sha512_256 => hex_digest::<Sha512_256>(input),
        }
    }
}

fn hex_digest<D: Digest>(input: &str) -> String {
    hex::encode(D::digest(input.as_bytes()))
}

/// Inputs to a digest `response` computation.
#[derive(Clone)]
pub struct DigestInput<'a> {
    /// Hash function named by the challenge.
    pub algorithm: DigestAlgorithm,
    /// `-sess` variant: HA1 also covers the nonce and cnonce.
    pub session: bool,
    /// User name sent in the clear.
    pub username: &'a str,
    /// Realm from the challenge, or the caller's override.
    pub realm: &'a str,
    /// Shared secret; never sent.
    pub password: &'a str,
    /// Server nonce.
    pub nonce: &'a str,
    /// Client nonce.
    pub cnonce: &'a str,
    /// Nonce count as eight hex digits, e.g. `00000001`.
    pub nc: &'a str,
    /// `Some("auth")` for RFC 7616 mode, `None` for RFC 2069 legacy mode.
    pub qop: Option<&'a str>,
    /// HTTP method of the request, `POST` for enrollment.
    pub method: &'a str,
    /// Request target as sent on the request line.
    pub uri: &'a str,
}

impl fmt::Debug for DigestInput<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DigestInput")
            .field("algorithm", &self.algorithm)
            .field("session", &self.session)
            .field("username", &self.username)
            .field("realm", &self.realm)
            .field("password", &"<redacted>")
            .field("nonce", &self.nonce)
            .field("cnonce", &self.cnonce)
            .field("nc", &self.nc)
            .field("qop", &self.qop)
            .field("method", &self.method)
            .field("uri", &self.uri)
            .finish()
    }
}

/// Compute the digest `response` value.
pub fn digest_response(input: &DigestInput<'_>) -> String {
    let alg = input.algorithm;

    let mut ha1 = alg.hash(&format!(
        "{}:{}:{}",
        input.username, input.realm, input.password
    ));
    if input.session {
        ha1 = alg.hash(&format!("{}:{}:{}", ha1, input.nonce, input.cnonce));
    }

    let ha2 = alg.hash(&format!("{}:{}", input.method, input.uri));

    match input.qop {
        Some(qop) => alg.hash(&format!(
            "{}:{}:{}:{}:{}:{}",
            ha1, input.nonce, input.nc, input.cnonce, qop, ha2
        )),
        None => alg.hash(&format!("{}:{}:{}", ha1, input.nonce, ha2)),
    }
}

/// HTTP Digest authentication.
///
/// The first submission of an attempt carries no credentials; the server's
/// challenge supplies the nonce the response is bound to.
#[derive(Debug, Clone)]
pub struct DigestAuth {
    credentials: Credentials,
    last_nonce: Option<String>,
    nonce_count: u32,
}

impl DigestAuth {
    /// Create a Digest auth provider. A realm set on `credentials` overrides
    /// the realm named by the server.
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            last_nonce: None,
            nonce_count: 0,
        }
    }

    fn next_nonce_count(&mut self, nonce: &str) -> String {
        if self.last_nonce.as_deref() == Some(nonce) {
            self.nonce_count += 1;
        } else {
            self.last_nonce = Some(nonce.to_string());
            self.nonce_count = 1;
        }
        format!("{:08x}", self.nonce_count)
    }

    fn respond(
        &mut self,
        challenge: &AuthChallenge,
        target: &RequestTarget<'_>,
    ) -> Option<Authorization> {
        let nonce = challenge.param("nonce")?.to_string();

        let algorithm_name = challenge.param("algorithm").unwrap_or("MD5");
        let Some((algorithm, session)) = DigestAlgorithm::parse(algorithm_name) else {
            tracing::warn!("Unsupported digest algorithm: {}", algorithm_name);
            return None;
        };

        let qop = match challenge.param("qop") {
            Some(offered) => {
                if !offered
                    .split(',')
                    .any(|q| q.trim().eq_ignore_ascii_case("auth"))
                {
                    tracing::warn!("Digest challenge offers no supported qop: {}", offered);
                    return None;
                }
                Some("auth")
            }
            None => None,
        };

        let realm = match &self.credentials.realm {
            Some(realm) => realm.clone(),
            None => challenge.realm().unwrap_or_default().to_string(),
        };

        let mut cnonce_bytes = [0u8; 16];
        OsRng.fill_bytes(&mut cnonce_bytes);
        let cnonce = hex::encode(cnonce_bytes);
        let nc = self.next_nonce_count(&nonce);

        let response = digest_response(&DigestInput {
            algorithm,
            session,
            username: &self.credentials.principal,
            realm: &realm,
            password: self.credentials.secret(),
            nonce: &nonce,
            cnonce: &cnonce,
            nc: &nc,
            qop,
            method: target.method,
            uri: target.uri,
        });

        let mut header = format!(
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", algorithm={}, response=\"{}\"",
            self.credentials.principal, realm, nonce, target.uri, algorithm_name, response
        );
        if let Some(qop) = qop {
            header.push_str(&format!(", qop={}, nc={}, cnonce=\"{}\"", qop, nc, cnonce));
        }
        if let Some(opaque) = challenge.param("opaque") {
            header.push_str(&format!(", opaque=\"{}\"", opaque));
        }

        Some(Authorization::new(header))
    }
}

impl AuthProvider for DigestAuth {
    fn scheme(&self) -> &'static str {
        "digest"
    }

    fn challenge(
        &mut self,
        target: &RequestTarget<'_>,
        challenges: Option<&[AuthChallenge]>,
    ) -> Option<Authorization> {
        let challenges = challenges?;

        // Prefer the strongest hash the server offers.
        let mut digest: Vec<&AuthChallenge> =
            challenges.iter().filter(|c| c.is_scheme("Digest")).collect();
        digest.sort_by_key(|c| {
            match c
                .param("algorithm")
                .and_then(DigestAlgorithm::parse)
                .map(|(alg, _)| alg)
            {
                Some(DigestAlgorithm::Sha512_256) => 0,
                Some(DigestAlgorithm::Sha256) => 1,
                _ => 2,
            }
        });

        digest
            .into_iter()
            .find_map(|challenge| self.respond(challenge, target))
    }
}
