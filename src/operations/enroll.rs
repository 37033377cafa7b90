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

//! Enrollment polling (RFC 7030 Section 4.2).
//!
//! [`EnrollmentPoller`] drives one enrollment to a terminal outcome:
//!
//! ```text
//! Building -> Submitting -> Terminal
//!                |   ^  \
//!                v   |   v
//!         AwaitingAuth   WaitingRetry
//! ```
//!
//! A `202 Accepted` moves to `WaitingRetry` until the server's retry time plus
//! a grace period. A `401` moves to `AwaitingAuth`, and the resubmission does
//! not count as a retry. Every submission opens a fresh transport session; in
//! proof-of-possession mode the request is rebuilt from that session's
//! channel binding.

use std::time::{Duration, SystemTime};

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::auth::{AuthChallenge, AuthProvider, Authorization, RequestTarget};
use crate::binding::ChannelBinding;
use crate::config::{EstClientConfig, DEFAULT_RETRY_FLOOR, DEFAULT_RETRY_GRACE};
use crate::csr::{EnrollmentRequest, EnrollmentRequestBuilder};
use crate::error::Result;
use crate::operations::response::{Decoded, ResponseDecoder, MAX_RETRY_AFTER};
use crate::transport::{RawResponse, SubmitRequest, Transport, TransportFault, TransportSession};
use crate::types::{content_types, EnrollmentMode, EnrollmentOutcome, RejectReason};

/// What the poller submits.
#[derive(Debug, Clone)]
pub enum RequestSource {
    /// A request built by the caller, submitted unchanged.
    Prebuilt(EnrollmentRequest),

    /// Build from an identity. Proof-of-possession requests are rebuilt for
    /// every session.
    Identity {
        /// Signs the request.
        builder: EnrollmentRequestBuilder,
        /// Subject identity.
        identity: String,
        /// Simple or proof-of-possession.
        mode: EnrollmentMode,
    },
}

/// One open transport session used for a single submission.
pub struct EnrollmentSession {
    inner: Box<dyn TransportSession>,
}

impl EnrollmentSession {
    /// Open a new session.
    pub async fn open(transport: &dyn Transport) -> std::result::Result<Self, TransportFault> {
        Ok(Self {
            inner: transport.connect().await?,
        })
    }

    /// Channel binding of this session.
    pub fn binding(&self) -> Result<ChannelBinding> {
        self.inner.current_binding()
    }

    /// Submit an enrollment body.
    pub async fn submit(
        &mut self,
        path: &str,
        body: String,
        authorization: Option<Authorization>,
    ) -> std::result::Result<RawResponse, TransportFault> {
        self.inner
            .submit(&SubmitRequest {
                path: path.to_string(),
                content_type: content_types::PKCS10,
                body,
                authorization,
            })
            .await
    }
}

#[derive(Debug)]
enum PollState {
    Building,
    Submitting {
        authorization: Option<Authorization>,
        authenticated: bool,
    },
    AwaitingAuth {
        challenges: Vec<AuthChallenge>,
    },
    WaitingRetry {
        not_before: SystemTime,
    },
    Terminal(EnrollmentOutcome),
}

/// Drives one enrollment to a terminal outcome.
pub struct EnrollmentPoller<'a> {
    transport: &'a dyn Transport,
    auth: &'a mut dyn AuthProvider,
    source: RequestSource,
    request: Option<EnrollmentRequest>,
    path: String,
    decoder: ResponseDecoder,
    timeout: Duration,
    retry_grace: Duration,
    retry_floor: Duration,
    cancel: CancellationToken,
    submissions: usize,
}

impl<'a> EnrollmentPoller<'a> {
    /// Create a poller that posts to `path` with default timing: no deadline,
    /// one second of grace and a one second floor.
    pub fn new(
        transport: &'a dyn Transport,
        auth: &'a mut dyn AuthProvider,
        source: RequestSource,
        path: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            auth,
            source,
            request: None,
            path: path.into(),
            decoder: ResponseDecoder::new(DEFAULT_RETRY_FLOOR),
            timeout: Duration::ZERO,
            retry_grace: DEFAULT_RETRY_GRACE,
            retry_floor: DEFAULT_RETRY_FLOOR,
            cancel: CancellationToken::new(),
            submissions: 0,
        }
    }

    /// Take deadline, grace and floor from client configuration.
    pub fn with_config(self, config: &EstClientConfig) -> Self {
        self.timeout(config.timeout)
            .retry_grace(config.retry_grace)
            .retry_floor(config.retry_floor)
    }

    /// Overall deadline. `Duration::ZERO` means unbounded.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Grace added to the server's retry time.
    pub fn retry_grace(mut self, grace: Duration) -> Self {
        self.retry_grace = grace;
        self
    }

    /// Minimum wait for a deferral.
    pub fn retry_floor(mut self, floor: Duration) -> Self {
        self.retry_floor = floor;
        self.decoder = ResponseDecoder::new(floor);
        self
    }

    /// Token that aborts the enrollment with `Cancelled`.
    pub fn cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run until the enrollment reaches a terminal outcome.
    ///
    /// # Errors
    ///
    /// Only request construction fails with an error; every protocol or
    /// network result is a terminal [`EnrollmentOutcome`].
    pub async fn run(mut self) -> Result<EnrollmentOutcome> {
        let deadline = (!self.timeout.is_zero())
            .then(|| Instant::now().checked_add(self.timeout))
            .flatten();
        let mut state = PollState::Building;

        loop {
            tracing::trace!("Enrollment state: {:?}", state);

            state = match state {
                PollState::Building => {
                    self.build_if_unbound().await?;
                    let authorization = self.authorize(None);
                    PollState::Submitting {
                        authorization,
                        authenticated: false,
                    }
                }

                PollState::Submitting {
                    authorization,
                    authenticated,
                } => {
                    let cancel = self.cancel.clone();
                    let result = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => Err(TransportFault::Cancelled),
                        _ = sleep_until_deadline(deadline) => Err(TransportFault::DeadlineExceeded),
                        result = submit_once(
                            self.transport,
                            self.request.as_ref(),
                            &self.source,
                            &self.path,
                            authorization,
                        ) => result?,
                    };
                    self.submissions += 1;

                    match self.decoder.decode(result) {
                        Decoded::Outcome(EnrollmentOutcome::Deferred { not_before }) => {
                            PollState::WaitingRetry { not_before }
                        }
                        Decoded::Outcome(outcome) => PollState::Terminal(outcome),
                        Decoded::Challenge(_) if authenticated => {
                            tracing::warn!(
                                "Server rejected {} credentials",
                                self.auth.scheme()
                            );
                            PollState::Terminal(EnrollmentOutcome::Rejected(
                                RejectReason::AuthenticationFailed,
                            ))
                        }
                        Decoded::Challenge(challenges) => PollState::AwaitingAuth { challenges },
                    }
                }

                PollState::AwaitingAuth { challenges } => {
                    match self.authorize(Some(&challenges)) {
                        Some(authorization) => PollState::Submitting {
                            authorization: Some(authorization),
                            authenticated: true,
                        },
                        None => {
                            tracing::warn!(
                                "No {} credentials for server challenge",
                                self.auth.scheme()
                            );
                            PollState::Terminal(EnrollmentOutcome::Rejected(
                                RejectReason::AuthenticationFailed,
                            ))
                        }
                    }
                }

                PollState::WaitingRetry { not_before } => {
                    let delay = self.retry_delay(not_before);
                    tracing::info!("Enrollment deferred, polling again in {:?}", delay);

                    let wake = Instant::now() + delay;
                    let cancel = self.cancel.clone();

                    match deadline {
                        Some(deadline) if wake > deadline => {
                            tokio::select! {
                                biased;
                                _ = cancel.cancelled() => PollState::Terminal(
                                    EnrollmentOutcome::TransportError(TransportFault::Cancelled),
                                ),
                                _ = tokio::time::sleep_until(deadline) => PollState::Terminal(
                                    EnrollmentOutcome::TransportError(TransportFault::DeadlineExceeded),
                                ),
                            }
                        }
                        _ => {
                            tokio::select! {
                                biased;
                                _ = cancel.cancelled() => PollState::Terminal(
                                    EnrollmentOutcome::TransportError(TransportFault::Cancelled),
                                ),
                                _ = tokio::time::sleep_until(wake) => PollState::Submitting {
                                    authorization: self.authorize(None),
                                    authenticated: false,
                                },
                            }
                        }
                    }
                }

                PollState::Terminal(outcome) => {
                    match &outcome {
                        EnrollmentOutcome::Issued(certs) => tracing::info!(
                            "Enrollment issued {} certificate(s) after {} submission(s)",
                            certs.len(),
                            self.submissions
                        ),
                        other => tracing::debug!("Enrollment finished: {}", other),
                    }
                    return Ok(outcome);
                }
            };
        }
    }

    /// Build the request up front unless it must be bound to each session.
    async fn build_if_unbound(&mut self) -> Result<()> {
        match &self.source {
            RequestSource::Prebuilt(request) => {
                self.request = Some(request.clone());
            }
            RequestSource::Identity {
                builder,
                identity,
                mode: EnrollmentMode::Simple,
            } => {
                self.request = Some(builder.build(identity, EnrollmentMode::Simple, None).await?);
            }
            RequestSource::Identity { .. } => {}
        }
        Ok(())
    }

    fn authorize(&mut self, challenges: Option<&[AuthChallenge]>) -> Option<Authorization> {
        let target = RequestTarget {
            method: "POST",
            uri: &self.path,
        };
        self.auth.challenge(&target, challenges)
    }

    /// Wait until `not_before + grace`, never less than the floor and never
    /// more than `MAX_RETRY_AFTER`.
    fn retry_delay(&self, not_before: SystemTime) -> Duration {
        let delay = match not_before.checked_add(self.retry_grace) {
            Some(wake) => match wake.duration_since(SystemTime::now()) {
                Ok(delay) if !delay.is_zero() => delay,
                _ => self.retry_floor,
            },
            None => MAX_RETRY_AFTER,
        };
        delay.min(MAX_RETRY_AFTER)
    }
}

/// Open a session and submit once. In proof-of-possession mode the request
/// is built here from the new session's binding.
async fn submit_once(
    transport: &dyn Transport,
    request: Option<&EnrollmentRequest>,
    source: &RequestSource,
    path: &str,
    authorization: Option<Authorization>,
) -> Result<std::result::Result<RawResponse, TransportFault>> {
    let mut session = match EnrollmentSession::open(transport).await {
        Ok(session) => session,
        Err(fault) => return Ok(Err(fault)),
    };

    let body = match (request, source) {
        (Some(request), _) => request.to_base64(),
        (None, RequestSource::Identity { builder, identity, mode }) => {
            let binding = session.binding()?;
            builder.build(identity, *mode, Some(&binding)).await?.to_base64()
        }
        (None, RequestSource::Prebuilt(request)) => request.to_base64(),
    };

    tracing::debug!(
        "Submitting enrollment to {} (authorization: {})",
        path,
        authorization.is_some()
    );

    Ok(session.submit(path, body, authorization).await)
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
