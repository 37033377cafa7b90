//! EST enrollment client.
//!
//! This module provides [`EnrollmentClient`], which wires the request builder,
//! auth provider, transport and poller together behind the two public
//! enrollment operations.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::auth::AuthProvider;
use crate::config::EstClientConfig;
use crate::csr::{EnrollmentRequest, EnrollmentRequestBuilder};
use crate::error::{EstError, Result};
use crate::hsm::EnrollmentKey;
use crate::operations::{EnrollmentPoller, RequestSource};
use crate::transport::{HttpTransport, SessionTransport, Transport};
use crate::types::{operations, EnrollmentMode, EnrollmentOutcome};

/// Per-call enrollment options.
#[derive(Debug, Clone, Default)]
pub struct EnrollOptions {
    /// Use `simplereenroll` instead of `simpleenroll`.
    pub reenroll: bool,

    /// Token that aborts the call with `Cancelled`.
    pub cancel: Option<CancellationToken>,
}

impl EnrollOptions {
    /// Options for a re-enrollment.
    pub fn reenroll() -> Self {
        Self {
            reenroll: true,
            cancel: None,
        }
    }

    /// Attach a cancellation token.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// EST client for simple and proof-of-possession enrollment.
///
/// Each call owns its own poller and sessions; the client itself holds no
/// per-enrollment state and may be shared between tasks.
///
/// # Example
///
/// ```no_run
/// use usg_est_enroll::{auth::NoAuth, EnrollOptions, EnrollmentClient, EstClientConfig};
/// use usg_est_enroll::hsm::EnrollmentKey;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = EstClientConfig::builder()
///     .server_url("https://est.example.com")?
///     .build()?;
///
/// let client = EnrollmentClient::new(config).await?;
/// let key = EnrollmentKey::generate_software(None).await?;
///
/// let outcome = client
///     .enroll("device-42", key, &mut NoAuth, EnrollOptions::default())
///     .await?;
///
/// if let Some(certs) = outcome.certificates() {
///     println!("Issued {} certificate(s)", certs.len());
/// }
/// # Ok(())
/// # }
/// ```
pub struct EnrollmentClient {
    config: EstClientConfig,
    transport: Arc<dyn Transport>,
}

impl EnrollmentClient {
    /// Create a new client with the given configuration.
    ///
    /// Uses a single-session rustls transport when channel binding is
    /// enabled, otherwise a pooled reqwest transport.
    ///
    /// # Errors
    ///
    /// Returns an error if TLS configuration fails.
    pub async fn new(config: EstClientConfig) -> Result<Self> {
        let transport: Arc<dyn Transport> = if config.channel_binding {
            Arc::new(SessionTransport::new(&config)?)
        } else {
            Arc::new(HttpTransport::new(&config)?)
        };

        Ok(Self { config, transport })
    }

    /// Create a client over a caller-supplied transport.
    pub fn with_transport(config: EstClientConfig, transport: Arc<dyn Transport>) -> Self {
        Self { config, transport }
    }

    /// Get the client configuration.
    pub fn config(&self) -> &EstClientConfig {
        &self.config
    }

    /// Enroll `identity` with a fresh request signed by `key`.
    ///
    /// Returns once the enrollment is terminal: issued, rejected, or failed
    /// in transport. Deferrals are polled internally.
    ///
    /// # Errors
    ///
    /// Construction failures only (`InvalidIdentity`, `SigningFailure`),
    /// raised before any network attempt.
    ///
    /// # RFC Reference
    ///
    /// RFC 7030 Section 4.2: Client Certificate Request Functions
    pub async fn enroll(
        &self,
        identity: &str,
        key: EnrollmentKey,
        auth: &mut dyn AuthProvider,
        options: EnrollOptions,
    ) -> Result<EnrollmentOutcome> {
        let source = RequestSource::Identity {
            builder: EnrollmentRequestBuilder::new(key),
            identity: identity.to_string(),
            mode: EnrollmentMode::Simple,
        };
        self.run(source, auth, options).await
    }

    /// Enroll with an already built simple-mode request.
    ///
    /// # Errors
    ///
    /// [`EstError::UnexpectedBinding`] if the request carries a channel
    /// binding; it could never match the session it is sent over.
    pub async fn enroll_request(
        &self,
        request: EnrollmentRequest,
        auth: &mut dyn AuthProvider,
        options: EnrollOptions,
    ) -> Result<EnrollmentOutcome> {
        if request.mode() == EnrollmentMode::ProofOfPossession {
            return Err(EstError::UnexpectedBinding);
        }
        self.run(RequestSource::Prebuilt(request), auth, options)
            .await
    }

    /// Enroll `identity` with a request bound to the TLS session it is sent
    /// over (RFC 7030 Section 3.5).
    ///
    /// The request is rebuilt for every submission from that submission's
    /// session binding.
    ///
    /// # Errors
    ///
    /// [`EstError::BindingUnavailable`] before any network attempt if the
    /// transport cannot derive channel bindings, plus the construction
    /// failures of [`enroll`](Self::enroll).
    pub async fn enroll_with_proof_of_possession(
        &self,
        identity: &str,
        key: EnrollmentKey,
        auth: &mut dyn AuthProvider,
        options: EnrollOptions,
    ) -> Result<EnrollmentOutcome> {
        if !self.transport.supports_channel_binding() {
            return Err(EstError::binding_unavailable(
                "transport cannot derive a TLS channel binding; enable channel binding in the client configuration",
            ));
        }

        let source = RequestSource::Identity {
            builder: EnrollmentRequestBuilder::new(key),
            identity: identity.to_string(),
            mode: EnrollmentMode::ProofOfPossession,
        };
        self.run(source, auth, options).await
    }

    async fn run(
        &self,
        source: RequestSource,
        auth: &mut dyn AuthProvider,
        options: EnrollOptions,
    ) -> Result<EnrollmentOutcome> {
        let operation = operations::enrollment(options.reenroll);
        let path = self.config.operation_path(operation);

        tracing::debug!("Starting {} against {}", operation, self.config.server_url);

        let mut poller =
            EnrollmentPoller::new(self.transport.as_ref(), auth, source, path).with_config(&self.config);
        if let Some(cancel) = options.cancel {
            poller = poller.cancel_token(cancel);
        }

        poller.run().await
    }
}

impl std::fmt::Debug for EnrollmentClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnrollmentClient")
            .field("server_url", &self.config.server_url.as_str())
            .field(
                "channel_binding",
                &self.transport.supports_channel_binding(),
            )
            .finish()
    }
}
