//! Error types for the EST enrollment core.
//!
//! [`EstError`] covers failures that happen before or outside the protocol
//! exchange: building the signing request, obtaining a channel binding,
//! configuring TLS. Decisions made by the server and network faults are not
//! errors; they are terminal [`EnrollmentOutcome`](crate::types::EnrollmentOutcome)
//! values.

use thiserror::Error;

/// Result type alias using [`EstError`].
pub type Result<T> = std::result::Result<T, EstError>;

/// Errors that can occur while preparing or configuring an enrollment.
#[derive(Debug, Error)]
pub enum EstError {
    /// The subject identity is empty or cannot be encoded as an X.500 name.
    #[error("Invalid identity: {0}")]
    InvalidIdentity(String),

    /// Proof-of-possession was requested without a channel binding.
    #[error("Channel binding required for proof-of-possession enrollment")]
    BindingRequired,

    /// A channel binding was supplied for a simple (non-PoP) enrollment.
    #[error("Channel binding must not be supplied for simple enrollment")]
    UnexpectedBinding,

    /// The transport session cannot provide a channel binding.
    #[error("Channel binding unavailable: {0}")]
    BindingUnavailable(String),

    /// The cryptography provider failed to produce a key or signature.
    #[error("Signing failure: {0}")]
    SigningFailure(String),

    /// Failed to assemble or encode the CSR.
    #[error("CSR error: {0}")]
    Csr(String),

    /// Failed to parse or encode an X.509 certificate.
    #[error("Certificate parsing error: {0}")]
    CertificateParsing(String),

    /// Failed to parse or encode a CMS/PKCS#7 structure.
    #[error("CMS/PKCS#7 parsing error: {0}")]
    CmsParsing(String),

    /// TLS configuration error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Invalid client configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid PEM data.
    #[error("Invalid PEM data: {0}")]
    InvalidPem(String),

    /// HTTP client construction error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Base64 decoding error.
    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// DER encoding/decoding error.
    #[error("DER error: {0}")]
    Der(#[from] der::Error),

    /// URL parsing error.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EstError {
    /// Create an invalid identity error with the given message.
    pub fn invalid_identity(msg: impl Into<String>) -> Self {
        Self::InvalidIdentity(msg.into())
    }

    /// Create a binding unavailable error with the given message.
    pub fn binding_unavailable(msg: impl Into<String>) -> Self {
        Self::BindingUnavailable(msg.into())
    }

    /// Create a signing failure with the given message.
    pub fn signing(msg: impl Into<String>) -> Self {
        Self::SigningFailure(msg.into())
    }

    /// Create a CSR error with the given message.
    pub fn csr(msg: impl Into<String>) -> Self {
        Self::Csr(msg.into())
    }

    /// Create a certificate parsing error with the given message.
    pub fn certificate_parsing(msg: impl Into<String>) -> Self {
        Self::CertificateParsing(msg.into())
    }

    /// Create a CMS parsing error with the given message.
    pub fn cms_parsing(msg: impl Into<String>) -> Self {
        Self::CmsParsing(msg.into())
    }

    /// Create a TLS error with the given message.
    pub fn tls(msg: impl Into<String>) -> Self {
        Self::Tls(msg.into())
    }

    /// Create a configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid PEM error.
    pub fn invalid_pem(msg: impl Into<String>) -> Self {
        Self::InvalidPem(msg.into())
    }

    /// Returns true if this error was raised while constructing the request,
    /// before any network attempt could have been made.
    pub fn is_construction_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidIdentity(_)
                | Self::BindingRequired
                | Self::UnexpectedBinding
                | Self::BindingUnavailable(_)
                | Self::SigningFailure(_)
                | Self::Csr(_)
        )
    }
}
