//! Certificate decoding and issuance errors.

use std::time::Duration;

use thiserror::Error;

/// Errors raised while decoding PEM certificate or key material.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// The bytes are not a PEM document.
    #[error("Invalid PEM block: {reason}")]
    InvalidPem { reason: String },

    /// The PEM block carries a label other than the one expected.
    #[error("Unexpected PEM label '{label}', expected '{expected}'")]
    UnexpectedLabel { label: String, expected: &'static str },

    /// The PEM payload is not a well-formed X.509 certificate.
    #[error("Invalid X.509 certificate: {reason}")]
    InvalidCertificate { reason: String },

    /// The certificate subject has no usable common name.
    #[error("Certificate subject has no common name")]
    MissingCommonName,

    /// The certificate's notAfter cannot be represented as a timestamp.
    #[error("Certificate expiration {timestamp} is out of range")]
    InvalidExpiration { timestamp: i64 },

    /// The private key PEM could not be parsed.
    #[error("Invalid private key: {reason}")]
    InvalidPrivateKey { reason: String },
}

impl DecodeError {
    pub fn invalid_pem(reason: impl Into<String>) -> Self {
        Self::InvalidPem { reason: reason.into() }
    }

    pub fn invalid_certificate(reason: impl Into<String>) -> Self {
        Self::InvalidCertificate { reason: reason.into() }
    }

    pub fn invalid_private_key(reason: impl Into<String>) -> Self {
        Self::InvalidPrivateKey { reason: reason.into() }
    }
}

/// Errors raised by a certificate provider while issuing a certificate.
#[derive(Debug, Error)]
pub enum IssuanceError {
    /// The backend could not be reached or refused our credentials.
    #[error("{provider} backend unavailable: {message}")]
    Unavailable { provider: &'static str, message: String },

    /// The signer rejected the request.
    #[error("{provider} rejected certificate request for '{common_name}': {reason}")]
    Rejected { provider: &'static str, common_name: String, reason: String },

    /// The signer did not answer within the allotted time.
    #[error("{provider} did not issue '{common_name}' within {waited:?}")]
    Timeout { provider: &'static str, common_name: String, waited: Duration },

    /// Secret or provider configuration is malformed.
    #[error("{provider} configuration invalid: {message}")]
    InvalidConfig { provider: &'static str, message: String },

    /// The issued material could not be decoded.
    #[error("Issued certificate could not be decoded: {0}")]
    Decode(#[from] DecodeError),
}

impl IssuanceError {
    pub fn unavailable(provider: &'static str, message: impl Into<String>) -> Self {
        Self::Unavailable { provider, message: message.into() }
    }

    pub fn rejected(
        provider: &'static str,
        common_name: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Rejected { provider, common_name: common_name.into(), reason: reason.into() }
    }

    pub fn invalid_config(provider: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidConfig { provider, message: message.into() }
    }

    /// Whether the same request may succeed if repeated later.
    ///
    /// Only transport-level failures are retryable. A rejected request is
    /// attempted again on the next renewal cycle, not in a tight loop.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Timeout { .. })
    }
}
