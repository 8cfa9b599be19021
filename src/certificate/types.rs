//! The issued-certificate entity.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use super::jitter::{JitterSource, RandomJitter};
use super::pem;
use crate::errors::DecodeError;
use crate::observability::{log_error, ErrorCode};
use crate::secrets::SecretBytes;

/// How long before expiration a certificate becomes eligible for renewal.
pub const RENEW_BEFORE_CERT_EXPIRES: Duration = Duration::from_secs(30);

/// Identity a certificate asserts, e.g. `bookstore.default.svc.cluster.local`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommonName(String);

impl CommonName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommonName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CommonName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for CommonName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Serial number assigned by the signer, in decimal form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SerialNumber(String);

impl SerialNumber {
    pub fn new(serial: impl Into<String>) -> Self {
        Self(serial.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SerialNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One issued identity certificate.
///
/// Immutable: renewal produces a new value. The expiration is always taken
/// from the decoded certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    common_name: CommonName,
    serial_number: SerialNumber,
    cert_chain: String,
    private_key: SecretBytes,
    issuing_ca: String,
    expiration: DateTime<Utc>,
}

impl Certificate {
    /// Build a certificate from persisted PEM material.
    ///
    /// The certificate is treated as its own issuing CA, which is how root
    /// material read back from a secret is represented. Decode failures are
    /// logged with [`ErrorCode::DecodingPemCert`] and returned.
    pub fn new_from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self, DecodeError> {
        Self::build(cert_pem, key_pem, None).inspect_err(|e| {
            log_error(
                ErrorCode::DecodingPemCert,
                e,
                "Error converting PEM cert to x509 to obtain serial number",
            );
        })
    }

    /// Build a certificate returned by a signer together with its issuing CA.
    pub fn from_issued(
        cert_chain: &[u8],
        key_pem: &[u8],
        issuing_ca: &[u8],
    ) -> Result<Self, DecodeError> {
        Self::build(cert_chain, key_pem, Some(issuing_ca))
    }

    fn build(
        cert_pem: &[u8],
        key_pem: &[u8],
        issuing_ca: Option<&[u8]>,
    ) -> Result<Self, DecodeError> {
        let decoded = pem::decode_certificate(cert_pem)?;
        let common_name = decoded.common_name.ok_or(DecodeError::MissingCommonName)?;

        let cert_chain = pem_text(cert_pem)?;
        let issuing_ca = match issuing_ca {
            Some(ca) => pem_text(ca)?,
            None => cert_chain.clone(),
        };

        Ok(Self {
            common_name: CommonName::new(common_name),
            serial_number: SerialNumber::new(decoded.serial_number),
            cert_chain,
            private_key: SecretBytes::new(key_pem),
            issuing_ca,
            expiration: decoded.not_after,
        })
    }

    pub fn common_name(&self) -> &CommonName {
        &self.common_name
    }

    pub fn serial_number(&self) -> &SerialNumber {
        &self.serial_number
    }

    /// PEM chain, leaf first.
    pub fn cert_chain(&self) -> &str {
        &self.cert_chain
    }

    pub fn private_key(&self) -> &SecretBytes {
        &self.private_key
    }

    /// PEM of the CA that signed this certificate.
    pub fn issuing_ca(&self) -> &str {
        &self.issuing_ca
    }

    pub fn expiration(&self) -> DateTime<Utc> {
        self.expiration
    }

    /// Whether the certificate is due for renewal, using random jitter.
    pub fn should_rotate(&self) -> bool {
        self.should_rotate_with(&RandomJitter)
    }

    /// Whether the certificate is due for renewal, drawing noise from `jitter`.
    pub fn should_rotate_with(&self, jitter: &dyn JitterSource) -> bool {
        self.should_rotate_at(Utc::now(), jitter.renewal_noise())
    }

    /// True when the time left until expiration at `now` is no more than the
    /// renewal lead time plus `noise`.
    pub fn should_rotate_at(&self, now: DateTime<Utc>, noise: Duration) -> bool {
        let window = TimeDelta::from_std(RENEW_BEFORE_CERT_EXPIRES + noise)
            .unwrap_or(TimeDelta::MAX);
        self.expiration.signed_duration_since(now) <= window
    }
}

/// A trust anchor: a CA certificate without its private key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootCertificate {
    pem: String,
    serial_number: SerialNumber,
    common_name: Option<CommonName>,
    expiration: DateTime<Utc>,
}

impl RootCertificate {
    pub fn from_pem(pem_bytes: &[u8]) -> Result<Self, DecodeError> {
        let decoded = pem::decode_certificate(pem_bytes)?;
        Ok(Self {
            pem: pem_text(pem_bytes)?,
            serial_number: SerialNumber::new(decoded.serial_number),
            common_name: decoded.common_name.map(CommonName::new),
            expiration: decoded.not_after,
        })
    }

    pub fn pem(&self) -> &str {
        &self.pem
    }

    pub fn serial_number(&self) -> &SerialNumber {
        &self.serial_number
    }

    pub fn common_name(&self) -> Option<&CommonName> {
        self.common_name.as_ref()
    }

    pub fn expiration(&self) -> DateTime<Utc> {
        self.expiration
    }
}

fn pem_text(bytes: &[u8]) -> Result<String, DecodeError> {
    String::from_utf8(bytes.to_vec()).map_err(|e| DecodeError::invalid_pem(e.to_string()))
}
