//! PEM codec for certificate and key material.
//!
//! Decoding is strict: anything that is not a single well-formed
//! `CERTIFICATE` block holding a parseable X.509 certificate is a
//! [`DecodeError`]. No partially decoded value is ever returned.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use x509_parser::pem::parse_x509_pem;

use crate::errors::DecodeError;

/// PEM label of an X.509 certificate.
pub const CERTIFICATE_LABEL: &str = "CERTIFICATE";

/// PEM label of a PKCS#10 certificate signing request.
pub const CERTIFICATE_REQUEST_LABEL: &str = "CERTIFICATE REQUEST";

const LINE_WIDTH: usize = 64;

/// Metadata decoded from a PEM certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedCertificate {
    /// Subject common name, if the subject carries one
    pub common_name: Option<String>,
    /// Serial number in decimal form
    pub serial_number: String,
    pub issuer: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub is_ca: bool,
}

/// Decode the first certificate of a PEM document.
pub fn decode_certificate(pem: &[u8]) -> Result<DecodedCertificate, DecodeError> {
    let (_, block) = parse_x509_pem(pem).map_err(|e| DecodeError::invalid_pem(e.to_string()))?;

    if block.label != CERTIFICATE_LABEL {
        return Err(DecodeError::UnexpectedLabel {
            label: block.label.clone(),
            expected: CERTIFICATE_LABEL,
        });
    }

    let cert = block.parse_x509().map_err(|e| DecodeError::invalid_certificate(e.to_string()))?;

    let common_name = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string)
        .filter(|cn| !cn.is_empty());

    Ok(DecodedCertificate {
        common_name,
        serial_number: cert.serial.to_string(),
        issuer: cert.issuer().to_string(),
        not_before: to_datetime(cert.validity().not_before.timestamp())?,
        not_after: to_datetime(cert.validity().not_after.timestamp())?,
        is_ca: cert.is_ca(),
    })
}

/// Check that `pem` holds a private key in a format the signer can load.
pub fn validate_private_key(pem: &[u8]) -> Result<(), DecodeError> {
    let text =
        std::str::from_utf8(pem).map_err(|e| DecodeError::invalid_private_key(e.to_string()))?;
    rcgen::KeyPair::from_pem(text)
        .map(|_| ())
        .map_err(|e| DecodeError::invalid_private_key(e.to_string()))
}

/// Encode DER bytes as a PEM block with the given label.
pub fn encode_der(label: &str, der: &[u8]) -> String {
    let body = STANDARD.encode(der);
    let mut pem = String::with_capacity(body.len() + body.len() / LINE_WIDTH + 64);
    pem.push_str("-----BEGIN ");
    pem.push_str(label);
    pem.push_str("-----\n");
    for line in body.as_bytes().chunks(LINE_WIDTH) {
        // base64 output is ASCII, so every chunk is valid UTF-8
        pem.push_str(&String::from_utf8_lossy(line));
        pem.push('\n');
    }
    pem.push_str("-----END ");
    pem.push_str(label);
    pem.push_str("-----\n");
    pem
}

fn to_datetime(timestamp: i64) -> Result<DateTime<Utc>, DecodeError> {
    DateTime::from_timestamp(timestamp, 0).ok_or(DecodeError::InvalidExpiration { timestamp })
}
