//! Stable error codes attached to error logs.
//!
//! Operators key alerts and runbooks off these codes, so a code is never
//! reused for a different condition. Every logged code also increments
//! `meshplane_errors_total{code}`.

use std::fmt;

use metrics::counter;

/// Error codes emitted in the `error_code` field of error logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// A PEM certificate or key could not be decoded.
    DecodingPemCert,
    /// A provider failed to issue a certificate.
    IssuanceFailed,
    /// Renewal of a cached certificate failed.
    RotationFailed,
    /// Provider configuration is missing or contradictory.
    InvalidProviderConfig,
    /// A root certificate status write kept conflicting.
    RootStatusConflict,
    /// The resource cache did not sync in time.
    CacheSyncTimeout,
    /// A root certificate reached a state/stage pair with no defined transition.
    UndefinedRotationState,
    /// A provider secret could not be read or written.
    SecretUnavailable,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::DecodingPemCert => "E1001",
            ErrorCode::IssuanceFailed => "E1002",
            ErrorCode::RotationFailed => "E1003",
            ErrorCode::InvalidProviderConfig => "E1004",
            ErrorCode::RootStatusConflict => "E1005",
            ErrorCode::CacheSyncTimeout => "E1006",
            ErrorCode::UndefinedRotationState => "E1007",
            ErrorCode::SecretUnavailable => "E1008",
        }
    }

    /// Short operator-facing description.
    pub fn description(&self) -> &'static str {
        match self {
            ErrorCode::DecodingPemCert => "Error decoding PEM encoded certificate",
            ErrorCode::IssuanceFailed => "Error issuing certificate from provider",
            ErrorCode::RotationFailed => "Error rotating certificate before expiration",
            ErrorCode::InvalidProviderConfig => "Invalid certificate provider configuration",
            ErrorCode::RootStatusConflict => "Root certificate status update conflicted",
            ErrorCode::CacheSyncTimeout => "Resource cache failed to sync",
            ErrorCode::UndefinedRotationState => {
                "Root certificate in undefined rotation state, manual intervention required"
            }
            ErrorCode::SecretUnavailable => "Provider secret unavailable",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log `error` at error level with its stable code and count it.
pub fn log_error(code: ErrorCode, error: &dyn std::error::Error, message: &str) {
    counter!("meshplane_errors_total", "code" => code.as_str()).increment(1);
    tracing::error!(
        error_code = %code,
        error = %error,
        description = code.description(),
        "{}",
        message
    );
}
