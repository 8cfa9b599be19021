//! Errors for cluster-persisted state and the resource cache.

use std::time::Duration;

use thiserror::Error;

/// A root-certificate status write kept conflicting with concurrent writers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Status update for '{name}' conflicted {attempts} times, giving up")]
pub struct ConflictError {
    pub name: String,
    pub attempts: u32,
}

/// The resource cache did not complete its initial list-and-sync in time.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Cache for {kinds} did not sync within {timeout:?}")]
pub struct SyncTimeoutError {
    pub kinds: String,
    pub timeout: Duration,
}

/// Errors returned by a backing store for cluster objects.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// No object with this name exists.
    #[error("Object '{name}' not found")]
    NotFound { name: String },

    /// The write was based on a stale resource version.
    #[error("Object '{name}' was modified: expected version {expected}, found {actual}")]
    Conflict { name: String, expected: String, actual: String },

    /// The store itself failed.
    #[error("Store error: {message}")]
    Backend { message: String },
}

impl StoreError {
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend { message: message.into() }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_error_display() {
        let err = ConflictError { name: "mesh-root".to_string(), attempts: 5 };
        assert_eq!(err.to_string(), "Status update for 'mesh-root' conflicted 5 times, giving up");
    }

    #[test]
    fn test_store_error_is_conflict() {
        let err = StoreError::Conflict {
            name: "mesh-root".to_string(),
            expected: "3".to_string(),
            actual: "4".to_string(),
        };
        assert!(err.is_conflict());
        assert!(!StoreError::not_found("mesh-root").is_conflict());
    }
}
