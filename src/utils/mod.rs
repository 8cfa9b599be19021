//! Utility functions and helpers

pub mod retry;

pub use retry::BackoffPolicy;
