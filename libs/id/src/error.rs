//! Identifier parse failures.

use thiserror::Error;

/// Why a string is not a valid remote object ID.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("empty ID")]
    Empty,

    /// A well-formed ID of another object type, e.g. `varset-…` where `var-…` was expected.
    #[error("expected an ID starting with '{expected}-', got '{actual}-'")]
    InvalidPrefix {
        expected: &'static str,
        actual: String,
    },

    #[error("ID has no '-' between prefix and suffix")]
    MissingSeparator,

    #[error("ID suffix must be non-empty ASCII alphanumerics, got {0:?}")]
    InvalidSuffix(String),
}

impl IdError {
    pub fn is_prefix_error(&self) -> bool {
        matches!(self, IdError::InvalidPrefix { .. })
    }
}
