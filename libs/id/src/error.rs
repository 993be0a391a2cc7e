//! ID parse errors.

use thiserror::Error;

/// Why a string is not a valid ID or key.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("ID cannot be empty")]
    Empty,

    #[error("expected '{expected}_' prefix, got '{actual}_'")]
    InvalidPrefix {
        expected: &'static str,
        actual: String,
    },

    #[error("ID has no '_' between prefix and ULID")]
    MissingSeparator,

    #[error("invalid ULID: {0}")]
    InvalidUlid(String),

    /// An integer key could not be parsed.
    #[error("invalid integer key '{value}': {message}")]
    InvalidInteger { value: String, message: String },

    /// A string key contains characters that are not allowed.
    #[error("invalid key format: {message}")]
    InvalidFormat { message: String },
}

impl IdError {
    pub fn is_empty(&self) -> bool {
        matches!(self, IdError::Empty)
    }
}
