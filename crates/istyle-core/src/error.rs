//! # Error Types
//!
//! Validation errors raised while constructing core primitives from
//! untrusted input (path segments, request bodies, database rows).

use thiserror::Error;

/// A primitive could not be constructed from the given input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Identifier string is not a valid UUID.
    #[error("invalid {kind} identifier: {value:?}")]
    InvalidIdentifier {
        /// Identifier namespace (`user`, `listing`, `transaction`).
        kind: &'static str,
        /// The rejected input.
        value: String,
    },

    /// Timestamp string could not be parsed or is not UTC.
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// A required text field was empty or whitespace.
    #[error("{0} must not be empty")]
    EmptyField(&'static str),

    /// A text field exceeded its maximum length.
    #[error("{field} must not exceed {max} characters")]
    TooLong {
        /// Field name.
        field: &'static str,
        /// Maximum permitted length.
        max: usize,
    },

    /// A field held a value outside its permitted set or format.
    #[error("invalid {field}: {value:?}")]
    InvalidValue {
        /// Field name.
        field: &'static str,
        /// The rejected input.
        value: String,
    },
}
