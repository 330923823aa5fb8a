//! # Payment Proof References
//!
//! The payment proof storage collaborator accepts the uploaded artifact
//! (an image or a PDF) and hands back a reference. The transaction core
//! records that reference verbatim; the bytes never enter the core.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Maximum length of a stored proof reference.
pub const MAX_PROOF_REF_LEN: usize = 1024;

/// Opaque reference to an uploaded payment proof artifact.
///
/// Validated on construction: non-blank and at most
/// [`MAX_PROOF_REF_LEN`] characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProofRef(String);

impl ProofRef {
    /// Create a validated proof reference.
    pub fn new(reference: impl Into<String>) -> Result<Self, ValidationError> {
        let reference = reference.into();
        let trimmed = reference.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptyField("payment_proof_ref"));
        }
        if trimmed.chars().count() > MAX_PROOF_REF_LEN {
            return Err(ValidationError::TooLong {
                field: "payment_proof_ref",
                max: MAX_PROOF_REF_LEN,
            });
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Return the reference as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ProofRef {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ProofRef> for String {
    fn from(value: ProofRef) -> Self {
        value.0
    }
}

impl std::fmt::Display for ProofRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
