//! # Marketplace Errors
//!
//! [`MarketError`] is what engine operations return. Lifecycle rejections
//! pass through unchanged as [`TransactionError`]; store and proof storage
//! failures are infrastructure faults and keep their own types.

use istyle_core::{ListingId, UserId, ValidationError};
use istyle_state::{ErrorKind, TransactionError};
use thiserror::Error;

/// Failures of a persistence backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Record to replace or swap does not exist.
    #[error("{entity} {id} not found")]
    NotFound {
        entity: &'static str,
        id: String,
    },

    /// Insert would duplicate a key or break a uniqueness rule.
    #[error("{entity} conflict: {reason}")]
    Conflict {
        entity: &'static str,
        reason: String,
    },

    /// Compare-and-swap lost: the stored version moved on.
    #[error("version mismatch on {id}: expected {expected}, found {actual}")]
    VersionMismatch {
        id: String,
        expected: u64,
        actual: u64,
    },

    /// Backend-specific failure (database, I/O).
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Payment proof storage failures.
#[derive(Error, Debug)]
pub enum ProofStorageError {
    #[error("payment proof upload is empty")]
    Empty,

    #[error("payment proof exceeds {max} bytes")]
    TooLarge { max: usize },

    #[error("unsupported payment proof type: {0:?} (allowed: png, jpg, jpeg, gif, webp, pdf)")]
    UnsupportedType(String),

    #[error("payment proof storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid proof reference: {0}")]
    Reference(#[from] ValidationError),
}

/// Errors returned by [`Marketplace`](crate::Marketplace) operations.
#[derive(Error, Debug)]
pub enum MarketError {
    /// The lifecycle rejected the operation.
    #[error(transparent)]
    Transaction(#[from] TransactionError),

    /// Only the owner may edit a listing.
    #[error("{actor} does not own listing {listing_id}")]
    NotListingOwner {
        listing_id: ListingId,
        actor: UserId,
    },

    /// Listing input failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Proof(#[from] ProofStorageError),
}

impl MarketError {
    /// The lifecycle classification, for errors that have one.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Transaction(e) => Some(e.kind()),
            Self::NotListingOwner { .. } => Some(ErrorKind::Forbidden),
            Self::Validation(_) | Self::Store(_) | Self::Proof(_) => None,
        }
    }

    /// Machine-readable code, matching [`TransactionError::code`] for
    /// lifecycle rejections.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Transaction(e) => e.code(),
            Self::NotListingOwner { .. } => "FORBIDDEN",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Store(_) => "STORE_ERROR",
            Self::Proof(
                ProofStorageError::Empty
                | ProofStorageError::TooLarge { .. }
                | ProofStorageError::UnsupportedType(_),
            ) => "INVALID_PROOF",
            Self::Proof(_) => "PROOF_STORAGE_ERROR",
        }
    }
}
