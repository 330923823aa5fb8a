//! # Transaction Error Types
//!
//! Every rejected operation surfaces as a [`TransactionError`]. State
//! machine rejections carry the current status, the attempted action and
//! the actor's role so the caller can render a meaningful message.
//! Nothing here is retried: a rejection only changes outcome when outside
//! state changes.

use istyle_core::{ListingId, TransactionId, UserId};
use thiserror::Error;

use crate::transaction::{PartyRole, TransactionAction, TransactionStatus};

/// Coarse classification of a [`TransactionError`].
///
/// Callers that only need to pick a user-facing message or an HTTP status
/// match on this instead of on every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Referenced transaction or listing does not exist.
    NotFound,
    /// Actor does not hold the role the action requires.
    Forbidden,
    /// Action does not apply to the current state, including lost races.
    InvalidTransition,
    /// Action-specific data is missing or out of range.
    PreconditionFailed,
    /// The transaction already carries a rating.
    AlreadyRated,
}

/// Errors raised by the transaction lifecycle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    /// Referenced record does not exist.
    #[error("{entity} {id} not found")]
    NotFound {
        /// Record namespace (`transaction`, `listing`).
        entity: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// Actor is not permitted to perform the action.
    #[error("{actor} is not permitted to {action}: {reason}")]
    Forbidden {
        /// The attempted action.
        action: TransactionAction,
        /// The acting user.
        actor: UserId,
        /// The actor's role on the transaction, if they are a party to it.
        role: Option<PartyRole>,
        /// Why the actor was rejected.
        reason: String,
    },

    /// Action does not apply to the transaction's current status.
    #[error("cannot {action} a {status} transaction as {role}: {reason}")]
    InvalidTransition {
        /// The transaction's status at the time of the attempt.
        status: TransactionStatus,
        /// The attempted action.
        action: TransactionAction,
        /// The actor's role.
        role: PartyRole,
        /// Why the transition was rejected.
        reason: String,
    },

    /// The listing's availability gate is closed.
    #[error("listing {listing_id} is not available: {reason}")]
    ListingUnavailable {
        /// The listing the buyer tried to initiate against.
        listing_id: ListingId,
        /// Why the gate is closed.
        reason: String,
    },

    /// Action-specific data is missing or malformed.
    #[error("precondition failed for {action}: {reason}")]
    PreconditionFailed {
        /// The attempted action.
        action: TransactionAction,
        /// Which precondition failed.
        reason: String,
    },

    /// A rating already exists for this transaction.
    #[error("transaction {transaction_id} has already been rated")]
    AlreadyRated {
        /// The rated transaction.
        transaction_id: TransactionId,
    },

    /// Rating score outside the permitted range.
    #[error("rating score {score} is outside the range [1, 5]")]
    InvalidRating {
        /// The rejected score.
        score: i64,
    },
}

impl TransactionError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Forbidden { .. } => ErrorKind::Forbidden,
            Self::InvalidTransition { .. } | Self::ListingUnavailable { .. } => {
                ErrorKind::InvalidTransition
            }
            Self::PreconditionFailed { .. } | Self::InvalidRating { .. } => {
                ErrorKind::PreconditionFailed
            }
            Self::AlreadyRated { .. } => ErrorKind::AlreadyRated,
        }
    }

    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Forbidden { .. } => "FORBIDDEN",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::ListingUnavailable { .. } => "LISTING_UNAVAILABLE",
            Self::PreconditionFailed { .. } => "PRECONDITION_FAILED",
            Self::AlreadyRated { .. } => "ALREADY_RATED",
            Self::InvalidRating { .. } => "INVALID_RATING",
        }
    }

    /// Shorthand for a missing transaction.
    pub fn transaction_not_found(id: TransactionId) -> Self {
        Self::NotFound {
            entity: "transaction",
            id: id.to_string(),
        }
    }

    /// Shorthand for a missing listing.
    pub fn listing_not_found(id: ListingId) -> Self {
        Self::NotFound {
            entity: "listing",
            id: id.to_string(),
        }
    }
}
