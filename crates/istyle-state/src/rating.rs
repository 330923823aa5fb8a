//! # Rating Finalization
//!
//! A delivered transaction may be rated exactly once, by the buyer,
//! targeting the seller. The rating is produced by
//! [`Transaction::finalize_rating`](crate::Transaction::finalize_rating),
//! which flips `rated` in the same step.

use istyle_core::{Timestamp, TransactionId, UserId};
use serde::{Deserialize, Serialize};

use crate::error::TransactionError;

/// Maximum rating comment length, in characters.
pub const MAX_COMMENT_LEN: usize = 1000;

/// Integer rating score in `[1, 5]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct RatingScore(u8);

impl RatingScore {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 5;

    /// Validate a raw score.
    pub fn new(score: i64) -> Result<Self, TransactionError> {
        if score < i64::from(Self::MIN) || score > i64::from(Self::MAX) {
            return Err(TransactionError::InvalidRating { score });
        }
        Ok(Self(score as u8))
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl TryFrom<i64> for RatingScore {
    type Error = TransactionError;

    fn try_from(score: i64) -> Result<Self, Self::Error> {
        Self::new(score)
    }
}

impl From<RatingScore> for u8 {
    fn from(score: RatingScore) -> Self {
        score.0
    }
}

impl std::fmt::Display for RatingScore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A buyer's rating of the seller for one delivered transaction.
///
/// Keyed by `(transaction_id, rater_id)` in the rating store; never edited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rating {
    pub transaction_id: TransactionId,
    pub rater_id: UserId,
    pub rated_user_id: UserId,
    pub score: RatingScore,
    pub comment: Option<String>,
    pub created_at: Timestamp,
}
