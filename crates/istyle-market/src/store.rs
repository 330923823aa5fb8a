//! # Store Contracts
//!
//! Synchronous persistence traits the engine is written against. Every
//! method is a short critical section; implementations must not block on
//! I/O while holding a lock other callers need.

use istyle_core::{ListingId, TransactionId, UserId};
use istyle_state::{Listing, ListingKind, ListingStatus, Rating, Transaction};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Filter for listing queries. `None` fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingFilter {
    pub status: Option<ListingStatus>,
    pub kind: Option<ListingKind>,
    pub owner_id: Option<UserId>,
}

impl ListingFilter {
    pub fn matches(&self, listing: &Listing) -> bool {
        self.status.map_or(true, |s| listing.status == s)
            && self.kind.map_or(true, |k| listing.kind == k)
            && self.owner_id.map_or(true, |o| listing.owner_id == o)
    }
}

/// Which side of a user's transactions to list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartyFilter {
    #[default]
    All,
    Buying,
    Selling,
}

impl PartyFilter {
    pub fn matches(&self, user: UserId, tx: &Transaction) -> bool {
        match self {
            Self::All => tx.buyer_id == user || tx.seller_id == user,
            Self::Buying => tx.buyer_id == user,
            Self::Selling => tx.seller_id == user,
        }
    }
}

/// Listing persistence.
pub trait ListingStore: Send + Sync {
    fn get(&self, id: ListingId) -> Result<Option<Listing>, StoreError>;

    /// Insert a new listing. Fails with `Conflict` on a duplicate id.
    fn insert(&self, listing: Listing) -> Result<(), StoreError>;

    /// Replace an existing listing. Fails with `NotFound` if absent.
    fn update(&self, listing: Listing) -> Result<(), StoreError>;

    /// Set a listing's status and return the updated record.
    fn set_status(&self, id: ListingId, status: ListingStatus) -> Result<Listing, StoreError>;

    /// Listings matching `filter`, newest first.
    fn list(&self, filter: &ListingFilter) -> Result<Vec<Listing>, StoreError>;
}

/// Transaction persistence with optimistic concurrency.
pub trait TransactionStore: Send + Sync {
    fn get(&self, id: TransactionId) -> Result<Option<Transaction>, StoreError>;

    /// Insert a newly initiated transaction.
    ///
    /// Fails with `Conflict` on a duplicate id, or when the listing already
    /// has an open transaction and `tx` is itself open.
    fn insert(&self, tx: Transaction) -> Result<(), StoreError>;

    /// Replace the stored record with `next` iff its version is still
    /// `expected_version`. Fails with `VersionMismatch` otherwise.
    fn compare_and_swap(&self, expected_version: u64, next: Transaction) -> Result<(), StoreError>;

    /// Transactions where `user` is a party, per `filter`, newest first.
    fn list_for_party(&self, user: UserId, filter: PartyFilter)
        -> Result<Vec<Transaction>, StoreError>;

    /// Every transaction ever created for `listing`, newest first.
    fn list_for_listing(&self, listing: ListingId) -> Result<Vec<Transaction>, StoreError>;

    /// The non-terminal transaction holding `listing`, if any.
    fn open_for_listing(&self, listing: ListingId) -> Result<Option<Transaction>, StoreError>;
}

/// Rating persistence keyed by `(transaction_id, rater_id)`.
pub trait RatingStore: Send + Sync {
    /// Insert unless a rating with the same key exists. Returns whether
    /// the rating was inserted.
    fn insert_if_absent(&self, rating: Rating) -> Result<bool, StoreError>;

    fn exists(&self, transaction: TransactionId, rater: UserId) -> Result<bool, StoreError>;

    /// Withdraw a rating whose transaction update did not commit. Returns
    /// whether a rating was removed.
    fn remove(&self, transaction: TransactionId, rater: UserId) -> Result<bool, StoreError>;

    /// Ratings received by `user`, newest first.
    fn list_for_user(&self, user: UserId) -> Result<Vec<Rating>, StoreError>;

    /// Mean score received by `user`, `None` when unrated.
    fn average_for_user(&self, user: UserId) -> Result<Option<f64>, StoreError> {
        let ratings = self.list_for_user(user)?;
        if ratings.is_empty() {
            return Ok(None);
        }
        let total: u32 = ratings.iter().map(|r| u32::from(r.score.value())).sum();
        Ok(Some(f64::from(total) / ratings.len() as f64))
    }
}
