//! # Listing Availability Gate
//!
//! A listing admits a new transaction iff its own status is available and
//! no non-terminal transaction refers to it. The gate holds the
//! per-listing lock under which that check and the subsequent insert (or
//! the terminal transition that reopens or closes it) run.

use std::sync::Arc;

use istyle_core::ListingId;
use istyle_state::{Listing, TransactionError};

use crate::error::MarketError;
use crate::locks::KeyedLocks;
use crate::store::{ListingStore, TransactionStore};

#[derive(Clone)]
pub struct ListingGate {
    listings: Arc<dyn ListingStore>,
    transactions: Arc<dyn TransactionStore>,
    locks: Arc<KeyedLocks<ListingId>>,
}

impl std::fmt::Debug for ListingGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListingGate")
            .field("active_locks", &self.locks.active())
            .finish()
    }
}

impl ListingGate {
    pub fn new(listings: Arc<dyn ListingStore>, transactions: Arc<dyn TransactionStore>) -> Self {
        Self {
            listings,
            transactions,
            locks: Arc::new(KeyedLocks::new()),
        }
    }

    /// Whether a buyer could initiate against `listing_id` right now.
    ///
    /// Advisory only: the answer can be stale by the time the caller acts.
    /// [`ListingGate::admit`] is the authoritative check.
    pub fn can_initiate(&self, listing_id: ListingId) -> Result<bool, MarketError> {
        let listing = self
            .listings
            .get(listing_id)?
            .ok_or_else(|| TransactionError::listing_not_found(listing_id))?;
        self.is_open_for(&listing)
    }

    /// Run `f` under the listing's lock.
    pub fn with_listing_lock<R>(&self, listing_id: ListingId, f: impl FnOnce() -> R) -> R {
        self.locks.with_lock(listing_id, f)
    }

    /// Fail with `ListingUnavailable` unless `listing` admits a new
    /// transaction. Call under [`ListingGate::with_listing_lock`].
    pub fn admit(&self, listing: &Listing) -> Result<(), MarketError> {
        if !listing.is_available() {
            return Err(TransactionError::ListingUnavailable {
                listing_id: listing.id,
                reason: format!("listing status is {}", listing.status),
            }
            .into());
        }
        if let Some(open) = self.transactions.open_for_listing(listing.id)? {
            return Err(TransactionError::ListingUnavailable {
                listing_id: listing.id,
                reason: format!("listing already has an open transaction ({})", open.status),
            }
            .into());
        }
        Ok(())
    }

    fn is_open_for(&self, listing: &Listing) -> Result<bool, MarketError> {
        match self.admit(listing) {
            Ok(()) => Ok(true),
            Err(MarketError::Transaction(TransactionError::ListingUnavailable { .. })) => Ok(false),
            Err(other) => Err(other),
        }
    }
}
