//! # API Route Modules
//!
//! - `listings`: listing creation, owner edits, filtering, and the
//!   `can_initiate` availability hint.
//! - `transactions`: initiation, payment proof upload and download, the
//!   seller and buyer lifecycle steps, cancellation, and transaction queries.
//! - `ratings`: one rating per delivered transaction and per-user summaries.
//!
//! ## Write path
//!
//! Mutating handlers hold the listing's [`ListingWriteLocks`] guard for the
//! whole request and run three steps under it: prepare the change in
//! [`istyle_market::Marketplace`], write it to Postgres when configured,
//! then apply it in memory. A failed database write leaves memory untouched,
//! so an error response always means nothing was committed.
//!
//! [`ListingWriteLocks`]: crate::locks::ListingWriteLocks

pub mod listings;
pub mod ratings;
pub mod transactions;

use std::fmt::Display;

use istyle_core::TransactionId;
use istyle_market::{concurrent_modification, MarketError, PendingRating, PendingTransition};
use istyle_state::{Listing, PartyRole, Rating, Transaction, TransactionAction, TransactionError};

use crate::db::{self, WriteError};
use crate::error::AppError;
use crate::locks::ListingWriteGuard;
use crate::state::AppState;

/// Take the write lock of the listing a transaction belongs to.
pub(crate) async fn lock_transaction(
    state: &AppState,
    id: TransactionId,
) -> Result<ListingWriteGuard, AppError> {
    let listing_id = state.market.get_transaction(id)?.listing_id;
    Ok(state.write_locks.lock(listing_id).await)
}

pub(crate) async fn publish_listing(state: &AppState, listing: Listing) -> Result<Listing, AppError> {
    if let Some(ref pool) = state.db_pool {
        db::listings::insert(pool, &listing)
            .await
            .map_err(|e| write_failed("listing", listing.id, e))?;
    }
    committed(state, state.market.publish_listing(listing))
}

pub(crate) async fn store_listing_update(
    state: &AppState,
    listing: Listing,
) -> Result<Listing, AppError> {
    if let Some(ref pool) = state.db_pool {
        db::listings::update(pool, &listing)
            .await
            .map_err(|e| write_failed("listing", listing.id, e))?;
    }
    committed(state, state.market.apply_listing_update(listing))
}

pub(crate) async fn open_transaction(
    state: &AppState,
    tx: Transaction,
) -> Result<Transaction, AppError> {
    if let Some(ref pool) = state.db_pool {
        db::transactions::insert(pool, &tx).await.map_err(|e| match e {
            WriteError::ListingHeld { listing_id } => {
                AppError::from(TransactionError::ListingUnavailable {
                    listing_id,
                    reason: "listing already has an open transaction".to_string(),
                })
            }
            other => write_failed("transaction", tx.id, other),
        })?;
    }
    committed(state, state.market.apply_initiation(tx))
}

pub(crate) async fn store_transition(
    state: &AppState,
    pending: PendingTransition,
) -> Result<Transaction, AppError> {
    if let Some(ref pool) = state.db_pool {
        db::write_transition(pool, &pending).await.map_err(|e| match e {
            WriteError::Stale { .. } => AppError::from(concurrent_modification(
                &pending.current,
                pending.record.action,
                pending.record.actor_role,
            )),
            other => write_failed("transaction", pending.next.id, other),
        })?;
    }
    committed(state, state.market.apply_transition(pending))
}

pub(crate) async fn store_rating(state: &AppState, pending: PendingRating) -> Result<Rating, AppError> {
    if let Some(ref pool) = state.db_pool {
        db::write_rating(pool, &pending).await.map_err(|e| match e {
            WriteError::AlreadyRated { transaction_id } => {
                AppError::from(TransactionError::AlreadyRated { transaction_id })
            }
            WriteError::Stale { .. } => AppError::from(concurrent_modification(
                &pending.current,
                TransactionAction::Rate,
                PartyRole::Buyer,
            )),
            other => write_failed("rating", pending.rating.transaction_id, other),
        })?;
    }
    committed(state, state.market.apply_rating(pending))
}

fn write_failed(entity: &'static str, id: impl Display, err: WriteError) -> AppError {
    tracing::error!(error = %err, entity, id = %id, "database write failed; nothing committed");
    AppError::Internal(format!("failed to persist {entity}: {err}"))
}

/// Apply a change that is already in Postgres. The listing write lock keeps
/// other requests away from the record, so a failure here means memory and
/// database disagree until the next start re-hydrates from the database.
fn committed<T>(state: &AppState, result: Result<T, MarketError>) -> Result<T, AppError> {
    result.map_err(|err| {
        if state.db_pool.is_some() {
            tracing::error!(error = %err, "in-memory commit failed after the database write");
        }
        AppError::from(err)
    })
}
