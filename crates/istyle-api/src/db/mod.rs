//! # Database Persistence Layer
//!
//! Optional Postgres persistence via SQLx. When `DATABASE_URL` is set,
//! handlers write each prepared change to PostgreSQL first and commit it
//! in memory only after the database accepted it. The in-memory stores are
//! hydrated from the database on startup. When absent, the API runs
//! in-memory only.
//!
//! Transaction rows change only through
//! `UPDATE ... WHERE id = $1 AND version = $2`; a row that moved on is a
//! [`WriteError::Stale`]. A transition that also closes its listing, and a
//! rating together with the `rated` flag, are each written in one database
//! transaction. The partial unique index on open transactions mirrors the
//! listing availability gate.

pub mod listings;
pub mod ratings;
pub mod transactions;

use istyle_core::{ListingId, TransactionId};
use istyle_market::{ListingStore, PendingRating, PendingTransition, RatingStore, TransactionStore};
use sqlx::postgres::{PgPool, PgPoolOptions};
use thiserror::Error;

use crate::state::AppState;

#[derive(Error, Debug)]
pub enum HydrationError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("failed to load {entity} into memory: {source}")]
    Store {
        entity: &'static str,
        #[source]
        source: istyle_market::StoreError,
    },
}

/// Failures writing a prepared change.
#[derive(Error, Debug)]
pub enum WriteError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The row is missing or no longer at the version the change was
    /// validated against.
    #[error("{entity} {id} changed in the database since it was read")]
    Stale { entity: &'static str, id: String },

    #[error("listing {listing_id} already has an open transaction in the database")]
    ListingHeld { listing_id: ListingId },

    #[error("transaction {transaction_id} is already rated in the database")]
    AlreadyRated { transaction_id: TransactionId },
}

/// Write a prepared transition, closing the listing in the same database
/// transaction when the step is a delivery.
pub async fn write_transition(pool: &PgPool, pending: &PendingTransition) -> Result<(), WriteError> {
    let mut db_tx = pool.begin().await?;
    transactions::update(&mut *db_tx, pending.current.version, &pending.next).await?;
    if pending.closes_listing() {
        listings::close(&mut *db_tx, pending.next.listing_id, pending.next.updated_at).await?;
    }
    db_tx.commit().await?;
    Ok(())
}

/// Write a prepared rating and the transaction's `rated` flag together.
pub async fn write_rating(pool: &PgPool, pending: &PendingRating) -> Result<(), WriteError> {
    let mut db_tx = pool.begin().await?;
    ratings::insert(&mut *db_tx, &pending.rating).await?;
    transactions::update(&mut *db_tx, pending.current.version, &pending.next).await?;
    db_tx.commit().await?;
    Ok(())
}

/// Initialize the database connection pool and run migrations.
///
/// Returns `None` if `DATABASE_URL` is not set (in-memory-only mode).
/// Returns `Err` if the URL is set but the connection or migration fails.
pub async fn init_pool() -> Result<Option<PgPool>, sqlx::Error> {
    let url = match std::env::var("DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            tracing::warn!(
                "DATABASE_URL not set, running in-memory only. State will not survive restarts."
            );
            return Ok(None);
        }
    };

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect(&url)
        .await?;

    tracing::info!("Connected to PostgreSQL");

    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("Database migrations applied");

    Ok(Some(pool))
}

/// Load every persisted record into the in-memory stores behind `state`.
///
/// Listings load first so transactions never reference a missing listing.
pub async fn hydrate(state: &AppState, pool: &PgPool) -> Result<(), HydrationError> {
    let listings = listings::load_all(pool).await?;
    let listing_count = listings.len();
    for listing in listings {
        state
            .listings
            .insert(listing)
            .map_err(|source| HydrationError::Store {
                entity: "listing",
                source,
            })?;
    }

    let transactions = transactions::load_all(pool).await?;
    let transaction_count = transactions.len();
    for tx in transactions {
        state
            .transactions
            .insert(tx)
            .map_err(|source| HydrationError::Store {
                entity: "transaction",
                source,
            })?;
    }

    let ratings = ratings::load_all(pool).await?;
    let rating_count = ratings.len();
    for rating in ratings {
        state
            .ratings
            .insert_if_absent(rating)
            .map_err(|source| HydrationError::Store {
                entity: "rating",
                source,
            })?;
    }

    tracing::info!(
        listings = listing_count,
        transactions = transaction_count,
        ratings = rating_count,
        "hydrated in-memory stores from database"
    );
    Ok(())
}

/// Map a stored value that no longer parses into a decode error.
pub(crate) fn decode_error(column: &str, err: impl std::fmt::Display) -> sqlx::Error {
    sqlx::Error::Protocol(format!("invalid {column} in database row: {err}"))
}
