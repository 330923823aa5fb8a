//! Transaction persistence operations.
//!
//! The transition log is stored as a JSONB array on the transaction row.
//! Rows are only ever replaced by a version-checked `UPDATE`.

use chrono::{DateTime, Utc};
use istyle_core::{ListingId, ProofRef, Timestamp, TransactionId, UserId};
use istyle_state::{Transaction, TransitionRecord};
use sqlx::types::Json;
use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

use super::{decode_error, WriteError};

/// Partial unique index allowing one open transaction per listing.
const OPEN_LISTING_INDEX: &str = "uniq_transactions_open_listing";

/// Insert a newly initiated transaction.
///
/// Fails with [`WriteError::ListingHeld`] when the database already holds
/// an open transaction for the listing.
pub async fn insert<'e>(exec: impl PgExecutor<'e>, tx: &Transaction) -> Result<(), WriteError> {
    let version = i64::try_from(tx.version).map_err(|e| decode_error("version", e))?;
    let result = sqlx::query(
        "INSERT INTO transactions (id, listing_id, buyer_id, seller_id, listing_kind, status,
                payment_proof_ref, tracking_info, initiation_message, rated, cancellation_reason,
                created_at, updated_at, version, transitions)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
    )
    .bind(*tx.id.as_uuid())
    .bind(*tx.listing_id.as_uuid())
    .bind(*tx.buyer_id.as_uuid())
    .bind(*tx.seller_id.as_uuid())
    .bind(tx.listing_kind.as_str())
    .bind(tx.status.as_str())
    .bind(tx.payment_proof_ref.as_ref().map(ProofRef::as_str))
    .bind(&tx.tracking_info)
    .bind(&tx.initiation_message)
    .bind(tx.rated)
    .bind(&tx.cancellation_reason)
    .bind(*tx.created_at.as_datetime())
    .bind(*tx.updated_at.as_datetime())
    .bind(version)
    .bind(Json(&tx.transitions))
    .execute(exec)
    .await;
    match result {
        Ok(_) => Ok(()),
        Err(sqlx::Error::Database(db)) if db.constraint() == Some(OPEN_LISTING_INDEX) => {
            Err(WriteError::ListingHeld {
                listing_id: tx.listing_id,
            })
        }
        Err(e) => Err(e.into()),
    }
}

/// Replace the row with `next` iff it is still at `expected_version`.
///
/// Fails with [`WriteError::Stale`] when the row moved on or is missing.
pub async fn update<'e>(
    exec: impl PgExecutor<'e>,
    expected_version: u64,
    next: &Transaction,
) -> Result<(), WriteError> {
    let expected = i64::try_from(expected_version).map_err(|e| decode_error("version", e))?;
    let version = i64::try_from(next.version).map_err(|e| decode_error("version", e))?;
    let result = sqlx::query(
        "UPDATE transactions SET
            status = $3,
            payment_proof_ref = $4,
            tracking_info = $5,
            rated = $6,
            cancellation_reason = $7,
            updated_at = $8,
            version = $9,
            transitions = $10
         WHERE id = $1 AND version = $2",
    )
    .bind(*next.id.as_uuid())
    .bind(expected)
    .bind(next.status.as_str())
    .bind(next.payment_proof_ref.as_ref().map(ProofRef::as_str))
    .bind(&next.tracking_info)
    .bind(next.rated)
    .bind(&next.cancellation_reason)
    .bind(*next.updated_at.as_datetime())
    .bind(version)
    .bind(Json(&next.transitions))
    .execute(exec)
    .await?;
    if result.rows_affected() == 0 {
        return Err(WriteError::Stale {
            entity: "transaction",
            id: next.id.to_string(),
        });
    }
    Ok(())
}

/// Load all transactions for hydration.
pub async fn load_all(pool: &PgPool) -> Result<Vec<Transaction>, sqlx::Error> {
    let rows = sqlx::query_as::<_, TransactionRow>(
        "SELECT id, listing_id, buyer_id, seller_id, listing_kind, status, payment_proof_ref,
                tracking_info, initiation_message, rated, cancellation_reason, created_at,
                updated_at, version, transitions
         FROM transactions ORDER BY created_at",
    )
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(TransactionRow::into_record).collect()
}

#[derive(sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    listing_id: Uuid,
    buyer_id: Uuid,
    seller_id: Uuid,
    listing_kind: String,
    status: String,
    payment_proof_ref: Option<String>,
    tracking_info: Option<String>,
    initiation_message: Option<String>,
    rated: bool,
    cancellation_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: i64,
    transitions: Json<Vec<TransitionRecord>>,
}

impl TransactionRow {
    fn into_record(self) -> Result<Transaction, sqlx::Error> {
        let payment_proof_ref = self
            .payment_proof_ref
            .map(ProofRef::new)
            .transpose()
            .map_err(|e| decode_error("payment_proof_ref", e))?;
        Ok(Transaction {
            id: TransactionId::from(self.id),
            listing_id: ListingId::from(self.listing_id),
            buyer_id: UserId::from(self.buyer_id),
            seller_id: UserId::from(self.seller_id),
            listing_kind: self
                .listing_kind
                .parse()
                .map_err(|e| decode_error("listing_kind", e))?,
            status: self.status.parse().map_err(|e| decode_error("status", e))?,
            payment_proof_ref,
            tracking_info: self.tracking_info,
            initiation_message: self.initiation_message,
            rated: self.rated,
            cancellation_reason: self.cancellation_reason,
            created_at: Timestamp::from_utc(self.created_at),
            updated_at: Timestamp::from_utc(self.updated_at),
            version: u64::try_from(self.version).map_err(|e| decode_error("version", e))?,
            transitions: self.transitions.0,
        })
    }
}
