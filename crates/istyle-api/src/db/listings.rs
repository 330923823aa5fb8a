//! Listing persistence operations.

use chrono::{DateTime, Utc};
use istyle_core::{ListingId, Timestamp, UserId};
use istyle_state::{Listing, ListingStatus};
use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

use super::{decode_error, WriteError};

/// Insert a newly created listing.
pub async fn insert<'e>(exec: impl PgExecutor<'e>, listing: &Listing) -> Result<(), WriteError> {
    sqlx::query(
        "INSERT INTO listings (id, owner_id, title, description, kind, status, price, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
    )
    .bind(*listing.id.as_uuid())
    .bind(*listing.owner_id.as_uuid())
    .bind(&listing.title)
    .bind(&listing.description)
    .bind(listing.kind.as_str())
    .bind(listing.status.as_str())
    .bind(&listing.price)
    .bind(*listing.created_at.as_datetime())
    .bind(*listing.updated_at.as_datetime())
    .execute(exec)
    .await?;
    Ok(())
}

/// Write an owner's edit.
pub async fn update<'e>(exec: impl PgExecutor<'e>, listing: &Listing) -> Result<(), WriteError> {
    let result = sqlx::query(
        "UPDATE listings SET title = $2, description = $3, status = $4, price = $5, updated_at = $6
         WHERE id = $1",
    )
    .bind(*listing.id.as_uuid())
    .bind(&listing.title)
    .bind(&listing.description)
    .bind(listing.status.as_str())
    .bind(&listing.price)
    .bind(*listing.updated_at.as_datetime())
    .execute(exec)
    .await?;
    if result.rows_affected() == 0 {
        return Err(WriteError::Stale {
            entity: "listing",
            id: listing.id.to_string(),
        });
    }
    Ok(())
}

/// Mark a listing unavailable once its sale is delivered.
pub async fn close<'e>(
    exec: impl PgExecutor<'e>,
    id: ListingId,
    at: Timestamp,
) -> Result<(), WriteError> {
    sqlx::query("UPDATE listings SET status = $2, updated_at = $3 WHERE id = $1")
        .bind(*id.as_uuid())
        .bind(ListingStatus::Unavailable.as_str())
        .bind(*at.as_datetime())
        .execute(exec)
        .await?;
    Ok(())
}

/// Load all listings for hydration.
pub async fn load_all(pool: &PgPool) -> Result<Vec<Listing>, sqlx::Error> {
    let rows = sqlx::query_as::<_, ListingRow>(
        "SELECT id, owner_id, title, description, kind, status, price, created_at, updated_at
         FROM listings ORDER BY created_at",
    )
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(ListingRow::into_record).collect()
}

#[derive(sqlx::FromRow)]
struct ListingRow {
    id: Uuid,
    owner_id: Uuid,
    title: String,
    description: String,
    kind: String,
    status: String,
    price: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ListingRow {
    fn into_record(self) -> Result<Listing, sqlx::Error> {
        Ok(Listing {
            id: ListingId::from(self.id),
            owner_id: UserId::from(self.owner_id),
            title: self.title,
            description: self.description,
            kind: self.kind.parse().map_err(|e| decode_error("kind", e))?,
            status: self.status.parse().map_err(|e| decode_error("status", e))?,
            price: self.price,
            created_at: Timestamp::from_utc(self.created_at),
            updated_at: Timestamp::from_utc(self.updated_at),
        })
    }
}
