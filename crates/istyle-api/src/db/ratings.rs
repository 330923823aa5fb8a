//! Rating persistence operations.

use chrono::{DateTime, Utc};
use istyle_core::{Timestamp, TransactionId, UserId};
use istyle_state::{Rating, RatingScore};
use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

use super::{decode_error, WriteError};

/// Insert a rating. Fails with [`WriteError::AlreadyRated`] when the
/// `(transaction_id, rater_id)` key is already present.
pub async fn insert<'e>(exec: impl PgExecutor<'e>, rating: &Rating) -> Result<(), WriteError> {
    let result = sqlx::query(
        "INSERT INTO ratings (transaction_id, rater_id, rated_user_id, score, comment, created_at)
         VALUES ($1, $2, $3, $4, $5, $6)
         ON CONFLICT (transaction_id, rater_id) DO NOTHING",
    )
    .bind(*rating.transaction_id.as_uuid())
    .bind(*rating.rater_id.as_uuid())
    .bind(*rating.rated_user_id.as_uuid())
    .bind(i16::from(rating.score.value()))
    .bind(&rating.comment)
    .bind(*rating.created_at.as_datetime())
    .execute(exec)
    .await?;
    if result.rows_affected() == 0 {
        return Err(WriteError::AlreadyRated {
            transaction_id: rating.transaction_id,
        });
    }
    Ok(())
}

/// Load all ratings for hydration.
pub async fn load_all(pool: &PgPool) -> Result<Vec<Rating>, sqlx::Error> {
    let rows = sqlx::query_as::<_, RatingRow>(
        "SELECT transaction_id, rater_id, rated_user_id, score, comment, created_at
         FROM ratings ORDER BY created_at",
    )
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(RatingRow::into_record).collect()
}

#[derive(sqlx::FromRow)]
struct RatingRow {
    transaction_id: Uuid,
    rater_id: Uuid,
    rated_user_id: Uuid,
    score: i16,
    comment: Option<String>,
    created_at: DateTime<Utc>,
}

impl RatingRow {
    fn into_record(self) -> Result<Rating, sqlx::Error> {
        Ok(Rating {
            transaction_id: TransactionId::from(self.transaction_id),
            rater_id: UserId::from(self.rater_id),
            rated_user_id: UserId::from(self.rated_user_id),
            score: RatingScore::new(i64::from(self.score)).map_err(|e| decode_error("score", e))?,
            comment: self.comment,
            created_at: Timestamp::from_utc(self.created_at),
        })
    }
}
