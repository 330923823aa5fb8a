//! # Rating Endpoints
//!
//! | Method | Path | Handler |
//! |--------|------|---------|
//! | `POST` | `/v1/transactions/{id}/rating` | `rate_transaction` |
//! | `GET` | `/v1/users/{id}/ratings` | `user_ratings` |

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use istyle_core::{Timestamp, TransactionId, UserId};
use istyle_state::Rating;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{lock_transaction, store_rating};
use crate::auth::CallerIdentity;
use crate::error::AppError;
use crate::extractors::{extract_json, parse_path_id};
use crate::state::AppState;

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct RateRequest {
    /// Integer from 1 to 5.
    pub score: i64,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RatingResponse {
    #[schema(value_type = String)]
    pub transaction_id: TransactionId,
    #[schema(value_type = String)]
    pub rater_id: UserId,
    #[schema(value_type = String)]
    pub rated_user_id: UserId,
    pub score: u8,
    pub comment: Option<String>,
    #[schema(value_type = String)]
    pub created_at: Timestamp,
}

impl From<Rating> for RatingResponse {
    fn from(rating: Rating) -> Self {
        Self {
            transaction_id: rating.transaction_id,
            rater_id: rating.rater_id,
            rated_user_id: rating.rated_user_id,
            score: rating.score.value(),
            comment: rating.comment,
            created_at: rating.created_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RatingSummaryResponse {
    #[schema(value_type = String)]
    pub user_id: UserId,
    pub count: usize,
    /// Mean score, absent when the user has no ratings.
    pub average: Option<f64>,
    pub ratings: Vec<RatingResponse>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/transactions/{id}/rating", post(rate_transaction))
        .route("/v1/users/{id}/ratings", get(user_ratings))
}

/// POST /v1/transactions/{id}/rating — Buyer rates the seller once delivered.
#[utoipa::path(
    post,
    path = "/v1/transactions/{id}/rating",
    params(("id" = String, Path, description = "Transaction ID")),
    request_body = RateRequest,
    responses(
        (status = 201, description = "Rating recorded", body = RatingResponse),
        (status = 403, description = "Caller is not the buyer", body = crate::error::ErrorBody),
        (status = 409, description = "Not delivered, or already rated", body = crate::error::ErrorBody),
        (status = 422, description = "Score outside 1..=5", body = crate::error::ErrorBody),
    ),
    tag = "ratings"
)]
pub async fn rate_transaction(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<String>,
    body: Result<Json<RateRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let id: TransactionId = parse_path_id(&id, "transaction")?;
    let req = extract_json(body)?;
    let _lock = lock_transaction(&state, id).await?;
    let pending = state
        .market
        .prepare_rating(caller.user_id, id, req.score, req.comment)?;
    let rating = store_rating(&state, pending).await?;
    Ok((StatusCode::CREATED, Json(RatingResponse::from(rating))))
}

/// GET /v1/users/{id}/ratings — Ratings a user received, with the average.
#[utoipa::path(
    get,
    path = "/v1/users/{id}/ratings",
    params(("id" = String, Path, description = "User ID")),
    responses(
        (status = 200, description = "Rating summary", body = RatingSummaryResponse),
        (status = 404, description = "Malformed user id", body = crate::error::ErrorBody),
    ),
    tag = "ratings"
)]
pub async fn user_ratings(
    State(state): State<AppState>,
    _caller: CallerIdentity,
    Path(id): Path<String>,
) -> Result<Json<RatingSummaryResponse>, AppError> {
    let user: UserId = parse_path_id(&id, "user")?;
    let summary = state.market.ratings_for(user)?;
    Ok(Json(RatingSummaryResponse {
        user_id: summary.user_id,
        count: summary.count,
        average: summary.average,
        ratings: summary.ratings.into_iter().map(RatingResponse::from).collect(),
    }))
}
