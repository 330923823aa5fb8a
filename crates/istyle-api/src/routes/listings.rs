//! # Listing Endpoints
//!
//! | Method | Path | Handler |
//! |--------|------|---------|
//! | `POST` | `/v1/listings` | `create_listing` |
//! | `GET` | `/v1/listings` | `list_listings` |
//! | `GET` | `/v1/listings/{id}` | `get_listing` |
//! | `PUT` | `/v1/listings/{id}` | `update_listing` |

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use istyle_core::{ListingId, Timestamp, UserId};
use istyle_market::{ListingFilter, ListingUpdate, NewListing};
use istyle_state::{Listing, ListingKind, ListingStatus};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::{publish_listing, store_listing_update};
use crate::auth::CallerIdentity;
use crate::error::AppError;
use crate::extractors::{extract_json, extract_validated_json, parse_path_id, Validate};
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct CreateListingRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// `SALE` or `EXCHANGE`.
    #[schema(value_type = String)]
    pub kind: ListingKind,
    /// Decimal price, e.g. `"25.50"`. Omitted for exchanges.
    #[serde(default)]
    pub price: Option<String>,
}

impl Validate for CreateListingRequest {
    fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("title must not be empty".into());
        }
        Ok(())
    }
}

/// Owner edit. Omitted fields are left unchanged; an empty `price` clears it.
#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct UpdateListingRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub price: Option<String>,
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    pub status: Option<ListingStatus>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListingQuery {
    /// `AVAILABLE` or `UNAVAILABLE`.
    pub status: Option<String>,
    /// `SALE` or `EXCHANGE`.
    pub kind: Option<String>,
    pub owner_id: Option<String>,
}

impl ListingQuery {
    fn into_filter(self) -> Result<ListingFilter, AppError> {
        Ok(ListingFilter {
            status: self.status.as_deref().map(str::parse).transpose()?,
            kind: self.kind.as_deref().map(str::parse).transpose()?,
            owner_id: self
                .owner_id
                .as_deref()
                .map(|raw| {
                    raw.parse::<UserId>()
                        .map_err(|_| AppError::Validation(format!("invalid owner_id: {raw:?}")))
                })
                .transpose()?,
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ListingResponse {
    #[schema(value_type = String)]
    pub id: ListingId,
    #[schema(value_type = String)]
    pub owner_id: UserId,
    pub title: String,
    pub description: String,
    #[schema(value_type = String)]
    pub kind: ListingKind,
    #[schema(value_type = String)]
    pub status: ListingStatus,
    pub price: Option<String>,
    #[schema(value_type = String)]
    pub created_at: Timestamp,
    #[schema(value_type = String)]
    pub updated_at: Timestamp,
    /// Whether a buyer could open a transaction right now. Advisory only;
    /// initiation re-checks under the listing lock.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub can_initiate: Option<bool>,
}

impl ListingResponse {
    fn new(listing: Listing, can_initiate: Option<bool>) -> Self {
        Self {
            id: listing.id,
            owner_id: listing.owner_id,
            title: listing.title,
            description: listing.description,
            kind: listing.kind,
            status: listing.status,
            price: listing.price,
            created_at: listing.created_at,
            updated_at: listing.updated_at,
            can_initiate,
        }
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/listings", post(create_listing).get(list_listings))
        .route("/v1/listings/{id}", get(get_listing).put(update_listing))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /v1/listings — Publish a listing owned by the caller.
#[utoipa::path(
    post,
    path = "/v1/listings",
    request_body = CreateListingRequest,
    responses(
        (status = 201, description = "Listing created", body = ListingResponse),
        (status = 422, description = "Validation error", body = crate::error::ErrorBody),
    ),
    tag = "listings"
)]
pub async fn create_listing(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Result<Json<CreateListingRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let req = extract_validated_json(body)?;
    let listing = state.market.prepare_listing(
        caller.user_id,
        NewListing {
            title: req.title,
            description: req.description,
            kind: req.kind,
            price: req.price,
        },
    )?;
    let listing = publish_listing(&state, listing).await?;
    Ok((StatusCode::CREATED, Json(ListingResponse::new(listing, None))))
}

/// GET /v1/listings — List listings, optionally filtered.
#[utoipa::path(
    get,
    path = "/v1/listings",
    params(ListingQuery),
    responses(
        (status = 200, description = "Listings, newest first", body = Vec<ListingResponse>),
        (status = 422, description = "Invalid filter", body = crate::error::ErrorBody),
    ),
    tag = "listings"
)]
pub async fn list_listings(
    State(state): State<AppState>,
    _caller: CallerIdentity,
    Query(query): Query<ListingQuery>,
) -> Result<Json<Vec<ListingResponse>>, AppError> {
    let filter = query.into_filter()?;
    let listings = state.market.list_listings(&filter)?;
    Ok(Json(
        listings
            .into_iter()
            .map(|l| ListingResponse::new(l, None))
            .collect(),
    ))
}

/// GET /v1/listings/{id} — Listing detail with the availability hint.
#[utoipa::path(
    get,
    path = "/v1/listings/{id}",
    params(("id" = String, Path, description = "Listing ID")),
    responses(
        (status = 200, description = "Listing found", body = ListingResponse),
        (status = 404, description = "Listing not found", body = crate::error::ErrorBody),
    ),
    tag = "listings"
)]
pub async fn get_listing(
    State(state): State<AppState>,
    _caller: CallerIdentity,
    Path(id): Path<String>,
) -> Result<Json<ListingResponse>, AppError> {
    let id: ListingId = parse_path_id(&id, "listing")?;
    let listing = state.market.get_listing(id)?;
    let can_initiate = state.market.can_initiate(id)?;
    Ok(Json(ListingResponse::new(listing, Some(can_initiate))))
}

/// PUT /v1/listings/{id} — Owner edits title, description, price or status.
#[utoipa::path(
    put,
    path = "/v1/listings/{id}",
    params(("id" = String, Path, description = "Listing ID")),
    request_body = UpdateListingRequest,
    responses(
        (status = 200, description = "Listing updated", body = ListingResponse),
        (status = 403, description = "Caller does not own the listing", body = crate::error::ErrorBody),
        (status = 404, description = "Listing not found", body = crate::error::ErrorBody),
    ),
    tag = "listings"
)]
pub async fn update_listing(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<String>,
    body: Result<Json<UpdateListingRequest>, JsonRejection>,
) -> Result<Json<ListingResponse>, AppError> {
    let id: ListingId = parse_path_id(&id, "listing")?;
    let req = extract_json(body)?;
    let _lock = state.write_locks.lock(id).await;
    let listing = state.market.prepare_listing_update(
        caller.user_id,
        id,
        ListingUpdate {
            title: req.title,
            description: req.description,
            price: req.price,
            status: req.status,
        },
    )?;
    let listing = store_listing_update(&state, listing).await?;
    Ok(Json(ListingResponse::new(listing, None)))
}
