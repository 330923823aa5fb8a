//! # OpenAPI Specification Assembly
//!
//! Assembles all utoipa-documented routes into a single OpenAPI document
//! served at `/openapi.json`.

use axum::routing::get;
use axum::{Json, Router};
use utoipa::OpenApi;

use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "InfinitiStyle Marketplace API",
        version = "0.1.0",
        description = "Listings, the transaction lifecycle from payment to delivery, payment proof uploads, and seller ratings."
    ),
    paths(
        // Listings
        crate::routes::listings::create_listing,
        crate::routes::listings::list_listings,
        crate::routes::listings::get_listing,
        crate::routes::listings::update_listing,
        // Transactions
        crate::routes::transactions::initiate_transaction,
        crate::routes::transactions::list_transactions,
        crate::routes::transactions::get_transaction,
        crate::routes::transactions::upload_payment_proof,
        crate::routes::transactions::download_payment_proof,
        crate::routes::transactions::confirm_payment,
        crate::routes::transactions::mark_shipped,
        crate::routes::transactions::confirm_delivery,
        crate::routes::transactions::cancel_transaction,
        // Ratings
        crate::routes::ratings::rate_transaction,
        crate::routes::ratings::user_ratings,
    ),
    components(schemas(
        crate::error::ErrorBody,
        crate::error::ErrorDetail,
        crate::routes::listings::CreateListingRequest,
        crate::routes::listings::UpdateListingRequest,
        crate::routes::listings::ListingResponse,
        crate::routes::transactions::InitiateTransactionRequest,
        crate::routes::transactions::ShipRequest,
        crate::routes::transactions::CancelRequest,
        crate::routes::transactions::TransactionResponse,
        crate::routes::ratings::RateRequest,
        crate::routes::ratings::RatingResponse,
        crate::routes::ratings::RatingSummaryResponse,
    )),
    tags(
        (name = "listings", description = "Marketplace listings"),
        (name = "transactions", description = "Transaction lifecycle"),
        (name = "ratings", description = "Seller ratings"),
    )
)]
pub struct ApiDoc;

pub fn router() -> Router<AppState> {
    Router::new().route("/openapi.json", get(openapi_json))
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_lifecycle_paths() {
        let doc = ApiDoc::openapi();
        for path in [
            "/v1/listings",
            "/v1/listings/{id}",
            "/v1/transactions",
            "/v1/transactions/{id}",
            "/v1/transactions/{id}/payment-proof",
            "/v1/transactions/{id}/confirm-payment",
            "/v1/transactions/{id}/ship",
            "/v1/transactions/{id}/delivered",
            "/v1/transactions/{id}/cancel",
            "/v1/transactions/{id}/rating",
            "/v1/users/{id}/ratings",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }

    #[test]
    fn document_serializes() {
        let json = serde_json::to_value(ApiDoc::openapi()).unwrap();
        assert_eq!(json["info"]["title"], "InfinitiStyle Marketplace API");
    }
}
