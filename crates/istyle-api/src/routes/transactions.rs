//! # Transaction Endpoints
//!
//! | Method | Path | Handler |
//! |--------|------|---------|
//! | `POST` | `/v1/transactions` | `initiate_transaction` |
//! | `GET` | `/v1/transactions` | `list_transactions` |
//! | `GET` | `/v1/transactions/{id}` | `get_transaction` |
//! | `POST` | `/v1/transactions/{id}/payment-proof` | `upload_payment_proof` |
//! | `GET` | `/v1/transactions/{id}/payment-proof` | `download_payment_proof` |
//! | `PUT` | `/v1/transactions/{id}/confirm-payment` | `confirm_payment` |
//! | `PUT` | `/v1/transactions/{id}/ship` | `mark_shipped` |
//! | `PUT` | `/v1/transactions/{id}/delivered` | `confirm_delivery` |
//! | `PUT` | `/v1/transactions/{id}/cancel` | `cancel_transaction` |
//!
//! Every lifecycle step is prepared by the marketplace, written to the
//! database, then applied as a single check-and-set, all under the
//! listing's write lock.

use axum::body::Bytes;
use axum::extract::rejection::{BytesRejection, JsonRejection, QueryRejection};
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use istyle_core::{ListingId, ProofRef, Timestamp, TransactionId, UserId};
use istyle_market::{
    discard_proof, PartyFilter, ProofFormat, ProofStorageError, MAX_PROOF_BYTES,
};
use istyle_state::{
    CancellationPolicy, ListingKind, PartyRole, Transaction, TransactionAction, TransactionStatus,
    TransitionCommand, TransitionRecord,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::{lock_transaction, open_transaction, store_transition};
use crate::auth::CallerIdentity;
use crate::error::AppError;
use crate::extractors::{extract_json, optional_json, parse_path_id};
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct InitiateTransactionRequest {
    #[schema(value_type = String)]
    pub listing_id: ListingId,
    /// Opening message to the seller. Required for exchange listings.
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct TransactionQuery {
    /// `all` (default), `buying` or `selling`.
    #[serde(default, alias = "type")]
    #[param(value_type = Option<String>)]
    pub role: Option<PartyFilter>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ProofUploadQuery {
    /// Original file name; its extension is used when the body is sent as
    /// `application/octet-stream`.
    pub filename: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct ShipRequest {
    #[serde(default)]
    pub tracking_info: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TransactionResponse {
    #[schema(value_type = String)]
    pub id: TransactionId,
    #[schema(value_type = String)]
    pub listing_id: ListingId,
    #[schema(value_type = String)]
    pub buyer_id: UserId,
    #[schema(value_type = String)]
    pub seller_id: UserId,
    #[schema(value_type = String)]
    pub listing_kind: ListingKind,
    /// One of `PENDING_PAYMENT`, `PAYMENT_SENT`, `PAYMENT_CONFIRMED`,
    /// `SHIPPED`, `DELIVERED`, `CANCELLED`.
    #[schema(value_type = String)]
    pub status: TransactionStatus,
    #[schema(value_type = Option<String>)]
    pub payment_proof_ref: Option<ProofRef>,
    pub tracking_info: Option<String>,
    pub initiation_message: Option<String>,
    pub rated: bool,
    pub cancellation_reason: Option<String>,
    #[schema(value_type = String)]
    pub created_at: Timestamp,
    #[schema(value_type = String)]
    pub updated_at: Timestamp,
    pub version: u64,
    #[schema(value_type = Vec<Object>)]
    pub transitions: Vec<TransitionRecord>,
    /// The caller's side of the transaction; absent for admin reads.
    #[schema(value_type = Option<String>)]
    pub caller_role: Option<PartyRole>,
    /// Actions the caller may take in the current state.
    #[schema(value_type = Vec<String>)]
    pub available_actions: Vec<TransactionAction>,
}

const CALLER_ACTIONS: [TransactionAction; 6] = [
    TransactionAction::UploadPaymentProof,
    TransactionAction::ConfirmPayment,
    TransactionAction::MarkShipped,
    TransactionAction::ConfirmDelivery,
    TransactionAction::Cancel,
    TransactionAction::Rate,
];

impl TransactionResponse {
    pub(crate) fn for_caller(tx: Transaction, caller: UserId, policy: CancellationPolicy) -> Self {
        let caller_role = tx.role_of(caller);
        let available_actions = CALLER_ACTIONS
            .into_iter()
            .filter(|action| tx.check(caller, *action, policy).is_ok())
            .collect();
        Self {
            id: tx.id,
            listing_id: tx.listing_id,
            buyer_id: tx.buyer_id,
            seller_id: tx.seller_id,
            listing_kind: tx.listing_kind,
            status: tx.status,
            payment_proof_ref: tx.payment_proof_ref,
            tracking_info: tx.tracking_info,
            initiation_message: tx.initiation_message,
            rated: tx.rated,
            cancellation_reason: tx.cancellation_reason,
            created_at: tx.created_at,
            updated_at: tx.updated_at,
            version: tx.version,
            transitions: tx.transitions,
            caller_role,
            available_actions,
        }
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/v1/transactions",
            post(initiate_transaction).get(list_transactions),
        )
        .route("/v1/transactions/{id}", get(get_transaction))
        .route(
            "/v1/transactions/{id}/payment-proof",
            get(download_payment_proof)
                .post(upload_payment_proof)
                .layer(DefaultBodyLimit::max(MAX_PROOF_BYTES)),
        )
        .route("/v1/transactions/{id}/confirm-payment", put(confirm_payment))
        .route("/v1/transactions/{id}/ship", put(mark_shipped))
        .route("/v1/transactions/{id}/delivered", put(confirm_delivery))
        .route("/v1/transactions/{id}/cancel", put(cancel_transaction))
}

fn respond(state: &AppState, tx: Transaction, caller: &CallerIdentity) -> TransactionResponse {
    TransactionResponse::for_caller(tx, caller.user_id, state.market.policy())
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /v1/transactions — Open a transaction on a listing as its buyer.
#[utoipa::path(
    post,
    path = "/v1/transactions",
    request_body = InitiateTransactionRequest,
    responses(
        (status = 201, description = "Transaction opened in PENDING_PAYMENT", body = TransactionResponse),
        (status = 403, description = "Caller owns the listing", body = crate::error::ErrorBody),
        (status = 404, description = "Listing not found", body = crate::error::ErrorBody),
        (status = 409, description = "Listing unavailable or already held", body = crate::error::ErrorBody),
        (status = 422, description = "Exchange listing without a message", body = crate::error::ErrorBody),
    ),
    tag = "transactions"
)]
pub async fn initiate_transaction(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Result<Json<InitiateTransactionRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let req = extract_json(body)?;
    let _lock = state.write_locks.lock(req.listing_id).await;
    let tx = state
        .market
        .prepare_initiation(caller.user_id, req.listing_id, req.message)?;
    let tx = open_transaction(&state, tx).await?;
    Ok((StatusCode::CREATED, Json(respond(&state, tx, &caller))))
}

/// GET /v1/transactions — The caller's transactions, newest first.
#[utoipa::path(
    get,
    path = "/v1/transactions",
    params(TransactionQuery),
    responses(
        (status = 200, description = "Transactions where the caller is a party", body = Vec<TransactionResponse>),
        (status = 400, description = "Unknown role filter", body = crate::error::ErrorBody),
    ),
    tag = "transactions"
)]
pub async fn list_transactions(
    State(state): State<AppState>,
    caller: CallerIdentity,
    query: Result<Query<TransactionQuery>, QueryRejection>,
) -> Result<Json<Vec<TransactionResponse>>, AppError> {
    let Query(query) = query.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let filter = query.role.unwrap_or_default();
    let transactions = state.market.list_for_user(caller.user_id, filter)?;
    Ok(Json(
        transactions
            .into_iter()
            .map(|tx| respond(&state, tx, &caller))
            .collect(),
    ))
}

/// GET /v1/transactions/{id} — Detail, visible to the parties and admins.
#[utoipa::path(
    get,
    path = "/v1/transactions/{id}",
    params(("id" = String, Path, description = "Transaction ID")),
    responses(
        (status = 200, description = "Transaction found", body = TransactionResponse),
        (status = 404, description = "Not found or not visible to the caller", body = crate::error::ErrorBody),
    ),
    tag = "transactions"
)]
pub async fn get_transaction(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<String>,
) -> Result<Json<TransactionResponse>, AppError> {
    let id: TransactionId = parse_path_id(&id, "transaction")?;
    let tx = if caller.is_admin() {
        state.market.get_transaction(id)?
    } else {
        state.market.get_for(caller.user_id, id)?
    };
    Ok(Json(respond(&state, tx, &caller)))
}

/// POST /v1/transactions/{id}/payment-proof — Buyer uploads proof of payment.
///
/// The raw request body is the file. Its type comes from `Content-Type`, or
/// from the `filename` extension when sent as `application/octet-stream`.
#[utoipa::path(
    post,
    path = "/v1/transactions/{id}/payment-proof",
    params(("id" = String, Path, description = "Transaction ID"), ProofUploadQuery),
    request_body(content = Vec<u8>, content_type = "application/octet-stream"),
    responses(
        (status = 200, description = "Proof stored; transaction is PAYMENT_SENT", body = TransactionResponse),
        (status = 403, description = "Caller is not the buyer", body = crate::error::ErrorBody),
        (status = 409, description = "Not awaiting payment", body = crate::error::ErrorBody),
        (status = 413, description = "File too large", body = crate::error::ErrorBody),
        (status = 422, description = "Empty or unsupported file", body = crate::error::ErrorBody),
    ),
    tag = "transactions"
)]
pub async fn upload_payment_proof(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<String>,
    Query(query): Query<ProofUploadQuery>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<TransactionResponse>, AppError> {
    let id: TransactionId = parse_path_id(&id, "transaction")?;
    let bytes = body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            AppError::from(ProofStorageError::TooLarge {
                max: MAX_PROOF_BYTES,
            })
        } else {
            AppError::BadRequest(rejection.body_text())
        }
    })?;
    let format = proof_format(&headers, query.filename.as_deref())?;

    let _lock = lock_transaction(&state, id).await?;
    let pending = state.market.prepare_payment_proof(
        caller.user_id,
        id,
        state.proofs.as_ref(),
        format,
        &bytes,
    )?;
    let proof = pending.next.payment_proof_ref.clone();
    let tx = store_transition(&state, pending).await.inspect_err(|_| {
        if let Some(proof) = &proof {
            discard_proof(state.proofs.as_ref(), proof);
        }
    })?;
    Ok(Json(respond(&state, tx, &caller)))
}

/// GET /v1/transactions/{id}/payment-proof — The uploaded proof file,
/// for the parties and admins.
#[utoipa::path(
    get,
    path = "/v1/transactions/{id}/payment-proof",
    params(("id" = String, Path, description = "Transaction ID")),
    responses(
        (status = 200, description = "The proof file", body = Vec<u8>, content_type = "application/octet-stream"),
        (status = 404, description = "No proof, or transaction not visible to the caller", body = crate::error::ErrorBody),
    ),
    tag = "transactions"
)]
pub async fn download_payment_proof(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let id: TransactionId = parse_path_id(&id, "transaction")?;
    let tx = if caller.is_admin() {
        state.market.get_transaction(id)?
    } else {
        state.market.get_for(caller.user_id, id)?
    };
    let not_found = || AppError::NotFound(format!("payment proof for transaction {id}"));
    let proof = tx.payment_proof_ref.ok_or_else(not_found)?;
    let bytes = state.proofs.load(&proof)?.ok_or_else(not_found)?;
    let content_type = ProofFormat::of_reference(&proof)
        .map(|format| format.content_type())
        .unwrap_or("application/octet-stream");
    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, "private, no-store"),
        ],
        bytes,
    ))
}

fn proof_format(headers: &HeaderMap, filename: Option<&str>) -> Result<ProofFormat, AppError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .filter(|ct| !ct.starts_with("application/octet-stream"));
    match (content_type, filename) {
        (Some(ct), _) => Ok(ProofFormat::from_content_type(ct)?),
        (None, Some(name)) => {
            let ext = name
                .rsplit_once('.')
                .map(|(_, ext)| ext)
                .ok_or_else(|| ProofStorageError::UnsupportedType(name.to_string()))?;
            Ok(ProofFormat::from_extension(ext)?)
        }
        (None, None) => Err(AppError::Validation(
            "payment proof needs a Content-Type or a filename with an extension".into(),
        )),
    }
}

/// PUT /v1/transactions/{id}/confirm-payment — Seller confirms the payment.
#[utoipa::path(
    put,
    path = "/v1/transactions/{id}/confirm-payment",
    params(("id" = String, Path, description = "Transaction ID")),
    responses(
        (status = 200, description = "Transaction is PAYMENT_CONFIRMED", body = TransactionResponse),
        (status = 403, description = "Caller is not the seller", body = crate::error::ErrorBody),
        (status = 409, description = "No payment proof to confirm", body = crate::error::ErrorBody),
    ),
    tag = "transactions"
)]
pub async fn confirm_payment(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<String>,
) -> Result<Json<TransactionResponse>, AppError> {
    let id: TransactionId = parse_path_id(&id, "transaction")?;
    let _lock = lock_transaction(&state, id).await?;
    let pending = state
        .market
        .prepare_transition(caller.user_id, id, TransitionCommand::ConfirmPayment)?;
    let tx = store_transition(&state, pending).await?;
    Ok(Json(respond(&state, tx, &caller)))
}

/// PUT /v1/transactions/{id}/ship — Seller marks the item shipped.
#[utoipa::path(
    put,
    path = "/v1/transactions/{id}/ship",
    params(("id" = String, Path, description = "Transaction ID")),
    request_body(content = ShipRequest, description = "Optional tracking information"),
    responses(
        (status = 200, description = "Transaction is SHIPPED", body = TransactionResponse),
        (status = 403, description = "Caller is not the seller", body = crate::error::ErrorBody),
        (status = 409, description = "Payment not confirmed", body = crate::error::ErrorBody),
    ),
    tag = "transactions"
)]
pub async fn mark_shipped(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<TransactionResponse>, AppError> {
    let id: TransactionId = parse_path_id(&id, "transaction")?;
    let req: ShipRequest = optional_json(&body)?;
    let _lock = lock_transaction(&state, id).await?;
    let pending = state.market.prepare_transition(
        caller.user_id,
        id,
        TransitionCommand::MarkShipped {
            tracking_info: req.tracking_info,
        },
    )?;
    let tx = store_transition(&state, pending).await?;
    Ok(Json(respond(&state, tx, &caller)))
}

/// PUT /v1/transactions/{id}/delivered — Buyer confirms receipt.
///
/// The listing becomes unavailable.
#[utoipa::path(
    put,
    path = "/v1/transactions/{id}/delivered",
    params(("id" = String, Path, description = "Transaction ID")),
    responses(
        (status = 200, description = "Transaction is DELIVERED", body = TransactionResponse),
        (status = 403, description = "Caller is not the buyer", body = crate::error::ErrorBody),
        (status = 409, description = "Not shipped", body = crate::error::ErrorBody),
    ),
    tag = "transactions"
)]
pub async fn confirm_delivery(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<String>,
) -> Result<Json<TransactionResponse>, AppError> {
    let id: TransactionId = parse_path_id(&id, "transaction")?;
    let _lock = lock_transaction(&state, id).await?;
    let pending = state
        .market
        .prepare_transition(caller.user_id, id, TransitionCommand::ConfirmDelivery)?;
    let tx = store_transition(&state, pending).await?;
    Ok(Json(respond(&state, tx, &caller)))
}

/// PUT /v1/transactions/{id}/cancel — Cancel per the configured policy.
#[utoipa::path(
    put,
    path = "/v1/transactions/{id}/cancel",
    params(("id" = String, Path, description = "Transaction ID")),
    request_body(content = CancelRequest, description = "Optional cancellation reason"),
    responses(
        (status = 200, description = "Transaction is CANCELLED", body = TransactionResponse),
        (status = 403, description = "Caller may not cancel at this stage", body = crate::error::ErrorBody),
        (status = 409, description = "Transaction already finished", body = crate::error::ErrorBody),
    ),
    tag = "transactions"
)]
pub async fn cancel_transaction(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<TransactionResponse>, AppError> {
    let id: TransactionId = parse_path_id(&id, "transaction")?;
    let req: CancelRequest = optional_json(&body)?;
    let _lock = lock_transaction(&state, id).await?;
    let pending = state.market.prepare_transition(
        caller.user_id,
        id,
        TransitionCommand::Cancel { reason: req.reason },
    )?;
    let tx = store_transition(&state, pending).await?;
    Ok(Json(respond(&state, tx, &caller)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(content_type: Option<&'static str>) -> HeaderMap {
        let mut map = HeaderMap::new();
        if let Some(ct) = content_type {
            map.insert(header::CONTENT_TYPE, HeaderValue::from_static(ct));
        }
        map
    }

    #[test]
    fn proof_format_prefers_content_type() {
        let format = proof_format(&headers(Some("image/png")), Some("receipt.pdf")).unwrap();
        assert_eq!(format, ProofFormat::Png);
    }

    #[test]
    fn proof_format_falls_back_to_filename() {
        let format =
            proof_format(&headers(Some("application/octet-stream")), Some("receipt.JPG")).unwrap();
        assert_eq!(format, ProofFormat::Jpeg);
        let format = proof_format(&headers(None), Some("scan.pdf")).unwrap();
        assert_eq!(format, ProofFormat::Pdf);
    }

    #[test]
    fn proof_format_rejects_unknown_types() {
        assert!(matches!(
            proof_format(&headers(Some("text/plain")), None),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            proof_format(&headers(None), Some("notes.txt")),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            proof_format(&headers(None), None),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn available_actions_follow_role_and_status() {
        let market = istyle_market::Marketplace::in_memory();
        let seller = UserId::new();
        let buyer = UserId::new();
        let listing = market
            .create_listing(
                seller,
                istyle_market::NewListing {
                    title: "Denim jacket".into(),
                    description: String::new(),
                    kind: ListingKind::Sale,
                    price: Some("40".into()),
                },
            )
            .unwrap();
        let tx = market.initiate(buyer, listing.id, None).unwrap();

        let policy = CancellationPolicy::BeforeConfirmation;
        let for_buyer = TransactionResponse::for_caller(tx.clone(), buyer, policy);
        assert_eq!(for_buyer.caller_role, Some(PartyRole::Buyer));
        assert_eq!(
            for_buyer.available_actions,
            vec![TransactionAction::UploadPaymentProof, TransactionAction::Cancel]
        );

        let for_seller = TransactionResponse::for_caller(tx.clone(), seller, policy);
        assert_eq!(for_seller.available_actions, vec![TransactionAction::Cancel]);

        let for_admin = TransactionResponse::for_caller(tx, UserId::new(), policy);
        assert_eq!(for_admin.caller_role, None);
        assert!(for_admin.available_actions.is_empty());
    }
}
