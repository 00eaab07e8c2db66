//! Credit purchase handlers.
//!
//! # Examples
//!
//! Start a purchase:
//! ```bash
//! curl -X POST http://localhost:8080/api/v1/purchases \
//!   -H "Authorization: Bearer TOKEN" \
//!   -H "Content-Type: application/json" \
//!   -d '{"package_id": "starter", "language": "de"}'
//! ```
//!
//! Refund part of a completed purchase (owner or admin):
//! ```bash
//! curl -X POST http://localhost:8080/api/v1/purchases/INTENT_ID/refund \
//!   -H "Authorization: Bearer TOKEN" \
//!   -H "Content-Type: application/json" \
//!   -d '{"amount_minor": 250}'
//! ```

use axum::{
    Json,
    body::Bytes,
    extract::{Extension, Path, Query, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use credits_ledger::{
    PaymentError,
    payments::{IntentStatus, PaymentIntent, PurchaseInitiation, RefundRecord, refund_record},
    store::LedgerStore,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::AppState;
use super::error::{ApiError, ApiResult};
use super::middleware::AuthContext;
use super::request_id::RequestId;
use crate::logging::log_security_event;
use crate::metrics;

#[derive(Debug, Deserialize)]
pub struct InitiatePurchaseRequest {
    pub package_id: String,
    pub language: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RefundRequest {
    /// Minor units to refund; the full charge when absent
    pub amount_minor: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    #[serde(default = "HistoryParams::default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

impl HistoryParams {
    fn default_limit() -> i64 {
        20
    }
}

/// Client view of a payment intent
#[derive(Debug, Serialize)]
pub struct PurchaseView {
    pub id: Uuid,
    pub status: IntentStatus,
    pub package_id: String,
    pub amount_minor: i64,
    pub credits_amount: i64,
    pub currency: String,
    pub provider: String,
    pub provider_order_id: Option<String>,
    /// Hosted payment page while the intent is still open
    pub payment_url: Option<String>,
    pub failure_reason: Option<Value>,
    pub refund: Option<RefundRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<PaymentIntent> for PurchaseView {
    fn from(intent: PaymentIntent) -> Self {
        let payment_url = if intent.status.is_terminal() {
            None
        } else {
            intent.session_url.clone()
        };
        let refund = refund_record(&intent);
        Self {
            id: intent.id,
            status: intent.status,
            package_id: intent.package_id,
            amount_minor: intent.amount_minor,
            credits_amount: intent.credits_amount,
            currency: intent.currency,
            provider: intent.provider,
            provider_order_id: intent.provider_order_id,
            payment_url,
            failure_reason: intent.metadata.get("failure_reason").cloned(),
            refund,
            created_at: intent.created_at,
            updated_at: intent.updated_at,
        }
    }
}

/// Response to a purchase initiation
#[derive(Debug, Serialize)]
pub struct InitiatePurchaseResponse {
    pub purchase: PurchaseView,
    pub payment_url: Option<String>,
    /// An intent for the same package already existed in this window
    pub replayed: bool,
}

impl From<PurchaseInitiation> for InitiatePurchaseResponse {
    fn from(initiation: PurchaseInitiation) -> Self {
        Self {
            purchase: PurchaseView::from(initiation.intent),
            payment_url: initiation.payment_url,
            replayed: initiation.replayed,
        }
    }
}

/// Start (or resume) a credit purchase.
///
/// # Response
///
/// `201 Created` for a new intent, `200 OK` when an existing intent for the
/// same package and time window is returned instead.
///
/// # Errors
///
/// - `404 Not Found`: Unknown package
/// - `502 Bad Gateway`: Provider failed; retrying resumes the same intent
pub async fn initiate<S: LedgerStore>(
    State(state): State<AppState<S>>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<InitiatePurchaseRequest>,
) -> ApiResult<(StatusCode, Json<InitiatePurchaseResponse>)> {
    let initiation = state
        .purchases
        .initiate(
            &auth.buyer(),
            &request.package_id,
            request.language.as_deref(),
        )
        .await?;
    metrics::purchase_initiations_total(initiation.replayed);

    let status = if initiation.replayed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(initiation.into())))
}

/// The caller's purchases, newest first
pub async fn history<S: LedgerStore>(
    State(state): State<AppState<S>>,
    Extension(auth): Extension<AuthContext>,
    Query(params): Query<HistoryParams>,
) -> ApiResult<Json<Vec<PurchaseView>>> {
    let intents = state
        .purchases
        .history(auth.user_id, params.limit, params.offset)
        .await?;
    Ok(Json(intents.into_iter().map(PurchaseView::from).collect()))
}

/// One purchase; owner or admin only
pub async fn status<S: LedgerStore>(
    State(state): State<AppState<S>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<PurchaseView>> {
    let intent = state.purchases.status(id, auth.requester()).await?;
    Ok(Json(intent.into()))
}

/// Cancel a purchase that never reached the provider
///
/// # Errors
///
/// - `409 Conflict`: Intent is no longer pending
pub async fn cancel<S: LedgerStore>(
    State(state): State<AppState<S>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<PurchaseView>> {
    let intent = state.purchases.cancel(id, auth.requester()).await?;
    Ok(Json(intent.into()))
}

/// Refund a completed purchase in full or in part.
///
/// The body is optional; an empty body refunds the full charge.
///
/// # Errors
///
/// - `402 Payment Required`: Buyer already spent the purchased credits
/// - `403 Forbidden`: Caller is neither the buyer nor an admin
/// - `409 Conflict`: Intent not completed, or a refund is already in flight
/// - `422 Unprocessable Entity`: Partial amount above the original charge
/// - `502 Bad Gateway`: Provider refused; reserved credits were returned
pub async fn refund<S: LedgerStore>(
    State(state): State<AppState<S>>,
    Extension(auth): Extension<AuthContext>,
    request_id: RequestId,
    Path(id): Path<Uuid>,
    body: Bytes,
) -> ApiResult<Json<PurchaseView>> {
    let request: RefundRequest = if body.is_empty() {
        RefundRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("Invalid refund request: {e}")))?
    };

    let result = state
        .refunds
        .refund(id, auth.requester(), request.amount_minor)
        .await;

    let outcome = match &result {
        Ok(_) => "refunded",
        Err(PaymentError::Provider(e)) if e.is_refusal() => "reversed",
        Err(PaymentError::Provider(_)) => "unconfirmed",
        Err(PaymentError::Unauthorized) => {
            log_security_event(
                "unauthorized_refund",
                Some(auth.user_id),
                Some(request_id.as_str()),
                &format!("Refund of intent {id} by non-owner"),
            );
            "rejected"
        }
        Err(_) => "rejected",
    };
    metrics::refunds_total(outcome);

    Ok(Json(result?.into()))
}
