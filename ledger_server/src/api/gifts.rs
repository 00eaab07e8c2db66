//! Gift sending.

use axum::{
    Json,
    extract::{Extension, State},
};
use credits_ledger::{
    ledger::{ContextRef, GiftReceipt, UserId},
    store::LedgerStore,
};
use serde::Deserialize;

use super::AppState;
use super::error::ApiResult;
use super::middleware::AuthContext;
use crate::metrics;

#[derive(Debug, Deserialize)]
pub struct SendGiftRequest {
    pub recipient_id: UserId,
    pub gift_id: String,
    /// Defaults to 1
    pub quantity: Option<i64>,
    /// Live session or room the gift was sent in
    pub context: Option<ContextRef>,
}

/// Send a catalog gift to another user
///
/// # Errors
///
/// - `400 Bad Request`: Quantity below 1 or gifting yourself
/// - `402 Payment Required`: Balance too low
/// - `404 Not Found`: Unknown gift id
pub async fn send_gift<S: LedgerStore>(
    State(state): State<AppState<S>>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<SendGiftRequest>,
) -> ApiResult<Json<GiftReceipt>> {
    let result = state
        .ledger
        .send_gift(
            auth.user_id,
            request.recipient_id,
            &request.gift_id,
            request.quantity,
            request.context,
        )
        .await;
    metrics::ledger_operations_total("send_gift", result.is_ok());

    Ok(Json(result?))
}
