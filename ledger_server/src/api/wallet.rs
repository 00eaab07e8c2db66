//! Wallet, history, earnings and transfer handlers.
//!
//! All endpoints act on the authenticated caller's own wallet.
//!
//! # Examples
//!
//! ```bash
//! curl http://localhost:8080/api/v1/wallet/transactions?entry_type=gift_received&page=2 \
//!   -H "Authorization: Bearer TOKEN"
//!
//! curl -X POST http://localhost:8080/api/v1/wallet/transfer \
//!   -H "Authorization: Bearer TOKEN" \
//!   -H "Content-Type: application/json" \
//!   -d '{"recipient_id": 7, "amount": 25}'
//! ```

use axum::{
    Json,
    extract::{Extension, Query, State},
};
use chrono::{DateTime, Utc};
use credits_ledger::{
    EntryType, LedgerEntry, Wallet,
    ledger::{Earnings, HistoryQuery, Page, TransferReceipt, UserId},
    store::LedgerStore,
};
use serde::Deserialize;

use super::AppState;
use super::error::ApiResult;
use super::middleware::AuthContext;
use crate::metrics;

#[derive(Debug, Deserialize)]
pub struct EarningsQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct TransferRequest {
    pub recipient_id: UserId,
    pub amount: i64,
    pub description: Option<String>,
}

/// The caller's wallet, created on first access
pub async fn get_wallet<S: LedgerStore>(
    State(state): State<AppState<S>>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<Wallet>> {
    Ok(Json(state.ledger.wallet(auth.user_id).await?))
}

/// Paginated ledger entries, newest first
pub async fn transactions<S: LedgerStore>(
    State(state): State<AppState<S>>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Page<LedgerEntry>>> {
    Ok(Json(state.ledger.history(auth.user_id, &query).await?))
}

/// Gift income within optional bounds
pub async fn earnings<S: LedgerStore>(
    State(state): State<AppState<S>>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<EarningsQuery>,
) -> ApiResult<Json<Earnings>> {
    Ok(Json(
        state
            .ledger
            .creator_earnings(auth.user_id, query.from, query.to)
            .await?,
    ))
}

/// Move credits to another user
///
/// # Errors
///
/// - `400 Bad Request`: Non-positive amount or self-transfer
/// - `402 Payment Required`: Balance too low
pub async fn transfer<S: LedgerStore>(
    State(state): State<AppState<S>>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<TransferRequest>,
) -> ApiResult<Json<TransferReceipt>> {
    let result = state
        .ledger
        .transfer(
            auth.user_id,
            request.recipient_id,
            request.amount,
            request.description,
        )
        .await;
    metrics::ledger_operations_total("transfer", result.is_ok());

    let receipt = result?;
    metrics::credits_moved_total(EntryType::GiftSent, request.amount);
    Ok(Json(receipt))
}
