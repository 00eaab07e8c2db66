//! Public catalog listings.

use axum::{Json, extract::State};
use credits_ledger::{ledger::GiftInfo, payments::CreditPackage, store::LedgerStore};

use super::AppState;

/// Credit packages, cheapest first
pub async fn list_packages<S: LedgerStore>(
    State(state): State<AppState<S>>,
) -> Json<Vec<CreditPackage>> {
    Json(state.purchases.package_catalog().packages())
}

/// Gifts, cheapest first
pub async fn list_gifts<S: LedgerStore>(State(state): State<AppState<S>>) -> Json<Vec<GiftInfo>> {
    Json(state.ledger.gift_catalog().gifts())
}
