//! Credit purchases through an external payment provider.
//!
//! A purchase is a [`PaymentIntent`] moving through a small state machine:
//!
//! ```text
//! PENDING --(order+session created)--> PROCESSING
//! PROCESSING --(webhook: success)--> COMPLETED
//! PROCESSING --(webhook: failure)--> FAILED
//! COMPLETED --(refund)--> REFUNDED
//! PENDING --(cancel)--> CANCELLED
//! ```
//!
//! - [`PurchaseService`] creates intents idempotently and talks to the provider
//! - [`ReconciliationService`] applies provider webhooks exactly once
//! - [`RefundService`] reverses completed purchases
//!
//! No store transaction is held open across a provider call.

pub mod errors;
pub mod models;
pub mod provider;
pub mod purchase;
pub mod reconciliation;
pub mod refund;

pub use errors::{PaymentError, PaymentResult, ProviderError, ProviderResult};
pub use models::{
    Buyer, CreditPackage, IntentStatus, PaymentIntent, PurchaseInitiation, RefundRecord,
    RefundState, Requester, WebhookNotification, WebhookOutcome,
};
pub use provider::{
    CreatedOrder, DEFAULT_PROVIDER_TIMEOUT, OrderRequest, PaymentProvider, PaymentSession,
    RefundReceipt, with_provider_timeout,
};
pub use purchase::{PurchaseService, PurchaseSettings, idempotency_key};
pub use reconciliation::ReconciliationService;
pub use refund::{RefundService, credits_to_deduct};

use chrono::{DateTime, Utc};

use crate::ledger::LedgerError;

/// Metadata key holding the [`RefundRecord`]
pub const REFUND_METADATA_KEY: &str = "refund";

/// Move an intent to `to`, rejecting transitions the state machine forbids
pub(crate) fn transition(
    intent: &mut PaymentIntent,
    to: IntentStatus,
    now: DateTime<Utc>,
) -> PaymentResult<()> {
    if !intent.status.can_transition_to(to) {
        return Err(PaymentError::InvalidTransition {
            from: intent.status,
            to,
        });
    }
    intent.status = to;
    intent.updated_at = now;
    Ok(())
}

/// Refund bookkeeping of an intent, if any
pub fn refund_record(intent: &PaymentIntent) -> Option<RefundRecord> {
    intent
        .metadata
        .get(REFUND_METADATA_KEY)
        .and_then(|value| serde_json::from_value(value.clone()).ok())
}

pub(crate) fn set_refund_record(
    intent: &mut PaymentIntent,
    record: &RefundRecord,
) -> PaymentResult<()> {
    let value = serde_json::to_value(record)
        .map_err(|e| LedgerError::Integrity(format!("unserializable refund record: {e}")))?;
    intent
        .metadata
        .insert(REFUND_METADATA_KEY.to_string(), value);
    Ok(())
}
