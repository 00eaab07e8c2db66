//! Webhook reconciliation.
//!
//! A webhook is applied at most once per intent: the first delivery stamps
//! `webhook_received_at` in the same transaction as the credit and the status
//! change, and every later delivery for that intent is a no-op.

use serde_json::{Value, json};
use std::sync::Arc;

use super::{
    errors::{PaymentError, PaymentResult},
    models::{IntentStatus, WebhookNotification, WebhookOutcome},
    provider::PaymentProvider,
    transition,
};
use crate::events::LedgerEvent;
use crate::ledger::{EntryType, LedgerService, Metadata, Posting, Reference};
use crate::store::{LedgerStore, LedgerTx};

/// Failure reason recorded when a success webhook reports the wrong amount
pub const AMOUNT_MISMATCH: &str = "amount_mismatch";

/// Reconciliation service
pub struct ReconciliationService<S: LedgerStore> {
    ledger: LedgerService<S>,
    provider: Arc<dyn PaymentProvider>,
}

impl<S: LedgerStore> Clone for ReconciliationService<S> {
    fn clone(&self) -> Self {
        Self {
            ledger: self.ledger.clone(),
            provider: Arc::clone(&self.provider),
        }
    }
}

impl<S: LedgerStore> ReconciliationService<S> {
    pub fn new(ledger: LedgerService<S>, provider: Arc<dyn PaymentProvider>) -> Self {
        Self { ledger, provider }
    }

    /// Apply a raw webhook body
    ///
    /// # Errors
    ///
    /// * `PaymentError::InvalidWebhook` - Body could not be parsed
    /// * `PaymentError::UnknownIntent` - No intent for the order id
    pub async fn handle_webhook(&self, raw: &[u8]) -> PaymentResult<WebhookOutcome> {
        let notification = self
            .provider
            .parse_webhook(raw)
            .map_err(|e| PaymentError::InvalidWebhook(e.to_string()))?;
        let payload = serde_json::from_slice::<Value>(raw)
            .or_else(|_| serde_json::to_value(&notification))
            .unwrap_or(Value::Null);

        self.apply(&notification, payload).await
    }

    /// Apply an already-parsed notification
    pub async fn apply(
        &self,
        notification: &WebhookNotification,
        payload: Value,
    ) -> PaymentResult<WebhookOutcome> {
        let now = self.ledger.clock().now();
        let mut tx = self.ledger.store().begin().await?;

        let mut intent = tx
            .lock_intent_by_order(&notification.order_id)
            .await?
            .ok_or_else(|| PaymentError::UnknownIntent(notification.order_id.clone()))?;

        if intent.webhook_received_at.is_some() {
            log::info!(
                "Duplicate webhook for intent {} (order {})",
                intent.id,
                notification.order_id
            );
            return Ok(WebhookOutcome::Duplicate);
        }

        intent.webhook_received_at = Some(now);
        intent.provider_transaction_id = Some(notification.transaction_id.clone());
        intent.metadata.insert("webhook".to_string(), payload);
        intent.updated_at = now;

        let amount_matches = notification
            .amount_minor
            .is_none_or(|amount| amount == intent.amount_minor);

        let status = intent.status;
        let outcome = if notification.is_success() && amount_matches {
            match status {
                IntentStatus::Completed => WebhookOutcome::AlreadyApplied,
                _ if status.can_transition_to(IntentStatus::Completed) => {
                    let mut metadata = Metadata::new();
                    metadata.insert("package_id".to_string(), json!(intent.package_id));
                    metadata.insert(
                        "transaction_id".to_string(),
                        json!(notification.transaction_id),
                    );
                    let posting = Posting::new(EntryType::Purchase)
                        .reference(Reference::PaymentIntent(intent.id))
                        .description(format!("Purchased {} credits", intent.credits_amount))
                        .metadata(metadata);
                    self.ledger
                        .credit_in(&mut tx, intent.user_id, intent.credits_amount, posting)
                        .await?;
                    transition(&mut intent, IntentStatus::Completed, now)?;
                    WebhookOutcome::Completed
                }
                _ => WebhookOutcome::Ignored,
            }
        } else {
            let reason = if notification.is_success() {
                AMOUNT_MISMATCH.to_string()
            } else {
                notification.status.to_lowercase()
            };
            match status {
                IntentStatus::Failed => WebhookOutcome::AlreadyApplied,
                _ if status.can_transition_to(IntentStatus::Failed) => {
                    intent
                        .metadata
                        .insert("failure_code".to_string(), json!(notification.response_code));
                    intent
                        .metadata
                        .insert("failure_reason".to_string(), json!(reason));
                    transition(&mut intent, IntentStatus::Failed, now)?;
                    WebhookOutcome::Failed
                }
                _ => WebhookOutcome::Ignored,
            }
        };

        tx.update_intent(&intent).await?;
        tx.commit().await?;

        match outcome {
            WebhookOutcome::Completed => {
                log::info!(
                    "Payment intent {} completed, credited {} to user {}",
                    intent.id,
                    intent.credits_amount,
                    intent.user_id
                );
                self.ledger.events().publish(LedgerEvent::PurchaseCompleted {
                    intent_id: intent.id,
                    user_id: intent.user_id,
                    credits: intent.credits_amount,
                });
            }
            WebhookOutcome::Failed => log::info!(
                "Payment intent {} failed ({:?})",
                intent.id,
                intent.metadata.get("failure_reason")
            ),
            WebhookOutcome::Ignored => log::warn!(
                "Webhook for intent {} ignored in status {} (provider status {})",
                intent.id,
                intent.status,
                notification.status
            ),
            WebhookOutcome::AlreadyApplied | WebhookOutcome::Duplicate => {}
        }

        Ok(outcome)
    }
}
