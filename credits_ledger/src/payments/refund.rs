//! Refunds of completed purchases.
//!
//! A refund runs in three steps so no transaction spans the provider call:
//!
//! 1. reserve: debit the buyer and mark `refund.state = pending`
//! 2. ask the provider to refund, bounded by a timeout
//! 3. confirm (status REFUNDED), or reverse (credit back as an `adjustment`)
//!    when the provider refused
//!
//! When the provider's answer is lost (timeout, transport failure) the refund
//! may have happened, so the credits stay reserved and the refund stays
//! pending. A pending refund blocks further attempts until an operator
//! settles it against the provider.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::{
    errors::{PaymentError, PaymentResult, ProviderError},
    models::{IntentStatus, PaymentIntent, RefundRecord, RefundState, Requester},
    provider::{DEFAULT_PROVIDER_TIMEOUT, PaymentProvider, RefundReceipt, with_provider_timeout},
    refund_record, set_refund_record, transition,
};
use crate::events::LedgerEvent;
use crate::ledger::{EntryType, LedgerError, LedgerService, Posting, Reference};
use crate::store::{LedgerStore, LedgerTx};

/// Credits to take back for refunding `refund_minor` of `original_minor`,
/// proportional and rounded half up
pub fn credits_to_deduct(refund_minor: i64, original_minor: i64, credits: i64) -> i64 {
    if original_minor <= 0 || refund_minor <= 0 || credits <= 0 {
        return 0;
    }
    let numerator = i128::from(refund_minor) * i128::from(credits);
    let original = i128::from(original_minor);
    let rounded = (2 * numerator + original) / (2 * original);
    i64::try_from(rounded.min(i128::from(credits))).unwrap_or(credits)
}

/// Refund service
pub struct RefundService<S: LedgerStore> {
    ledger: LedgerService<S>,
    provider: Arc<dyn PaymentProvider>,
    provider_timeout: Duration,
}

impl<S: LedgerStore> Clone for RefundService<S> {
    fn clone(&self) -> Self {
        Self {
            ledger: self.ledger.clone(),
            provider: Arc::clone(&self.provider),
            provider_timeout: self.provider_timeout,
        }
    }
}

impl<S: LedgerStore> RefundService<S> {
    pub fn new(ledger: LedgerService<S>, provider: Arc<dyn PaymentProvider>) -> Self {
        Self {
            ledger,
            provider,
            provider_timeout: DEFAULT_PROVIDER_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout = timeout;
        self
    }

    /// Refund a completed intent in full or in part
    ///
    /// # Arguments
    ///
    /// * `intent_id` - Intent to refund
    /// * `requester` - Owner of the intent or an admin
    /// * `partial_amount` - Minor units to refund, the full charge when absent
    ///
    /// # Returns
    ///
    /// * `PaymentResult<PaymentIntent>` - The intent, now REFUNDED
    ///
    /// # Errors
    ///
    /// * `PaymentError::Unauthorized` - Requester is neither owner nor admin
    /// * `PaymentError::NotRefundable` - Intent is not COMPLETED or a refund is in flight
    /// * `PaymentError::RefundExceedsOriginal` - Partial amount above the charge
    /// * `PaymentError::InsufficientCredits` - Buyer already spent the credits
    /// * `PaymentError::Provider` - Provider refused, and the reserved credits are
    ///   returned; or its answer was lost, and the refund stays pending
    pub async fn refund(
        &self,
        intent_id: Uuid,
        requester: Requester,
        partial_amount: Option<i64>,
    ) -> PaymentResult<PaymentIntent> {
        let (intent, record) = self.reserve(intent_id, requester, partial_amount).await?;
        let order_id = intent
            .provider_order_id
            .clone()
            .ok_or(PaymentError::NotRefundable {
                status: intent.status,
            })?;

        log::info!(
            "Refunding {} of intent {} ({} credits reserved)",
            record.amount_minor,
            intent.id,
            record.credits
        );

        let result = with_provider_timeout(
            self.provider_timeout,
            self.provider.issue_refund(
                &order_id,
                intent.provider_transaction_id.as_deref(),
                record.amount_minor,
            ),
        )
        .await;

        match result {
            Ok(receipt) => self.confirm(intent.id, record, receipt).await,
            Err(error) if error.is_refusal() => {
                log::warn!("Provider refused refund of intent {}: {}", intent.id, error);
                self.reverse(intent.id, record, &error).await?;
                Err(error.into())
            }
            Err(error) => {
                log::error!(
                    "Refund of intent {} has an unknown outcome, {} credits stay reserved \
                     until reconciled with the provider: {}",
                    intent.id,
                    record.credits,
                    error
                );
                self.mark_unconfirmed(intent.id, record, &error).await?;
                Err(error.into())
            }
        }
    }

    async fn reserve(
        &self,
        intent_id: Uuid,
        requester: Requester,
        partial_amount: Option<i64>,
    ) -> PaymentResult<(PaymentIntent, RefundRecord)> {
        let mut tx = self.ledger.store().begin().await?;
        let mut intent = tx
            .lock_intent(intent_id)
            .await?
            .ok_or(PaymentError::IntentNotFound(intent_id))?;

        if !requester.may_act_on(&intent) {
            log::warn!(
                "User {} attempted to refund intent {} owned by user {}",
                requester.user_id,
                intent.id,
                intent.user_id
            );
            return Err(PaymentError::Unauthorized);
        }
        let refund_in_flight = refund_record(&intent)
            .is_some_and(|record| record.state == RefundState::Pending);
        if intent.status != IntentStatus::Completed
            || intent.provider_order_id.is_none()
            || refund_in_flight
        {
            return Err(PaymentError::NotRefundable {
                status: intent.status,
            });
        }

        let amount_minor = match partial_amount {
            Some(amount) if amount <= 0 => return Err(LedgerError::InvalidAmount(amount).into()),
            Some(amount) if amount > intent.amount_minor => {
                return Err(PaymentError::RefundExceedsOriginal {
                    requested: amount,
                    original: intent.amount_minor,
                });
            }
            Some(amount) => amount,
            None => intent.amount_minor,
        };
        let credits = credits_to_deduct(amount_minor, intent.amount_minor, intent.credits_amount);

        if credits > 0 {
            let posting = Posting::new(EntryType::Refund)
                .reference(Reference::PaymentIntent(intent.id))
                .description(format!("Refund of {} {}", amount_minor, intent.currency))
                .metadata(
                    [("amount_minor".to_string(), json!(amount_minor))]
                        .into_iter()
                        .collect(),
                );
            self.ledger
                .debit_in(&mut tx, intent.user_id, credits, posting)
                .await
                .map_err(|e| match e {
                    LedgerError::InsufficientBalance {
                        available,
                        required,
                    } => PaymentError::InsufficientCredits {
                        available,
                        required,
                    },
                    other => other.into(),
                })?;
        }

        let record = RefundRecord {
            state: RefundState::Pending,
            amount_minor,
            credits,
            requested_by: requester.user_id,
            provider_refund_id: None,
            provider_status: None,
            error: None,
        };
        set_refund_record(&mut intent, &record)?;
        intent.updated_at = self.ledger.clock().now();
        tx.update_intent(&intent).await?;
        tx.commit().await?;

        Ok((intent, record))
    }

    async fn confirm(
        &self,
        intent_id: Uuid,
        mut record: RefundRecord,
        receipt: RefundReceipt,
    ) -> PaymentResult<PaymentIntent> {
        let mut tx = self.ledger.store().begin().await?;
        let mut intent = tx
            .lock_intent(intent_id)
            .await?
            .ok_or(PaymentError::IntentNotFound(intent_id))?;

        record.state = RefundState::Confirmed;
        record.provider_refund_id = Some(receipt.refund_id);
        record.provider_status = Some(receipt.status);
        set_refund_record(&mut intent, &record)?;
        transition(&mut intent, IntentStatus::Refunded, self.ledger.clock().now())?;
        tx.update_intent(&intent).await?;
        tx.commit().await?;

        log::info!(
            "Intent {} refunded ({} minor units, {} credits)",
            intent.id,
            record.amount_minor,
            record.credits
        );
        self.ledger.events().publish(LedgerEvent::IntentRefunded {
            intent_id: intent.id,
            user_id: intent.user_id,
            amount_minor: record.amount_minor,
            credits: record.credits,
        });

        Ok(intent)
    }

    async fn mark_unconfirmed(
        &self,
        intent_id: Uuid,
        mut record: RefundRecord,
        error: &ProviderError,
    ) -> PaymentResult<()> {
        let mut tx = self.ledger.store().begin().await?;
        let mut intent = tx
            .lock_intent(intent_id)
            .await?
            .ok_or(PaymentError::IntentNotFound(intent_id))?;

        record.error = Some(error.to_string());
        set_refund_record(&mut intent, &record)?;
        intent.updated_at = self.ledger.clock().now();
        tx.update_intent(&intent).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn reverse(
        &self,
        intent_id: Uuid,
        mut record: RefundRecord,
        error: &ProviderError,
    ) -> PaymentResult<()> {
        let mut tx = self.ledger.store().begin().await?;
        let mut intent = tx
            .lock_intent(intent_id)
            .await?
            .ok_or(PaymentError::IntentNotFound(intent_id))?;

        if record.credits > 0 {
            let posting = Posting::new(EntryType::Adjustment)
                .reference(Reference::PaymentIntent(intent.id))
                .description("Refund reversed");
            self.ledger
                .credit_in(&mut tx, intent.user_id, record.credits, posting)
                .await
                .inspect_err(|e| {
                    log::error!(
                        "Could not return {} credits for failed refund of intent {}: {}",
                        record.credits,
                        intent_id,
                        e
                    );
                })?;
        }

        record.state = RefundState::Reversed;
        record.error = Some(error.to_string());
        set_refund_record(&mut intent, &record)?;
        intent.updated_at = self.ledger.clock().now();
        tx.update_intent(&intent).await?;
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credits_to_deduct_proportional() {
        assert_eq!(credits_to_deduct(500, 500, 100), 100);
        assert_eq!(credits_to_deduct(250, 500, 100), 50);
        assert_eq!(credits_to_deduct(1, 500, 100), 0);
    }

    #[test]
    fn test_credits_to_deduct_rounds_half_up() {
        // 0.5 credits rounds up
        assert_eq!(credits_to_deduct(5, 1000, 100), 1);
        // 0.4 credits rounds down
        assert_eq!(credits_to_deduct(4, 1000, 100), 0);
        // 33.3 and 66.6
        assert_eq!(credits_to_deduct(1, 3, 100), 33);
        assert_eq!(credits_to_deduct(2, 3, 100), 67);
    }

    #[test]
    fn test_credits_to_deduct_degenerate_inputs() {
        assert_eq!(credits_to_deduct(0, 500, 100), 0);
        assert_eq!(credits_to_deduct(100, 0, 100), 0);
        assert_eq!(credits_to_deduct(i64::MAX, i64::MAX, i64::MAX), i64::MAX);
    }
}
