//! Purchase initiation, cancellation and lookups.

use chrono::{DateTime, Utc};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::{
    errors::{PaymentError, PaymentResult},
    models::{Buyer, IntentStatus, PaymentIntent, PurchaseInitiation, Requester},
    provider::{DEFAULT_PROVIDER_TIMEOUT, OrderRequest, PaymentProvider, with_provider_timeout},
    transition,
};
use crate::catalog::PackageCatalog;
use crate::ledger::{LedgerService, Metadata, UserId};
use crate::store::{LedgerStore, LedgerTx};

/// Default idempotency bucket width (5 minutes)
pub const DEFAULT_IDEMPOTENCY_WINDOW: Duration = Duration::from_secs(300);

/// Largest page returned by [`PurchaseService::history`]
pub const MAX_HISTORY_LIMIT: i64 = 100;

/// Purchase flow settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseSettings {
    /// Width of the time bucket in the idempotency key
    pub idempotency_window: Duration,
    pub default_language: String,
    pub success_url: String,
    pub failure_url: String,
    pub cancel_url: String,
    /// Where the provider posts webhooks
    pub notification_url: String,
    pub provider_timeout: Duration,
}

impl Default for PurchaseSettings {
    fn default() -> Self {
        Self {
            idempotency_window: DEFAULT_IDEMPOTENCY_WINDOW,
            default_language: "en".to_string(),
            success_url: "http://localhost:8080/payments/success".to_string(),
            failure_url: "http://localhost:8080/payments/failure".to_string(),
            cancel_url: "http://localhost:8080/payments/cancel".to_string(),
            notification_url: "http://localhost:8080/api/v1/webhooks/payments".to_string(),
            provider_timeout: DEFAULT_PROVIDER_TIMEOUT,
        }
    }
}

/// Derive the idempotency key for `(user, package, time bucket)`
///
/// Requests for the same package within one window share a key, so a
/// double-clicked buy button produces a single intent.
pub fn idempotency_key(
    user_id: UserId,
    package_id: &str,
    now: DateTime<Utc>,
    window: Duration,
) -> String {
    let window_secs = i64::try_from(window.as_secs()).unwrap_or(i64::MAX).max(1);
    let bucket = now.timestamp().div_euclid(window_secs);
    let digest = Sha256::digest(format!("purchase:{user_id}:{package_id}:{bucket}").as_bytes());
    hex::encode(digest)
}

/// Purchase service
pub struct PurchaseService<S: LedgerStore> {
    ledger: LedgerService<S>,
    provider: Arc<dyn PaymentProvider>,
    packages: Arc<dyn PackageCatalog>,
    settings: PurchaseSettings,
}

impl<S: LedgerStore> Clone for PurchaseService<S> {
    fn clone(&self) -> Self {
        Self {
            ledger: self.ledger.clone(),
            provider: Arc::clone(&self.provider),
            packages: Arc::clone(&self.packages),
            settings: self.settings.clone(),
        }
    }
}

impl<S: LedgerStore> PurchaseService<S> {
    pub fn new(
        ledger: LedgerService<S>,
        provider: Arc<dyn PaymentProvider>,
        packages: Arc<dyn PackageCatalog>,
        settings: PurchaseSettings,
    ) -> Self {
        Self {
            ledger,
            provider,
            packages,
            settings,
        }
    }

    pub fn settings(&self) -> &PurchaseSettings {
        &self.settings
    }

    pub fn package_catalog(&self) -> &Arc<dyn PackageCatalog> {
        &self.packages
    }

    /// Start buying a credit package
    ///
    /// # Arguments
    ///
    /// * `buyer` - Purchasing user and the email forwarded to the provider
    /// * `package_id` - Package catalog id
    /// * `language` - Payment page language, defaults to the configured one
    ///
    /// # Returns
    ///
    /// * `PaymentResult<PurchaseInitiation>` - The intent and where to send the buyer.
    ///   `replayed` is set when an intent for the same key already existed.
    ///
    /// # Errors
    ///
    /// * `PaymentError::UnknownPackage` - Package not in the catalog
    /// * `PaymentError::Provider` - Order or session creation failed; the
    ///   intent stays PENDING and a retry reuses it
    pub async fn initiate(
        &self,
        buyer: &Buyer,
        package_id: &str,
        language: Option<&str>,
    ) -> PaymentResult<PurchaseInitiation> {
        let package = self
            .packages
            .package(package_id)
            .ok_or_else(|| PaymentError::UnknownPackage(package_id.to_string()))?;
        let language = language.unwrap_or(&self.settings.default_language);

        let now = self.ledger.clock().now();
        let key = idempotency_key(
            buyer.user_id,
            &package.id,
            now,
            self.settings.idempotency_window,
        );

        let mut tx = self.ledger.store().begin().await?;
        let intent = match tx.lock_intent_by_key(&key).await? {
            Some(existing) => existing,
            None => {
                let mut metadata = Metadata::new();
                metadata.insert("package_name".to_string(), json!(package.name));
                let intent = PaymentIntent {
                    id: Uuid::new_v4(),
                    user_id: buyer.user_id,
                    provider: self.provider.name().to_string(),
                    provider_order_id: None,
                    provider_transaction_id: None,
                    session_url: None,
                    package_id: package.id.clone(),
                    amount_minor: package.amount_minor,
                    credits_amount: package.credits,
                    currency: package.currency.clone(),
                    status: IntentStatus::Pending,
                    idempotency_key: key,
                    webhook_received_at: None,
                    metadata,
                    created_at: now,
                    updated_at: now,
                };
                tx.insert_intent_if_absent(&intent).await?
            }
        };
        tx.commit().await?;

        if intent.status != IntentStatus::Pending {
            log::info!(
                "Replaying payment intent {} for user {} ({})",
                intent.id,
                buyer.user_id,
                intent.status
            );
            return Ok(replayed(intent));
        }

        let request = OrderRequest {
            merchant_reference: intent.id.to_string(),
            amount_minor: intent.amount_minor,
            currency: intent.currency.clone(),
            customer_email: buyer.email.clone(),
            customer_reference: buyer.user_id.to_string(),
            success_url: self.settings.success_url.clone(),
            failure_url: self.settings.failure_url.clone(),
            cancel_url: self.settings.cancel_url.clone(),
            notification_url: self.settings.notification_url.clone(),
            description: format!("{} credits ({})", package.credits, package.name),
        };

        let timeout = self.settings.provider_timeout;
        let order = with_provider_timeout(timeout, self.provider.create_order(&request))
            .await
            .inspect_err(|e| {
                log::warn!("Order creation failed for intent {}: {}", intent.id, e);
            })?;
        let session = with_provider_timeout(
            timeout,
            self.provider
                .create_payment_session(&order.order_id, language),
        )
        .await
        .inspect_err(|e| {
            log::warn!(
                "Session creation failed for intent {} (order {}): {}",
                intent.id,
                order.order_id,
                e
            );
        })?;

        let mut tx = self.ledger.store().begin().await?;
        let mut current = tx
            .lock_intent(intent.id)
            .await?
            .ok_or(PaymentError::IntentNotFound(intent.id))?;

        if current.status != IntentStatus::Pending {
            // Another request attached its own order first
            log::warn!(
                "Orphaned provider order {} for intent {} (now {})",
                order.order_id,
                current.id,
                current.status
            );
            return Ok(replayed(current));
        }

        current.provider_order_id = Some(order.order_id);
        current.session_url = Some(session.session_url.clone());
        current
            .metadata
            .insert("language".to_string(), json!(language));
        transition(&mut current, IntentStatus::Processing, self.ledger.clock().now())?;
        tx.update_intent(&current).await?;
        tx.commit().await?;

        log::info!(
            "Payment intent {} processing for user {} ({} {} for {} credits)",
            current.id,
            current.user_id,
            current.amount_minor,
            current.currency,
            current.credits_amount
        );

        Ok(PurchaseInitiation {
            intent: current,
            payment_url: Some(session.session_url),
            replayed: false,
        })
    }

    /// Cancel a PENDING intent
    ///
    /// # Errors
    ///
    /// * `PaymentError::IntentNotFound` - No such intent
    /// * `PaymentError::Unauthorized` - Requester is neither owner nor admin
    /// * `PaymentError::InvalidTransition` - Intent is no longer PENDING
    pub async fn cancel(
        &self,
        intent_id: Uuid,
        requester: Requester,
    ) -> PaymentResult<PaymentIntent> {
        let mut tx = self.ledger.store().begin().await?;
        let mut intent = tx
            .lock_intent(intent_id)
            .await?
            .ok_or(PaymentError::IntentNotFound(intent_id))?;
        if !requester.may_act_on(&intent) {
            return Err(PaymentError::Unauthorized);
        }

        transition(&mut intent, IntentStatus::Cancelled, self.ledger.clock().now())?;
        intent
            .metadata
            .insert("cancelled_by".to_string(), json!(requester.user_id));
        tx.update_intent(&intent).await?;
        tx.commit().await?;

        log::info!(
            "Payment intent {} cancelled by user {}",
            intent.id,
            requester.user_id
        );
        Ok(intent)
    }

    /// Current state of one intent
    pub async fn status(
        &self,
        intent_id: Uuid,
        requester: Requester,
    ) -> PaymentResult<PaymentIntent> {
        let intent = self
            .ledger
            .store()
            .find_intent(intent_id)
            .await?
            .ok_or(PaymentError::IntentNotFound(intent_id))?;
        if !requester.may_act_on(&intent) {
            return Err(PaymentError::Unauthorized);
        }
        Ok(intent)
    }

    /// A user's intents, newest first
    pub async fn history(
        &self,
        user_id: UserId,
        limit: i64,
        offset: i64,
    ) -> PaymentResult<Vec<PaymentIntent>> {
        let limit = limit.clamp(1, MAX_HISTORY_LIMIT);
        let offset = offset.max(0);
        Ok(self
            .ledger
            .store()
            .list_intents(user_id, limit, offset)
            .await?)
    }
}

fn replayed(intent: PaymentIntent) -> PurchaseInitiation {
    let payment_url = if intent.status.is_terminal() {
        None
    } else {
        intent.session_url.clone()
    };
    PurchaseInitiation {
        intent,
        payment_url,
        replayed: true,
    }
}
