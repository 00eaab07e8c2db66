//! Payment provider collaborator interface.
//!
//! The core never talks to a processor directly; it goes through
//! [`PaymentProvider`]. Every call is bounded by [`with_provider_timeout`]
//! so a slow processor cannot hold a request forever.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::timeout;

use super::errors::{ProviderError, ProviderResult};
use super::models::WebhookNotification;

/// Default timeout for provider calls (15 seconds)
pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(15);

/// Order creation request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest {
    pub merchant_reference: String,
    pub amount_minor: i64,
    pub currency: String,
    pub customer_email: Option<String>,
    pub customer_reference: String,
    pub success_url: String,
    pub failure_url: String,
    pub cancel_url: String,
    pub notification_url: String,
    pub description: String,
}

/// Order as created by the provider
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedOrder {
    pub order_id: String,
}

/// Hosted payment page for an order
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSession {
    pub session_url: String,
}

/// Provider acknowledgement of a refund
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundReceipt {
    pub refund_id: String,
    pub status: String,
}

/// Third-party payment processor
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Name recorded on every intent
    fn name(&self) -> &str;

    /// Create an order for `request.amount_minor`
    async fn create_order(&self, request: &OrderRequest) -> ProviderResult<CreatedOrder>;

    /// Create the hosted payment session the buyer is redirected to
    async fn create_payment_session(
        &self,
        order_id: &str,
        language: &str,
    ) -> ProviderResult<PaymentSession>;

    /// Refund `amount_minor` of a captured order
    async fn issue_refund(
        &self,
        order_id: &str,
        transaction_id: Option<&str>,
        amount_minor: i64,
    ) -> ProviderResult<RefundReceipt>;

    /// Normalize a raw webhook body
    fn parse_webhook(&self, raw: &[u8]) -> ProviderResult<WebhookNotification> {
        serde_json::from_slice(raw).map_err(|e| ProviderError::InvalidPayload(e.to_string()))
    }
}

/// Run a provider call with a deadline
pub async fn with_provider_timeout<F, T>(duration: Duration, future: F) -> ProviderResult<T>
where
    F: std::future::Future<Output = ProviderResult<T>>,
{
    match timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::Timeout(duration)),
    }
}
