//! HTTP client for a hosted-checkout payment provider.
//!
//! JSON over HTTPS with a bearer API key:
//!
//! ```text
//! POST {api_url}/orders                       OrderRequest     -> {"orderId"}
//! POST {api_url}/orders/{order_id}/sessions   {"language"}     -> {"sessionUrl"}
//! POST {api_url}/orders/{order_id}/refunds    {"transactionId", "amountCents"}
//!                                                              -> {"refundId", "status"}
//! ```
//!
//! 4xx answers become [`ProviderError::Rejected`] carrying the HTTP status
//! and the provider's `code`/`message` when the body has them. 5xx answers and
//! transport failures become [`ProviderError::Request`] and client timeouts
//! [`ProviderError::Timeout`], since the provider may still have acted.

use async_trait::async_trait;
use credits_ledger::payments::{
    CreatedOrder, OrderRequest, PaymentProvider, PaymentSession, ProviderError, ProviderResult,
    RefundReceipt,
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::time::{Duration, Instant};

use crate::config::PaymentsConfig;
use crate::logging::log_provider_call;

/// Payment provider reached over HTTP
pub struct HttpPaymentProvider {
    name: String,
    base_url: String,
    api_key: String,
    timeout: Duration,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct SessionRequest<'a> {
    language: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RefundRequest<'a> {
    transaction_id: Option<&'a str>,
    #[serde(rename = "amountCents")]
    amount_minor: i64,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    code: Option<String>,
    message: Option<String>,
}

impl HttpPaymentProvider {
    /// Create a client for the provider at `base_url`
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::Request` if the HTTP client cannot be built
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> ProviderResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            timeout,
            client,
        })
    }

    pub fn from_config(config: &PaymentsConfig) -> ProviderResult<Self> {
        Self::new(
            config.provider_name.clone(),
            config.api_url.clone(),
            config.api_key.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    async fn post<B, T>(&self, operation: &str, path: &str, body: &B) -> ProviderResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let start = Instant::now();
        let result = self.send(path, body).await;
        log_provider_call(
            operation,
            start.elapsed().as_millis() as u64,
            result.is_ok(),
        );
        result
    }

    async fn send<B, T>(&self, path: &str, body: &B) -> ProviderResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|e| format!("Failed to read error response: {}", e));
            if status.is_server_error() {
                return Err(ProviderError::Request(format!("HTTP {}: {}", status, text)));
            }
            let error: ErrorBody = serde_json::from_str(&text).unwrap_or_default();
            return Err(ProviderError::Rejected {
                code: error.code.unwrap_or_else(|| status.as_u16().to_string()),
                message: error.message.unwrap_or(text),
            });
        }

        response.json().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(self.timeout)
            } else {
                ProviderError::InvalidPayload(e.to_string())
            }
        })
    }

    fn transport_error(&self, error: reqwest::Error) -> ProviderError {
        if error.is_timeout() {
            ProviderError::Timeout(self.timeout)
        } else {
            ProviderError::Request(error.to_string())
        }
    }
}

#[async_trait]
impl PaymentProvider for HttpPaymentProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create_order(&self, request: &OrderRequest) -> ProviderResult<CreatedOrder> {
        self.post("create_order", "/orders", request).await
    }

    async fn create_payment_session(
        &self,
        order_id: &str,
        language: &str,
    ) -> ProviderResult<PaymentSession> {
        self.post(
            "create_payment_session",
            &format!("/orders/{order_id}/sessions"),
            &SessionRequest { language },
        )
        .await
    }

    async fn issue_refund(
        &self,
        order_id: &str,
        transaction_id: Option<&str>,
        amount_minor: i64,
    ) -> ProviderResult<RefundReceipt> {
        self.post(
            "issue_refund",
            &format!("/orders/{order_id}/refunds"),
            &RefundRequest {
                transaction_id,
                amount_minor,
            },
        )
        .await
    }
}
