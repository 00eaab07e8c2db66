//! Payment provider webhooks.
//!
//! When a webhook secret is configured, every notification must carry
//! `x-webhook-signature: hex(HMAC-SHA256(secret, body))`. The raw body is
//! handed to reconciliation untouched so the stored payload matches what was
//! signed.

use axum::{Json, body::Bytes, extract::State, http::HeaderMap};
use credits_ledger::{PaymentError, payments::WebhookOutcome, store::LedgerStore};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::AppState;
use super::error::{ApiError, ApiResult};
use super::request_id::RequestId;
use crate::logging::log_security_event;
use crate::metrics;

/// Header carrying the body signature
pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub outcome: WebhookOutcome,
}

type HmacSha256 = Hmac<Sha256>;

fn webhook_mac(secret: &str, body: &[u8]) -> Option<Vec<u8>> {
    // HMAC takes keys of any length, so this only fails on a broken build
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body);
    Some(mac.finalize().into_bytes().to_vec())
}

/// Signature the provider is expected to send for `body`
pub fn sign_webhook(secret: &str, body: &[u8]) -> String {
    webhook_mac(secret, body)
        .map(hex::encode)
        .unwrap_or_default()
}

/// Constant-time check of a hex signature against `body`
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    let Ok(provided) = hex::decode(signature.trim()) else {
        return false;
    };
    let Some(expected) = webhook_mac(secret, body) else {
        return false;
    };

    provided.len() == expected.len() && bool::from(provided.as_slice().ct_eq(expected.as_slice()))
}

/// Apply a provider notification.
///
/// Duplicates and notifications that no longer change anything are
/// acknowledged with `200 OK` so the provider stops retrying.
///
/// # Errors
///
/// - `400 Bad Request`: Unparseable payload
/// - `401 Unauthorized`: Missing or wrong signature
/// - `404 Not Found`: No intent for the order id
pub async fn payment_webhook<S: LedgerStore>(
    State(state): State<AppState<S>>,
    request_id: RequestId,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookResponse>> {
    if let Some(secret) = &state.webhook_secret {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|value| value.to_str().ok());

        let valid = signature.is_some_and(|sig| verify_signature(secret, &body, sig));
        if !valid {
            log_security_event(
                "bad_webhook_signature",
                None,
                Some(request_id.as_str()),
                if signature.is_some() {
                    "Webhook signature mismatch"
                } else {
                    "Webhook signature missing"
                },
            );
            metrics::webhook_outcomes_total("bad_signature");
            return Err(ApiError::InvalidSignature);
        }
    }

    match state.reconciliation.handle_webhook(&body).await {
        Ok(outcome) => {
            metrics::webhook_outcomes_total(outcome.as_str());
            tracing::info!(outcome = outcome.as_str(), "Webhook processed");
            Ok(Json(WebhookResponse { outcome }))
        }
        Err(e) => {
            let label = match &e {
                PaymentError::InvalidWebhook(_) => "invalid",
                PaymentError::UnknownIntent(_) => "unknown_intent",
                _ => "error",
            };
            metrics::webhook_outcomes_total(label);
            tracing::warn!(error = %e, "Webhook rejected");
            Err(e.into())
        }
    }
}
