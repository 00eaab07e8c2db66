//! Payment error types.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use super::models::IntentStatus;
use crate::ledger::LedgerError;

/// Errors reported by a payment provider
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Transport-level failure talking to the provider
    #[error("Provider request failed: {0}")]
    Request(String),

    /// Provider answered but refused the operation
    #[error("Provider rejected request ({code}): {message}")]
    Rejected { code: String, message: String },

    /// Provider did not answer in time
    #[error("Provider call timed out after {0:?}")]
    Timeout(Duration),

    /// Payload could not be understood
    #[error("Invalid provider payload: {0}")]
    InvalidPayload(String),
}

impl ProviderError {
    /// Whether the provider certainly did not carry out the operation.
    ///
    /// Timeouts, transport failures and unreadable answers leave the outcome
    /// unknown: the provider may have acted before the answer was lost.
    pub fn is_refusal(&self) -> bool {
        matches!(self, ProviderError::Rejected { .. })
    }
}

/// Result type for provider calls
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Payment errors
#[derive(Debug, Error)]
pub enum PaymentError {
    /// Underlying ledger failure
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Payment provider failure
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Package id missing from the package catalog
    #[error("Unknown package: {0}")]
    UnknownPackage(String),

    /// Webhook references an order with no matching intent
    #[error("No payment intent for provider order {0}")]
    UnknownIntent(String),

    /// Intent lookup by id failed
    #[error("Payment intent not found: {0}")]
    IntentNotFound(Uuid),

    /// Webhook payload could not be parsed
    #[error("Invalid webhook payload: {0}")]
    InvalidWebhook(String),

    /// Refund attempted on an intent that cannot be refunded
    #[error("Payment is not refundable in status {status}")]
    NotRefundable { status: IntentStatus },

    /// Partial refund larger than the original charge
    #[error("Refund amount {requested} exceeds original charge {original}")]
    RefundExceedsOriginal { requested: i64, original: i64 },

    /// Buyer no longer holds the credits a refund would take back
    #[error("Insufficient credits: available {available}, required {required}")]
    InsufficientCredits { available: i64, required: i64 },

    /// Requester is neither the owner nor an admin
    #[error("Not authorized to modify this payment")]
    Unauthorized,

    /// State machine forbids the transition
    #[error("Invalid payment status transition from {from} to {to}")]
    InvalidTransition { from: IntentStatus, to: IntentStatus },
}

impl PaymentError {
    /// Get a client-safe error message that doesn't leak sensitive information
    pub fn client_message(&self) -> String {
        match self {
            PaymentError::Ledger(e) => e.client_message(),
            PaymentError::Provider(_) => "Payment provider unavailable".to_string(),
            PaymentError::UnknownIntent(_) => "Unknown payment".to_string(),
            _ => self.to_string(),
        }
    }
}

/// Result type for payment operations
pub type PaymentResult<T> = Result<T, PaymentError>;
