//! HTTP mapping of ledger and payment errors.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use credits_ledger::{LedgerError, PaymentError};
use serde::Serialize;
use thiserror::Error;

/// Error body returned by every endpoint
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Errors surfaced by HTTP handlers
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Payment(#[from] PaymentError),

    /// Malformed request
    #[error("{0}")]
    BadRequest(String),

    /// Missing or invalid bearer token
    #[error("Authentication required")]
    Unauthenticated,

    /// Webhook signature missing or wrong
    #[error("Invalid webhook signature")]
    InvalidSignature,
}

/// Result type for handlers
pub type ApiResult<T> = Result<T, ApiError>;

fn ledger_status(err: &LedgerError) -> StatusCode {
    match err {
        LedgerError::InvalidAmount(_) | LedgerError::SelfTransfer | LedgerError::SelfGift => {
            StatusCode::BAD_REQUEST
        }
        LedgerError::InsufficientBalance { .. } => StatusCode::PAYMENT_REQUIRED,
        LedgerError::UnknownGift(_) => StatusCode::NOT_FOUND,
        LedgerError::BalanceOverflow => StatusCode::UNPROCESSABLE_ENTITY,
        LedgerError::Integrity(_) | LedgerError::Database(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Ledger(e) => ledger_status(e),
            ApiError::Payment(e) => match e {
                PaymentError::Ledger(e) => ledger_status(e),
                PaymentError::Provider(_) => StatusCode::BAD_GATEWAY,
                PaymentError::UnknownPackage(_)
                | PaymentError::UnknownIntent(_)
                | PaymentError::IntentNotFound(_) => StatusCode::NOT_FOUND,
                PaymentError::InvalidWebhook(_) => StatusCode::BAD_REQUEST,
                PaymentError::NotRefundable { .. } | PaymentError::InvalidTransition { .. } => {
                    StatusCode::CONFLICT
                }
                PaymentError::RefundExceedsOriginal { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                PaymentError::InsufficientCredits { .. } => StatusCode::PAYMENT_REQUIRED,
                PaymentError::Unauthorized => StatusCode::FORBIDDEN,
            },
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthenticated | ApiError::InvalidSignature => StatusCode::UNAUTHORIZED,
        }
    }

    /// Get a client-safe error message that doesn't leak sensitive information
    pub fn client_message(&self) -> String {
        match self {
            ApiError::Ledger(e) => e.client_message(),
            ApiError::Payment(e) => e.client_message(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, status = %status, "Request rejected");
        }

        (
            status,
            Json(ErrorResponse {
                error: self.client_message(),
            }),
        )
            .into_response()
    }
}
