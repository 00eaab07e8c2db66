//! Ledger error types.

use thiserror::Error;

/// Ledger errors
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Amount must be positive
    #[error("Invalid amount: {0}")]
    InvalidAmount(i64),

    /// Insufficient balance
    #[error("Insufficient balance: available {available}, required {required}")]
    InsufficientBalance { available: i64, required: i64 },

    /// Sender and recipient of a transfer are the same user
    #[error("Cannot transfer credits to yourself")]
    SelfTransfer,

    /// Sender and recipient of a gift are the same user
    #[error("Cannot send a gift to yourself")]
    SelfGift,

    /// Gift id missing from the gift catalog
    #[error("Unknown gift: {0}")]
    UnknownGift(String),

    /// Balance would exceed i64
    #[error("Balance overflow")]
    BalanceOverflow,

    /// Stored data violates a ledger invariant
    #[error("Ledger integrity violation: {0}")]
    Integrity(String),
}

impl LedgerError {
    /// Get a client-safe error message that doesn't leak sensitive information
    pub fn client_message(&self) -> String {
        match self {
            LedgerError::Database(_) => "Internal server error".to_string(),
            LedgerError::Integrity(_) => "Ledger integrity error".to_string(),
            _ => self.to_string(),
        }
    }
}

/// Result type for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;
