//! Payment intent data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use uuid::Uuid;

use crate::ledger::{Metadata, UserId};

/// Payment intent status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Refunded,
    Cancelled,
}

impl IntentStatus {
    pub const ALL: [IntentStatus; 6] = [
        IntentStatus::Pending,
        IntentStatus::Processing,
        IntentStatus::Completed,
        IntentStatus::Failed,
        IntentStatus::Refunded,
        IntentStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IntentStatus::Pending => "pending",
            IntentStatus::Processing => "processing",
            IntentStatus::Completed => "completed",
            IntentStatus::Failed => "failed",
            IntentStatus::Refunded => "refunded",
            IntentStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            IntentStatus::Completed
                | IntentStatus::Failed
                | IntentStatus::Refunded
                | IntentStatus::Cancelled
        )
    }

    /// Whether the state machine allows `self -> next`
    pub fn can_transition_to(&self, next: IntentStatus) -> bool {
        use IntentStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Cancelled)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Completed, Refunded)
        )
    }
}

impl fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        IntentStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown intent status '{s}'"))
    }
}

/// One attempted purchase of credits through the payment provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: Uuid,
    pub user_id: UserId,
    pub provider: String,
    pub provider_order_id: Option<String>,
    pub provider_transaction_id: Option<String>,
    pub session_url: Option<String>,
    pub package_id: String,
    pub amount_minor: i64,
    pub credits_amount: i64,
    pub currency: String,
    pub status: IntentStatus,
    pub idempotency_key: String,
    pub webhook_received_at: Option<DateTime<Utc>>,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Purchasable credit package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditPackage {
    pub id: String,
    pub name: String,
    pub amount_minor: i64,
    pub credits: i64,
    pub currency: String,
}

/// Customer details forwarded to the provider when creating an order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Buyer {
    pub user_id: UserId,
    pub email: Option<String>,
}

/// Identity of whoever is asking for a status change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requester {
    pub user_id: UserId,
    pub is_admin: bool,
}

impl Requester {
    pub fn user(user_id: UserId) -> Self {
        Self {
            user_id,
            is_admin: false,
        }
    }

    pub fn admin(user_id: UserId) -> Self {
        Self {
            user_id,
            is_admin: true,
        }
    }

    pub fn may_act_on(&self, intent: &PaymentIntent) -> bool {
        self.is_admin || self.user_id == intent.user_id
    }
}

/// Result of `PurchaseService::initiate`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PurchaseInitiation {
    pub intent: PaymentIntent,
    /// Where to redirect the buyer, absent once the intent is terminal
    pub payment_url: Option<String>,
    /// True when an existing intent was returned unchanged
    pub replayed: bool,
}

/// Normalized inbound webhook
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookNotification {
    #[serde(rename = "orderIdentification")]
    pub order_id: String,
    pub transaction_id: String,
    pub status: String,
    #[serde(default)]
    pub response_code: Option<String>,
    #[serde(default, rename = "amountCents")]
    pub amount_minor: Option<i64>,
}

impl WebhookNotification {
    pub const SUCCESS: &'static str = "success";

    pub fn is_success(&self) -> bool {
        self.status.eq_ignore_ascii_case(Self::SUCCESS)
    }
}

/// What a webhook delivery did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    /// Intent completed and credits granted
    Completed,
    /// Intent marked failed
    Failed,
    /// Intent was already in the target state
    AlreadyApplied,
    /// Webhook for this intent was already processed
    Duplicate,
    /// Intent state does not allow the requested transition; recorded only
    Ignored,
}

impl WebhookOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookOutcome::Completed => "completed",
            WebhookOutcome::Failed => "failed",
            WebhookOutcome::AlreadyApplied => "already_applied",
            WebhookOutcome::Duplicate => "duplicate",
            WebhookOutcome::Ignored => "ignored",
        }
    }
}

/// Refund bookkeeping stored under `metadata.refund`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundRecord {
    pub state: RefundState,
    pub amount_minor: i64,
    pub credits: i64,
    pub requested_by: UserId,
    #[serde(default)]
    pub provider_refund_id: Option<String>,
    #[serde(default)]
    pub provider_status: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Refund phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundState {
    /// Credits reserved locally, provider not yet confirmed or its answer lost
    Pending,
    Confirmed,
    /// Provider refused; reserved credits returned
    Reversed,
}
