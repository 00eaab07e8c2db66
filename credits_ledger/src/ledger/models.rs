//! Ledger data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use uuid::Uuid;

/// User ID type
pub type UserId = i64;

/// Wallet ID type
pub type WalletId = i64;

/// Ledger entry ID type
pub type EntryId = i64;

/// Free-form JSON object attached to entries and intents
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Default currency code for credit wallets
pub const DEFAULT_CURRENCY: &str = "CREDITS";

/// Wallet model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub id: WalletId,
    pub user_id: UserId,
    pub balance: i64,
    pub currency: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Ledger entry model (append-only)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: EntryId,
    pub wallet_id: WalletId,
    pub entry_type: EntryType,
    /// Signed amount, positive for credits and negative for debits
    pub amount: i64,
    pub balance_after: i64,
    pub reference: Option<Reference>,
    pub description: Option<String>,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

/// Ledger entry before it has been persisted
#[derive(Debug, Clone, PartialEq)]
pub struct NewLedgerEntry {
    pub wallet_id: WalletId,
    pub entry_type: EntryType,
    pub amount: i64,
    pub balance_after: i64,
    pub reference: Option<Reference>,
    pub description: Option<String>,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

/// Entry type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    Deposit,
    Withdrawal,
    GiftSent,
    GiftReceived,
    Purchase,
    Refund,
    Adjustment,
}

impl EntryType {
    pub const ALL: [EntryType; 7] = [
        EntryType::Deposit,
        EntryType::Withdrawal,
        EntryType::GiftSent,
        EntryType::GiftReceived,
        EntryType::Purchase,
        EntryType::Refund,
        EntryType::Adjustment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Deposit => "deposit",
            EntryType::Withdrawal => "withdrawal",
            EntryType::GiftSent => "gift_sent",
            EntryType::GiftReceived => "gift_received",
            EntryType::Purchase => "purchase",
            EntryType::Refund => "refund",
            EntryType::Adjustment => "adjustment",
        }
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntryType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown entry type '{s}'"))
    }
}

/// What a ledger entry points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Reference {
    PaymentIntent(Uuid),
    User(UserId),
}

impl Reference {
    pub const PAYMENT_INTENT: &'static str = "payment_intent";
    pub const USER: &'static str = "user";

    /// Split into the `(reference_type, reference_id)` column pair
    pub fn to_parts(&self) -> (&'static str, String) {
        match self {
            Reference::PaymentIntent(id) => (Self::PAYMENT_INTENT, id.to_string()),
            Reference::User(id) => (Self::USER, id.to_string()),
        }
    }

    /// Rebuild from the column pair. Both columns must be present or absent together.
    pub fn from_parts(kind: Option<&str>, id: Option<&str>) -> Result<Option<Self>, String> {
        match (kind, id) {
            (None, None) => Ok(None),
            (Some(Self::PAYMENT_INTENT), Some(id)) => Uuid::parse_str(id)
                .map(|id| Some(Reference::PaymentIntent(id)))
                .map_err(|e| format!("bad payment intent reference '{id}': {e}")),
            (Some(Self::USER), Some(id)) => id
                .parse()
                .map(|id| Some(Reference::User(id)))
                .map_err(|e| format!("bad user reference '{id}': {e}")),
            (kind, id) => Err(format!("unrecognized reference {kind:?}/{id:?}")),
        }
    }
}

/// Surrounding live session or room a gift was sent in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextRef {
    pub kind: String,
    pub id: String,
}

/// Gift definition from the gift catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GiftInfo {
    pub id: String,
    pub name: String,
    pub credits: i64,
}

/// Both legs of a transfer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferReceipt {
    pub sender_entry: LedgerEntry,
    pub recipient_entry: LedgerEntry,
}

/// Both legs of a gift plus the resolved gift
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GiftReceipt {
    pub sender_entry: LedgerEntry,
    pub recipient_entry: LedgerEntry,
    pub gift: GiftInfo,
    pub quantity: i64,
    pub cost: i64,
}

/// Transaction history filter
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HistoryQuery {
    pub entry_type: Option<EntryType>,
    #[serde(default = "HistoryQuery::first_page")]
    pub page: u32,
    #[serde(default = "HistoryQuery::default_per_page")]
    pub per_page: u32,
}

impl HistoryQuery {
    pub const MAX_PER_PAGE: u32 = 100;

    fn first_page() -> u32 {
        1
    }

    fn default_per_page() -> u32 {
        20
    }

    /// Page and page size clamped to valid ranges
    pub fn normalized(&self) -> (u32, u32) {
        (self.page.max(1), self.per_page.clamp(1, Self::MAX_PER_PAGE))
    }

    pub fn offset(&self) -> i64 {
        let (page, per_page) = self.normalized();
        i64::from(page - 1) * i64::from(per_page)
    }
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self {
            entry_type: None,
            page: Self::first_page(),
            per_page: Self::default_per_page(),
        }
    }
}

/// One page of results
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub per_page: u32,
}

/// Creator earnings summary over `gift_received` entries
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Earnings {
    pub total_credits: i64,
    pub gift_count: i64,
    pub by_gift: Vec<GiftEarnings>,
}

/// Earnings for one gift type
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GiftEarnings {
    pub gift_id: String,
    pub gift_name: Option<String>,
    pub credits: i64,
    pub count: i64,
}

/// Result of replaying a wallet's entry chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    pub wallet_id: WalletId,
    pub balance: i64,
    pub ledger_sum: i64,
    pub entry_count: usize,
    /// First entry whose `balance_after` disagrees with the running sum
    pub first_mismatch: Option<EntryId>,
}

impl AuditReport {
    pub fn is_consistent(&self) -> bool {
        self.balance == self.ledger_sum && self.first_mismatch.is_none()
    }
}
