//! Storage seam for wallets, ledger entries and payment intents.
//!
//! Services express every multi-step operation against a [`LedgerTx`]: the
//! transaction holds exclusive locks on the rows it touched until it is
//! committed or dropped. Dropping a transaction without calling
//! [`LedgerTx::commit`] discards all of its writes.
//!
//! Two backends are provided:
//! - [`PgLedgerStore`]: PostgreSQL via sqlx, row locks with `SELECT ... FOR UPDATE`
//! - [`MemoryLedgerStore`]: in-process store that serializes whole transactions,
//!   used by tests and local development

pub mod memory;
pub mod postgres;

pub use memory::{MemoryLedgerStore, MemoryLedgerTx};
pub use postgres::{PgLedgerStore, PgLedgerTx};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::ledger::{
    Earnings, EntryType, GiftEarnings, HistoryQuery, LedgerEntry, LedgerResult, NewLedgerEntry,
    Page, UserId, Wallet, WalletId,
};
use crate::payments::PaymentIntent;

/// Transaction handle
#[async_trait]
pub trait LedgerTx: Send {
    /// Make sure `user_id` has a wallet, creating an empty one if needed
    async fn ensure_wallet(
        &mut self,
        user_id: UserId,
        currency: &str,
        now: DateTime<Utc>,
    ) -> LedgerResult<WalletId>;

    /// Lock a wallet row for the rest of the transaction
    async fn lock_wallet(&mut self, wallet_id: WalletId) -> LedgerResult<Wallet>;

    /// Overwrite the balance of a locked wallet
    async fn update_balance(
        &mut self,
        wallet_id: WalletId,
        balance: i64,
        now: DateTime<Utc>,
    ) -> LedgerResult<()>;

    /// Append a ledger entry
    async fn insert_entry(&mut self, entry: NewLedgerEntry) -> LedgerResult<LedgerEntry>;

    /// Insert an intent unless one with the same idempotency key exists.
    /// Returns the persisted row, locked.
    async fn insert_intent_if_absent(
        &mut self,
        intent: &PaymentIntent,
    ) -> LedgerResult<PaymentIntent>;

    /// Lock an intent by public id
    async fn lock_intent(&mut self, id: Uuid) -> LedgerResult<Option<PaymentIntent>>;

    /// Lock an intent by idempotency key
    async fn lock_intent_by_key(&mut self, key: &str) -> LedgerResult<Option<PaymentIntent>>;

    /// Lock an intent by provider order id
    async fn lock_intent_by_order(
        &mut self,
        order_id: &str,
    ) -> LedgerResult<Option<PaymentIntent>>;

    /// Persist every mutable field of a locked intent
    async fn update_intent(&mut self, intent: &PaymentIntent) -> LedgerResult<()>;

    /// Commit all writes and release locks
    async fn commit(self) -> LedgerResult<()>;
}

/// Backing store
#[async_trait]
pub trait LedgerStore: Send + Sync + 'static {
    type Tx: LedgerTx + 'static;

    /// Open a transaction
    async fn begin(&self) -> LedgerResult<Self::Tx>;

    /// Check the backend is reachable
    async fn health_check(&self) -> LedgerResult<()>;

    async fn find_wallet(&self, user_id: UserId) -> LedgerResult<Option<Wallet>>;

    /// Entries of one wallet, newest first
    async fn list_entries(
        &self,
        wallet_id: WalletId,
        query: &HistoryQuery,
    ) -> LedgerResult<Page<LedgerEntry>>;

    /// Full entry chain of one wallet in application order
    async fn entry_chain(&self, wallet_id: WalletId) -> LedgerResult<Vec<LedgerEntry>>;

    /// `gift_received` totals for one wallet within optional bounds
    async fn earnings(
        &self,
        wallet_id: WalletId,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> LedgerResult<Earnings>;

    async fn find_intent(&self, id: Uuid) -> LedgerResult<Option<PaymentIntent>>;

    /// Intents of one user, newest first
    async fn list_intents(
        &self,
        user_id: UserId,
        limit: i64,
        offset: i64,
    ) -> LedgerResult<Vec<PaymentIntent>>;
}

/// Fold `gift_received` entries into an earnings summary
pub(crate) fn summarize_earnings<'a>(
    entries: impl IntoIterator<Item = &'a LedgerEntry>,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
) -> Earnings {
    let mut by_gift: BTreeMap<String, GiftEarnings> = BTreeMap::new();
    let mut earnings = Earnings::default();

    let in_range = |at: DateTime<Utc>| from.is_none_or(|f| at >= f) && to.is_none_or(|t| at <= t);

    for entry in entries
        .into_iter()
        .filter(|e| e.entry_type == EntryType::GiftReceived && in_range(e.created_at))
    {
        earnings.total_credits += entry.amount;
        earnings.gift_count += 1;

        let gift_id = entry
            .metadata
            .get("gift_id")
            .and_then(|v| v.as_str())
            .unwrap_or("transfer")
            .to_string();
        let gift_name = entry
            .metadata
            .get("gift_name")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        let slot = by_gift
            .entry(gift_id.clone())
            .or_insert_with(|| GiftEarnings {
                gift_id,
                gift_name,
                credits: 0,
                count: 0,
            });
        slot.credits += entry.amount;
        slot.count += 1;
    }

    earnings.by_gift = by_gift.into_values().collect();
    earnings
}
