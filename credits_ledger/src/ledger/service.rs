//! Ledger operations: credit, debit, transfer, gift, and the query surface.

use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;

use super::{
    errors::{LedgerError, LedgerResult},
    models::{
        AuditReport, ContextRef, DEFAULT_CURRENCY, Earnings, EntryType, GiftReceipt,
        HistoryQuery, LedgerEntry, Metadata, NewLedgerEntry, Page, Reference, TransferReceipt,
        UserId, Wallet,
    },
};
use crate::catalog::{GiftCatalog, StaticGiftCatalog};
use crate::clock::{Clock, SystemClock};
use crate::events::{EventBus, LedgerEvent};
use crate::store::{LedgerStore, LedgerTx};

/// How an entry is labelled: type, reference, description and metadata
#[derive(Debug, Clone, PartialEq)]
pub struct Posting {
    pub entry_type: EntryType,
    pub reference: Option<Reference>,
    pub description: Option<String>,
    pub metadata: Metadata,
}

impl Posting {
    pub fn new(entry_type: EntryType) -> Self {
        Self {
            entry_type,
            reference: None,
            description: None,
            metadata: Metadata::new(),
        }
    }

    pub fn reference(mut self, reference: Reference) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Ledger service
pub struct LedgerService<S: LedgerStore> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    gifts: Arc<dyn GiftCatalog>,
    currency: String,
    events: EventBus,
}

impl<S: LedgerStore> Clone for LedgerService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            gifts: Arc::clone(&self.gifts),
            currency: self.currency.clone(),
            events: self.events.clone(),
        }
    }
}

impl<S: LedgerStore> LedgerService<S> {
    /// Create a new ledger service
    ///
    /// # Arguments
    ///
    /// * `store` - Backing store
    /// * `clock` - Time source for entry and wallet timestamps
    /// * `gifts` - Gift catalog used by [`LedgerService::send_gift`]
    /// * `currency` - Currency code assigned to new wallets
    /// * `events` - Bus that receives post-commit domain events
    pub fn new(
        store: Arc<S>,
        clock: Arc<dyn Clock>,
        gifts: Arc<dyn GiftCatalog>,
        currency: impl Into<String>,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            clock,
            gifts,
            currency: currency.into(),
            events,
        }
    }

    /// System clock, built-in gifts, default currency
    pub fn with_defaults(store: S) -> Self {
        Self::new(
            Arc::new(store),
            Arc::new(SystemClock),
            Arc::new(StaticGiftCatalog::defaults()),
            DEFAULT_CURRENCY,
            EventBus::default(),
        )
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn gift_catalog(&self) -> &Arc<dyn GiftCatalog> {
        &self.gifts
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    /// Add credits to a user's wallet
    ///
    /// # Errors
    ///
    /// * `LedgerError::InvalidAmount` - `amount` is not positive
    /// * `LedgerError::BalanceOverflow` - Balance would exceed `i64::MAX`
    pub async fn credit(
        &self,
        user_id: UserId,
        amount: i64,
        entry_type: EntryType,
        reference: Option<Reference>,
        description: Option<String>,
        metadata: Option<Metadata>,
    ) -> LedgerResult<LedgerEntry> {
        let posting = build_posting(entry_type, reference, description, metadata);
        let mut tx = self.store.begin().await?;
        let entry = self.credit_in(&mut tx, user_id, amount, posting).await?;
        tx.commit().await?;

        log::debug!(
            "Credited {} to user {} ({}), balance {}",
            amount,
            user_id,
            entry.entry_type,
            entry.balance_after
        );
        Ok(entry)
    }

    /// Remove credits from a user's wallet
    ///
    /// # Errors
    ///
    /// * `LedgerError::InvalidAmount` - `amount` is not positive
    /// * `LedgerError::InsufficientBalance` - Balance lower than `amount`; nothing is written
    pub async fn debit(
        &self,
        user_id: UserId,
        amount: i64,
        entry_type: EntryType,
        reference: Option<Reference>,
        description: Option<String>,
        metadata: Option<Metadata>,
    ) -> LedgerResult<LedgerEntry> {
        let posting = build_posting(entry_type, reference, description, metadata);
        let mut tx = self.store.begin().await?;
        let entry = self.debit_in(&mut tx, user_id, amount, posting).await?;
        tx.commit().await?;

        log::debug!(
            "Debited {} from user {} ({}), balance {}",
            amount,
            user_id,
            entry.entry_type,
            entry.balance_after
        );
        Ok(entry)
    }

    /// Credit inside a caller-owned transaction
    pub async fn credit_in(
        &self,
        tx: &mut S::Tx,
        user_id: UserId,
        amount: i64,
        posting: Posting,
    ) -> LedgerResult<LedgerEntry> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }
        let now = self.clock.now();
        let wallet_id = tx.ensure_wallet(user_id, &self.currency, now).await?;
        let wallet = tx.lock_wallet(wallet_id).await?;
        append(tx, &wallet, amount, posting, now).await
    }

    /// Debit inside a caller-owned transaction
    pub async fn debit_in(
        &self,
        tx: &mut S::Tx,
        user_id: UserId,
        amount: i64,
        posting: Posting,
    ) -> LedgerResult<LedgerEntry> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }
        let now = self.clock.now();
        let wallet_id = tx.ensure_wallet(user_id, &self.currency, now).await?;
        let wallet = tx.lock_wallet(wallet_id).await?;
        append(tx, &wallet, -amount, posting, now).await
    }

    /// Move credits between two users
    ///
    /// The sender leg is a `gift_sent` entry referencing the recipient, the
    /// recipient leg a `gift_received` entry referencing the sender.
    ///
    /// # Errors
    ///
    /// * `LedgerError::InvalidAmount` - `amount` is not positive
    /// * `LedgerError::SelfTransfer` - Sender and recipient are the same user
    /// * `LedgerError::InsufficientBalance` - Sender cannot cover `amount`
    pub async fn transfer(
        &self,
        sender_id: UserId,
        recipient_id: UserId,
        amount: i64,
        description: Option<String>,
    ) -> LedgerResult<TransferReceipt> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }
        if sender_id == recipient_id {
            return Err(LedgerError::SelfTransfer);
        }

        let mut sender_posting =
            Posting::new(EntryType::GiftSent).reference(Reference::User(recipient_id));
        let mut recipient_posting =
            Posting::new(EntryType::GiftReceived).reference(Reference::User(sender_id));
        if let Some(description) = description {
            sender_posting = sender_posting.description(description.clone());
            recipient_posting = recipient_posting.description(description);
        }

        let (sender_entry, recipient_entry) = self
            .move_credits(
                sender_id,
                recipient_id,
                amount,
                sender_posting,
                recipient_posting,
            )
            .await?;

        log::info!(
            "Transferred {} credits from user {} to user {}",
            amount,
            sender_id,
            recipient_id
        );

        Ok(TransferReceipt {
            sender_entry,
            recipient_entry,
        })
    }

    /// Send `quantity` (default 1) of a catalog gift
    ///
    /// # Errors
    ///
    /// * `LedgerError::UnknownGift` - `gift_id` is not in the catalog
    /// * `LedgerError::SelfGift` - Sender and recipient are the same user
    /// * `LedgerError::InvalidAmount` - `quantity` is below 1
    /// * `LedgerError::InsufficientBalance` - Sender cannot cover the cost
    pub async fn send_gift(
        &self,
        sender_id: UserId,
        recipient_id: UserId,
        gift_id: &str,
        quantity: Option<i64>,
        context: Option<ContextRef>,
    ) -> LedgerResult<GiftReceipt> {
        let gift = self
            .gifts
            .gift(gift_id)
            .ok_or_else(|| LedgerError::UnknownGift(gift_id.to_string()))?;
        if sender_id == recipient_id {
            return Err(LedgerError::SelfGift);
        }
        let quantity = quantity.unwrap_or(1);
        if quantity < 1 {
            return Err(LedgerError::InvalidAmount(quantity));
        }
        let cost = gift
            .credits
            .checked_mul(quantity)
            .ok_or(LedgerError::BalanceOverflow)?;

        let mut metadata = Metadata::new();
        metadata.insert("gift_id".to_string(), json!(gift.id));
        metadata.insert("gift_name".to_string(), json!(gift.name));
        metadata.insert("quantity".to_string(), json!(quantity));
        metadata.insert("unit_credits".to_string(), json!(gift.credits));
        metadata.insert("cost".to_string(), json!(cost));
        if let Some(context) = &context {
            metadata.insert(
                "context".to_string(),
                json!({ "kind": context.kind, "id": context.id }),
            );
        }

        let sender_posting = Posting::new(EntryType::GiftSent)
            .reference(Reference::User(recipient_id))
            .description(format!("Sent {}x {}", quantity, gift.name))
            .metadata(metadata.clone());
        let recipient_posting = Posting::new(EntryType::GiftReceived)
            .reference(Reference::User(sender_id))
            .description(format!("Received {}x {}", quantity, gift.name))
            .metadata(metadata);

        let (sender_entry, recipient_entry) = self
            .move_credits(
                sender_id,
                recipient_id,
                cost,
                sender_posting,
                recipient_posting,
            )
            .await?;

        log::info!(
            "User {} sent {}x {} ({} credits) to user {}",
            sender_id,
            quantity,
            gift.id,
            cost,
            recipient_id
        );
        self.events.publish(LedgerEvent::GiftSent {
            sender_id,
            recipient_id,
            gift_id: gift.id.clone(),
            quantity,
            cost,
            context,
        });

        Ok(GiftReceipt {
            sender_entry,
            recipient_entry,
            gift,
            quantity,
            cost,
        })
    }

    /// Get a user's wallet, creating an empty one on first access
    pub async fn wallet(&self, user_id: UserId) -> LedgerResult<Wallet> {
        if let Some(wallet) = self.store.find_wallet(user_id).await? {
            return Ok(wallet);
        }

        let mut tx = self.store.begin().await?;
        let wallet_id = tx
            .ensure_wallet(user_id, &self.currency, self.clock.now())
            .await?;
        let wallet = tx.lock_wallet(wallet_id).await?;
        tx.commit().await?;

        log::debug!("Created wallet {} for user {}", wallet.id, user_id);
        Ok(wallet)
    }

    /// Paginated entries of a user's wallet, newest first
    pub async fn history(
        &self,
        user_id: UserId,
        query: &HistoryQuery,
    ) -> LedgerResult<Page<LedgerEntry>> {
        match self.store.find_wallet(user_id).await? {
            Some(wallet) => self.store.list_entries(wallet.id, query).await,
            None => {
                let (page, per_page) = query.normalized();
                Ok(Page {
                    items: Vec::new(),
                    total: 0,
                    page,
                    per_page,
                })
            }
        }
    }

    /// Sum and breakdown of `gift_received` entries within optional bounds
    pub async fn creator_earnings(
        &self,
        user_id: UserId,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> LedgerResult<Earnings> {
        match self.store.find_wallet(user_id).await? {
            Some(wallet) => self.store.earnings(wallet.id, from, to).await,
            None => Ok(Earnings::default()),
        }
    }

    /// Replay a wallet's entry chain against its balance
    pub async fn audit(&self, user_id: UserId) -> LedgerResult<AuditReport> {
        let wallet = self.wallet(user_id).await?;
        let entries = self.store.entry_chain(wallet.id).await?;
        let report = replay(&wallet, &entries)?;

        if !report.is_consistent() {
            log::error!(
                "Wallet {} failed audit: balance {}, ledger sum {}, first mismatch {:?}",
                wallet.id,
                report.balance,
                report.ledger_sum,
                report.first_mismatch
            );
        }
        Ok(report)
    }

    async fn move_credits(
        &self,
        sender_id: UserId,
        recipient_id: UserId,
        amount: i64,
        sender_posting: Posting,
        recipient_posting: Posting,
    ) -> LedgerResult<(LedgerEntry, LedgerEntry)> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;

        // Create missing wallets in ascending user order; a pending insert holds
        // the unique-index entry until its transaction ends
        let (sender_wallet_id, recipient_wallet_id) = if sender_id < recipient_id {
            let sender = tx.ensure_wallet(sender_id, &self.currency, now).await?;
            let recipient = tx.ensure_wallet(recipient_id, &self.currency, now).await?;
            (sender, recipient)
        } else {
            let recipient = tx.ensure_wallet(recipient_id, &self.currency, now).await?;
            let sender = tx.ensure_wallet(sender_id, &self.currency, now).await?;
            (sender, recipient)
        };

        // Lock in ascending id order so opposing transfers cannot deadlock
        let (sender_wallet, recipient_wallet) = if sender_wallet_id < recipient_wallet_id {
            let sender = tx.lock_wallet(sender_wallet_id).await?;
            let recipient = tx.lock_wallet(recipient_wallet_id).await?;
            (sender, recipient)
        } else {
            let recipient = tx.lock_wallet(recipient_wallet_id).await?;
            let sender = tx.lock_wallet(sender_wallet_id).await?;
            (sender, recipient)
        };

        if recipient_wallet.balance.checked_add(amount).is_none() {
            return Err(LedgerError::BalanceOverflow);
        }

        let sender_entry = append(&mut tx, &sender_wallet, -amount, sender_posting, now).await?;
        let recipient_entry =
            append(&mut tx, &recipient_wallet, amount, recipient_posting, now).await?;
        tx.commit().await?;

        Ok((sender_entry, recipient_entry))
    }
}

fn build_posting(
    entry_type: EntryType,
    reference: Option<Reference>,
    description: Option<String>,
    metadata: Option<Metadata>,
) -> Posting {
    Posting {
        entry_type,
        reference,
        description,
        metadata: metadata.unwrap_or_default(),
    }
}

/// Apply a signed amount to a locked wallet and record the entry
async fn append<T: LedgerTx>(
    tx: &mut T,
    wallet: &Wallet,
    amount: i64,
    posting: Posting,
    now: DateTime<Utc>,
) -> LedgerResult<LedgerEntry> {
    let balance_after = wallet
        .balance
        .checked_add(amount)
        .ok_or(LedgerError::BalanceOverflow)?;
    if balance_after < 0 {
        return Err(LedgerError::InsufficientBalance {
            available: wallet.balance,
            required: -amount,
        });
    }

    tx.update_balance(wallet.id, balance_after, now).await?;
    tx.insert_entry(NewLedgerEntry {
        wallet_id: wallet.id,
        entry_type: posting.entry_type,
        amount,
        balance_after,
        reference: posting.reference,
        description: posting.description,
        metadata: posting.metadata,
        created_at: now,
    })
    .await
}

fn replay(wallet: &Wallet, entries: &[LedgerEntry]) -> LedgerResult<AuditReport> {
    let mut running: i64 = 0;
    let mut first_mismatch = None;

    for entry in entries {
        running = running.checked_add(entry.amount).ok_or_else(|| {
            LedgerError::Integrity(format!("entry chain of wallet {} overflows", wallet.id))
        })?;
        if first_mismatch.is_none() && entry.balance_after != running {
            first_mismatch = Some(entry.id);
        }
    }

    Ok(AuditReport {
        wallet_id: wallet.id,
        balance: wallet.balance,
        ledger_sum: running,
        entry_count: entries.len(),
        first_mismatch,
    })
}
