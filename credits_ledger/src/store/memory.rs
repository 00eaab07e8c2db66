//! In-process ledger store.
//!
//! One async mutex guards the whole state, so transactions are fully
//! serialized. Writes are staged inside the transaction and only applied to
//! the shared state on commit.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{LedgerStore, LedgerTx, summarize_earnings};
use crate::ledger::{
    Earnings, EntryId, HistoryQuery, LedgerEntry, LedgerError, LedgerResult, NewLedgerEntry, Page,
    UserId, Wallet, WalletId,
};
use crate::payments::PaymentIntent;

#[derive(Debug, Default)]
struct MemoryState {
    wallets: BTreeMap<WalletId, Wallet>,
    wallet_by_user: HashMap<UserId, WalletId>,
    entries: Vec<LedgerEntry>,
    intents: HashMap<Uuid, PaymentIntent>,
    next_wallet_id: WalletId,
    next_entry_id: EntryId,
}

impl MemoryState {
    fn intent_where(&self, pred: impl Fn(&PaymentIntent) -> bool) -> Option<&PaymentIntent> {
        self.intents.values().find(|intent| pred(*intent))
    }
}

/// In-memory [`LedgerStore`]
#[derive(Clone, Default)]
pub struct MemoryLedgerStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of persisted ledger entries across all wallets
    pub async fn entry_count(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    /// Number of persisted payment intents
    pub async fn intent_count(&self) -> usize {
        self.state.lock().await.intents.len()
    }
}

/// Transaction over a [`MemoryLedgerStore`]
pub struct MemoryLedgerTx {
    state: OwnedMutexGuard<MemoryState>,
    wallets: HashMap<WalletId, Wallet>,
    intents: HashMap<Uuid, PaymentIntent>,
    entries: Vec<LedgerEntry>,
    next_wallet_id: WalletId,
    next_entry_id: EntryId,
}

impl MemoryLedgerTx {
    fn wallet(&self, wallet_id: WalletId) -> LedgerResult<Wallet> {
        self.wallets
            .get(&wallet_id)
            .or_else(|| self.state.wallets.get(&wallet_id))
            .cloned()
            .ok_or_else(|| LedgerError::Integrity(format!("wallet {wallet_id} does not exist")))
    }

    fn intent_where(&self, pred: impl Fn(&PaymentIntent) -> bool) -> Option<PaymentIntent> {
        self.intents
            .values()
            .find(|intent| pred(*intent))
            .or_else(|| {
                self.state
                    .intent_where(|intent| !self.intents.contains_key(&intent.id) && pred(intent))
            })
            .cloned()
    }
}

#[async_trait]
impl LedgerTx for MemoryLedgerTx {
    async fn ensure_wallet(
        &mut self,
        user_id: UserId,
        currency: &str,
        now: DateTime<Utc>,
    ) -> LedgerResult<WalletId> {
        if let Some(id) = self.state.wallet_by_user.get(&user_id) {
            return Ok(*id);
        }
        if let Some(wallet) = self.wallets.values().find(|w| w.user_id == user_id) {
            return Ok(wallet.id);
        }

        self.next_wallet_id += 1;
        let wallet = Wallet {
            id: self.next_wallet_id,
            user_id,
            balance: 0,
            currency: currency.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.wallets.insert(wallet.id, wallet);
        Ok(self.next_wallet_id)
    }

    async fn lock_wallet(&mut self, wallet_id: WalletId) -> LedgerResult<Wallet> {
        self.wallet(wallet_id)
    }

    async fn update_balance(
        &mut self,
        wallet_id: WalletId,
        balance: i64,
        now: DateTime<Utc>,
    ) -> LedgerResult<()> {
        if balance < 0 {
            return Err(LedgerError::Integrity(format!(
                "wallet {wallet_id} balance would become {balance}"
            )));
        }
        let mut wallet = self.wallet(wallet_id)?;
        wallet.balance = balance;
        wallet.updated_at = now;
        self.wallets.insert(wallet_id, wallet);
        Ok(())
    }

    async fn insert_entry(&mut self, entry: NewLedgerEntry) -> LedgerResult<LedgerEntry> {
        if entry.amount == 0 || entry.balance_after < 0 {
            return Err(LedgerError::Integrity(format!(
                "rejected entry amount {} balance_after {}",
                entry.amount, entry.balance_after
            )));
        }
        self.wallet(entry.wallet_id)?;

        self.next_entry_id += 1;
        let entry = LedgerEntry {
            id: self.next_entry_id,
            wallet_id: entry.wallet_id,
            entry_type: entry.entry_type,
            amount: entry.amount,
            balance_after: entry.balance_after,
            reference: entry.reference,
            description: entry.description,
            metadata: entry.metadata,
            created_at: entry.created_at,
        };
        self.entries.push(entry.clone());
        Ok(entry)
    }

    async fn insert_intent_if_absent(
        &mut self,
        intent: &PaymentIntent,
    ) -> LedgerResult<PaymentIntent> {
        if let Some(existing) = self.intent_where(|i| i.idempotency_key == intent.idempotency_key) {
            return Ok(existing);
        }
        self.intents.insert(intent.id, intent.clone());
        Ok(intent.clone())
    }

    async fn lock_intent(&mut self, id: Uuid) -> LedgerResult<Option<PaymentIntent>> {
        Ok(self.intent_where(|i| i.id == id))
    }

    async fn lock_intent_by_key(&mut self, key: &str) -> LedgerResult<Option<PaymentIntent>> {
        Ok(self.intent_where(|i| i.idempotency_key == key))
    }

    async fn lock_intent_by_order(
        &mut self,
        order_id: &str,
    ) -> LedgerResult<Option<PaymentIntent>> {
        Ok(self.intent_where(|i| i.provider_order_id.as_deref() == Some(order_id)))
    }

    async fn update_intent(&mut self, intent: &PaymentIntent) -> LedgerResult<()> {
        if self.intent_where(|i| i.id == intent.id).is_none() {
            return Err(LedgerError::Integrity(format!(
                "payment intent {} does not exist",
                intent.id
            )));
        }
        if let Some(order_id) = intent.provider_order_id.as_deref() {
            let clash = self.intent_where(|i| {
                i.id != intent.id && i.provider_order_id.as_deref() == Some(order_id)
            });
            if clash.is_some() {
                return Err(LedgerError::Integrity(format!(
                    "provider order {order_id} already linked to another intent"
                )));
            }
        }
        self.intents.insert(intent.id, intent.clone());
        Ok(())
    }

    async fn commit(mut self) -> LedgerResult<()> {
        let state = &mut *self.state;
        for (id, wallet) in self.wallets.drain() {
            state.wallet_by_user.insert(wallet.user_id, id);
            state.wallets.insert(id, wallet);
        }
        state.intents.extend(self.intents.drain());
        state.entries.append(&mut self.entries);
        state.next_wallet_id = self.next_wallet_id;
        state.next_entry_id = self.next_entry_id;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    type Tx = MemoryLedgerTx;

    async fn begin(&self) -> LedgerResult<Self::Tx> {
        let state = self.state.clone().lock_owned().await;
        Ok(MemoryLedgerTx {
            next_wallet_id: state.next_wallet_id,
            next_entry_id: state.next_entry_id,
            state,
            wallets: HashMap::new(),
            intents: HashMap::new(),
            entries: Vec::new(),
        })
    }

    async fn health_check(&self) -> LedgerResult<()> {
        Ok(())
    }

    async fn find_wallet(&self, user_id: UserId) -> LedgerResult<Option<Wallet>> {
        let state = self.state.lock().await;
        Ok(state
            .wallet_by_user
            .get(&user_id)
            .and_then(|id| state.wallets.get(id))
            .cloned())
    }

    async fn list_entries(
        &self,
        wallet_id: WalletId,
        query: &HistoryQuery,
    ) -> LedgerResult<Page<LedgerEntry>> {
        let state = self.state.lock().await;
        let (page, per_page) = query.normalized();

        let matching: Vec<&LedgerEntry> = state
            .entries
            .iter()
            .rev()
            .filter(|e| e.wallet_id == wallet_id)
            .filter(|e| query.entry_type.is_none_or(|t| e.entry_type == t))
            .collect();

        let items = matching
            .iter()
            .skip(usize::try_from(query.offset()).unwrap_or(usize::MAX))
            .take(per_page as usize)
            .map(|e| (*e).clone())
            .collect();

        Ok(Page {
            items,
            total: matching.len() as i64,
            page,
            per_page,
        })
    }

    async fn entry_chain(&self, wallet_id: WalletId) -> LedgerResult<Vec<LedgerEntry>> {
        let state = self.state.lock().await;
        Ok(state
            .entries
            .iter()
            .filter(|e| e.wallet_id == wallet_id)
            .cloned()
            .collect())
    }

    async fn earnings(
        &self,
        wallet_id: WalletId,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> LedgerResult<Earnings> {
        let state = self.state.lock().await;
        Ok(summarize_earnings(
            state.entries.iter().filter(|e| e.wallet_id == wallet_id),
            from,
            to,
        ))
    }

    async fn find_intent(&self, id: Uuid) -> LedgerResult<Option<PaymentIntent>> {
        Ok(self.state.lock().await.intents.get(&id).cloned())
    }

    async fn list_intents(
        &self,
        user_id: UserId,
        limit: i64,
        offset: i64,
    ) -> LedgerResult<Vec<PaymentIntent>> {
        let state = self.state.lock().await;
        let mut intents: Vec<PaymentIntent> = state
            .intents
            .values()
            .filter(|i| i.user_id == user_id)
            .cloned()
            .collect();
        intents.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        Ok(intents
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(0))
            .take(usize::try_from(limit).unwrap_or(0))
            .collect())
    }
}
