//! Shared fixtures for integration tests: a recording fake payment provider
//! and a fully wired service stack over the in-memory store.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use credits_ledger::catalog::{StaticGiftCatalog, StaticPackageCatalog};
use credits_ledger::clock::FixedClock;
use credits_ledger::events::EventBus;
use credits_ledger::ledger::{DEFAULT_CURRENCY, LedgerService};
use credits_ledger::payments::{
    Buyer, CreatedOrder, OrderRequest, PaymentProvider, PaymentSession, ProviderError,
    ProviderResult, PurchaseService, PurchaseSettings, ReconciliationService, RefundReceipt,
    RefundService,
};
use credits_ledger::store::MemoryLedgerStore;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Refund call as seen by the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundCall {
    pub order_id: String,
    pub transaction_id: Option<String>,
    pub amount_minor: i64,
}

/// In-process payment provider that records every call
#[derive(Default)]
pub struct FakeProvider {
    next_order: AtomicUsize,
    pub orders: Mutex<Vec<OrderRequest>>,
    pub refunds: Mutex<Vec<RefundCall>>,
    pub fail_orders: AtomicBool,
    pub fail_refunds: AtomicBool,
    /// Delay before answering create_order
    pub order_delay: Mutex<Option<Duration>>,
    /// Delay before answering issue_refund; the refund itself is recorded first
    pub refund_delay: Mutex<Option<Duration>>,
}

impl FakeProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn order_count(&self) -> usize {
        self.orders.lock().unwrap().len()
    }

    pub fn refund_calls(&self) -> Vec<RefundCall> {
        self.refunds.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentProvider for FakeProvider {
    fn name(&self) -> &str {
        "fake"
    }

    async fn create_order(&self, request: &OrderRequest) -> ProviderResult<CreatedOrder> {
        let delay = *self.order_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_orders.load(Ordering::SeqCst) {
            return Err(ProviderError::Rejected {
                code: "503".to_string(),
                message: "maintenance".to_string(),
            });
        }
        self.orders.lock().unwrap().push(request.clone());
        let n = self.next_order.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(CreatedOrder {
            order_id: format!("ord_{n}"),
        })
    }

    async fn create_payment_session(
        &self,
        order_id: &str,
        language: &str,
    ) -> ProviderResult<PaymentSession> {
        Ok(PaymentSession {
            session_url: format!("https://pay.example/{language}/{order_id}"),
        })
    }

    async fn issue_refund(
        &self,
        order_id: &str,
        transaction_id: Option<&str>,
        amount_minor: i64,
    ) -> ProviderResult<RefundReceipt> {
        self.refunds.lock().unwrap().push(RefundCall {
            order_id: order_id.to_string(),
            transaction_id: transaction_id.map(str::to_string),
            amount_minor,
        });
        let delay = *self.refund_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_refunds.load(Ordering::SeqCst) {
            return Err(ProviderError::Rejected {
                code: "R01".to_string(),
                message: "refund window closed".to_string(),
            });
        }
        Ok(RefundReceipt {
            refund_id: format!("ref_{order_id}"),
            status: "accepted".to_string(),
        })
    }
}

/// Services wired over one shared in-memory store
pub struct Harness {
    pub clock: Arc<FixedClock>,
    pub provider: Arc<FakeProvider>,
    pub ledger: LedgerService<MemoryLedgerStore>,
    pub purchases: PurchaseService<MemoryLedgerStore>,
    pub reconciliation: ReconciliationService<MemoryLedgerStore>,
    pub refunds: RefundService<MemoryLedgerStore>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(PurchaseSettings::default())
    }

    pub fn with_settings(settings: PurchaseSettings) -> Self {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap(),
        ));
        let provider = FakeProvider::new();
        let ledger = LedgerService::new(
            Arc::new(MemoryLedgerStore::new()),
            clock.clone(),
            Arc::new(StaticGiftCatalog::defaults()),
            DEFAULT_CURRENCY,
            EventBus::default(),
        );
        let timeout = settings.provider_timeout;
        let purchases = PurchaseService::new(
            ledger.clone(),
            provider.clone(),
            Arc::new(StaticPackageCatalog::defaults("EUR")),
            settings,
        );
        let reconciliation = ReconciliationService::new(ledger.clone(), provider.clone());
        let refunds = RefundService::new(ledger.clone(), provider.clone()).with_timeout(timeout);

        Self {
            clock,
            provider,
            ledger,
            purchases,
            reconciliation,
            refunds,
        }
    }

    pub async fn balance(&self, user_id: i64) -> i64 {
        self.ledger.wallet(user_id).await.unwrap().balance
    }
}

pub fn buyer(user_id: i64) -> Buyer {
    Buyer {
        user_id,
        email: Some(format!("user{user_id}@example.com")),
    }
}

/// Webhook body in the provider's wire format
pub fn webhook(order_id: &str, status: &str, amount_cents: Option<i64>) -> Vec<u8> {
    let mut body = serde_json::json!({
        "orderIdentification": order_id,
        "transactionId": format!("tx_{order_id}"),
        "status": status,
    });
    if status != "success" {
        body["responseCode"] = serde_json::json!("05");
    }
    if let Some(amount) = amount_cents {
        body["amountCents"] = serde_json::json!(amount);
    }
    serde_json::to_vec(&body).unwrap()
}
