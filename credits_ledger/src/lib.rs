//! # Credits Ledger
//!
//! The money core of a social platform backend: per-user credit wallets backed
//! by an append-only ledger, plus reconciliation of credit purchases made
//! through an external payment provider.
//!
//! ## Invariants
//!
//! - A wallet's balance is never negative
//! - A wallet's balance equals the sum of its ledger entries
//! - Ledger entries are never modified or deleted
//! - A provider webhook is applied to its payment intent at most once
//!
//! ## Core Modules
//!
//! - [`ledger`]: wallets, entries, and credit/debit/transfer/gift operations
//! - [`payments`]: payment intents, purchase initiation, webhooks, refunds
//! - [`store`]: transactional storage seam with PostgreSQL and in-memory backends
//! - [`catalog`]: static gift and credit-package catalogs
//! - [`events`]: post-commit domain events
//! - [`db`]: PostgreSQL pool and migrations
//!
//! ## Example
//!
//! ```
//! use credits_ledger::{EntryType, LedgerService, MemoryLedgerStore};
//!
//! let runtime = tokio::runtime::Runtime::new().unwrap();
//! runtime.block_on(async {
//!     let ledger = LedgerService::with_defaults(MemoryLedgerStore::new());
//!     let entry = ledger
//!         .credit(1, 100, EntryType::Deposit, None, None, None)
//!         .await
//!         .unwrap();
//!     assert_eq!(entry.balance_after, 100);
//! });
//! ```

/// Gift and credit-package catalogs.
pub mod catalog;
pub use catalog::{
    CatalogError, GiftCatalog, PackageCatalog, StaticGiftCatalog, StaticPackageCatalog,
};

/// Time source.
pub mod clock;
pub use clock::{Clock, FixedClock, SystemClock};

/// Database connection pool and migrations.
pub mod db;
pub use db::{Database, DatabaseConfig};

/// Post-commit domain events.
pub mod events;
pub use events::{EventBus, LedgerEvent};

/// Wallets and the append-only ledger.
pub mod ledger;
pub use ledger::{
    EntryType, LedgerEntry, LedgerError, LedgerResult, LedgerService, Reference, UserId, Wallet,
};

/// Payment intents and the provider reconciliation flow.
pub mod payments;
pub use payments::{
    IntentStatus, PaymentError, PaymentIntent, PaymentProvider, PaymentResult, PurchaseService,
    PurchaseSettings, ReconciliationService, RefundService, WebhookOutcome,
};

/// Storage backends.
pub mod store;
pub use store::{LedgerStore, LedgerTx, MemoryLedgerStore, PgLedgerStore};
