//! Credits ledger: per-user wallets backed by an append-only entry log.
//!
//! Every balance change writes exactly one [`LedgerEntry`] in the same
//! transaction that updates the wallet, so a wallet's balance always equals
//! the sum of its entries. Two-wallet movements (transfers, gifts) lock both
//! wallets in ascending id order.
//!
//! ## Example
//!
//! ```no_run
//! use credits_ledger::ledger::{EntryType, LedgerService};
//! use credits_ledger::store::MemoryLedgerStore;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let ledger = LedgerService::with_defaults(MemoryLedgerStore::new());
//!
//!     ledger.credit(1, 100, EntryType::Deposit, None, None, None).await?;
//!     let receipt = ledger.send_gift(1, 2, "heart", Some(2), None).await?;
//!     println!("Gift cost {} credits", receipt.cost);
//!
//!     Ok(())
//! }
//! ```

pub mod errors;
pub mod models;
pub mod service;

pub use errors::{LedgerError, LedgerResult};
pub use models::{
    AuditReport, ContextRef, DEFAULT_CURRENCY, Earnings, EntryId, EntryType, GiftEarnings,
    GiftInfo, GiftReceipt, HistoryQuery, LedgerEntry, Metadata, NewLedgerEntry, Page, Reference,
    TransferReceipt, UserId, Wallet, WalletId,
};
pub use service::{LedgerService, Posting};
