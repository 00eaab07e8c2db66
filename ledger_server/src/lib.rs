//! HTTP server for the credits ledger.
//!
//! Exposes wallets, gifts, credit purchases and provider webhooks over a
//! versioned REST API. All money movement lives in `credits_ledger`; this
//! crate adds transport, authentication, configuration and observability.

pub mod api;
pub mod config;
pub mod logging;
pub mod metrics;
pub mod provider;
