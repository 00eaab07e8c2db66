//! HTTP API for the credits ledger.
//!
//! # Modules
//!
//! - [`catalog`]: Gift and credit-package catalogs (public)
//! - [`wallet`]: Balance, history, earnings, transfers
//! - [`gifts`]: Sending catalog gifts
//! - [`purchases`]: Credit purchases, cancellation and refunds
//! - [`webhooks`]: Payment provider notifications (public, signed)
//! - [`middleware`]: Bearer token verification for protected endpoints
//!
//! # Endpoints
//!
//! ```text
//! GET  /health                          - Health check (public)
//! GET  /api/v1/packages                 - Package catalog (public)
//! GET  /api/v1/gifts                    - Gift catalog (public)
//! POST /api/v1/webhooks/payments        - Provider webhook (public, signed)
//! POST /api/v1/purchases                - Start a purchase
//! GET  /api/v1/purchases                - Purchase history
//! GET  /api/v1/purchases/{id}           - Purchase status
//! POST /api/v1/purchases/{id}/cancel    - Cancel a pending purchase
//! POST /api/v1/purchases/{id}/refund    - Refund a completed purchase
//! GET  /api/v1/wallet                   - Wallet
//! GET  /api/v1/wallet/transactions      - Ledger history
//! GET  /api/v1/wallet/earnings          - Creator earnings
//! POST /api/v1/wallet/transfer          - Transfer credits
//! POST /api/v1/gifts/send               - Send a gift
//! ```
//!
//! The router is generic over the [`LedgerStore`] so tests can serve it from
//! the in-memory store.

pub mod catalog;
pub mod error;
pub mod gifts;
pub mod middleware;
pub mod purchases;
pub mod request_id;
pub mod wallet;
pub mod webhooks;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
};
use credits_ledger::{
    Clock, LedgerService, PurchaseService, ReconciliationService, RefundService,
    catalog::{CatalogError, GiftCatalog, PackageCatalog, StaticGiftCatalog, StaticPackageCatalog},
    events::EventBus,
    payments::PaymentProvider,
    store::LedgerStore,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use self::middleware::TokenVerifier;
use crate::config::ServerConfig;
use crate::metrics;

/// Application state shared across all HTTP handlers.
///
/// Cloned per request; every service is a bundle of `Arc`s.
pub struct AppState<S: LedgerStore> {
    pub ledger: LedgerService<S>,
    pub purchases: PurchaseService<S>,
    pub reconciliation: ReconciliationService<S>,
    pub refunds: RefundService<S>,
    pub tokens: Arc<TokenVerifier>,
    /// Webhooks must carry a valid signature when set
    pub webhook_secret: Option<Arc<str>>,
}

impl<S: LedgerStore> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            ledger: self.ledger.clone(),
            purchases: self.purchases.clone(),
            reconciliation: self.reconciliation.clone(),
            refunds: self.refunds.clone(),
            tokens: Arc::clone(&self.tokens),
            webhook_secret: self.webhook_secret.clone(),
        }
    }
}

impl<S: LedgerStore> AppState<S> {
    /// Wire every service from configuration
    ///
    /// Catalogs are read from the configured JSON files, or the built-in
    /// defaults when no path is set.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError` if a catalog file cannot be read or is invalid
    pub fn from_config(
        config: &ServerConfig,
        store: Arc<S>,
        clock: Arc<dyn Clock>,
        provider: Arc<dyn PaymentProvider>,
    ) -> Result<Self, CatalogError> {
        let gifts: Arc<dyn GiftCatalog> = match &config.ledger.gift_catalog_path {
            Some(path) => Arc::new(StaticGiftCatalog::from_file(path)?),
            None => Arc::new(StaticGiftCatalog::defaults()),
        };
        let packages: Arc<dyn PackageCatalog> = match &config.ledger.package_catalog_path {
            Some(path) => Arc::new(StaticPackageCatalog::from_file(path)?),
            None => Arc::new(StaticPackageCatalog::defaults(&config.payments.currency)),
        };

        let ledger = LedgerService::new(
            store,
            clock,
            gifts,
            config.ledger.currency.clone(),
            EventBus::default(),
        );
        let purchases = PurchaseService::new(
            ledger.clone(),
            Arc::clone(&provider),
            packages,
            config.purchase_settings(),
        );
        let reconciliation = ReconciliationService::new(ledger.clone(), Arc::clone(&provider));
        let refunds =
            RefundService::new(ledger.clone(), provider).with_timeout(config.provider_timeout());

        Ok(Self {
            ledger,
            purchases,
            reconciliation,
            refunds,
            tokens: Arc::new(TokenVerifier::new(&config.security.jwt_secret)),
            webhook_secret: config.security.webhook_secret.as_deref().map(Arc::from),
        })
    }
}

/// Create the complete API router with all endpoints and middleware.
///
/// # Example
///
/// ```rust,no_run
/// # use ledger_server::api::{create_router, AppState};
/// # use credits_ledger::MemoryLedgerStore;
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// # let state: AppState<MemoryLedgerStore> = unimplemented!();
/// let app = create_router(state);
/// let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
/// axum::serve(listener, app).await?;
/// # Ok(())
/// # }
/// ```
pub fn create_router<S: LedgerStore>(state: AppState<S>) -> Router {
    let v1_routes = create_v1_router(state.clone());

    Router::new()
        .route("/health", get(health_check::<S>))
        .nest("/api/v1", v1_routes)
        .layer(axum::middleware::from_fn(metrics::track_http))
        .layer(axum::middleware::from_fn(request_id::request_id_middleware))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn create_v1_router<S: LedgerStore>(state: AppState<S>) -> Router<AppState<S>> {
    // Public routes (no authentication middleware)
    let public_routes = Router::new()
        .route("/packages", get(catalog::list_packages::<S>))
        .route("/gifts", get(catalog::list_gifts::<S>))
        .route("/webhooks/payments", post(webhooks::payment_webhook::<S>));

    // Protected routes (require a bearer token)
    let protected_routes = Router::new()
        .route(
            "/purchases",
            post(purchases::initiate::<S>).get(purchases::history::<S>),
        )
        .route("/purchases/{id}", get(purchases::status::<S>))
        .route("/purchases/{id}/cancel", post(purchases::cancel::<S>))
        .route("/purchases/{id}/refund", post(purchases::refund::<S>))
        .route("/wallet", get(wallet::get_wallet::<S>))
        .route("/wallet/transactions", get(wallet::transactions::<S>))
        .route("/wallet/earnings", get(wallet::earnings::<S>))
        .route("/wallet/transfer", post(wallet::transfer::<S>))
        .route("/gifts/send", post(gifts::send_gift::<S>))
        .layer(axum::middleware::from_fn_with_state(
            Arc::clone(&state.tokens),
            middleware::auth_middleware,
        ));

    Router::new().merge(public_routes).merge(protected_routes)
}

/// Health check endpoint for monitoring and load balancers.
///
/// Returns `200 OK` when the store answers, `503 Service Unavailable` otherwise.
///
/// ```bash
/// curl http://localhost:8080/health
/// # {"status":"healthy","store":true,"version":"0.1.0","timestamp":"2025-03-01T10:00:00Z"}
/// ```
async fn health_check<S: LedgerStore>(State(state): State<AppState<S>>) -> impl IntoResponse {
    let store_healthy = match state.ledger.store().health_check().await {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(error = %e, "Store health check failed");
            false
        }
    };

    let status_code = if store_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = json!({
        "status": if store_healthy { "healthy" } else { "unhealthy" },
        "version": env!("CARGO_PKG_VERSION"),
        "store": store_healthy,
        "timestamp": state.ledger.clock().now().to_rfc3339(),
    });

    (status_code, Json(response))
}
