//! Prometheus metrics for the ledger server.
//!
//! Metrics are exposed in Prometheus text format on a separate listener when
//! `METRICS_BIND` is configured. Without an installed exporter every recording
//! call is a no-op.
//!
//! # Metrics Categories
//!
//! - **HTTP Metrics**: Request counts, duration, status codes
//! - **Ledger Metrics**: Operation outcomes, credits moved per entry type
//! - **Payment Metrics**: Purchase initiations, webhook outcomes, refunds
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use ledger_server::metrics;
//! use std::net::SocketAddr;
//!
//! let addr: SocketAddr = "127.0.0.1:9100".parse().unwrap();
//! metrics::init_metrics(addr).unwrap();
//!
//! metrics::http_requests_total("POST", "/api/v1/purchases", 200);
//! metrics::webhook_outcomes_total("completed");
//! ```

use axum::{
    extract::{MatchedPath, Request},
    middleware::Next,
    response::Response,
};
use credits_ledger::events::{EventBus, LedgerEvent};
use credits_ledger::ledger::EntryType;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

/// Initialize Prometheus metrics exporter.
///
/// Metrics will be available at `http://<addr>/metrics`.
///
/// # Arguments
///
/// - `addr`: Address to bind the metrics server to (e.g., `0.0.0.0:9100`)
///
/// # Returns
///
/// Result indicating success or error message
pub fn init_metrics(addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {}", e))
}

// ============================================================================
// HTTP Metrics
// ============================================================================

/// Record HTTP request.
///
/// Increments the total HTTP request counter with method, path, and status labels.
pub fn http_requests_total(method: &str, path: &str, status: u16) {
    metrics::counter!("http_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record HTTP request duration in milliseconds.
pub fn http_request_duration_ms(method: &str, path: &str, duration_ms: f64) {
    metrics::histogram!("http_request_duration_ms",
        "method" => method.to_string(),
        "path" => path.to_string()
    )
    .record(duration_ms);
}

/// Middleware recording count and latency of every request.
///
/// Labels use the matched route template so ids in paths do not explode
/// label cardinality.
pub async fn track_http(request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let start = Instant::now();

    let response = next.run(request).await;

    http_requests_total(&method, &path, response.status().as_u16());
    http_request_duration_ms(&method, &path, start.elapsed().as_secs_f64() * 1000.0);
    response
}

// ============================================================================
// Ledger Metrics
// ============================================================================

/// Count a ledger operation by name and outcome.
pub fn ledger_operations_total(operation: &str, success: bool) {
    metrics::counter!("ledger_operations_total",
        "operation" => operation.to_string(),
        "success" => success.to_string()
    )
    .increment(1);
}

/// Add credits moved by committed entries of one type.
pub fn credits_moved_total(entry_type: EntryType, credits: i64) {
    metrics::counter!("credits_moved_total",
        "entry_type" => entry_type.as_str()
    )
    .increment(credits.unsigned_abs());
}

// ============================================================================
// Payment Metrics
// ============================================================================

/// Count a purchase initiation; `replayed` marks idempotent repeats.
pub fn purchase_initiations_total(replayed: bool) {
    metrics::counter!("purchase_initiations_total",
        "replayed" => replayed.to_string()
    )
    .increment(1);
}

/// Count a webhook by reconciliation outcome.
pub fn webhook_outcomes_total(outcome: &str) {
    metrics::counter!("webhook_outcomes_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Count a refund by outcome.
pub fn refunds_total(outcome: &str) {
    metrics::counter!("refunds_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record the credit movement carried by a committed ledger event.
pub fn record_event(event: &LedgerEvent) {
    match event {
        LedgerEvent::GiftSent { cost, .. } => credits_moved_total(EntryType::GiftSent, *cost),
        LedgerEvent::PurchaseCompleted { credits, .. } => {
            credits_moved_total(EntryType::Purchase, *credits)
        }
        LedgerEvent::IntentRefunded { credits, .. } => {
            credits_moved_total(EntryType::Refund, *credits)
        }
    }
}

/// Subscribe to `events` and record each one until the bus closes.
pub fn spawn_event_recorder(events: &EventBus) -> JoinHandle<()> {
    let mut receiver = events.subscribe();
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    tracing::debug!(?event, "Ledger event");
                    record_event(&event);
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event recorder lagged behind the ledger");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
