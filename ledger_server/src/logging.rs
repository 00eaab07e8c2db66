//! Structured logging configuration.
//!
//! `tracing-subscriber` output with request correlation and security event
//! tracking. Records emitted by the ledger crate through the `log` facade are
//! picked up by the same subscriber.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "info,sqlx=warn,hyper=warn";

/// Initialize structured logging
///
/// Log levels are configurable via the `RUST_LOG` env var.
///
/// # Example
///
/// ```no_run
/// use ledger_server::logging;
///
/// #[tokio::main]
/// async fn main() {
///     logging::init();
///     tracing::info!("Server starting");
/// }
/// ```
pub fn init() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    tracing::info!("Structured logging initialized");
}

/// Log security event with structured data
///
/// # Arguments
///
/// * `event_type` - Type of security event
/// * `user_id` - Optional user ID
/// * `request_id` - Optional correlation id of the request
/// * `message` - Event message
///
/// # Example
///
/// ```
/// use ledger_server::logging::log_security_event;
///
/// log_security_event(
///     "bad_webhook_signature",
///     None,
///     Some("5f0c9a1e"),
///     "Webhook signature mismatch"
/// );
/// ```
pub fn log_security_event(
    event_type: &str,
    user_id: Option<i64>,
    request_id: Option<&str>,
    message: &str,
) {
    tracing::warn!(
        event_type = event_type,
        user_id = user_id,
        request_id = request_id,
        "SECURITY: {}",
        message
    );
}

/// Log a payment provider call
///
/// Calls slower than a second are logged at warn level.
pub fn log_provider_call(operation: &str, duration_ms: u64, success: bool) {
    if duration_ms > 1000 {
        tracing::warn!(
            operation = operation,
            duration_ms = duration_ms,
            success = success,
            "PROVIDER: Slow call"
        );
    } else {
        tracing::debug!(
            operation = operation,
            duration_ms = duration_ms,
            success = success,
            "Provider call"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_security_event() {
        // Just ensure it doesn't panic
        log_security_event("test_event", Some(1), Some("req-1"), "Test message");
        log_security_event("test_event", None, None, "Anonymous");
    }

    #[test]
    fn test_log_provider_call() {
        log_provider_call("create_order", 120, true);
        log_provider_call("issue_refund", 2500, false);
    }
}
