//! Integration tests for the HTTP API.
//!
//! The router is driven in-process with `tower::ServiceExt::oneshot` over the
//! in-memory store and a scripted payment provider; tokens are minted with the
//! same secret the server verifies against.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{TimeZone, Utc};
use credits_ledger::clock::FixedClock;
use credits_ledger::ledger::EntryType;
use credits_ledger::payments::{
    CreatedOrder, OrderRequest, PaymentProvider, PaymentSession, ProviderError, ProviderResult,
    RefundReceipt,
};
use credits_ledger::store::MemoryLedgerStore;
use http_body_util::BodyExt;
use jsonwebtoken::{EncodingKey, Header, encode};
use ledger_server::api::middleware::Claims;
use ledger_server::api::webhooks::{SIGNATURE_HEADER, sign_webhook};
use ledger_server::api::{AppState, create_router};
use ledger_server::config::ServerConfig;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tower::ServiceExt; // For `oneshot` method

const JWT_SECRET: &str = "server_integration_jwt_secret_0123456789";
const WEBHOOK_SECRET: &str = "server_integration_webhook";

/// Provider that numbers orders and can be told to fail
#[derive(Default)]
struct ScriptedProvider {
    next_order: AtomicUsize,
    fail_orders: AtomicBool,
    fail_refunds: AtomicBool,
    /// Carry out refunds but lose the answer
    lose_refund_answers: AtomicBool,
}

#[async_trait]
impl PaymentProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn create_order(&self, _request: &OrderRequest) -> ProviderResult<CreatedOrder> {
        if self.fail_orders.load(Ordering::SeqCst) {
            return Err(ProviderError::Request("connection refused".to_string()));
        }
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
            session_url: format!("https://pay.test/{language}/{order_id}"),
        })
    }

    async fn issue_refund(
        &self,
        order_id: &str,
        _transaction_id: Option<&str>,
        _amount_minor: i64,
    ) -> ProviderResult<RefundReceipt> {
        if self.fail_refunds.load(Ordering::SeqCst) {
            return Err(ProviderError::Rejected {
                code: "R01".to_string(),
                message: "refund window closed".to_string(),
            });
        }
        if self.lose_refund_answers.load(Ordering::SeqCst) {
            return Err(ProviderError::Timeout(std::time::Duration::from_secs(15)));
        }
        Ok(RefundReceipt {
            refund_id: format!("ref_{order_id}"),
            status: "accepted".to_string(),
        })
    }
}

struct TestServer {
    app: axum::Router,
    state: AppState<MemoryLedgerStore>,
    provider: Arc<ScriptedProvider>,
}

/// Helper to create a test server over the in-memory store
fn create_test_server() -> TestServer {
    let config = ServerConfig::from_lookup(
        |key| match key {
            "JWT_SECRET" => Some(JWT_SECRET.to_string()),
            "WEBHOOK_SECRET" => Some(WEBHOOK_SECRET.to_string()),
            _ => None,
        },
        None,
        None,
    )
    .unwrap();

    let provider = Arc::new(ScriptedProvider::default());
    let clock = Arc::new(FixedClock::new(
        Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap(),
    ));
    let state = AppState::from_config(
        &config,
        Arc::new(MemoryLedgerStore::new()),
        clock,
        provider.clone(),
    )
    .unwrap();

    TestServer {
        app: create_router(state.clone()),
        state,
        provider,
    }
}

fn token(user_id: i64, is_admin: bool) -> String {
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: user_id,
        is_admin,
        email: Some(format!("user{user_id}@example.com")),
        exp: now + 600,
        iat: now,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .unwrap()
}

impl TestServer {
    /// Send a request and decode the JSON body
    async fn call(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }

    async fn get(&self, uri: &str, user: Option<i64>) -> (StatusCode, Value) {
        let mut builder = Request::builder().uri(uri);
        if let Some(user) = user {
            builder = builder.header("authorization", format!("Bearer {}", token(user, false)));
        }
        self.call(builder.body(Body::empty()).unwrap()).await
    }

    async fn post(&self, uri: &str, bearer: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("authorization", format!("Bearer {bearer}"))
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.call(request).await
    }

    async fn webhook(&self, payload: &Value, signature: Option<String>) -> (StatusCode, Value) {
        let body = payload.to_string();
        let mut builder = Request::builder()
            .method("POST")
            .uri("/api/v1/webhooks/payments")
            .header("content-type", "application/json");
        if let Some(signature) = signature {
            builder = builder.header(SIGNATURE_HEADER, signature);
        }
        self.call(builder.body(Body::from(body)).unwrap()).await
    }

    async fn signed_webhook(&self, payload: &Value) -> (StatusCode, Value) {
        let signature = sign_webhook(WEBHOOK_SECRET, payload.to_string().as_bytes());
        self.webhook(payload, Some(signature)).await
    }

    async fn balance(&self, user: i64) -> i64 {
        let (status, body) = self.get("/api/v1/wallet", Some(user)).await;
        assert_eq!(status, StatusCode::OK);
        body["balance"].as_i64().unwrap()
    }

    async fn fund(&self, user: i64, amount: i64) {
        self.state
            .ledger
            .credit(user, amount, EntryType::Deposit, None, None, None)
            .await
            .unwrap();
    }

    /// Start a purchase and confirm it through a signed webhook
    async fn completed_purchase(&self, user: i64, package: &str) -> (String, String) {
        let (status, body) = self
            .post("/api/v1/purchases", &token(user, false), json!({"package_id": package}))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = body["purchase"]["id"].as_str().unwrap().to_string();
        let order = body["purchase"]["provider_order_id"].as_str().unwrap().to_string();
        let amount = body["purchase"]["amount_minor"].as_i64().unwrap();

        let (status, body) = self
            .signed_webhook(&success_payload(&order, amount))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "completed");
        (id, order)
    }
}

fn success_payload(order: &str, amount: i64) -> Value {
    json!({
        "orderIdentification": order,
        "transactionId": format!("tx_{order}"),
        "status": "success",
        "amountCents": amount,
    })
}

// ============================================================================
// Health, catalogs and authentication
// ============================================================================

#[tokio::test]
async fn test_health_check_endpoint() {
    let server = create_test_server();

    let request = Request::builder()
        .uri("/health")
        .header("x-request-id", "health-check-1")
        .body(Body::empty())
        .unwrap();
    let response = server.app.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("x-request-id").unwrap(),
        "health-check-1"
    );
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["store"], true);
}

#[tokio::test]
async fn test_catalogs_are_public() {
    let server = create_test_server();

    let (status, packages) = server.get("/api/v1/packages", None).await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<&str> = packages
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, ["starter", "popular", "premium"]);
    assert_eq!(packages[0]["currency"], "EUR");

    let (status, gifts) = server.get("/api/v1/gifts", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(gifts.as_array().unwrap().len(), 5);
    assert_eq!(gifts[0]["id"], "rose");
}

#[tokio::test]
async fn test_protected_routes_require_token() {
    let server = create_test_server();

    let (status, body) = server.get("/api/v1/wallet", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Authentication required");

    let request = Request::builder()
        .uri("/api/v1/wallet")
        .header("authorization", "Bearer not.a.token")
        .body(Body::empty())
        .unwrap();
    let (status, _) = server.call(request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = server.get("/api/v1/wallet", Some(7)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user_id"], 7);
    assert_eq!(body["balance"], 0);
    assert_eq!(body["currency"], "CREDITS");
}

// ============================================================================
// Purchases and webhooks
// ============================================================================

#[tokio::test]
async fn test_purchase_happy_path() {
    let server = create_test_server();
    let user_token = token(1, false);

    let (status, body) = server
        .post(
            "/api/v1/purchases",
            &user_token,
            json!({"package_id": "starter", "language": "de"}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["replayed"], false);
    assert_eq!(body["payment_url"], "https://pay.test/de/ord_1");
    assert_eq!(body["purchase"]["status"], "processing");
    assert_eq!(body["purchase"]["credits_amount"], 100);
    let id = body["purchase"]["id"].as_str().unwrap().to_string();

    // Same package inside the idempotency window
    let (status, replay) = server
        .post("/api/v1/purchases", &user_token, json!({"package_id": "starter"}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(replay["replayed"], true);
    assert_eq!(replay["purchase"]["id"], id.as_str());

    let (status, body) = server.signed_webhook(&success_payload("ord_1", 500)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "completed");
    assert_eq!(server.balance(1).await, 100);

    // Provider retries the same notification
    let (status, body) = server.signed_webhook(&success_payload("ord_1", 500)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "duplicate");
    assert_eq!(server.balance(1).await, 100);

    let (status, body) = server.get(&format!("/api/v1/purchases/{id}"), Some(1)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
    assert!(body["payment_url"].is_null());

    let (status, body) = server
        .get("/api/v1/wallet/transactions?entry_type=purchase", Some(1))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
    assert_eq!(body["items"][0]["amount"], 100);
}

#[tokio::test]
async fn test_webhook_signature_enforced() {
    let server = create_test_server();
    server
        .post("/api/v1/purchases", &token(1, false), json!({"package_id": "starter"}))
        .await;
    let payload = success_payload("ord_1", 500);

    let (status, _) = server.webhook(&payload, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let forged = sign_webhook("some_other_secret_value", payload.to_string().as_bytes());
    let (status, body) = server.webhook(&payload, Some(forged)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Invalid webhook signature");

    assert_eq!(server.balance(1).await, 0);
}

#[tokio::test]
async fn test_webhook_errors() {
    let server = create_test_server();

    let garbage = json!({"unexpected": true});
    let (status, _) = server.signed_webhook(&garbage).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = server.signed_webhook(&success_payload("ord_404", 500)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(!body["error"].as_str().unwrap().contains("ord_404"));
}

#[tokio::test]
async fn test_failed_payment_is_reported() {
    let server = create_test_server();
    let (_, body) = server
        .post("/api/v1/purchases", &token(1, false), json!({"package_id": "popular"}))
        .await;
    let id = body["purchase"]["id"].as_str().unwrap().to_string();

    let payload = json!({
        "orderIdentification": "ord_1",
        "transactionId": "tx_1",
        "status": "DECLINED",
        "responseCode": "05",
    });
    let (status, body) = server.signed_webhook(&payload).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "failed");

    let (_, body) = server.get(&format!("/api/v1/purchases/{id}"), Some(1)).await;
    assert_eq!(body["status"], "failed");
    assert_eq!(body["failure_reason"], "declined");
    assert_eq!(server.balance(1).await, 0);
}

#[tokio::test]
async fn test_provider_outage_then_cancel() {
    let server = create_test_server();
    server.provider.fail_orders.store(true, Ordering::SeqCst);

    let (status, body) = server
        .post("/api/v1/purchases", &token(3, false), json!({"package_id": "starter"}))
        .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "Payment provider unavailable");

    let (status, history) = server.get("/api/v1/purchases", Some(3)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history.as_array().unwrap().len(), 1);
    assert_eq!(history[0]["status"], "pending");
    let id = history[0]["id"].as_str().unwrap().to_string();

    // Someone else cannot cancel it
    let (status, _) = server
        .post(&format!("/api/v1/purchases/{id}/cancel"), &token(4, false), json!({}))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = server
        .post(&format!("/api/v1/purchases/{id}/cancel"), &token(3, false), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "cancelled");

    let (status, _) = server
        .post(&format!("/api/v1/purchases/{id}/cancel"), &token(3, false), json!({}))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_purchase_lookup_errors() {
    let server = create_test_server();

    let (status, _) = server
        .post("/api/v1/purchases", &token(1, false), json!({"package_id": "platinum"}))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (id, _) = server.completed_purchase(1, "starter").await;

    let (status, _) = server.get(&format!("/api/v1/purchases/{id}"), Some(2)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = server
        .get(&format!("/api/v1/purchases/{}", uuid::Uuid::new_v4()), Some(1))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = server.get("/api/v1/purchases/not-a-uuid", Some(1)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ============================================================================
// Refunds
// ============================================================================

#[tokio::test]
async fn test_partial_refund() {
    let server = create_test_server();
    let (id, _) = server.completed_purchase(1, "starter").await;
    let uri = format!("/api/v1/purchases/{id}/refund");

    let (status, _) = server
        .post(&uri, &token(2, false), json!({"amount_minor": 250}))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = server
        .post(&uri, &token(1, false), json!({"amount_minor": 501}))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, body) = server
        .post(&uri, &token(1, false), json!({"amount_minor": 250}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "refunded");
    assert_eq!(body["refund"]["credits"], 50);
    assert_eq!(body["refund"]["state"], "confirmed");
    assert_eq!(server.balance(1).await, 50);

    let (status, _) = server.post(&uri, &token(1, false), json!({})).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_admin_full_refund_with_empty_body() {
    let server = create_test_server();
    let (id, _) = server.completed_purchase(5, "popular").await;
    assert_eq!(server.balance(5).await, 450);

    let request = Request::builder()
        .method("POST")
        .uri(format!("/api/v1/purchases/{id}/refund"))
        .header("authorization", format!("Bearer {}", token(99, true)))
        .body(Body::empty())
        .unwrap();
    let (status, body) = server.call(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["refund"]["amount_minor"], 2000);
    assert_eq!(server.balance(5).await, 0);
}

#[tokio::test]
async fn test_refund_refused_by_provider_returns_credits() {
    let server = create_test_server();
    let (id, _) = server.completed_purchase(1, "starter").await;
    server.provider.fail_refunds.store(true, Ordering::SeqCst);

    let (status, _) = server
        .post(&format!("/api/v1/purchases/{id}/refund"), &token(1, false), json!({}))
        .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(server.balance(1).await, 100);

    let (_, body) = server.get(&format!("/api/v1/purchases/{id}"), Some(1)).await;
    assert_eq!(body["status"], "completed");
    assert_eq!(body["refund"]["state"], "reversed");
}

#[tokio::test]
async fn test_refund_with_lost_answer_keeps_credits_reserved() {
    let server = create_test_server();
    let (id, _) = server.completed_purchase(1, "starter").await;
    server
        .provider
        .lose_refund_answers
        .store(true, Ordering::SeqCst);

    let (status, _) = server
        .post(&format!("/api/v1/purchases/{id}/refund"), &token(1, false), json!({}))
        .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(server.balance(1).await, 0);

    let (_, body) = server.get(&format!("/api/v1/purchases/{id}"), Some(1)).await;
    assert_eq!(body["status"], "completed");
    assert_eq!(body["refund"]["state"], "pending");

    // Blocked until the pending refund is settled
    server
        .provider
        .lose_refund_answers
        .store(false, Ordering::SeqCst);
    let (status, _) = server
        .post(&format!("/api/v1/purchases/{id}/refund"), &token(1, false), json!({}))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(server.balance(1).await, 0);
}

#[tokio::test]
async fn test_refund_after_spending_credits() {
    let server = create_test_server();
    let (id, _) = server.completed_purchase(1, "starter").await;

    let (status, _) = server
        .post(
            "/api/v1/wallet/transfer",
            &token(1, false),
            json!({"recipient_id": 2, "amount": 100}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = server
        .post(&format!("/api/v1/purchases/{id}/refund"), &token(1, false), json!({}))
        .await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert!(body["error"].as_str().unwrap().contains("Insufficient credits"));
}

// ============================================================================
// Gifts, transfers and earnings
// ============================================================================

#[tokio::test]
async fn test_send_gift() {
    let server = create_test_server();
    server.fund(10, 30).await;
    let sender = token(10, false);

    let (status, body) = server
        .post(
            "/api/v1/gifts/send",
            &sender,
            json!({
                "recipient_id": 20,
                "gift_id": "heart",
                "quantity": 2,
                "context": {"kind": "live_stream", "id": "stream-1"},
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cost"], 10);
    assert_eq!(body["sender_entry"]["balance_after"], 20);

    let (status, body) = server
        .post(
            "/api/v1/gifts/send",
            &sender,
            json!({"recipient_id": 20, "gift_id": "crown"}),
        )
        .await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert!(body["error"].as_str().unwrap().contains("available 20"));

    let (status, _) = server
        .post(
            "/api/v1/gifts/send",
            &sender,
            json!({"recipient_id": 20, "gift_id": "unicorn"}),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = server
        .post(
            "/api/v1/gifts/send",
            &sender,
            json!({"recipient_id": 10, "gift_id": "rose"}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, earnings) = server.get("/api/v1/wallet/earnings", Some(20)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(earnings["total_credits"], 10);
    assert_eq!(earnings["gift_count"], 1);
    assert_eq!(earnings["by_gift"][0]["gift_id"], "heart");
    assert_eq!(server.balance(10).await, 20);
}

#[tokio::test]
async fn test_transfer_and_history_paging() {
    let server = create_test_server();
    server.fund(1, 100).await;
    let sender = token(1, false);

    for amount in [5, 10, 15] {
        let (status, _) = server
            .post(
                "/api/v1/wallet/transfer",
                &sender,
                json!({"recipient_id": 2, "amount": amount, "description": "tip"}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, _) = server
        .post(
            "/api/v1/wallet/transfer",
            &sender,
            json!({"recipient_id": 2, "amount": 0}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, page) = server
        .get("/api/v1/wallet/transactions?page=1&per_page=2", Some(1))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 4);
    assert_eq!(page["items"].as_array().unwrap().len(), 2);
    assert_eq!(page["items"][0]["amount"], -15);

    let (_, page) = server
        .get("/api/v1/wallet/transactions?entry_type=gift_received", Some(2))
        .await;
    assert_eq!(page["total"], 3);
    assert_eq!(page["items"][0]["description"], "tip");

    assert_eq!(server.balance(1).await, 70);
    assert_eq!(server.balance(2).await, 30);
}
