//! HTTP API integration tests.
//!
//! The router is wired exactly as in production by `bootstrap::wire`, but
//! over in-memory resources: the in-memory store and limiter, the mock
//! payment provider and a controllable clock. Requests go through
//! `tower::ServiceExt::oneshot`, so no socket is bound.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::too_many_lines)]

use admission_core::store::SellerAccounts;
use admission_core::types::{EventId, UserId};
use admission_runtime::scheduler::ExpirationScheduler;
use admission_testing::{MockPaymentGateway, TestClock, mocks::epoch};
use admission_web::StaticTokenVerifier;
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode, header};
use serde_json::{Value, json};
use std::sync::Arc;
use ticketing::bootstrap::{ResourceManager, Wiring, wire};
use ticketing::config::Config;
use ticketing::server::build_router;
use ticketing::webhook::{SIGNATURE_HEADER, sign};
use tower::ServiceExt;

const WEBHOOK_SECRET: &str = "whsec_http_test";
const ALICE: &str = "alice-token";
const BOB: &str = "bob-token";

struct TestApp {
    router: Router,
    gateway: Arc<MockPaymentGateway>,
    sellers: Arc<dyn SellerAccounts>,
    alice: UserId,
    bob: UserId,
    // Never run; held so scheduler registrations have a live receiver
    _scheduler: ExpirationScheduler,
}

fn setup() -> TestApp {
    setup_with(&[])
}

fn setup_with(overrides: &[(&str, &str)]) -> TestApp {
    let mut vars = vec![
        ("WEBHOOK_SIGNING_SECRET", WEBHOOK_SECRET),
        ("METRICS_ENABLED", "false"),
    ];
    vars.extend_from_slice(overrides);
    let config = Config::from_lookup(|key| {
        vars.iter()
            .rev()
            .find(|(name, _)| *name == key)
            .map(|(_, value)| (*value).to_string())
    })
    .expect("test config");

    let gateway = Arc::new(MockPaymentGateway::new());
    let clock = Arc::new(TestClock::new(epoch()));
    let resources = ResourceManager::in_memory(gateway.clone(), clock);
    let sellers = resources.sellers.clone();

    let alice = UserId::new();
    let bob = UserId::new();
    let identity = Arc::new(
        StaticTokenVerifier::new()
            .with_token(ALICE, alice)
            .with_token(BOB, bob),
    );

    let Wiring { state, scheduler } = wire(&config, resources, identity, None);

    TestApp {
        router: build_router(state),
        gateway,
        sellers,
        alice,
        bob,
        _scheduler: scheduler,
    }
}

impl TestApp {
    async fn send(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .unwrap();

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    async fn register_event(&self, total_tickets: u32) -> EventId {
        let event_id = EventId::new();
        let (status, _) = self
            .send(
                Method::PUT,
                &format!("/api/events/{event_id}"),
                None,
                Some(json!({"total_tickets": total_tickets, "price_cents": 4500})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        event_id
    }

    async fn webhook(&self, payload: &Value, signature: Option<String>) -> (StatusCode, Value) {
        let body = payload.to_string();
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/api/webhooks/payments")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(signature) = signature {
            builder = builder.header(SIGNATURE_HEADER, signature);
        }
        let request = builder.body(Body::from(body)).unwrap();

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    async fn signed_webhook(&self, payload: &Value) -> (StatusCode, Value) {
        let signature = sign(
            WEBHOOK_SECRET,
            epoch().timestamp(),
            payload.to_string().as_bytes(),
        );
        self.webhook(payload, Some(signature)).await
    }
}

fn checkout_completed(session_ref: &str, payment_intent: &str) -> Value {
    json!({
        "id": "evt_test",
        "type": "checkout.session.completed",
        "data": {"object": {
            "id": session_ref,
            "payment_intent": payment_intent,
            "metadata": {}
        }}
    })
}

// ============================================================================
// Health
// ============================================================================

#[tokio::test]
async fn health_and_readiness() {
    let app = setup();

    let (status, body) = app.send(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, _) = app.send(Method::GET, "/ready", None, None).await;
    assert_eq!(status, StatusCode::OK);

    // Metrics disabled in tests
    let (status, _) = app.send(Method::GET, "/metrics", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ============================================================================
// Purchase flow
// ============================================================================

#[tokio::test]
async fn join_checkout_and_webhook_issue_a_ticket() {
    let app = setup();
    let event_id = app.register_event(1).await;

    // Alice gets the only spot, Bob waits
    let (status, alice_entry) = app
        .send(Method::POST, &format!("/api/events/{event_id}/queue"), Some(ALICE), None)
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(alice_entry["status"], "offered");
    assert_eq!(alice_entry["user_id"], json!(app.alice));

    let (status, bob_entry) = app
        .send(Method::POST, &format!("/api/events/{event_id}/queue"), Some(BOB), None)
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(bob_entry["status"], "waiting");
    assert_eq!(bob_entry["user_id"], json!(app.bob));

    let (status, position) = app
        .send(
            Method::GET,
            &format!("/api/events/{event_id}/queue/position"),
            Some(BOB),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(position["position"], 2);

    let (status, availability) = app
        .send(Method::GET, &format!("/api/events/{event_id}/availability"), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(availability["active_offers"], 1);
    assert_eq!(availability["is_sold_out"], true);

    // Bob holds no offer
    let (status, error) = app
        .send(Method::POST, &format!("/api/events/{event_id}/checkout"), Some(BOB), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error["code"], "CONFLICT");

    let (status, session) = app
        .send(Method::POST, &format!("/api/events/{event_id}/checkout"), Some(ALICE), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let session_ref = session["session_ref"].as_str().unwrap().to_string();
    assert!(session["url"].as_str().unwrap().contains(&session_ref));

    // Success page polls before the notification arrives
    let (status, pending) = app
        .send(
            Method::GET,
            &format!("/api/checkout/sessions/{session_ref}"),
            Some(ALICE),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(pending["status"], "pending");
    assert_eq!(pending["ticket"], Value::Null);

    // Someone else's session is reported as missing
    let (status, _) = app
        .send(
            Method::GET,
            &format!("/api/checkout/sessions/{session_ref}"),
            Some(BOB),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let notification = checkout_completed(&session_ref, "pi_test_1");
    let (status, ack) = app.signed_webhook(&notification).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["received"], true);
    assert_eq!(ack["fulfillment"]["outcome"], "fulfilled");

    // Redelivery is acknowledged without a second ticket
    let (status, ack) = app.signed_webhook(&notification).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["fulfillment"]["outcome"], "already_fulfilled");

    let (status, ticket) = app
        .send(Method::GET, &format!("/api/events/{event_id}/ticket"), Some(ALICE), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ticket["status"], "valid");

    let (status, done) = app
        .send(
            Method::GET,
            &format!("/api/checkout/sessions/{session_ref}"),
            Some(ALICE),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(done["status"], "fulfilled");
    assert_eq!(done["ticket"]["id"], ticket["id"]);

    let payment_id = done["payment_id"].as_str().unwrap();
    let (status, by_payment) = app
        .send(Method::GET, &format!("/api/payments/{payment_id}/ticket"), Some(ALICE), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(by_payment["id"], ticket["id"]);

    let (status, _) = app
        .send(Method::GET, &format!("/api/payments/{payment_id}/ticket"), Some(BOB), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .send(Method::GET, &format!("/api/events/{event_id}/ticket"), Some(BOB), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, availability) = app
        .send(Method::GET, &format!("/api/events/{event_id}/availability"), None, None)
        .await;
    assert_eq!(availability["purchased"], 1);
    assert_eq!(availability["active_offers"], 0);
}

#[tokio::test]
async fn released_offer_moves_to_the_next_user() {
    let app = setup();
    let event_id = app.register_event(1).await;

    let (_, alice_entry) = app
        .send(Method::POST, &format!("/api/events/{event_id}/queue"), Some(ALICE), None)
        .await;
    app.send(Method::POST, &format!("/api/events/{event_id}/queue"), Some(BOB), None)
        .await;
    let entry_id = alice_entry["id"].as_str().unwrap();

    // Only the holder may release
    let (status, _) = app
        .send(
            Method::POST,
            &format!("/api/events/{event_id}/offers/{entry_id}/release"),
            Some(BOB),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app
        .send(
            Method::POST,
            &format!("/api/events/{event_id}/offers/{entry_id}/release"),
            Some(ALICE),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, position) = app
        .send(
            Method::GET,
            &format!("/api/events/{event_id}/queue/position"),
            Some(BOB),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(position["entry"]["status"], "offered");
    assert_eq!(position["position"], 1);

    let (status, _) = app
        .send(
            Method::GET,
            &format!("/api/events/{event_id}/queue/position"),
            Some(ALICE),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn growing_capacity_and_processing_the_queue() {
    let app = setup();
    let event_id = app.register_event(1).await;

    app.send(Method::POST, &format!("/api/events/{event_id}/queue"), Some(ALICE), None)
        .await;
    app.send(Method::POST, &format!("/api/events/{event_id}/queue"), Some(BOB), None)
        .await;

    // Raising capacity offers the new spot straight away
    let (status, availability) = app
        .send(
            Method::PUT,
            &format!("/api/events/{event_id}"),
            None,
            Some(json!({"total_tickets": 2, "price_cents": 4500})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(availability["active_offers"], 2);

    // Nothing left for a manual run
    let (status, run) = app
        .send(Method::POST, &format!("/api/events/{event_id}/queue/process"), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(run["offers_issued"], 0);
}

// ============================================================================
// Errors
// ============================================================================

#[tokio::test]
async fn authenticated_routes_reject_missing_or_unknown_tokens() {
    let app = setup();
    let event_id = app.register_event(5).await;

    let (status, body) = app
        .send(Method::POST, &format!("/api/events/{event_id}/queue"), None, None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");

    let (status, _) = app
        .send(
            Method::POST,
            &format!("/api/events/{event_id}/queue"),
            Some("not-a-token"),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .send(Method::GET, &format!("/api/events/{event_id}/ticket"), None, None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unknown_event_and_duplicate_join() {
    let app = setup();

    let (status, body) = app
        .send(
            Method::GET,
            &format!("/api/events/{}/availability", EventId::new()),
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");

    let event_id = app.register_event(5).await;
    let (status, _) = app
        .send(Method::POST, &format!("/api/events/{event_id}/queue"), Some(ALICE), None)
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = app
        .send(Method::POST, &format!("/api/events/{event_id}/queue"), Some(ALICE), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn join_rate_limit_returns_429_with_retry_after() {
    let app = setup_with(&[("JOIN_RATE_LIMIT", "1"), ("JOIN_RATE_WINDOW_SECONDS", "600")]);
    let event_id = app.register_event(5).await;

    let (status, entry) = app
        .send(Method::POST, &format!("/api/events/{event_id}/queue"), Some(ALICE), None)
        .await;
    assert_eq!(status, StatusCode::CREATED);

    // Give the offer back so the next join is not a duplicate
    let entry_id = entry["id"].as_str().unwrap();
    let (status, _) = app
        .send(
            Method::POST,
            &format!("/api/events/{event_id}/offers/{entry_id}/release"),
            Some(ALICE),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let request = Request::builder()
        .method(Method::POST)
        .uri(format!("/api/events/{event_id}/queue"))
        .header(header::AUTHORIZATION, format!("Bearer {ALICE}"))
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = response
        .headers()
        .get(header::RETRY_AFTER)
        .expect("Retry-After header")
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry_after > 0 && retry_after <= 600);

    // Other users are unaffected
    let (status, _) = app
        .send(Method::POST, &format!("/api/events/{event_id}/queue"), Some(BOB), None)
        .await;
    assert_eq!(status, StatusCode::CREATED);
}

// ============================================================================
// Webhooks
// ============================================================================

#[tokio::test]
async fn webhook_signature_is_enforced() {
    let app = setup();
    let payload = checkout_completed("cs_test_1", "pi_test_1");

    let (status, _) = app.webhook(&payload, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let forged = sign("whsec_wrong", epoch().timestamp(), payload.to_string().as_bytes());
    let (status, body) = app.webhook(&payload, Some(forged)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");

    let stale = sign(
        WEBHOOK_SECRET,
        epoch().timestamp() - 3_600,
        payload.to_string().as_bytes(),
    );
    let (status, _) = app.webhook(&payload, Some(stale)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn webhook_for_unknown_session_is_acknowledged() {
    let app = setup();

    let (status, ack) = app
        .signed_webhook(&checkout_completed("cs_never_created", "pi_x"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["fulfillment"]["outcome"], "ignored");

    let (status, ack) = app
        .signed_webhook(&json!({"type": "invoice.paid", "data": {"object": {}}}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["received"], true);
    assert!(ack.get("fulfillment").is_none());
}

#[tokio::test]
async fn account_updated_records_seller_capability() {
    let app = setup();

    let payload = json!({
        "type": "account.updated",
        "data": {"object": {"id": "acct_seller_1", "charges_enabled": true}}
    });
    let (status, _) = app.signed_webhook(&payload).await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(
        app.sellers.charges_enabled("acct_seller_1").await.unwrap(),
        Some(true)
    );
    assert_eq!(app.sellers.charges_enabled("acct_other").await.unwrap(), None);
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn cancelling_an_event_refunds_and_closes_it() {
    let app = setup();
    let event_id = app.register_event(1).await;

    app.send(Method::POST, &format!("/api/events/{event_id}/queue"), Some(ALICE), None)
        .await;
    let (_, session) = app
        .send(Method::POST, &format!("/api/events/{event_id}/checkout"), Some(ALICE), None)
        .await;
    let session_ref = session["session_ref"].as_str().unwrap();
    let intent = app
        .gateway
        .intent_for(&admission_core::types::SessionRef::new(session_ref))
        .unwrap();
    let (status, _) = app
        .signed_webhook(&checkout_completed(session_ref, &intent))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, report) = app
        .send(Method::POST, &format!("/api/events/{event_id}/cancel"), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["refunded_tickets"].as_array().unwrap().len(), 1);
    assert_eq!(app.gateway.completed_refunds(), 1);

    let (_, availability) = app
        .send(Method::GET, &format!("/api/events/{event_id}/availability"), None, None)
        .await;
    assert_eq!(availability["cancelled"], true);

    let (_, ticket) = app
        .send(Method::GET, &format!("/api/events/{event_id}/ticket"), Some(ALICE), None)
        .await;
    assert_eq!(ticket["status"], "refunded");

    // Closed for new buyers
    let (status, _) = app
        .send(Method::POST, &format!("/api/events/{event_id}/queue"), Some(BOB), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn payment_for_a_cancelled_event_is_refunded() {
    let app = setup();
    let event_id = app.register_event(1).await;

    app.send(Method::POST, &format!("/api/events/{event_id}/queue"), Some(ALICE), None)
        .await;
    let (_, session) = app
        .send(Method::POST, &format!("/api/events/{event_id}/checkout"), Some(ALICE), None)
        .await;
    let session_ref = session["session_ref"].as_str().unwrap();
    let intent = app
        .gateway
        .intent_for(&admission_core::types::SessionRef::new(session_ref))
        .unwrap();

    let (status, report) = app
        .send(Method::POST, &format!("/api/events/{event_id}/cancel"), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["refunded_tickets"].as_array().unwrap().len(), 0);

    let (status, ack) = app
        .signed_webhook(&checkout_completed(session_ref, &intent))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["fulfillment"]["outcome"], "refunded");
    assert_eq!(app.gateway.completed_refunds(), 1);

    let (status, _) = app
        .send(Method::GET, &format!("/api/events/{event_id}/ticket"), Some(ALICE), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn shrinking_capacity_below_live_offers_conflicts() {
    let app = setup();
    let event_id = app.register_event(2).await;
    for token in [ALICE, BOB] {
        app.send(Method::POST, &format!("/api/events/{event_id}/queue"), Some(token), None)
            .await;
    }

    let (status, _) = app
        .send(
            Method::PUT,
            &format!("/api/events/{event_id}"),
            None,
            Some(json!({ "total_tickets": 1, "price_cents": 4500 })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, availability) = app
        .send(Method::GET, &format!("/api/events/{event_id}/availability"), None, None)
        .await;
    assert_eq!(availability["total_tickets"], 2);
    assert_eq!(availability["active_offers"], 2);
}
