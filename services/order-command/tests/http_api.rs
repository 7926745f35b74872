//! HTTP tests for the command service over the in-memory bus.
//!
//! The order response is only sent after the broker acknowledges the event:
//! tests below pin that a publish failure never produces a 200.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use axum_test::TestServer;
use order_command::{build_router, AppState};
use order_pipeline_core::event_bus::EventBusError;
use order_pipeline_core::producer::CommandProducer;
use order_pipeline_testing::{test_clock, InMemoryEventBus};
use serde_json::{json, Value};
use std::sync::Arc;

const ORDERS: &str = "orders";

fn server(bus: &InMemoryEventBus) -> TestServer {
    let producer = CommandProducer::new(Arc::new(bus.clone()), ORDERS, Arc::new(test_clock()));
    TestServer::new(build_router(AppState::new(Arc::new(producer)))).expect("test server")
}

fn valid_request() -> Value {
    json!({ "productID": "P1", "quantity": 2, "expectedDeliveryDate": "2025-01-01" })
}

#[tokio::test]
async fn create_order_returns_created_order_and_publishes_one_event() {
    let bus = InMemoryEventBus::new();
    let server = server(&bus);

    let response = server.post("/orders").json(&valid_request()).await;

    response.assert_status_ok();
    let body: Value = response.json();
    let id = body["id"].as_str().expect("id is a string").to_string();
    assert_eq!(id, "1735689600000");
    assert_eq!(
        body,
        json!({
            "id": id,
            "productID": "P1",
            "quantity": 2,
            "expectedDeliveryDate": "2025-01-01",
            "status": "created"
        })
    );

    let records = bus.records(ORDERS);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].key.as_deref(), Some(id.as_str()));

    let event: Value =
        serde_json::from_slice(records[0].payload.as_deref().expect("payload")).expect("json");
    assert_eq!(event["type"], "OrderCreated");
    assert_eq!(event["version"], "1");
    assert_eq!(event["timestampMillis"], 1_735_689_600_000_i64);
    assert_eq!(event["productID"], "P1");
    assert_eq!(event["quantity"], 2);
    assert_eq!(event["expectedDeliveryDate"], "2025-01-01");
}

#[tokio::test]
async fn ids_are_unique_within_one_millisecond() {
    let bus = InMemoryEventBus::new();
    let server = server(&bus);

    let first: Value = server.post("/orders").json(&valid_request()).await.json();
    let second: Value = server.post("/orders").json(&valid_request()).await.json();

    assert_ne!(first["id"], second["id"]);
    assert_eq!(bus.records(ORDERS).len(), 2);
}

#[tokio::test]
async fn invalid_request_is_400_plain_text_and_publishes_nothing() {
    let bus = InMemoryEventBus::new();
    let server = server(&bus);

    let response = server
        .post("/orders")
        .json(&json!({ "productID": "P1", "quantity": 0, "expectedDeliveryDate": "2025-01-01" }))
        .await;

    response.assert_status_bad_request();
    let content_type = response.header("content-type");
    assert!(content_type.to_str().unwrap().starts_with("text/plain"));
    assert_eq!(response.text(), "quantity must be greater than zero, got 0");
    assert!(bus.records(ORDERS).is_empty());
}

#[tokio::test]
async fn malformed_json_is_400() {
    let bus = InMemoryEventBus::new();
    let server = server(&bus);

    let response = server
        .post("/orders")
        .json(&json!({ "productID": "P1", "quantity": "two" }))
        .await;

    response.assert_status_bad_request();
    assert!(bus.records(ORDERS).is_empty());
}

#[tokio::test]
async fn bad_delivery_date_is_400() {
    let bus = InMemoryEventBus::new();
    let server = server(&bus);

    let response = server
        .post("/orders")
        .json(&json!({ "productID": "P1", "quantity": 1, "expectedDeliveryDate": "soon" }))
        .await;

    response.assert_status_bad_request();
    assert!(response.text().contains("expectedDeliveryDate"));
}

#[tokio::test]
async fn broker_unavailable_is_503_never_200() {
    let bus = InMemoryEventBus::new();
    bus.fail_topic(
        ORDERS,
        EventBusError::BrokerUnavailable {
            topic: ORDERS.to_string(),
            reason: "all brokers down".to_string(),
        },
    );
    let server = server(&bus);

    let response = server.post("/orders").json(&valid_request()).await;

    response.assert_status(axum::http::StatusCode::SERVICE_UNAVAILABLE);
    assert!(!response.text().contains("brokers down"));
    assert!(bus.records(ORDERS).is_empty());
}

#[tokio::test]
async fn publish_timeout_is_504_never_200() {
    let bus = InMemoryEventBus::new();
    bus.fail_topic(
        ORDERS,
        EventBusError::PublishTimeout {
            topic: ORDERS.to_string(),
        },
    );
    let server = server(&bus);

    let response = server.post("/orders").json(&valid_request()).await;

    response.assert_status(axum::http::StatusCode::GATEWAY_TIMEOUT);
}

#[tokio::test]
async fn recovered_broker_accepts_orders_again() {
    let bus = InMemoryEventBus::new();
    bus.fail_topic(
        ORDERS,
        EventBusError::PublishTimeout {
            topic: ORDERS.to_string(),
        },
    );
    let server = server(&bus);
    server
        .post("/orders")
        .json(&valid_request())
        .await
        .assert_status(axum::http::StatusCode::GATEWAY_TIMEOUT);

    bus.heal_topic(ORDERS);
    server.post("/orders").json(&valid_request()).await.assert_status_ok();
    assert_eq!(bus.records(ORDERS).len(), 1);
}

#[tokio::test]
async fn cancel_order_publishes_keyed_cancellation() {
    let bus = InMemoryEventBus::new();
    let server = server(&bus);

    let response = server
        .post("/orders/1735689600000/cancel")
        .json(&json!({ "reason": "changed mind" }))
        .await;

    response.assert_status(axum::http::StatusCode::ACCEPTED);
    let body: Value = response.json();
    assert_eq!(body, json!({ "id": "1735689600000", "reason": "changed mind" }));

    let records = bus.records(ORDERS);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].key.as_deref(), Some("1735689600000"));
    let event: Value =
        serde_json::from_slice(records[0].payload.as_deref().expect("payload")).expect("json");
    assert_eq!(event["type"], "OrderCancelled");
    assert_eq!(event["reason"], "changed mind");
}

#[tokio::test]
async fn cancel_without_reason_is_400() {
    let bus = InMemoryEventBus::new();
    let server = server(&bus);

    let response = server
        .post("/orders/1/cancel")
        .json(&json!({ "reason": "  " }))
        .await;

    response.assert_status_bad_request();
    assert!(bus.records(ORDERS).is_empty());
}

#[tokio::test]
async fn health_is_ok() {
    let server = server(&InMemoryEventBus::new());
    let response = server.get("/health").await;
    response.assert_status_ok();
    response.assert_text("ok");
}
