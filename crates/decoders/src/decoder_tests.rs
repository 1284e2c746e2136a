//! Tests for the storefront payload decoders and `DecoderRegistry` routing.
//!
//! Payloads mirror the shape stores actually post, trimmed to the fields
//! the decoders read plus some noise.

use serde_json::{Value, json};

use orderalert_common::types::Topic;

use crate::fulfillments::FulfillmentDecoder;
use crate::orders::OrderDecoder;
use crate::{DecoderRegistry, PayloadDecoder};

// ───────────────────────────── helpers ──────────────────────────────

fn cod_order() -> Value {
    json!({
        "id": 820982911946154508u64,
        "order_number": 1001,
        "name": "#1001",
        "total_price": "2899.00",
        "currency": "PKR",
        "financial_status": "cod",
        "payment_gateway_names": ["Cash on Delivery (COD)"],
        "customer": {
            "first_name": "Ayesha",
            "last_name": "Khan",
            "phone": "+92 300 1234567"
        },
        "line_items": [{ "title": "Lawn suit", "quantity": 1 }]
    })
}

// ═══════════════════════════════════════════════════════════════════
//  Order decoder
// ═══════════════════════════════════════════════════════════════════

#[test]
fn test_order_fields() {
    let snapshot = OrderDecoder::new().decode(&cod_order()).unwrap();
    assert_eq!(snapshot.customer_phone.as_deref(), Some("+923001234567"));
    assert_eq!(snapshot.first_name.as_deref(), Some("Ayesha"));
    assert_eq!(snapshot.order_number.as_deref(), Some("1001"));
    assert_eq!(snapshot.total.as_deref(), Some("2899.00"));
    assert_eq!(snapshot.currency.as_deref(), Some("PKR"));
    assert!(snapshot.is_cash_on_delivery());
    assert_eq!(snapshot.tracking_url, None);
}

#[test]
fn test_order_cod_detected_from_gateway_only() {
    let mut order = cod_order();
    order["financial_status"] = json!("pending");
    let snapshot = OrderDecoder::new().decode(&order).unwrap();
    assert!(snapshot.is_cash_on_delivery());
}

#[test]
fn test_prepaid_order_is_not_cod() {
    let mut order = cod_order();
    order["financial_status"] = json!("paid");
    order["payment_gateway_names"] = json!(["shopify_payments"]);
    let snapshot = OrderDecoder::new().decode(&order).unwrap();
    assert!(!snapshot.is_cash_on_delivery());
}

#[test]
fn test_order_phone_falls_back_to_billing_address() {
    let order = json!({
        "order_number": 1002,
        "customer": { "first_name": "Bilal" },
        "billing_address": { "phone": "+923331112222" }
    });
    let snapshot = OrderDecoder::new().decode(&order).unwrap();
    assert_eq!(snapshot.customer_phone.as_deref(), Some("+923331112222"));
}

#[test]
fn test_unusable_customer_phone_falls_through_to_shipping() {
    let order = json!({
        "order_number": 1004,
        "customer": { "first_name": "Bilal", "phone": "0300 1234567" },
        "billing_address": { "phone": "n/a" },
        "shipping_address": { "phone": "+92 333 111 2222" }
    });
    let snapshot = OrderDecoder::new().decode(&order).unwrap();
    assert_eq!(snapshot.customer_phone.as_deref(), Some("+923331112222"));
}

#[test]
fn test_order_without_phone() {
    let order = json!({ "order_number": 1003, "customer": { "first_name": "Sara" } });
    let snapshot = OrderDecoder::new().decode(&order).unwrap();
    assert_eq!(snapshot.customer_phone, None);
}

#[test]
fn test_order_number_from_name() {
    let order = json!({ "id": 1, "name": "#2044" });
    let snapshot = OrderDecoder::new().decode(&order).unwrap();
    assert_eq!(snapshot.order_number.as_deref(), Some("2044"));
}

#[test]
fn test_order_first_fulfillment_tracking_url() {
    let mut order = cod_order();
    order["fulfillments"] = json!([
        { "tracking_url": "https://track.example/abc" },
        { "tracking_url": "https://track.example/def" }
    ]);
    let snapshot = OrderDecoder::new().decode(&order).unwrap();
    assert_eq!(snapshot.tracking_url.as_deref(), Some("https://track.example/abc"));
}

#[test]
fn test_non_object_payload_ignored() {
    assert!(OrderDecoder::new().decode(&json!("nope")).is_none());
    assert!(OrderDecoder::new().decode(&json!({ "foo": 1 })).is_none());
}

// ═══════════════════════════════════════════════════════════════════
//  Fulfillment decoder
// ═══════════════════════════════════════════════════════════════════

#[test]
fn test_fulfillment_resource() {
    let payload = json!({
        "id": 255858046,
        "order_id": 450789469,
        "name": "#1001.1",
        "tracking_urls": ["https://track.example/xyz"],
        "destination": { "first_name": "Ayesha", "phone": "+923001234567" }
    });
    let snapshot = FulfillmentDecoder::new().decode(&payload).unwrap();
    assert_eq!(snapshot.order_number.as_deref(), Some("1001"));
    assert_eq!(snapshot.tracking_url.as_deref(), Some("https://track.example/xyz"));
    assert_eq!(snapshot.customer_phone.as_deref(), Some("+923001234567"));
    assert_eq!(snapshot.first_name.as_deref(), Some("Ayesha"));
}

#[test]
fn test_fulfillment_order_shaped_payload() {
    let mut order = cod_order();
    order["fulfillments"] = json!([{ "tracking_url": "https://track.example/abc" }]);
    let snapshot = FulfillmentDecoder::new().decode(&order).unwrap();
    assert_eq!(snapshot.order_number.as_deref(), Some("1001"));
    assert_eq!(snapshot.tracking_url.as_deref(), Some("https://track.example/abc"));
}

// ═══════════════════════════════════════════════════════════════════
//  Registry routing
// ═══════════════════════════════════════════════════════════════════

#[test]
fn test_registry_routes_by_topic() {
    let registry = DecoderRegistry::new();
    for topic in [Topic::OrderCreated, Topic::OrderUpdated, Topic::OrderCancelled] {
        assert!(registry.decode(topic, &cod_order()).is_some(), "{topic}");
    }

    let fulfillment = json!({ "order_id": 1, "tracking_url": "https://t.example/1" });
    assert!(registry.decode(Topic::FulfillmentCreated, &fulfillment).is_some());
    // The order decoder does not claim fulfillment-only payloads
    assert!(registry.decode(Topic::OrderCreated, &json!({ "tracking_url": "x" })).is_none());
}

#[test]
fn test_registry_covers_all_topics() {
    let topics = DecoderRegistry::new().supported_topics();
    for topic in Topic::ALL {
        assert!(topics.contains(&topic), "missing decoder for {topic}");
    }
}
