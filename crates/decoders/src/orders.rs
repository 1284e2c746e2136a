use serde_json::Value;

use orderalert_common::types::Topic;

use crate::{OrderSnapshot, PayloadDecoder, first_phone, first_text, text_at};

/// Decoder for order-shaped payloads.
///
/// Handles `orders/create`, `orders/updated` and `orders/cancelled`, all of
/// which carry the full order resource.
pub struct OrderDecoder;

impl OrderDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl Default for OrderDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl PayloadDecoder for OrderDecoder {
    fn topics(&self) -> &'static [Topic] {
        &[Topic::OrderCreated, Topic::OrderUpdated, Topic::OrderCancelled]
    }

    fn decode(&self, payload: &Value) -> Option<OrderSnapshot> {
        decode_order_shape(payload)
    }

    fn name(&self) -> &'static str {
        "Order"
    }
}

/// Decode an order resource. Shared with the fulfillment decoder, since some
/// stores post the parent order on fulfillment topics.
pub(crate) fn decode_order_shape(payload: &Value) -> Option<OrderSnapshot> {
    let order = payload.as_object()?;
    if !order.contains_key("order_number") && !order.contains_key("name") && !order.contains_key("id")
    {
        return None;
    }

    let customer_phone = first_phone(
        payload,
        &[
            &["customer", "phone"],
            &["billing_address", "phone"],
            &["shipping_address", "phone"],
            &["phone"],
        ],
    );

    let first_name = first_text(
        payload,
        &[
            &["customer", "first_name"],
            &["billing_address", "first_name"],
            &["shipping_address", "first_name"],
        ],
    );

    let order_number = text_at(payload, &["order_number"])
        .or_else(|| text_at(payload, &["name"]).map(|n| n.trim_start_matches('#').to_string()));

    let payment_gateways = payload
        .get("payment_gateway_names")
        .and_then(|v| v.as_array())
        .map(|names| {
            names
                .iter()
                .filter_map(|n| n.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    Some(OrderSnapshot {
        customer_phone,
        first_name,
        order_number,
        total: text_at(payload, &["total_price"]),
        currency: text_at(payload, &["currency"]),
        financial_status: text_at(payload, &["financial_status"]),
        payment_gateways,
        tracking_url: first_tracking_url(payload),
    })
}

fn first_tracking_url(payload: &Value) -> Option<String> {
    let first = payload.get("fulfillments")?.as_array()?.first()?;
    text_at(first, &["tracking_url"]).or_else(|| {
        first
            .get("tracking_urls")?
            .as_array()?
            .iter()
            .find_map(|u| u.as_str().filter(|s| !s.is_empty()).map(str::to_string))
    })
}
