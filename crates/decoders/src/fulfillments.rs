use serde_json::Value;

use orderalert_common::types::Topic;

use crate::orders::decode_order_shape;
use crate::{OrderSnapshot, PayloadDecoder, first_phone, text_at};

/// Decoder for `fulfillments/create`.
///
/// Accepts both the fulfillment resource (`tracking_url`, `destination`,
/// `name` like `#1001.1`) and stores that post the parent order instead.
pub struct FulfillmentDecoder;

impl FulfillmentDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FulfillmentDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl PayloadDecoder for FulfillmentDecoder {
    fn topics(&self) -> &'static [Topic] {
        &[Topic::FulfillmentCreated]
    }

    fn decode(&self, payload: &Value) -> Option<OrderSnapshot> {
        let object = payload.as_object()?;
        if object.contains_key("fulfillments") || object.contains_key("customer") {
            return decode_order_shape(payload);
        }
        if !object.contains_key("order_id") && !object.contains_key("tracking_url") {
            return None;
        }

        let tracking_url = text_at(payload, &["tracking_url"]).or_else(|| {
            payload
                .get("tracking_urls")?
                .as_array()?
                .iter()
                .find_map(|u| u.as_str().filter(|s| !s.is_empty()).map(str::to_string))
        });

        // "#1001.1" is the first fulfillment of order 1001
        let order_number = text_at(payload, &["name"]).map(|name| {
            let name = name.trim_start_matches('#');
            name.split('.').next().unwrap_or(name).to_string()
        });

        Some(OrderSnapshot {
            customer_phone: first_phone(payload, &[&["destination", "phone"], &["phone"]]),
            first_name: text_at(payload, &["destination", "first_name"]),
            order_number,
            tracking_url,
            ..OrderSnapshot::default()
        })
    }

    fn name(&self) -> &'static str {
        "Fulfillment"
    }
}
