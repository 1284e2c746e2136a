//! Storefront payload decoders.
//!
//! Webhook bodies arrive as loosely-typed JSON whose shape depends on the
//! topic. Each decoder pulls the fields notifications care about into an
//! [`OrderSnapshot`]; the [`DecoderRegistry`] routes a topic to its decoder.

pub mod fulfillments;
pub mod orders;
pub mod phone;

#[cfg(test)]
mod decoder_tests;

use serde::Serialize;
use serde_json::Value;

use orderalert_common::types::Topic;

/// The parts of an order payload used to build customer notifications.
///
/// Every field is optional: storefronts omit data freely and the rule engine
/// decides what is mandatory.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OrderSnapshot {
    /// Customer phone, already normalised to E.164.
    pub customer_phone: Option<String>,
    pub first_name: Option<String>,
    pub order_number: Option<String>,
    /// Order total as sent by the store (e.g. "2899.00").
    pub total: Option<String>,
    pub currency: Option<String>,
    pub financial_status: Option<String>,
    pub payment_gateways: Vec<String>,
    /// Tracking URL of the first fulfillment, if any.
    pub tracking_url: Option<String>,
}

impl OrderSnapshot {
    /// Whether the customer pays on delivery.
    ///
    /// Stores flag this either through the financial status or through the
    /// name of the payment gateway.
    pub fn is_cash_on_delivery(&self) -> bool {
        if self
            .financial_status
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case("cod"))
        {
            return true;
        }
        self.payment_gateways.iter().any(|g| {
            let g = g.to_ascii_lowercase();
            g == "cod" || g.contains("cash on delivery")
        })
    }
}

/// Trait that all topic-specific decoders must implement.
pub trait PayloadDecoder: Send + Sync {
    /// Topics whose payloads this decoder understands.
    fn topics(&self) -> &'static [Topic];

    /// Attempt to decode a raw payload into an `OrderSnapshot`.
    /// Returns `None` if the payload is not something this decoder recognises.
    fn decode(&self, payload: &Value) -> Option<OrderSnapshot>;

    /// Human-readable name for this decoder.
    fn name(&self) -> &'static str;
}

/// Registry of all available decoders, used by the event processor.
pub struct DecoderRegistry {
    decoders: Vec<Box<dyn PayloadDecoder>>,
}

impl DecoderRegistry {
    pub fn new() -> Self {
        Self {
            decoders: vec![
                Box::new(orders::OrderDecoder::new()),
                Box::new(fulfillments::FulfillmentDecoder::new()),
            ],
        }
    }

    /// Decode a payload with the first registered decoder handling `topic`.
    pub fn decode(&self, topic: Topic, payload: &Value) -> Option<OrderSnapshot> {
        for decoder in self.decoders.iter().filter(|d| d.topics().contains(&topic)) {
            if let Some(snapshot) = decoder.decode(payload) {
                tracing::debug!(decoder = decoder.name(), topic = %topic, "Decoded payload");
                return Some(snapshot);
            }
        }
        None
    }

    /// Topics covered by at least one decoder.
    pub fn supported_topics(&self) -> Vec<Topic> {
        let mut topics: Vec<Topic> = Vec::new();
        for topic in self.decoders.iter().flat_map(|d| d.topics().iter().copied()) {
            if !topics.contains(&topic) {
                topics.push(topic);
            }
        }
        topics
    }
}

impl Default for DecoderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Read a scalar at `path` as text. Numbers are rendered without quotes,
/// empty strings count as absent.
pub(crate) fn text_at(value: &Value, path: &[&str]) -> Option<String> {
    let mut current = value;
    for key in path {
        current = current.get(key)?;
    }
    match current {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// First non-empty value among several candidate paths.
pub(crate) fn first_text(value: &Value, paths: &[&[&str]]) -> Option<String> {
    paths.iter().find_map(|path| text_at(value, path))
}

/// First candidate phone that normalises to E.164. An unusable value at one
/// path does not hide a good one further down.
pub(crate) fn first_phone(value: &Value, paths: &[&[&str]]) -> Option<String> {
    paths
        .iter()
        .filter_map(|path| text_at(value, path))
        .find_map(|raw| phone::normalize_e164(&raw))
}
