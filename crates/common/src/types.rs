use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

/// Storefront webhook topics the pipeline subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    #[serde(rename = "orders/create")]
    OrderCreated,
    #[serde(rename = "orders/updated")]
    OrderUpdated,
    #[serde(rename = "orders/cancelled")]
    OrderCancelled,
    #[serde(rename = "fulfillments/create")]
    FulfillmentCreated,
}

impl Topic {
    pub const ALL: [Topic; 4] = [
        Topic::OrderCreated,
        Topic::OrderUpdated,
        Topic::OrderCancelled,
        Topic::FulfillmentCreated,
    ];

    /// Wire name, as sent in the topic header and used in the route path.
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::OrderCreated => "orders/create",
            Topic::OrderUpdated => "orders/updated",
            Topic::OrderCancelled => "orders/cancelled",
            Topic::FulfillmentCreated => "fulfillments/create",
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topic {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Topic::ALL
            .into_iter()
            .find(|t| t.as_str() == s.trim())
            .ok_or_else(|| AppError::Validation(format!("Unsupported webhook topic '{}'", s)))
    }
}

/// A connected storefront.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Shop {
    pub id: Uuid,
    pub domain: String,
    pub timezone: String,
    pub created_at: DateTime<Utc>,
}

/// Per-shop notification settings, edited outside the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ShopSettings {
    pub shop_id: Uuid,
    /// Delay before the COD confirmation message is sent.
    pub confirm_delay_minutes: i32,
    /// Start of the sending window in the shop's local time.
    pub business_hours_start: Option<NaiveTime>,
    /// End of the sending window in the shop's local time.
    pub business_hours_end: Option<NaiveTime>,
    /// Inbound replies matching one of these opt the customer out.
    pub opt_out_keywords: Vec<String>,
}

impl ShopSettings {
    /// Settings applied to a shop that has never saved any.
    pub fn defaults(shop_id: Uuid, confirm_delay_minutes: u32) -> Self {
        Self {
            shop_id,
            confirm_delay_minutes: confirm_delay_minutes as i32,
            business_hours_start: None,
            business_hours_end: None,
            opt_out_keywords: vec!["STOP".to_string(), "UNSUBSCRIBE".to_string()],
        }
    }

    pub fn confirm_delay(&self) -> Duration {
        Duration::from_secs(self.confirm_delay_minutes.max(0) as u64 * 60)
    }
}

/// Audit record of an admitted webhook. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RawEvent {
    pub id: Uuid,
    pub shop_id: Uuid,
    pub topic: String,
    pub webhook_id: String,
    pub signature: String,
    pub payload: serde_json::Value,
    pub received_at: DateTime<Utc>,
}

/// Event Queue payload built from an admitted webhook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    pub id: Uuid,
    pub webhook_id: String,
    pub topic: Topic,
    pub shop_domain: String,
    pub occurred_at: DateTime<Utc>,
    pub raw_payload: serde_json::Value,
}

/// Job id under which an event is enqueued.
///
/// Equal ids are the same logical unit of work: the queue drops a second
/// submission, so concurrent duplicate deliveries of one webhook collapse.
pub fn event_job_id(event: &NormalizedEvent) -> String {
    event.webhook_id.clone()
}

/// Job id of the message a webhook schedules for a given template.
///
/// Deterministic, so a re-run of the event processor re-submits the same ids.
pub fn message_job_id(webhook_id: &str, template_key: &str) -> String {
    format!("{}:{}", webhook_id, template_key)
}

/// Message Queue payload: one customer notification to render and send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageJob {
    pub shop_id: Uuid,
    /// E.164 destination.
    pub to_phone: String,
    pub template_key: String,
    pub variables: BTreeMap<String, String>,
    /// Scheduling delay requested by the rule that produced this job.
    #[serde(default)]
    pub delay_ms: Option<u64>,
    /// Webhook this notification originates from, when there is one.
    #[serde(default)]
    pub source_webhook_id: Option<String>,
    /// Failed message this job re-attempts (operator resend).
    #[serde(default)]
    pub resend_of: Option<Uuid>,
}

/// A message template. `shop_id = None` marks the global default.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Template {
    pub id: Uuid,
    pub shop_id: Option<Uuid>,
    pub key: String,
    pub locale: String,
    pub body: String,
    /// Variables the body requires.
    pub variables: Vec<String>,
    pub active: bool,
}

/// Delivery status of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Queued,
    Sending,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageStatus::Queued => write!(f, "queued"),
            MessageStatus::Sending => write!(f, "sending"),
            MessageStatus::Sent => write!(f, "sent"),
            MessageStatus::Delivered => write!(f, "delivered"),
            MessageStatus::Read => write!(f, "read"),
            MessageStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One send attempt of a notification. Rows are never deleted.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Message {
    pub id: Uuid,
    /// Message Queue job that produced this row (unique).
    pub job_id: String,
    pub shop_id: Uuid,
    pub to_phone: String,
    pub template_key: String,
    pub body_text: String,
    pub variables: serde_json::Value,
    pub status: MessageStatus,
    pub attempts: i32,
    pub provider_message_id: Option<String>,
    pub error: Option<String>,
    pub resend_of: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}

impl Message {
    /// Whether a redelivered job must not send this message again.
    ///
    /// Once the provider accepted the message it counts as sent, even if a
    /// later receipt reports a delivery failure.
    pub fn is_handled(&self) -> bool {
        if self.provider_message_id.is_some() {
            return true;
        }
        match self.status {
            MessageStatus::Sent | MessageStatus::Delivered | MessageStatus::Read => true,
            MessageStatus::Queued | MessageStatus::Sending | MessageStatus::Failed => false,
        }
    }
}

/// Connection state of a messaging session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Ready,
    Pairing,
    Down,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Ready => write!(f, "ready"),
            ConnectionState::Pairing => write!(f, "pairing"),
            ConnectionState::Down => write!(f, "down"),
        }
    }
}

/// Status reported by a provider delivery callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ReceiptStatus {
    Delivered,
    Read,
    Failed,
}

impl std::fmt::Display for ReceiptStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReceiptStatus::Delivered => write!(f, "delivered"),
            ReceiptStatus::Read => write!(f, "read"),
            ReceiptStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Asynchronous delivery/read/failure callback from the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub provider_message_id: String,
    pub status: ReceiptStatus,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub occurred_at: Option<DateTime<Utc>>,
}

/// A message a customer sent back to the shop's number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// E.164 sender.
    pub from: String,
    pub text: String,
    #[serde(default)]
    pub provider_message_id: Option<String>,
}
