//! Persistence seams used by the pipeline.
//!
//! Every store is an `async_trait` object so the pipeline can run on Postgres
//! ([`crate::pg::PgStore`]) or fully in memory ([`crate::memory::MemoryStore`]).

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use orderalert_common::error::AppError;
use orderalert_common::types::{
    DeliveryReceipt, Message, MessageStatus, RawEvent, Shop, ShopSettings, Template,
};

#[async_trait]
pub trait ShopStore: Send + Sync {
    async fn find_by_domain(&self, domain: &str) -> Result<Option<Shop>, AppError>;

    /// Saved settings, or `None` when the shop never configured any.
    async fn settings(&self, shop_id: Uuid) -> Result<Option<ShopSettings>, AppError>;

    async fn is_opted_out(&self, shop_id: Uuid, phone: &str) -> Result<bool, AppError>;

    /// Returns `false` if the phone had already opted out of this shop.
    async fn record_opt_out(
        &self,
        shop_id: Uuid,
        phone: &str,
        keyword: &str,
    ) -> Result<bool, AppError>;
}

#[async_trait]
pub trait TemplateStore: Send + Sync {
    /// Shop-scoped template with this key, else the global default. Inactive
    /// rows are returned as-is; callers decide what inactive means.
    async fn find_template(&self, key: &str, shop_id: Uuid) -> Result<Option<Template>, AppError>;
}

#[async_trait]
pub trait RawEventStore: Send + Sync {
    /// Returns `false` when a record with the same webhook id already exists.
    async fn insert_raw_event(&self, event: &RawEvent) -> Result<bool, AppError>;

    async fn find_raw_event(&self, webhook_id: &str) -> Result<Option<RawEvent>, AppError>;
}

/// A message about to be sent for the first time under a job id.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub id: Uuid,
    pub job_id: String,
    pub shop_id: Uuid,
    pub to_phone: String,
    pub template_key: String,
    pub body_text: String,
    pub variables: serde_json::Value,
    pub resend_of: Option<Uuid>,
}

/// Fields written together with a status transition.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub status: MessageStatus,
    pub provider_message_id: Option<String>,
    pub error: Option<String>,
    /// Count one more send attempt on this row.
    pub new_attempt: bool,
    pub at: DateTime<Utc>,
}

impl StatusUpdate {
    pub fn to(status: MessageStatus) -> Self {
        Self {
            status,
            provider_message_id: None,
            error: None,
            new_attempt: false,
            at: Utc::now(),
        }
    }

    pub fn with_provider_id(mut self, id: impl Into<String>) -> Self {
        self.provider_message_id = Some(id.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn at(mut self, at: DateTime<Utc>) -> Self {
        self.at = at;
        self
    }

    pub fn new_attempt(mut self) -> Self {
        self.new_attempt = true;
        self
    }
}

/// Apply `update` to an in-memory row: status, the matching timestamp
/// column, and any provided id or error.
pub fn apply_update(message: &mut Message, update: &StatusUpdate) {
    message.status = update.status;
    if let Some(id) = &update.provider_message_id {
        message.provider_message_id = Some(id.clone());
    }
    if let Some(error) = &update.error {
        message.error = Some(error.clone());
    }
    if update.new_attempt {
        message.attempts += 1;
    }
    match update.status {
        MessageStatus::Sent => message.sent_at = Some(update.at),
        MessageStatus::Delivered => message.delivered_at = Some(update.at),
        MessageStatus::Read => message.read_at = Some(update.at),
        MessageStatus::Failed => message.failed_at = Some(update.at),
        MessageStatus::Queued | MessageStatus::Sending => {}
    }
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn find_message(&self, id: Uuid) -> Result<Option<Message>, AppError>;

    async fn find_by_job_id(&self, job_id: &str) -> Result<Option<Message>, AppError>;

    async fn find_by_provider_id(&self, provider_message_id: &str)
    -> Result<Option<Message>, AppError>;

    /// Insert a row in `sending`. Returns `None` if a row for the job id exists.
    async fn create_sending(&self, message: &NewMessage) -> Result<Option<Message>, AppError>;

    /// Single-row conditional update: applies only while the row is still in
    /// `expected`. Returns whether it applied.
    async fn update_status(
        &self,
        id: Uuid,
        expected: MessageStatus,
        update: &StatusUpdate,
    ) -> Result<bool, AppError>;

    /// Append a provider callback to the audit trail.
    async fn record_receipt(
        &self,
        message_id: Uuid,
        receipt: &DeliveryReceipt,
        applied: bool,
    ) -> Result<(), AppError>;

    /// Hold a receipt whose provider id matches no message yet. The provider
    /// can report delivery before the send call has returned.
    async fn park_receipt(&self, receipt: &DeliveryReceipt) -> Result<(), AppError>;

    /// Remove and return parked receipts for this provider id, oldest first.
    async fn take_parked_receipts(
        &self,
        provider_message_id: &str,
    ) -> Result<Vec<DeliveryReceipt>, AppError>;

    /// Shop whose most recent message went to this phone.
    async fn latest_shop_for_phone(&self, phone: &str) -> Result<Option<Uuid>, AppError>;

    async fn list_failed(&self, shop_id: Option<Uuid>, limit: i64) -> Result<Vec<Message>, AppError>;
}

/// Remembers processed identifiers (webhook ids, event ids) for a while.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    async fn contains(&self, key: &str) -> Result<bool, AppError>;

    /// Record `key` for `ttl`. Returns `false` if it was already recorded.
    async fn record(&self, key: &str, ttl: Duration) -> Result<bool, AppError>;

    /// Set `key` to expire after `ttl` from now, recorded or not.
    async fn refresh(&self, key: &str, ttl: Duration) -> Result<(), AppError>;

    /// Forget `key`.
    async fn release(&self, key: &str) -> Result<(), AppError>;
}

pub fn webhook_key(webhook_id: &str) -> String {
    format!("webhook:{}", webhook_id)
}

pub fn event_key(webhook_id: &str) -> String {
    format!("event:{}", webhook_id)
}
