use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use orderalert_common::error::AppError;
use orderalert_common::types::{
    DeliveryReceipt, Message, MessageStatus, RawEvent, Shop, ShopSettings, Template,
};

use crate::store::{
    MessageStore, NewMessage, RawEventStore, ShopStore, StatusUpdate, TemplateStore,
    apply_update,
};

/// A recorded provider callback.
#[derive(Debug, Clone)]
pub struct ReceiptRecord {
    pub message_id: Uuid,
    pub receipt: DeliveryReceipt,
    pub applied: bool,
}

#[derive(Default)]
struct State {
    shops: Vec<Shop>,
    settings: HashMap<Uuid, ShopSettings>,
    opt_outs: HashMap<(Uuid, String), String>,
    templates: Vec<Template>,
    raw_events: Vec<RawEvent>,
    messages: Vec<Message>,
    receipts: Vec<ReceiptRecord>,
    parked: Vec<DeliveryReceipt>,
}

/// Every store trait over process memory, for tests and local runs.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_shop(&self, domain: &str, timezone: &str) -> Shop {
        let shop = Shop {
            id: Uuid::new_v4(),
            domain: domain.to_string(),
            timezone: timezone.to_string(),
            created_at: Utc::now(),
        };
        self.state.lock().await.shops.push(shop.clone());
        shop
    }

    pub async fn put_settings(&self, settings: ShopSettings) {
        self.state
            .lock()
            .await
            .settings
            .insert(settings.shop_id, settings);
    }

    pub async fn add_template(
        &self,
        shop_id: Option<Uuid>,
        key: &str,
        body: &str,
        variables: &[&str],
        active: bool,
    ) -> Template {
        let template = Template {
            id: Uuid::new_v4(),
            shop_id,
            key: key.to_string(),
            locale: "en".to_string(),
            body: body.to_string(),
            variables: variables.iter().map(|v| v.to_string()).collect(),
            active,
        };
        let mut state = self.state.lock().await;
        state
            .templates
            .retain(|t| !(t.shop_id == shop_id && t.key == key));
        state.templates.push(template.clone());
        template
    }

    /// The global defaults shipped with the initial migration.
    pub async fn seed_default_templates(&self) {
        for (key, body, vars) in DEFAULT_TEMPLATES {
            self.add_template(None, key, body, vars, true).await;
        }
    }

    pub async fn messages(&self) -> Vec<Message> {
        self.state.lock().await.messages.clone()
    }

    pub async fn raw_events(&self) -> Vec<RawEvent> {
        self.state.lock().await.raw_events.clone()
    }

    pub async fn receipts(&self) -> Vec<ReceiptRecord> {
        self.state.lock().await.receipts.clone()
    }

    pub async fn parked_receipts(&self) -> Vec<DeliveryReceipt> {
        self.state.lock().await.parked.clone()
    }
}

const DEFAULT_TEMPLATES: [(&str, &str, &[&str]); 5] = [
    (
        "order_created_v1",
        "Thanks, {{first_name}}! Your order #{{order_number}} ({{currency}} {{total}}) is in. We'll update you here. Reply HELP for support.",
        &["first_name", "order_number", "total", "currency"],
    ),
    (
        "order_confirm_v1",
        "Please confirm order #{{order_number}}. Reply 1 to confirm, 2 to cancel.",
        &["order_number"],
    ),
    (
        "order_dispatched_v1",
        "Good news! Order #{{order_number}} is on the way. Track: {{tracking_url}}",
        &["order_number", "tracking_url"],
    ),
    (
        "order_cancelled_v1",
        "We're sorry, order #{{order_number}} was cancelled. If this seems wrong, reply HELP.",
        &["order_number"],
    ),
    (
        "abandoned_cart_v1",
        "Still thinking it over? Your items are waiting: {{cart_link}}. Reply STOP to opt out.",
        &["cart_link"],
    ),
];

#[async_trait]
impl ShopStore for MemoryStore {
    async fn find_by_domain(&self, domain: &str) -> Result<Option<Shop>, AppError> {
        let state = self.state.lock().await;
        Ok(state.shops.iter().find(|s| s.domain == domain).cloned())
    }

    async fn settings(&self, shop_id: Uuid) -> Result<Option<ShopSettings>, AppError> {
        Ok(self.state.lock().await.settings.get(&shop_id).cloned())
    }

    async fn is_opted_out(&self, shop_id: Uuid, phone: &str) -> Result<bool, AppError> {
        let state = self.state.lock().await;
        Ok(state.opt_outs.contains_key(&(shop_id, phone.to_string())))
    }

    async fn record_opt_out(
        &self,
        shop_id: Uuid,
        phone: &str,
        keyword: &str,
    ) -> Result<bool, AppError> {
        let mut state = self.state.lock().await;
        let key = (shop_id, phone.to_string());
        if state.opt_outs.contains_key(&key) {
            return Ok(false);
        }
        state.opt_outs.insert(key, keyword.to_string());
        Ok(true)
    }
}

#[async_trait]
impl TemplateStore for MemoryStore {
    async fn find_template(&self, key: &str, shop_id: Uuid) -> Result<Option<Template>, AppError> {
        let state = self.state.lock().await;
        let scoped = state
            .templates
            .iter()
            .find(|t| t.key == key && t.shop_id == Some(shop_id));
        let default = || {
            state
                .templates
                .iter()
                .find(|t| t.key == key && t.shop_id.is_none())
        };
        Ok(scoped.or_else(default).cloned())
    }
}

#[async_trait]
impl RawEventStore for MemoryStore {
    async fn insert_raw_event(&self, event: &RawEvent) -> Result<bool, AppError> {
        let mut state = self.state.lock().await;
        if state
            .raw_events
            .iter()
            .any(|e| e.webhook_id == event.webhook_id)
        {
            return Ok(false);
        }
        state.raw_events.push(event.clone());
        Ok(true)
    }

    async fn find_raw_event(&self, webhook_id: &str) -> Result<Option<RawEvent>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .raw_events
            .iter()
            .find(|e| e.webhook_id == webhook_id)
            .cloned())
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn find_message(&self, id: Uuid) -> Result<Option<Message>, AppError> {
        let state = self.state.lock().await;
        Ok(state.messages.iter().find(|m| m.id == id).cloned())
    }

    async fn find_by_job_id(&self, job_id: &str) -> Result<Option<Message>, AppError> {
        let state = self.state.lock().await;
        Ok(state.messages.iter().find(|m| m.job_id == job_id).cloned())
    }

    async fn find_by_provider_id(
        &self,
        provider_message_id: &str,
    ) -> Result<Option<Message>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .messages
            .iter()
            .find(|m| m.provider_message_id.as_deref() == Some(provider_message_id))
            .cloned())
    }

    async fn create_sending(&self, new: &NewMessage) -> Result<Option<Message>, AppError> {
        let mut state = self.state.lock().await;
        if state.messages.iter().any(|m| m.job_id == new.job_id) {
            return Ok(None);
        }

        let message = Message {
            id: new.id,
            job_id: new.job_id.clone(),
            shop_id: new.shop_id,
            to_phone: new.to_phone.clone(),
            template_key: new.template_key.clone(),
            body_text: new.body_text.clone(),
            variables: new.variables.clone(),
            status: MessageStatus::Sending,
            attempts: 1,
            provider_message_id: None,
            error: None,
            resend_of: new.resend_of,
            created_at: Utc::now(),
            sent_at: None,
            delivered_at: None,
            read_at: None,
            failed_at: None,
        };
        state.messages.push(message.clone());
        Ok(Some(message))
    }

    async fn update_status(
        &self,
        id: Uuid,
        expected: MessageStatus,
        update: &StatusUpdate,
    ) -> Result<bool, AppError> {
        let mut state = self.state.lock().await;
        match state
            .messages
            .iter_mut()
            .find(|m| m.id == id && m.status == expected)
        {
            Some(message) => {
                apply_update(message, update);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn record_receipt(
        &self,
        message_id: Uuid,
        receipt: &DeliveryReceipt,
        applied: bool,
    ) -> Result<(), AppError> {
        self.state.lock().await.receipts.push(ReceiptRecord {
            message_id,
            receipt: receipt.clone(),
            applied,
        });
        Ok(())
    }

    async fn park_receipt(&self, receipt: &DeliveryReceipt) -> Result<(), AppError> {
        self.state.lock().await.parked.push(receipt.clone());
        Ok(())
    }

    async fn take_parked_receipts(
        &self,
        provider_message_id: &str,
    ) -> Result<Vec<DeliveryReceipt>, AppError> {
        let mut state = self.state.lock().await;
        let (taken, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.parked)
            .into_iter()
            .partition(|r| r.provider_message_id == provider_message_id);
        state.parked = kept;
        Ok(taken)
    }

    async fn latest_shop_for_phone(&self, phone: &str) -> Result<Option<Uuid>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .messages
            .iter()
            .filter(|m| m.to_phone == phone)
            .max_by_key(|m| m.created_at)
            .map(|m| m.shop_id))
    }

    async fn list_failed(
        &self,
        shop_id: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<Message>, AppError> {
        let state = self.state.lock().await;
        let mut failed: Vec<Message> = state
            .messages
            .iter()
            .filter(|m| m.status == MessageStatus::Failed)
            .filter(|m| shop_id.is_none_or(|id| m.shop_id == id))
            .cloned()
            .collect();
        failed.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        failed.truncate(limit.max(0) as usize);
        Ok(failed)
    }
}
