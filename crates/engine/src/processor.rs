//! Event processing pipeline (worker pool A).
//!
//! Receives normalized webhook events from the event queue and:
//! 1. Resolves the shop and its settings
//! 2. Decodes the payload into an order snapshot
//! 3. Plans notifications from the rule table, gated by business hours
//! 4. Submits one message job per planned notification

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use chrono_tz::Tz;

use orderalert_common::error::AppError;
use orderalert_common::types::{MessageJob, NormalizedEvent, ShopSettings, message_job_id};
use orderalert_decoders::DecoderRegistry;
use orderalert_queue::{EnqueueOutcome, Job, JobError, JobHandler, Queue};

use crate::rules;
use crate::schedule;
use crate::store::{IdempotencyStore, ShopStore, event_key};

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// COD confirmation delay for shops without a settings row.
    pub default_confirm_delay_minutes: u32,
    /// Timezone for shops whose recorded zone does not parse.
    pub default_timezone: Tz,
    pub idempotency_ttl: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            default_confirm_delay_minutes: 120,
            default_timezone: chrono_tz::Asia::Karachi,
            idempotency_ttl: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoPhone,
    UnrecognizedPayload,
    OptedOut,
    NoRule,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Message job ids submitted (duplicates of earlier runs included).
    Scheduled(Vec<String>),
    Skipped(SkipReason),
    /// This webhook's event was fully processed before.
    AlreadyProcessed,
}

/// Central event processor that turns events into message jobs.
pub struct EventProcessor {
    shops: Arc<dyn ShopStore>,
    idempotency: Arc<dyn IdempotencyStore>,
    messages: Queue<MessageJob>,
    decoders: DecoderRegistry,
    config: ProcessorConfig,
}

impl EventProcessor {
    pub fn new(
        shops: Arc<dyn ShopStore>,
        idempotency: Arc<dyn IdempotencyStore>,
        messages: Queue<MessageJob>,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            shops,
            idempotency,
            messages,
            decoders: DecoderRegistry::new(),
            config,
        }
    }

    /// Process one event. Safe to run again for the same webhook: message job
    /// ids are derived from the webhook id, so re-submissions are dropped.
    pub async fn process(&self, event: &NormalizedEvent) -> Result<ProcessOutcome, AppError> {
        let done_key = event_key(&event.webhook_id);
        if self.idempotency.contains(&done_key).await? {
            tracing::debug!(webhook_id = %event.webhook_id, "Event already processed");
            return Ok(ProcessOutcome::AlreadyProcessed);
        }

        let outcome = self.plan_and_submit(event).await?;
        self.idempotency
            .record(&done_key, self.config.idempotency_ttl)
            .await?;
        Ok(outcome)
    }

    async fn plan_and_submit(&self, event: &NormalizedEvent) -> Result<ProcessOutcome, AppError> {
        let shop = self
            .shops
            .find_by_domain(&event.shop_domain)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Unknown shop '{}'", event.shop_domain)))?;

        if !rules::has_actions(event.topic) {
            tracing::debug!(topic = %event.topic, shop = %shop.domain, "No rule for topic");
            return Ok(ProcessOutcome::Skipped(SkipReason::NoRule));
        }

        let Some(snapshot) = self.decoders.decode(event.topic, &event.raw_payload) else {
            tracing::warn!(
                webhook_id = %event.webhook_id,
                topic = %event.topic,
                "Payload not recognised, no notification scheduled"
            );
            return Ok(ProcessOutcome::Skipped(SkipReason::UnrecognizedPayload));
        };

        let Some(phone) = snapshot.customer_phone.clone() else {
            tracing::info!(
                webhook_id = %event.webhook_id,
                shop = %shop.domain,
                "No customer phone on event, skipping"
            );
            return Ok(ProcessOutcome::Skipped(SkipReason::NoPhone));
        };

        if self.shops.is_opted_out(shop.id, &phone).await? {
            tracing::info!(webhook_id = %event.webhook_id, shop = %shop.domain, "Customer opted out");
            return Ok(ProcessOutcome::Skipped(SkipReason::OptedOut));
        }

        let settings = match self.shops.settings(shop.id).await? {
            Some(settings) => settings,
            None => ShopSettings::defaults(shop.id, self.config.default_confirm_delay_minutes),
        };
        let tz = schedule::parse_timezone(&shop.timezone, self.config.default_timezone);
        let window = settings.business_hours_start.zip(settings.business_hours_end);

        let variables = rules::template_variables(&snapshot);
        let planned = rules::plan(event.topic, &snapshot, &settings);
        let now = Utc::now();

        let mut job_ids = Vec::with_capacity(planned.len());
        for action in planned {
            let delay = schedule::gated_delay(now, action.delay, tz, window);
            let job_id = message_job_id(&event.webhook_id, action.template_key);
            let job = MessageJob {
                shop_id: shop.id,
                to_phone: phone.clone(),
                template_key: action.template_key.to_string(),
                variables: variables.clone(),
                delay_ms: (!delay.is_zero()).then(|| delay.as_millis() as u64),
                source_webhook_id: Some(event.webhook_id.clone()),
                resend_of: None,
            };

            let outcome = self
                .messages
                .submit_delayed(&job_id, &job, delay)
                .await
                .map_err(crate::queue_error)?;

            tracing::info!(
                job_id = %job_id,
                template = action.template_key,
                shop = %shop.domain,
                delay_secs = delay.as_secs(),
                duplicate = outcome == EnqueueOutcome::Duplicate,
                "Message job scheduled"
            );
            job_ids.push(job_id);
        }

        Ok(ProcessOutcome::Scheduled(job_ids))
    }
}

#[async_trait]
impl JobHandler<NormalizedEvent> for EventProcessor {
    async fn handle(&self, job: &Job<NormalizedEvent>) -> Result<(), JobError> {
        self.process(&job.payload)
            .await
            .map(|_| ())
            .map_err(crate::job_error)
    }
}
