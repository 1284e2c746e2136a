//! Webhook admission.
//!
//! Turns a signed storefront webhook into a queued [`NormalizedEvent`].
//! The webhook id is claimed first with a short-lived key, then the audit
//! record is written and the event enqueued, and only then is the key kept
//! for the full retention. A failure releases the claim; a crash lets it
//! lapse, so the storefront's redelivery re-submits the (deduplicated) job.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use orderalert_common::error::AppError;
use orderalert_common::types::{NormalizedEvent, RawEvent, Topic, event_job_id};
use orderalert_queue::{EnqueueOutcome, Queue};

use crate::signature;
use crate::store::{IdempotencyStore, RawEventStore, ShopStore, webhook_key};

/// How long an in-flight admission holds the webhook id.
const CLAIM_TTL: Duration = Duration::from_secs(60);

/// Header values and body of an inbound webhook, as received.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebhookRequest<'a> {
    pub topic: Option<&'a str>,
    pub shop_domain: Option<&'a str>,
    pub webhook_id: Option<&'a str>,
    pub signature: Option<&'a str>,
    pub body: &'a [u8],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionOutcome {
    /// New webhook, event queued for processing.
    Accepted { webhook_id: String, event_id: Uuid },
    /// Already admitted; nothing new happened.
    Duplicate { webhook_id: String },
}

pub struct WebhookAdmission {
    secret: Vec<u8>,
    shops: Arc<dyn ShopStore>,
    raw_events: Arc<dyn RawEventStore>,
    idempotency: Arc<dyn IdempotencyStore>,
    events: Queue<NormalizedEvent>,
    idempotency_ttl: Duration,
}

impl WebhookAdmission {
    pub fn new(
        secret: impl Into<Vec<u8>>,
        shops: Arc<dyn ShopStore>,
        raw_events: Arc<dyn RawEventStore>,
        idempotency: Arc<dyn IdempotencyStore>,
        events: Queue<NormalizedEvent>,
        idempotency_ttl: Duration,
    ) -> Self {
        Self {
            secret: secret.into(),
            shops,
            raw_events,
            idempotency,
            events,
            idempotency_ttl,
        }
    }

    /// Admit one webhook delivery. `route_topic` is the topic implied by the
    /// endpoint, if any; a header naming a different topic is rejected.
    pub async fn admit(
        &self,
        route_topic: Option<Topic>,
        request: WebhookRequest<'_>,
    ) -> Result<AdmissionOutcome, AppError> {
        let signature = request
            .signature
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| AppError::Authentication("Missing webhook signature".to_string()))?;

        if !signature::verify(&self.secret, request.body, signature) {
            tracing::warn!(
                shop = request.shop_domain.unwrap_or("-"),
                webhook_id = request.webhook_id.unwrap_or("-"),
                "Webhook signature mismatch"
            );
            return Err(AppError::InvalidSignature(
                "Webhook signature does not match body".to_string(),
            ));
        }

        let topic_header = required_header(request.topic, "topic")?;
        let shop_domain = required_header(request.shop_domain, "shop domain")?;
        let webhook_id = required_header(request.webhook_id, "webhook id")?;

        let topic: Topic = topic_header.parse()?;
        if let Some(expected) = route_topic {
            if expected != topic {
                return Err(AppError::Validation(format!(
                    "Topic header '{}' does not match endpoint '{}'",
                    topic, expected
                )));
            }
        }

        let payload: serde_json::Value = serde_json::from_slice(request.body)
            .map_err(|e| AppError::Validation(format!("Webhook body is not JSON: {}", e)))?;

        // Claiming the key is atomic, so of two concurrent deliveries exactly
        // one goes on. The short claim lapses if this process dies midway.
        let key = webhook_key(webhook_id);
        if !self.idempotency.record(&key, CLAIM_TTL).await? {
            tracing::debug!(webhook_id, shop = shop_domain, "Duplicate webhook ignored");
            return Ok(AdmissionOutcome::Duplicate {
                webhook_id: webhook_id.to_string(),
            });
        }

        let admitted = self
            .persist_and_enqueue(topic, shop_domain, webhook_id, signature, payload)
            .await;
        let (event, shop_domain, enqueued) = match admitted {
            Ok(admitted) => admitted,
            Err(err) => {
                if let Err(release_err) = self.idempotency.release(&key).await {
                    tracing::warn!(webhook_id, error = %release_err, "Failed to release webhook claim");
                }
                return Err(err);
            }
        };

        self.idempotency.refresh(&key, self.idempotency_ttl).await?;

        if enqueued == EnqueueOutcome::Duplicate {
            tracing::debug!(webhook_id, shop = %shop_domain, "Webhook already admitted");
            return Ok(AdmissionOutcome::Duplicate {
                webhook_id: webhook_id.to_string(),
            });
        }

        tracing::info!(
            webhook_id,
            shop = %shop_domain,
            topic = %topic,
            event_id = %event.id,
            "Webhook admitted"
        );

        Ok(AdmissionOutcome::Accepted {
            webhook_id: webhook_id.to_string(),
            event_id: event.id,
        })
    }

    /// Audit record, then the event job. A raw event left by an earlier,
    /// interrupted delivery is kept and the job submitted again.
    async fn persist_and_enqueue(
        &self,
        topic: Topic,
        shop_domain: &str,
        webhook_id: &str,
        signature: &str,
        payload: serde_json::Value,
    ) -> Result<(NormalizedEvent, String, EnqueueOutcome), AppError> {
        let shop = self
            .shops
            .find_by_domain(shop_domain)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Unknown shop '{}'", shop_domain)))?;

        let received_at = Utc::now();
        let raw = RawEvent {
            id: Uuid::new_v4(),
            shop_id: shop.id,
            topic: topic.to_string(),
            webhook_id: webhook_id.to_string(),
            signature: signature.to_string(),
            payload: payload.clone(),
            received_at,
        };
        if !self.raw_events.insert_raw_event(&raw).await? {
            tracing::info!(webhook_id, shop = %shop.domain, "Raw event exists, re-submitting event job");
        }

        let event = NormalizedEvent {
            id: Uuid::new_v4(),
            webhook_id: webhook_id.to_string(),
            topic,
            shop_domain: shop.domain.clone(),
            occurred_at: occurred_at(&payload).unwrap_or(received_at),
            raw_payload: payload,
        };

        let enqueued = self
            .events
            .submit(&event_job_id(&event), &event)
            .await
            .map_err(crate::queue_error)?;

        Ok((event, shop.domain, enqueued))
    }
}

fn required_header<'a>(value: Option<&'a str>, name: &str) -> Result<&'a str, AppError> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::Validation(format!("Missing webhook {} header", name)))
}

/// Event time from the payload's own timestamps, when present.
fn occurred_at(payload: &serde_json::Value) -> Option<DateTime<Utc>> {
    ["updated_at", "created_at"].iter().find_map(|key| {
        payload
            .get(key)
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    })
}
