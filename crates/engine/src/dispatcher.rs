//! Message dispatcher (worker pool B).
//!
//! Renders a message job's template, keeps one `messages` row per job id and
//! drives it through `sending -> sent | failed`. A redelivered job whose row
//! the provider already accepted is acknowledged without a second external
//! send, whatever its status is now.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use orderalert_common::error::AppError;
use orderalert_common::types::{Message, MessageJob, MessageStatus};
use orderalert_notifier::{ProviderError, SendMeta, SessionManager};
use orderalert_queue::{Job, JobError, JobHandler};

use crate::status::{StatusEvent, apply_transition};
use crate::store::{MessageStore, NewMessage, StatusUpdate, TemplateStore};
use crate::template;
use crate::tracker;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent {
        message_id: Uuid,
        provider_message_id: String,
    },
    /// A previous execution of this job already sent the message.
    AlreadyHandled { message_id: Uuid },
}

pub struct MessageDispatcher {
    templates: Arc<dyn TemplateStore>,
    messages: Arc<dyn MessageStore>,
    sessions: Arc<dyn SessionManager>,
    provider_timeout: Duration,
}

impl MessageDispatcher {
    pub fn new(
        templates: Arc<dyn TemplateStore>,
        messages: Arc<dyn MessageStore>,
        sessions: Arc<dyn SessionManager>,
        provider_timeout: Duration,
    ) -> Self {
        Self {
            templates,
            messages,
            sessions,
            provider_timeout,
        }
    }

    pub async fn dispatch(&self, job_id: &str, job: &MessageJob) -> Result<DispatchOutcome, AppError> {
        let provider = self.sessions.provider_for_shop(job.shop_id)?;

        let message = match self.messages.find_by_job_id(job_id).await? {
            Some(existing) if existing.is_handled() => {
                tracing::info!(
                    job_id,
                    message_id = %existing.id,
                    status = %existing.status,
                    "Message already sent for job, skipping"
                );
                // A previous execution may have died before replaying
                if let Some(provider_id) = &existing.provider_message_id {
                    tracker::replay_parked(self.messages.as_ref(), provider_id).await?;
                }
                return Ok(DispatchOutcome::AlreadyHandled {
                    message_id: existing.id,
                });
            }
            Some(existing) => self.restart(existing).await?,
            None => self.create(job_id, job).await?,
        };

        let meta = SendMeta {
            shop_id: message.shop_id,
            message_id: message.id,
            job_id: job_id.to_string(),
        };

        let sent = tokio::time::timeout(
            self.provider_timeout,
            provider.send_text(&message.to_phone, &message.body_text, &meta),
        )
        .await
        .unwrap_or(Err(ProviderError::Timeout(self.provider_timeout.as_secs())));

        match sent {
            Ok(receipt) => {
                let next = transition(MessageStatus::Sending, StatusEvent::SendSucceeded)?;
                let update =
                    StatusUpdate::to(next).with_provider_id(receipt.provider_message_id.clone());
                if !self
                    .messages
                    .update_status(message.id, MessageStatus::Sending, &update)
                    .await?
                {
                    tracing::warn!(job_id, message_id = %message.id, "Message left sending before sent update");
                }
                tracker::replay_parked(self.messages.as_ref(), &receipt.provider_message_id).await?;

                tracing::info!(
                    job_id,
                    message_id = %message.id,
                    provider_message_id = %receipt.provider_message_id,
                    template = %message.template_key,
                    "Message sent"
                );
                Ok(DispatchOutcome::Sent {
                    message_id: message.id,
                    provider_message_id: receipt.provider_message_id,
                })
            }
            Err(err) => {
                let next = transition(MessageStatus::Sending, StatusEvent::SendFailed)?;
                let update = StatusUpdate::to(next).with_error(err.to_string());
                self.messages
                    .update_status(message.id, MessageStatus::Sending, &update)
                    .await?;

                tracing::warn!(
                    job_id,
                    message_id = %message.id,
                    attempt = message.attempts,
                    error = %err,
                    "Message send failed"
                );
                Err(err.into())
            }
        }
    }

    /// First execution of a job: render and insert the row in `sending`.
    async fn create(&self, job_id: &str, job: &MessageJob) -> Result<Message, AppError> {
        let template =
            template::resolve(self.templates.as_ref(), &job.template_key, job.shop_id).await?;
        let body_text = template::render_template(&template, &job.variables)?;

        let variables = serde_json::to_value(&job.variables)
            .map_err(|e| AppError::Internal(format!("Cannot snapshot variables: {}", e)))?;

        let new = NewMessage {
            id: Uuid::new_v4(),
            job_id: job_id.to_string(),
            shop_id: job.shop_id,
            to_phone: job.to_phone.clone(),
            template_key: job.template_key.clone(),
            body_text,
            variables,
            resend_of: job.resend_of,
        };

        self.messages.create_sending(&new).await?.ok_or_else(|| {
            AppError::Internal(format!("Message row for job {} created concurrently", job_id))
        })
    }

    /// Later execution of a job whose row exists but the provider never
    /// accepted.
    async fn restart(&self, message: Message) -> Result<Message, AppError> {
        if message.provider_message_id.is_some() {
            return Err(AppError::Conflict(format!(
                "Message {} was accepted by the provider and cannot be sent again",
                message.id
            )));
        }
        if message.status == MessageStatus::Sending {
            // Previous execution died before the provider answered
            return Ok(message);
        }

        let next = transition(message.status, StatusEvent::SendStarted)?;
        let update = StatusUpdate::to(next).new_attempt();
        if !self
            .messages
            .update_status(message.id, message.status, &update)
            .await?
        {
            return Err(AppError::Internal(format!(
                "Message {} changed status during retry",
                message.id
            )));
        }

        tracing::debug!(message_id = %message.id, from = %message.status, "Retrying message send");
        self.messages
            .find_message(message.id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Message {}", message.id)))
    }
}

fn transition(from: MessageStatus, event: StatusEvent) -> Result<MessageStatus, AppError> {
    apply_transition(from, event).map_err(|e| AppError::Internal(e.to_string()))
}

#[async_trait]
impl JobHandler<MessageJob> for MessageDispatcher {
    async fn handle(&self, job: &Job<MessageJob>) -> Result<(), JobError> {
        self.dispatch(&job.id, &job.payload)
            .await
            .map(|_| ())
            .map_err(crate::job_error)
    }
}
