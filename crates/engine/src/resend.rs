//! Operator resend of a failed message.
//!
//! A resend never touches the failed row: it submits a fresh message job
//! whose row points back at the original through `resend_of`.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use orderalert_common::error::AppError;
use orderalert_common::types::{MessageJob, MessageStatus};
use orderalert_queue::Queue;

use crate::store::MessageStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResendReceipt {
    pub message_id: Uuid,
    pub job_id: String,
}

pub fn resend_job_id(message_id: Uuid) -> String {
    format!("resend:{}:{}", message_id, Uuid::new_v4())
}

pub struct ResendService {
    messages: Arc<dyn MessageStore>,
    queue: Queue<MessageJob>,
}

impl ResendService {
    pub fn new(messages: Arc<dyn MessageStore>, queue: Queue<MessageJob>) -> Self {
        Self { messages, queue }
    }

    pub async fn resend(&self, message_id: Uuid) -> Result<ResendReceipt, AppError> {
        let message = self
            .messages
            .find_message(message_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Message {} not found", message_id)))?;

        if message.status != MessageStatus::Failed {
            return Err(AppError::Conflict(format!(
                "Message {} is {}, only failed messages can be resent",
                message_id, message.status
            )));
        }

        let variables: BTreeMap<String, String> = serde_json::from_value(message.variables)
            .map_err(|e| {
                AppError::Internal(format!("Message {} has unreadable variables: {}", message_id, e))
            })?;

        let job = MessageJob {
            shop_id: message.shop_id,
            to_phone: message.to_phone,
            template_key: message.template_key,
            variables,
            delay_ms: None,
            source_webhook_id: None,
            resend_of: Some(message.id),
        };

        let job_id = resend_job_id(message.id);
        self.queue
            .submit(&job_id, &job)
            .await
            .map_err(crate::queue_error)?;

        tracing::info!(message_id = %message.id, job_id = %job_id, "Resend queued");
        Ok(ResendReceipt {
            message_id: message.id,
            job_id,
        })
    }
}
