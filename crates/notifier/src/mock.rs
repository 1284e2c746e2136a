use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use orderalert_common::types::ConnectionState;

use crate::error::ProviderError;
use crate::provider::{MessagingProvider, ProviderEvent, SendMeta, SendReceipt};

/// A message accepted by [`MockProvider`].
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub to: String,
    pub text: String,
    pub meta: SendMeta,
    pub provider_message_id: String,
}

/// In-process provider for tests and local runs.
///
/// Starts `ready`. Failures and latency can be scripted; every send attempt
/// is counted and accepted messages are recorded.
pub struct MockProvider {
    session_id: String,
    status: Mutex<(ConnectionState, Option<String>)>,
    failures_remaining: AtomicU32,
    send_delay: Mutex<Option<Duration>>,
    attempts: AtomicU32,
    next_id: AtomicU64,
    sent: Mutex<Vec<SentMessage>>,
    events: broadcast::Sender<ProviderEvent>,
}

impl MockProvider {
    pub fn new(session_id: &str) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            session_id: session_id.to_string(),
            status: Mutex::new((ConnectionState::Ready, None)),
            failures_remaining: AtomicU32::new(0),
            send_delay: Mutex::new(None),
            attempts: AtomicU32::new(0),
            next_id: AtomicU64::new(1),
            sent: Mutex::new(Vec::new()),
            events,
        }
    }

    /// Make the next `count` sends fail with a transport error.
    pub fn fail_next(&self, count: u32) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Make every send take `delay` before answering.
    pub fn set_send_delay(&self, delay: Option<Duration>) {
        *self.send_delay.lock().unwrap_or_else(PoisonError::into_inner) = delay;
    }

    /// Number of `send_text` calls, successful or not.
    pub fn send_attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Push an event to subscribers as if the session had reported it.
    pub fn emit(&self, event: ProviderEvent) {
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl MessagingProvider for MockProvider {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    fn connection_state(&self) -> ConnectionState {
        self.status.lock().unwrap_or_else(PoisonError::into_inner).0
    }

    fn pairing_code(&self) -> Option<String> {
        let status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        match status.0 {
            ConnectionState::Pairing => status.1.clone(),
            _ => None,
        }
    }

    async fn send_text(
        &self,
        to: &str,
        text: &str,
        meta: &SendMeta,
    ) -> Result<SendReceipt, ProviderError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let delay = *self.send_delay.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.connection_state() != ConnectionState::Ready {
            return Err(ProviderError::NotReady(self.session_id.clone()));
        }

        let scripted_failure = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if scripted_failure {
            return Err(ProviderError::Transport("scripted failure".to_string()));
        }

        let provider_message_id = format!("mock-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(SentMessage {
                to: to.to_string(),
                text: text.to_string(),
                meta: meta.clone(),
                provider_message_id: provider_message_id.clone(),
            });

        Ok(SendReceipt {
            provider_message_id,
        })
    }

    fn update_connection(&self, state: ConnectionState, pairing_code: Option<String>) {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = (state, pairing_code.clone());
        self.emit(ProviderEvent::ConnectionChanged {
            state,
            pairing_code,
        });
    }

    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    fn meta() -> SendMeta {
        SendMeta {
            shop_id: Uuid::new_v4(),
            message_id: Uuid::new_v4(),
            job_id: "wh-1:order_created_v1".into(),
        }
    }

    #[tokio::test]
    async fn test_scripted_failures_then_success() {
        let provider = MockProvider::new("default-session");
        provider.fail_next(2);

        assert!(provider.send_text("+923001234567", "hi", &meta()).await.is_err());
        assert!(provider.send_text("+923001234567", "hi", &meta()).await.is_err());
        let receipt = provider.send_text("+923001234567", "hi", &meta()).await.unwrap();

        assert_eq!(provider.send_attempts(), 3);
        assert_eq!(provider.sent().len(), 1);
        assert_eq!(provider.sent()[0].provider_message_id, receipt.provider_message_id);
    }

    #[tokio::test]
    async fn test_send_requires_ready_session() {
        let provider = MockProvider::new("default-session");
        provider.update_connection(ConnectionState::Pairing, Some("PAIR-42".into()));

        let err = provider.send_text("+1", "hi", &meta()).await.unwrap_err();
        assert_eq!(err, ProviderError::NotReady("default-session".into()));
        assert_eq!(provider.pairing_code().as_deref(), Some("PAIR-42"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_delay_is_applied() {
        let provider = MockProvider::new("default-session");
        provider.set_send_delay(Some(Duration::from_secs(45)));

        let start = tokio::time::Instant::now();
        provider.send_text("+1", "hi", &meta()).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(45));
    }
}
