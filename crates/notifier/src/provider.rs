use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use orderalert_common::types::{ConnectionState, DeliveryReceipt, InboundMessage};

use crate::error::ProviderError;

/// Context passed along with a send, for provider-side correlation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMeta {
    pub shop_id: Uuid,
    pub message_id: Uuid,
    pub job_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendReceipt {
    pub provider_message_id: String,
}

/// Asynchronous notification pushed by a provider session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderEvent {
    Receipt(DeliveryReceipt),
    Inbound(InboundMessage),
    ConnectionChanged {
        state: ConnectionState,
        #[serde(default)]
        pairing_code: Option<String>,
    },
}

/// A stateful messaging session.
#[async_trait]
pub trait MessagingProvider: Send + Sync {
    fn session_id(&self) -> &str;

    /// Last known connection state.
    fn connection_state(&self) -> ConnectionState;

    /// Pairing code while the session is pairing.
    fn pairing_code(&self) -> Option<String>;

    /// Ask the session for its current state, updating the cached one.
    async fn refresh_connection(&self) -> Result<ConnectionState, ProviderError> {
        Ok(self.connection_state())
    }

    /// Send a text message. Fails with [`ProviderError::NotReady`] unless the
    /// session is ready.
    async fn send_text(
        &self,
        to: &str,
        text: &str,
        meta: &SendMeta,
    ) -> Result<SendReceipt, ProviderError>;

    /// Record a connection change reported out of band and notify subscribers.
    fn update_connection(&self, state: ConnectionState, pairing_code: Option<String>);

    /// Stream of receipts, inbound messages and connection changes.
    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent>;
}
