//! Provider backed by an HTTP messaging gateway running next to the service.
//!
//! The gateway owns the actual session (pairing, reconnects, protocol). This
//! side only sends and reads status:
//!
//! - `GET  {base}/sessions/{id}/status`   -> `{"status": "ready", "pairingCode": null}`
//! - `POST {base}/sessions/{id}/messages` -> `{"providerMessageId": "..."}`
//!
//! Receipts, inbound messages and connection changes come back through the
//! API's signed callback routes.

use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use orderalert_common::types::ConnectionState;

use crate::error::ProviderError;
use crate::provider::{MessagingProvider, ProviderEvent, SendMeta, SendReceipt};

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    status: ConnectionState,
    #[serde(default)]
    pairing_code: Option<String>,
}

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    to: &'a str,
    text: &'a str,
    meta: &'a SendMeta,
}

struct SessionStatus {
    state: ConnectionState,
    pairing_code: Option<String>,
}

pub struct HttpBridgeProvider {
    client: reqwest::Client,
    base_url: String,
    session_id: String,
    timeout: Duration,
    status: RwLock<SessionStatus>,
    events: broadcast::Sender<ProviderEvent>,
}

impl HttpBridgeProvider {
    pub fn new(
        base_url: &str,
        session_id: &str,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            session_id: session_id.to_string(),
            timeout,
            status: RwLock::new(SessionStatus {
                state: ConnectionState::Down,
                pairing_code: None,
            }),
            events,
        })
    }

    fn session_url(&self, path: &str) -> String {
        format!("{}/sessions/{}/{}", self.base_url, self.session_id, path)
    }

    fn map_send_error(&self, err: reqwest::Error) -> ProviderError {
        if err.is_timeout() {
            ProviderError::Timeout(self.timeout.as_secs())
        } else {
            ProviderError::Transport(err.to_string())
        }
    }
}

#[async_trait]
impl MessagingProvider for HttpBridgeProvider {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    fn connection_state(&self) -> ConnectionState {
        self.status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .state
    }

    fn pairing_code(&self) -> Option<String> {
        let status = self.status.read().unwrap_or_else(PoisonError::into_inner);
        match status.state {
            ConnectionState::Pairing => status.pairing_code.clone(),
            _ => None,
        }
    }

    async fn refresh_connection(&self) -> Result<ConnectionState, ProviderError> {
        let response = self
            .client
            .get(self.session_url("status"))
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        if !response.status().is_success() {
            return Err(ProviderError::Transport(format!(
                "status endpoint returned {}",
                response.status()
            )));
        }

        let body: StatusResponse = response.json().await?;
        self.update_connection(body.status, body.pairing_code);
        Ok(body.status)
    }

    async fn send_text(
        &self,
        to: &str,
        text: &str,
        meta: &SendMeta,
    ) -> Result<SendReceipt, ProviderError> {
        let response = self
            .client
            .post(self.session_url("messages"))
            .json(&SendRequest { to, text, meta })
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if status.is_success() {
            let receipt: SendReceipt = response.json().await?;
            return Ok(receipt);
        }

        let body = response.text().await.unwrap_or_default();
        match status {
            StatusCode::CONFLICT | StatusCode::SERVICE_UNAVAILABLE => {
                Err(ProviderError::NotReady(self.session_id.clone()))
            }
            s if s.is_client_error() => Err(ProviderError::Rejected(format!("{}: {}", s, body))),
            s => Err(ProviderError::Transport(format!("{}: {}", s, body))),
        }
    }

    fn update_connection(&self, state: ConnectionState, pairing_code: Option<String>) {
        let changed = {
            let mut status = self.status.write().unwrap_or_else(PoisonError::into_inner);
            let changed = status.state != state;
            status.state = state;
            status.pairing_code = pairing_code.clone();
            changed
        };

        if changed {
            tracing::info!(
                session_id = %self.session_id,
                state = %state,
                "Messaging session connection changed"
            );
            // No subscribers is fine.
            let _ = self.events.send(ProviderEvent::ConnectionChanged {
                state,
                pairing_code,
            });
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.events.subscribe()
    }
}
