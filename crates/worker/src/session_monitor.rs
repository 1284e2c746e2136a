use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use orderalert_common::types::ConnectionState;
use orderalert_notifier::SessionManager;

/// Periodically asks every messaging session for its connection state.
///
/// Providers cache the state they last saw and broadcast changes, so this
/// loop is what turns a gateway-side reconnect or pairing request into a
/// `ConnectionChanged` event when the gateway does not call back.
pub struct SessionMonitor {
    sessions: Arc<dyn SessionManager>,
    poll_interval: Duration,
}

impl SessionMonitor {
    pub fn new(sessions: Arc<dyn SessionManager>, poll_interval: Duration) -> Self {
        Self {
            sessions,
            poll_interval,
        }
    }

    /// Refresh every session once. Returns how many are ready to send.
    pub async fn poll_once(&self) -> usize {
        let mut ready = 0;
        for provider in self.sessions.providers() {
            match provider.refresh_connection().await {
                Ok(ConnectionState::Ready) => ready += 1,
                Ok(state) => {
                    tracing::debug!(
                        session_id = provider.session_id(),
                        state = %state,
                        "Messaging session not ready"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        session_id = provider.session_id(),
                        error = %e,
                        "Failed to refresh messaging session state"
                    );
                }
            }
        }
        ready
    }

    /// Poll until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(
            poll_interval_secs = self.poll_interval.as_secs(),
            "Session monitor started"
        );

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
            }
        }

        tracing::info!("Session monitor stopped");
    }
}
