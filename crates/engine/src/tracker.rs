//! Delivery status tracker.
//!
//! Applies provider callbacks to messages and handles inbound customer
//! replies (opt-out keywords). Callbacks reach it either directly from the
//! API's callback routes or through a provider's event stream via [`DeliveryTracker::run`].

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use orderalert_common::error::AppError;
use orderalert_common::types::{DeliveryReceipt, InboundMessage, MessageStatus, ShopSettings};
use orderalert_decoders::phone::normalize_e164;
use orderalert_notifier::ProviderEvent;

use crate::status::{StatusEvent, apply_transition};
use crate::store::{MessageStore, ShopStore, StatusUpdate};

/// Conditional updates lost to a concurrent writer are retried this often.
const MAX_UPDATE_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiptOutcome {
    Advanced {
        message_id: Uuid,
        from: MessageStatus,
        to: MessageStatus,
    },
    /// Recorded, but the transition is not allowed from the current status.
    Ignored {
        message_id: Uuid,
        status: MessageStatus,
    },
    /// No message carries the provider id yet; held for replay.
    Parked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundOutcome {
    OptedOut { shop_id: Uuid },
    AlreadyOptedOut { shop_id: Uuid },
    NotAKeyword,
    /// No shop has messaged this phone.
    UnknownSender,
}

pub struct DeliveryTracker {
    messages: Arc<dyn MessageStore>,
    shops: Arc<dyn ShopStore>,
}

impl DeliveryTracker {
    pub fn new(messages: Arc<dyn MessageStore>, shops: Arc<dyn ShopStore>) -> Self {
        Self { messages, shops }
    }

    /// Apply a provider callback. A receipt for a provider id no message
    /// carries yet is parked and replayed once the send records that id.
    pub async fn apply_receipt(&self, receipt: &DeliveryReceipt) -> Result<ReceiptOutcome, AppError> {
        if let Some(outcome) = apply_to_known(self.messages.as_ref(), receipt).await? {
            return Ok(outcome);
        }

        self.messages.park_receipt(receipt).await?;
        tracing::info!(
            provider_message_id = %receipt.provider_message_id,
            status = %receipt.status,
            "Receipt for unknown message parked"
        );

        // The send may have recorded the id between the lookup and the park
        let replayed = replay_parked(self.messages.as_ref(), &receipt.provider_message_id).await?;
        Ok(replayed.into_iter().last().unwrap_or(ReceiptOutcome::Parked))
    }

    /// Match an inbound reply against the opt-out keywords of the shop that
    /// last messaged the sender.
    pub async fn handle_inbound(&self, inbound: &InboundMessage) -> Result<InboundOutcome, AppError> {
        let Some(phone) = normalize_e164(&inbound.from) else {
            return Ok(InboundOutcome::UnknownSender);
        };
        let Some(shop_id) = self.messages.latest_shop_for_phone(&phone).await? else {
            return Ok(InboundOutcome::UnknownSender);
        };

        let settings = self
            .shops
            .settings(shop_id)
            .await?
            .unwrap_or_else(|| ShopSettings::defaults(shop_id, 0));

        let text = inbound.text.trim();
        let Some(keyword) = settings
            .opt_out_keywords
            .iter()
            .find(|k| k.trim().eq_ignore_ascii_case(text))
        else {
            return Ok(InboundOutcome::NotAKeyword);
        };

        if self.shops.record_opt_out(shop_id, &phone, keyword).await? {
            tracing::info!(shop_id = %shop_id, keyword = %keyword, "Customer opted out");
            Ok(InboundOutcome::OptedOut { shop_id })
        } else {
            Ok(InboundOutcome::AlreadyOptedOut { shop_id })
        }
    }

    /// Consume a provider event stream until cancelled or the stream closes.
    pub async fn run(
        self: Arc<Self>,
        mut events: broadcast::Receiver<ProviderEvent>,
        cancel: CancellationToken,
    ) {
        tracing::info!("Delivery tracker started");

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => event,
            };

            match event {
                Ok(ProviderEvent::Receipt(receipt)) => {
                    if let Err(e) = self.apply_receipt(&receipt).await {
                        tracing::error!(
                            provider_message_id = %receipt.provider_message_id,
                            error = %e,
                            "Failed to apply receipt"
                        );
                    }
                }
                Ok(ProviderEvent::Inbound(inbound)) => {
                    if let Err(e) = self.handle_inbound(&inbound).await {
                        tracing::error!(error = %e, "Failed to handle inbound message");
                    }
                }
                Ok(ProviderEvent::ConnectionChanged { state, .. }) => {
                    tracing::info!(state = %state, "Messaging connection state changed");
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Delivery tracker lagged, events dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }

        tracing::info!("Delivery tracker stopped");
    }
}

/// Apply every receipt parked for `provider_message_id`, oldest first.
/// Called once a message has recorded that provider id.
pub async fn replay_parked(
    messages: &dyn MessageStore,
    provider_message_id: &str,
) -> Result<Vec<ReceiptOutcome>, AppError> {
    let parked = messages.take_parked_receipts(provider_message_id).await?;
    let mut outcomes = Vec::with_capacity(parked.len());

    for receipt in parked {
        match apply_to_known(messages, &receipt).await? {
            Some(outcome) => outcomes.push(outcome),
            None => messages.park_receipt(&receipt).await?,
        }
    }

    if !outcomes.is_empty() {
        tracing::info!(
            provider_message_id,
            replayed = outcomes.len(),
            "Replayed parked receipts"
        );
    }
    Ok(outcomes)
}

/// Apply a receipt to the message carrying its provider id, or `None` when
/// there is no such message.
async fn apply_to_known(
    messages: &dyn MessageStore,
    receipt: &DeliveryReceipt,
) -> Result<Option<ReceiptOutcome>, AppError> {
    let event = StatusEvent::from(receipt.status);

    for _ in 0..MAX_UPDATE_ATTEMPTS {
        let Some(message) = messages
            .find_by_provider_id(&receipt.provider_message_id)
            .await?
        else {
            return Ok(None);
        };

        let next = match apply_transition(message.status, event) {
            Ok(next) => next,
            Err(rejected) => {
                messages.record_receipt(message.id, receipt, false).await?;
                tracing::debug!(
                    message_id = %message.id,
                    error = %rejected,
                    "Out-of-order receipt recorded without status change"
                );
                return Ok(Some(ReceiptOutcome::Ignored {
                    message_id: message.id,
                    status: message.status,
                }));
            }
        };

        let mut update = StatusUpdate::to(next).at(receipt.occurred_at.unwrap_or_else(Utc::now));
        if let Some(error) = &receipt.error {
            update = update.with_error(error.clone());
        }

        if messages
            .update_status(message.id, message.status, &update)
            .await?
        {
            messages.record_receipt(message.id, receipt, true).await?;
            tracing::info!(
                message_id = %message.id,
                from = %message.status,
                to = %next,
                "Message status advanced"
            );
            return Ok(Some(ReceiptOutcome::Advanced {
                message_id: message.id,
                from: message.status,
                to: next,
            }));
        }
        // Lost a race with another writer; re-read and re-evaluate
    }

    Err(AppError::Internal(format!(
        "Receipt for {} kept losing concurrent updates",
        receipt.provider_message_id
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::store::NewMessage;
    use orderalert_common::types::ReceiptStatus;

    async fn sent_message(store: &MemoryStore, shop_id: Uuid, provider_id: &str) -> Uuid {
        let id = Uuid::new_v4();
        store
            .create_sending(&NewMessage {
                id,
                job_id: format!("job-{}", provider_id),
                shop_id,
                to_phone: "+923001234567".into(),
                template_key: "order_created_v1".into(),
                body_text: "hi".into(),
                variables: serde_json::json!({}),
                resend_of: None,
            })
            .await
            .unwrap();
        store
            .update_status(
                id,
                MessageStatus::Sending,
                &StatusUpdate::to(MessageStatus::Sent).with_provider_id(provider_id),
            )
            .await
            .unwrap();
        id
    }

    fn receipt(id: &str, status: ReceiptStatus) -> DeliveryReceipt {
        DeliveryReceipt {
            provider_message_id: id.into(),
            status,
            error: None,
            occurred_at: None,
        }
    }

    fn tracker(store: &Arc<MemoryStore>) -> DeliveryTracker {
        DeliveryTracker::new(store.clone(), store.clone())
    }

    #[tokio::test]
    async fn test_receipts_advance_status() {
        let store = Arc::new(MemoryStore::new());
        let id = sent_message(&store, Uuid::new_v4(), "p-1").await;
        let t = tracker(&store);

        let delivered = t.apply_receipt(&receipt("p-1", ReceiptStatus::Delivered)).await.unwrap();
        assert_eq!(
            delivered,
            ReceiptOutcome::Advanced {
                message_id: id,
                from: MessageStatus::Sent,
                to: MessageStatus::Delivered
            }
        );
        t.apply_receipt(&receipt("p-1", ReceiptStatus::Read)).await.unwrap();

        let message = store.find_message(id).await.unwrap().unwrap();
        assert_eq!(message.status, MessageStatus::Read);
        assert!(message.delivered_at.is_some());
        assert!(message.read_at.is_some());
    }

    #[tokio::test]
    async fn test_delivered_after_read_does_not_regress() {
        let store = Arc::new(MemoryStore::new());
        let id = sent_message(&store, Uuid::new_v4(), "p-1").await;
        let t = tracker(&store);

        t.apply_receipt(&receipt("p-1", ReceiptStatus::Read)).await.unwrap();
        let late = t.apply_receipt(&receipt("p-1", ReceiptStatus::Delivered)).await.unwrap();

        assert_eq!(
            late,
            ReceiptOutcome::Ignored {
                message_id: id,
                status: MessageStatus::Read
            }
        );
        assert_eq!(
            store.find_message(id).await.unwrap().unwrap().status,
            MessageStatus::Read
        );

        let receipts = store.receipts().await;
        assert_eq!(receipts.len(), 2);
        assert!(receipts[0].applied);
        assert!(!receipts[1].applied);
    }

    #[tokio::test]
    async fn test_failure_receipt_records_error() {
        let store = Arc::new(MemoryStore::new());
        let id = sent_message(&store, Uuid::new_v4(), "p-1").await;
        let mut r = receipt("p-1", ReceiptStatus::Failed);
        r.error = Some("number not on network".into());

        tracker(&store).apply_receipt(&r).await.unwrap();
        let message = store.find_message(id).await.unwrap().unwrap();
        assert_eq!(message.status, MessageStatus::Failed);
        assert_eq!(message.error.as_deref(), Some("number not on network"));
        assert!(message.failed_at.is_some());
    }

    #[tokio::test]
    async fn test_unknown_provider_id_is_parked() {
        let store = Arc::new(MemoryStore::new());
        let outcome = tracker(&store)
            .apply_receipt(&receipt("nope", ReceiptStatus::Delivered))
            .await
            .unwrap();
        assert_eq!(outcome, ReceiptOutcome::Parked);
        assert_eq!(store.parked_receipts().await.len(), 1);
        assert!(store.receipts().await.is_empty());
    }

    #[tokio::test]
    async fn test_receipt_before_sent_update_is_applied_on_replay() {
        let store = Arc::new(MemoryStore::new());
        let id = Uuid::new_v4();
        store
            .create_sending(&NewMessage {
                id,
                job_id: "job-early".into(),
                shop_id: Uuid::new_v4(),
                to_phone: "+923001234567".into(),
                template_key: "order_created_v1".into(),
                body_text: "hi".into(),
                variables: serde_json::json!({}),
                resend_of: None,
            })
            .await
            .unwrap();
        let t = tracker(&store);

        let early = t.apply_receipt(&receipt("p-1", ReceiptStatus::Delivered)).await.unwrap();
        assert_eq!(early, ReceiptOutcome::Parked);

        store
            .update_status(
                id,
                MessageStatus::Sending,
                &StatusUpdate::to(MessageStatus::Sent).with_provider_id("p-1"),
            )
            .await
            .unwrap();
        let replayed = replay_parked(store.as_ref(), "p-1").await.unwrap();

        assert_eq!(
            replayed,
            vec![ReceiptOutcome::Advanced {
                message_id: id,
                from: MessageStatus::Sent,
                to: MessageStatus::Delivered
            }]
        );
        assert_eq!(
            store.find_message(id).await.unwrap().unwrap().status,
            MessageStatus::Delivered
        );
        assert!(store.parked_receipts().await.is_empty());
        assert_eq!(store.receipts().await.len(), 1);
    }

    #[tokio::test]
    async fn test_replay_keeps_arrival_order() {
        let store = Arc::new(MemoryStore::new());
        let t = tracker(&store);
        t.apply_receipt(&receipt("p-1", ReceiptStatus::Delivered)).await.unwrap();
        t.apply_receipt(&receipt("p-1", ReceiptStatus::Read)).await.unwrap();
        t.apply_receipt(&receipt("p-2", ReceiptStatus::Read)).await.unwrap();

        let id = sent_message(&store, Uuid::new_v4(), "p-1").await;
        let replayed = replay_parked(store.as_ref(), "p-1").await.unwrap();

        assert_eq!(replayed.len(), 2);
        assert_eq!(
            store.find_message(id).await.unwrap().unwrap().status,
            MessageStatus::Read
        );
        assert_eq!(store.parked_receipts().await.len(), 1);
    }

    #[tokio::test]
    async fn test_inbound_stop_opts_out_of_last_shop() {
        let store = Arc::new(MemoryStore::new());
        let shop = store.add_shop("demo.myshopify.com", "Asia/Karachi").await;
        sent_message(&store, shop.id, "p-1").await;
        let t = tracker(&store);

        let inbound = InboundMessage {
            from: "+92 300 1234567".into(),
            text: "  stop ".into(),
            provider_message_id: None,
        };
        assert_eq!(
            t.handle_inbound(&inbound).await.unwrap(),
            InboundOutcome::OptedOut { shop_id: shop.id }
        );
        assert_eq!(
            t.handle_inbound(&inbound).await.unwrap(),
            InboundOutcome::AlreadyOptedOut { shop_id: shop.id }
        );
        assert!(store.is_opted_out(shop.id, "+923001234567").await.unwrap());
    }

    #[tokio::test]
    async fn test_inbound_other_text_and_unknown_sender() {
        let store = Arc::new(MemoryStore::new());
        let shop = store.add_shop("demo.myshopify.com", "Asia/Karachi").await;
        sent_message(&store, shop.id, "p-1").await;
        let t = tracker(&store);

        let reply = InboundMessage {
            from: "+923001234567".into(),
            text: "1".into(),
            provider_message_id: None,
        };
        assert_eq!(t.handle_inbound(&reply).await.unwrap(), InboundOutcome::NotAKeyword);

        let stranger = InboundMessage {
            from: "+15550001111".into(),
            text: "STOP".into(),
            provider_message_id: None,
        };
        assert_eq!(
            t.handle_inbound(&stranger).await.unwrap(),
            InboundOutcome::UnknownSender
        );
    }

    #[tokio::test]
    async fn test_run_consumes_events_until_cancelled() {
        let store = Arc::new(MemoryStore::new());
        let id = sent_message(&store, Uuid::new_v4(), "p-1").await;
        let t = Arc::new(tracker(&store));

        let (tx, rx) = broadcast::channel(16);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(t.clone().run(rx, cancel.clone()));

        tx.send(ProviderEvent::Receipt(receipt("p-1", ReceiptStatus::Delivered)))
            .unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(
            store.find_message(id).await.unwrap().unwrap().status,
            MessageStatus::Delivered
        );
    }
}
