//! Message delivery-status state machine.
//!
//! ```text
//! queued -> sending -> sent -> delivered -> read
//!              |         |         |
//!              +---------+---------+--> failed
//! ```
//!
//! Every write to a message's status goes through [`apply_transition`]; any
//! pair not in the table is rejected, which is what keeps late or duplicate
//! callbacks from moving a message backwards.

use orderalert_common::types::{MessageStatus, ReceiptStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEvent {
    /// Dispatcher starts a send attempt (first or retry).
    SendStarted,
    /// Provider accepted the message.
    SendSucceeded,
    /// Provider call failed or timed out.
    SendFailed,
    /// Provider reports delivery to the handset.
    Delivered,
    /// Provider reports the customer read it.
    Read,
    /// Provider reports it could not deliver.
    DeliveryFailed,
}

impl From<ReceiptStatus> for StatusEvent {
    fn from(status: ReceiptStatus) -> Self {
        match status {
            ReceiptStatus::Delivered => StatusEvent::Delivered,
            ReceiptStatus::Read => StatusEvent::Read,
            ReceiptStatus::Failed => StatusEvent::DeliveryFailed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cannot apply {event:?} to a message in status {from}")]
pub struct TransitionRejected {
    pub from: MessageStatus,
    pub event: StatusEvent,
}

/// Total transition function of the delivery-status machine.
pub fn apply_transition(
    current: MessageStatus,
    event: StatusEvent,
) -> Result<MessageStatus, TransitionRejected> {
    use MessageStatus::*;
    use StatusEvent as E;

    let next = match (current, event) {
        (Queued | Failed, E::SendStarted) => Sending,
        (Sending, E::SendSucceeded) => Sent,
        (Sending, E::SendFailed) => Failed,
        (Sent, E::Delivered) => Delivered,
        (Sent | Delivered, E::Read) => Read,
        (Queued | Sending | Sent | Delivered, E::DeliveryFailed) => Failed,
        (from, event) => return Err(TransitionRejected { from, event }),
    };
    Ok(next)
}

/// Position along the delivery path, for reporting. `failed` sits outside it.
pub fn progress_rank(status: MessageStatus) -> Option<u8> {
    match status {
        MessageStatus::Queued => Some(0),
        MessageStatus::Sending => Some(1),
        MessageStatus::Sent => Some(2),
        MessageStatus::Delivered => Some(3),
        MessageStatus::Read => Some(4),
        MessageStatus::Failed => None,
    }
}
