//! Domain events published after a ledger transaction commits.
//!
//! Events are informational. Notification fan-out subscribes here; a send
//! with no live receivers is not an error.

use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::ledger::{ContextRef, UserId};

/// Default capacity of the event channel
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Ledger domain event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LedgerEvent {
    GiftSent {
        sender_id: UserId,
        recipient_id: UserId,
        gift_id: String,
        quantity: i64,
        cost: i64,
        context: Option<ContextRef>,
    },
    PurchaseCompleted {
        intent_id: Uuid,
        user_id: UserId,
        credits: i64,
    },
    IntentRefunded {
        intent_id: Uuid,
        user_id: UserId,
        amount_minor: i64,
        credits: i64,
    },
}

/// Broadcast channel for [`LedgerEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<LedgerEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.sender.subscribe()
    }

    /// Publish an event, returning how many receivers saw it
    pub fn publish(&self, event: LedgerEvent) -> usize {
        match self.sender.send(event) {
            Ok(receivers) => receivers,
            Err(broadcast::error::SendError(event)) => {
                log::debug!("No subscribers for event {:?}", event);
                0
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
