//! # Marketplace Events
//!
//! Emitted after a mutation commits. Sinks are fire-and-forget: a sink
//! cannot veto or roll back the change it is told about.

use std::sync::Arc;

use istyle_core::{ListingId, TransactionId, UserId};
use istyle_state::{PartyRole, TransactionAction, TransactionStatus};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MarketEvent {
    /// A buyer opened a transaction. `message` is the initiation message,
    /// to be delivered to the seller by the messaging subsystem.
    TransactionCreated {
        transaction_id: TransactionId,
        listing_id: ListingId,
        buyer_id: UserId,
        seller_id: UserId,
        message: Option<String>,
    },
    StatusChanged {
        transaction_id: TransactionId,
        listing_id: ListingId,
        from: TransactionStatus,
        to: TransactionStatus,
        action: TransactionAction,
        actor: UserId,
        actor_role: PartyRole,
    },
    Rated {
        transaction_id: TransactionId,
        rater_id: UserId,
        rated_user_id: UserId,
        score: u8,
    },
}

impl MarketEvent {
    pub fn transaction_id(&self) -> TransactionId {
        match self {
            Self::TransactionCreated { transaction_id, .. }
            | Self::StatusChanged { transaction_id, .. }
            | Self::Rated { transaction_id, .. } => *transaction_id,
        }
    }
}

pub trait EventSink: Send + Sync {
    fn publish(&self, event: MarketEvent);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn publish(&self, _event: MarketEvent) {}
}

/// Records events in order. Cloning shares the log.
#[derive(Debug, Clone, Default)]
pub struct MemoryEventLog {
    events: Arc<Mutex<Vec<MarketEvent>>>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<MarketEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventSink for MemoryEventLog {
    fn publish(&self, event: MarketEvent) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_log_shares_between_clones() {
        let log = MemoryEventLog::new();
        let sink: Arc<dyn EventSink> = Arc::new(log.clone());
        let id = TransactionId::new();
        sink.publish(MarketEvent::Rated {
            transaction_id: id,
            rater_id: UserId::new(),
            rated_user_id: UserId::new(),
            score: 4,
        });
        assert_eq!(log.len(), 1);
        assert_eq!(log.events()[0].transaction_id(), id);
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let event = MarketEvent::TransactionCreated {
            transaction_id: TransactionId::new(),
            listing_id: ListingId::new(),
            buyer_id: UserId::new(),
            seller_id: UserId::new(),
            message: Some("Is it still available?".into()),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "transaction_created");
        assert_eq!(json["message"], "Is it still available?");
    }
}
