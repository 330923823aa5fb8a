//! Marketplace events forwarded to the tracing pipeline.

use istyle_market::{EventSink, MarketEvent};

/// Logs every committed event as a structured `tracing` record.
///
/// `TransactionCreated` carries the buyer's initiation message; the
/// messaging subsystem consumes it from the log stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn publish(&self, event: MarketEvent) {
        match &event {
            MarketEvent::TransactionCreated {
                transaction_id,
                listing_id,
                buyer_id,
                seller_id,
                message,
            } => tracing::info!(
                target: "istyle::events",
                %transaction_id,
                %listing_id,
                %buyer_id,
                %seller_id,
                has_message = message.is_some(),
                "transaction created"
            ),
            MarketEvent::StatusChanged {
                transaction_id,
                from,
                to,
                action,
                actor,
                ..
            } => tracing::info!(
                target: "istyle::events",
                %transaction_id,
                from = from.as_str(),
                to = to.as_str(),
                action = action.as_str(),
                %actor,
                "transaction status changed"
            ),
            MarketEvent::Rated {
                transaction_id,
                rated_user_id,
                score,
                ..
            } => tracing::info!(
                target: "istyle::events",
                %transaction_id,
                %rated_user_id,
                score,
                "transaction rated"
            ),
        }
        if let Ok(payload) = serde_json::to_string(&event) {
            tracing::debug!(target: "istyle::events", %payload, "event payload");
        }
    }
}
