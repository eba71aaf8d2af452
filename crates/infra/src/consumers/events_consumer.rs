//! In-process reaction to counter events.

use std::sync::atomic::{AtomicU64, Ordering};

use counterflow_core::ConsumerId;
use counterflow_counter::CounterEvent;
use counterflow_events::{Consumer, ConsumerOutcome, EventEnvelope};
use tracing::info;

pub const EVENTS_CONSUMER_ID: &str = "counter-events-consumer";

/// Handles increases, ignores multiplications.
#[derive(Debug)]
pub struct CounterEventsConsumer {
    id: ConsumerId,
    increases_handled: AtomicU64,
}

impl CounterEventsConsumer {
    pub fn new() -> Self {
        Self {
            id: ConsumerId::from_static(EVENTS_CONSUMER_ID),
            increases_handled: AtomicU64::new(0),
        }
    }

    /// Number of `ValueIncreased` deliveries handled (redeliveries included).
    pub fn increases_handled(&self) -> u64 {
        self.increases_handled.load(Ordering::Relaxed)
    }
}

impl Default for CounterEventsConsumer {
    fn default() -> Self {
        Self::new()
    }
}

impl Consumer<CounterEvent> for CounterEventsConsumer {
    fn id(&self) -> &ConsumerId {
        &self.id
    }

    fn on_event(&self, envelope: &EventEnvelope<CounterEvent>) -> ConsumerOutcome {
        info!(
            entity_id = %envelope.entity_id(),
            sequence_number = envelope.sequence_number(),
            ce_id = %delivery_id(envelope),
            event = ?envelope.payload(),
            "received counter event"
        );
        match envelope.payload() {
            CounterEvent::ValueIncreased { .. } => {
                self.increases_handled.fetch_add(1, Ordering::Relaxed);
                ConsumerOutcome::Handled
            }
            CounterEvent::ValueMultiplied { .. } => ConsumerOutcome::Ignored,
        }
    }
}

/// CloudEvent id of the command message (`ce-id`), else the event id.
fn delivery_id(envelope: &EventEnvelope<CounterEvent>) -> String {
    envelope
        .metadata()
        .id()
        .map_or_else(|| envelope.event_id().to_string(), str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use counterflow_core::EntityId;
    use counterflow_events::Metadata;
    use uuid::Uuid;

    fn envelope_with(event: CounterEvent, metadata: Metadata) -> EventEnvelope<CounterEvent> {
        EventEnvelope::new(
            Uuid::now_v7(),
            EntityId::new("c-1").unwrap(),
            "counter",
            1,
            "value-increased",
            Utc::now(),
            metadata,
            event,
        )
    }

    fn envelope(event: CounterEvent) -> EventEnvelope<CounterEvent> {
        envelope_with(event, Metadata::new())
    }

    #[test]
    fn delivery_id_prefers_the_message_ce_id() {
        let increased = CounterEvent::ValueIncreased {
            value: 1,
            updated_value: 1,
        };

        let tagged = envelope_with(increased, Metadata::new().with("ce-id", "msg-42"));
        assert_eq!(delivery_id(&tagged), "msg-42");

        let untagged = envelope(increased);
        assert_eq!(delivery_id(&untagged), untagged.event_id().to_string());
    }

    #[test]
    fn increases_are_handled_and_counted() {
        let consumer = CounterEventsConsumer::new();
        let outcome = consumer.on_event(&envelope(CounterEvent::ValueIncreased {
            value: 1,
            updated_value: 1,
        }));

        assert_eq!(outcome, ConsumerOutcome::Handled);
        assert_eq!(consumer.increases_handled(), 1);
    }

    #[test]
    fn multiplications_are_ignored() {
        let consumer = CounterEventsConsumer::new();
        let outcome = consumer.on_event(&envelope(CounterEvent::ValueMultiplied {
            multiplier: 2,
            updated_value: 0,
        }));

        assert_eq!(outcome, ConsumerOutcome::Ignored);
        assert_eq!(consumer.increases_handled(), 0);
    }
}
