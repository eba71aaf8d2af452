//! Republishes log entries to an outbound topic as CloudEvent-style envelopes.

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use counterflow_core::ConsumerId;
use counterflow_events::metadata::{CE_SPECVERSION, CE_TYPE, CONTENT_TYPE};
use counterflow_events::{Consumer, ConsumerOutcome, EventBus, EventEnvelope, Metadata, OutboundEnvelope};

pub const ENVELOPE_PRODUCER_ID: &str = "counter-journal-to-topic";

pub const CLOUD_EVENTS_SPEC_VERSION: &str = "1.0";

/// Consumer that turns every delivered event into an [`OutboundEnvelope`]
/// and publishes it on the outbound transport `B`.
///
/// - message id: fresh UUIDv7 per delivery attempt
/// - subject: the entity id
/// - headers: `ce-specversion`, `ce-type`, `Content-Type` defaults, overridden
///   by the metadata of the command that produced the event
///
/// A publish error is returned as `Failed`, so the entry is redelivered.
#[derive(Debug)]
pub struct EnvelopeProducer<B> {
    id: ConsumerId,
    transport: B,
    topic: String,
    source: String,
    content_type: String,
}

impl<B> EnvelopeProducer<B> {
    pub fn new(
        transport: B,
        topic: impl Into<String>,
        source: impl Into<String>,
        content_type: impl Into<String>,
    ) -> Self {
        Self {
            id: ConsumerId::from_static(ENVELOPE_PRODUCER_ID),
            transport,
            topic: topic.into(),
            source: source.into(),
            content_type: content_type.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn transport(&self) -> &B {
        &self.transport
    }

    fn default_headers(&self, event_type: &str) -> Metadata {
        Metadata::new()
            .with(CE_SPECVERSION, CLOUD_EVENTS_SPEC_VERSION)
            .with(CE_TYPE, event_type)
            .with(CONTENT_TYPE, self.content_type.as_str())
    }

    /// Build the envelope for one delivery attempt.
    pub fn envelope_for<E: Serialize>(
        &self,
        envelope: &EventEnvelope<E>,
    ) -> Result<OutboundEnvelope, serde_json::Error> {
        let payload = serde_json::to_value(envelope.payload())?;
        let headers = envelope
            .metadata()
            .merged_over(&self.default_headers(envelope.event_type()));
        let content_type = headers
            .content_type()
            .unwrap_or(self.content_type.as_str())
            .to_string();

        Ok(OutboundEnvelope::new(
            Uuid::now_v7(),
            self.source.as_str(),
            envelope.entity_id().as_str(),
            envelope.event_type(),
            content_type,
            headers,
            payload,
        ))
    }
}

impl<E, B> Consumer<E> for EnvelopeProducer<B>
where
    E: Serialize + core::fmt::Debug,
    B: EventBus<OutboundEnvelope>,
{
    fn id(&self) -> &ConsumerId {
        &self.id
    }

    fn on_event(&self, envelope: &EventEnvelope<E>) -> ConsumerOutcome {
        let outbound = match self.envelope_for(envelope) {
            Ok(outbound) => outbound,
            Err(e) => return ConsumerOutcome::failed(format!("payload encoding failed: {e}")),
        };
        let message_id = outbound.message_id();

        match self.transport.publish(outbound) {
            Ok(()) => {
                info!(
                    entity_id = %envelope.entity_id(),
                    sequence_number = envelope.sequence_number(),
                    %message_id,
                    event = ?envelope.payload(),
                    "published event to topic {}",
                    self.topic
                );
                ConsumerOutcome::Handled
            }
            Err(e) => {
                warn!(
                    entity_id = %envelope.entity_id(),
                    sequence_number = envelope.sequence_number(),
                    topic = %self.topic,
                    error = ?e,
                    "outbound publish failed"
                );
                ConsumerOutcome::failed(format!("publish to '{}' failed: {e:?}", self.topic))
            }
        }
    }
}
