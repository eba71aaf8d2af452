//! Inbound broker messages → counter commands.
//!
//! Recognized message kinds (matched on the last segment of the type name, so
//! `com.example.IncreaseCounter` and `Outer$IncreaseCounter` both match):
//!
//! | type | command |
//! |---|---|
//! | `IncreaseCounter` | `increase(value)` |
//! | `MultiplyCounter` | `multiply(value)` |
//!
//! Anything else is dropped: no error, no event.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::debug;

use counterflow_core::EntityId;
use counterflow_counter::CounterCommand;
use counterflow_events::{EventBus, EventEnvelope, Metadata};

use crate::event_store::EventStore;
use crate::service::{CounterService, ServiceError};

/// A message taken off the inbound topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(rename = "data", default)]
    pub payload: JsonValue,
    #[serde(default)]
    pub metadata: Metadata,
}

impl InboundMessage {
    pub fn new(message_type: impl Into<String>, payload: JsonValue, metadata: Metadata) -> Self {
        Self {
            message_type: message_type.into(),
            payload,
            metadata,
        }
    }

    /// `IncreaseCounter { counterId, value }`.
    pub fn increase_counter(counter_id: &str, value: i64) -> Self {
        Self::new(
            "IncreaseCounter",
            serde_json::json!({ "counterId": counter_id, "value": value }),
            Metadata::new(),
        )
    }

    /// `MultiplyCounter { counterId, value }`.
    pub fn multiply_counter(counter_id: &str, value: i64) -> Self {
        Self::new(
            "MultiplyCounter",
            serde_json::json!({ "counterId": counter_id, "value": value }),
            Metadata::new(),
        )
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

#[derive(Debug, Error)]
pub enum InboundError {
    #[error("malformed {message_type} payload: {reason}")]
    MalformedPayload { message_type: String, reason: String },

    #[error("{0} message names no counter (no counterId, no ce-subject)")]
    MissingEntityId(String),

    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl InboundError {
    /// Whether retrying the same message later may succeed. Malformed
    /// messages and rejected commands never will.
    pub fn is_transient(&self) -> bool {
        matches!(self, InboundError::Service(e) if e.is_transient())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundOutcome {
    Applied { entity_id: EntityId, value: i64 },
    Dropped { message_type: String },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CounterPayload {
    #[serde(default)]
    counter_id: Option<String>,
    value: i64,
}

/// Translate a message into a target counter and command.
///
/// `Ok(None)` means the kind is not one this adapter handles.
pub fn translate(message: &InboundMessage) -> Result<Option<(EntityId, CounterCommand)>, InboundError> {
    let kind = message
        .message_type
        .rsplit(['.', '$'])
        .next()
        .unwrap_or(message.message_type.as_str());

    let make: fn(i64) -> CounterCommand = match kind {
        "IncreaseCounter" => CounterCommand::Increase,
        "MultiplyCounter" => CounterCommand::Multiply,
        _ => return Ok(None),
    };

    let payload: CounterPayload =
        serde_json::from_value(message.payload.clone()).map_err(|e| InboundError::MalformedPayload {
            message_type: message.message_type.clone(),
            reason: e.to_string(),
        })?;

    let raw_id = payload
        .counter_id
        .as_deref()
        .or_else(|| message.metadata.subject())
        .ok_or_else(|| InboundError::MissingEntityId(message.message_type.clone()))?;
    let entity_id = EntityId::new(raw_id).map_err(|e| InboundError::MalformedPayload {
        message_type: message.message_type.clone(),
        reason: e.to_string(),
    })?;

    Ok(Some((entity_id, make(payload.value))))
}

/// Applies inbound messages to counters through the [`CounterService`].
#[derive(Debug)]
pub struct InboundCommandAdapter<S, B> {
    service: std::sync::Arc<CounterService<S, B>>,
}

impl<S, B> Clone for InboundCommandAdapter<S, B> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
        }
    }
}

impl<S, B> InboundCommandAdapter<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(service: std::sync::Arc<CounterService<S, B>>) -> Self {
        Self { service }
    }

    /// Apply one message. The message metadata travels with the command.
    pub fn handle(&self, message: InboundMessage) -> Result<InboundOutcome, InboundError> {
        let Some((entity_id, command)) = translate(&message)? else {
            debug!(message_type = %message.message_type, "dropping unrecognized inbound message");
            return Ok(InboundOutcome::Dropped {
                message_type: message.message_type,
            });
        };

        let done = self.service.execute(&entity_id, command, message.metadata)?;
        Ok(InboundOutcome::Applied {
            entity_id,
            value: done.aggregate.value(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use counterflow_events::InMemoryEventBus;
    use serde_json::json;

    use crate::command_dispatcher::CommandDispatcher;
    use crate::event_store::InMemoryEventStore;

    type Adapter = InboundCommandAdapter<InMemoryEventStore, InMemoryEventBus<EventEnvelope<JsonValue>>>;

    fn adapter() -> Adapter {
        let service = CounterService::new(
            CommandDispatcher::new(InMemoryEventStore::new(), InMemoryEventBus::new()),
            3,
        );
        InboundCommandAdapter::new(Arc::new(service))
    }

    fn id(s: &str) -> EntityId {
        EntityId::new(s).unwrap()
    }

    #[test]
    fn translates_known_kinds_by_suffix() {
        let msg = InboundMessage::new(
            "counter.application.CounterCommandFromTopicConsumer$IncreaseCounter",
            json!({ "counterId": "c-1", "value": 4 }),
            Metadata::new(),
        );
        assert_eq!(
            translate(&msg).unwrap(),
            Some((id("c-1"), CounterCommand::Increase(4)))
        );

        let msg = InboundMessage::multiply_counter("c-2", 3);
        assert_eq!(
            translate(&msg).unwrap(),
            Some((id("c-2"), CounterCommand::Multiply(3)))
        );
    }

    #[test]
    fn subject_header_names_the_counter_when_payload_does_not() {
        let msg = InboundMessage::new(
            "IncreaseCounter",
            json!({ "value": 1 }),
            Metadata::new().with("ce-subject", "from-subject"),
        );
        assert_eq!(
            translate(&msg).unwrap(),
            Some((id("from-subject"), CounterCommand::Increase(1)))
        );
    }

    #[test]
    fn unknown_kind_is_dropped_without_side_effects() {
        let adapter = adapter();
        let outcome = adapter
            .handle(InboundMessage::new("test", json!({ "anything": true }), Metadata::new()))
            .unwrap();

        assert_eq!(
            outcome,
            InboundOutcome::Dropped {
                message_type: "test".to_string()
            }
        );
        assert!(adapter.service.store().entity_ids().unwrap().is_empty());
    }

    #[test]
    fn malformed_payload_is_an_error() {
        let msg = InboundMessage::new("IncreaseCounter", json!({ "counterId": "c-1" }), Metadata::new());
        assert!(matches!(translate(&msg), Err(InboundError::MalformedPayload { .. })));

        let msg = InboundMessage::new("MultiplyCounter", json!({ "value": 2 }), Metadata::new());
        let err = translate(&msg).unwrap_err();
        assert!(matches!(err, InboundError::MissingEntityId(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn applies_commands_and_forwards_metadata() {
        let adapter = adapter();
        let meta = Metadata::new().with("Content-Type", "application/json");

        adapter
            .handle(InboundMessage::increase_counter("c-1", 10).with_metadata(meta))
            .unwrap();
        let outcome = adapter
            .handle(InboundMessage::multiply_counter("c-1", 20))
            .unwrap();

        assert_eq!(
            outcome,
            InboundOutcome::Applied {
                entity_id: id("c-1"),
                value: 200
            }
        );
        let stored = adapter.service.store().load_stream(&id("c-1")).unwrap();
        assert_eq!(stored[0].metadata.content_type(), Some("application/json"));
        assert!(stored[1].metadata.is_empty());
    }

    #[test]
    fn wire_shape_deserializes() {
        let msg: InboundMessage = serde_json::from_str(
            r#"{"type":"IncreaseCounter","data":{"counterId":"c-9","value":7},"metadata":{"ce-id":"1"}}"#,
        )
        .unwrap();
        assert_eq!(msg.metadata.id(), Some("1"));
        assert_eq!(
            translate(&msg).unwrap(),
            Some((id("c-9"), CounterCommand::Increase(7)))
        );
    }
}
