use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use counterflow_core::EntityId;

use crate::Metadata;

/// Envelope for a committed event, containing stream metadata.
///
/// This is what consumers receive: one log entry of one entity stream.
///
/// Notes:
/// - **Append-only**: `sequence_number` is strictly increasing per entity, starting at 1.
/// - `metadata` is the caller metadata of the command that produced the event.
/// - `payload` is the domain-agnostic event payload (JSON on the bus, typed in consumers).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,

    entity_id: EntityId,
    entity_type: String,

    /// Monotonically increasing position in the entity stream.
    sequence_number: u64,

    event_type: String,
    appended_at: DateTime<Utc>,
    metadata: Metadata,

    payload: E,
}

impl<E> EventEnvelope<E> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        event_id: Uuid,
        entity_id: EntityId,
        entity_type: impl Into<String>,
        sequence_number: u64,
        event_type: impl Into<String>,
        appended_at: DateTime<Utc>,
        metadata: Metadata,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            entity_id,
            entity_type: entity_type.into(),
            sequence_number,
            event_type: event_type.into(),
            appended_at,
            metadata,
            payload,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn entity_id(&self) -> &EntityId {
        &self.entity_id
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn appended_at(&self) -> DateTime<Utc> {
        self.appended_at
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }

    /// Swap the payload, keeping all stream metadata (e.g. JSON -> typed event).
    pub fn with_payload<T>(self, payload: T) -> EventEnvelope<T> {
        EventEnvelope {
            event_id: self.event_id,
            entity_id: self.entity_id,
            entity_type: self.entity_type,
            sequence_number: self.sequence_number,
            event_type: self.event_type,
            appended_at: self.appended_at,
            metadata: self.metadata,
            payload,
        }
    }
}
