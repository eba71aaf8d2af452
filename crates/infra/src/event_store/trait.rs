use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use counterflow_core::{EntityId, ExpectedVersion};
use counterflow_events::{EventEnvelope, Metadata};
use std::sync::Arc;

/// An event ready to be appended to a stream (not yet assigned a sequence number).
///
/// Lifecycle:
///
/// 1. **Domain event**: decided by the aggregate's `handle()`
/// 2. **UncommittedEvent**: serialized, wrapped with stream metadata and the command's caller metadata
/// 3. **StoredEvent**: persisted with an assigned sequence number and append timestamp
/// 4. **EventEnvelope**: announced on the notification bus and delivered to consumers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncommittedEvent {
    pub event_id: Uuid,
    pub entity_id: EntityId,
    pub entity_type: String,

    pub event_type: String,
    pub event_version: u32,

    pub payload: JsonValue,
    pub metadata: Metadata,
}

/// A stored event in an append-only stream (assigned a sequence number).
///
/// Sequence numbers are per entity, start at 1, strictly increase and have no
/// gaps. Once assigned they never change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub event_id: Uuid,
    pub entity_id: EntityId,
    pub entity_type: String,

    /// Monotonically increasing position in the entity stream.
    pub sequence_number: u64,

    pub event_type: String,
    pub event_version: u32,
    pub appended_at: DateTime<Utc>,

    pub payload: JsonValue,
    pub metadata: Metadata,
}

impl StoredEvent {
    pub fn stream_version(&self) -> u64 {
        self.sequence_number
    }

    /// Convert a stored event into an envelope for notification / consumer delivery.
    pub fn to_envelope(&self) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            self.event_id,
            self.entity_id.clone(),
            self.entity_type.clone(),
            self.sequence_number,
            self.event_type.clone(),
            self.appended_at,
            self.metadata.clone(),
            self.payload.clone(),
        )
    }

    /// Decode the payload into the typed domain event.
    pub fn decode<E: serde::de::DeserializeOwned>(&self) -> serde_json::Result<E> {
        serde_json::from_value(self.payload.clone())
    }
}

/// Event log operation error.
///
/// These are **infrastructure errors** as opposed to domain errors.
///
/// - **Concurrency**: the caller's expected version did not match the stream
///   tail; re-read state and retry the whole command
/// - **EntityTypeMismatch**: a batch or stream mixes entity types
/// - **InvalidAppend**: invalid event data or stream state
/// - **Backend**: the storage backend failed
#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error("entity type mismatch: {0}")]
    EntityTypeMismatch(String),

    #[error("invalid append: {0}")]
    InvalidAppend(String),

    #[error("event store backend failure: {0}")]
    Backend(String),
}

/// Append-only, per-entity event log.
///
/// ## Append semantics
///
/// `append()`:
/// - requires every event in the batch to target `entity_id` with one entity type
/// - checks `expected_version` against the stream tail (optimistic concurrency)
/// - assigns sequence numbers `tail + 1, tail + 2, ...`
/// - persists the batch atomically (all or nothing)
///
/// Appends for the same entity are serialized (single writer per entity);
/// appends for different entities are independent.
///
/// ## Read semantics
///
/// `read_from()` returns entries with `sequence_number >= from_sequence` in
/// order, ending at the tail as of the call. It never skips or reorders.
pub trait EventStore: Send + Sync {
    fn append(
        &self,
        entity_id: &EntityId,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Read up to `limit` entries starting at `from_sequence` (1-based; 0 is treated as 1).
    fn read_from(
        &self,
        entity_id: &EntityId,
        from_sequence: u64,
        limit: Option<usize>,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Sequence number of the last entry (0 for an unknown/empty stream).
    fn stream_version(&self, entity_id: &EntityId) -> Result<u64, EventStoreError>;

    /// Every entity that has at least one entry.
    fn entity_ids(&self) -> Result<Vec<EntityId>, EventStoreError>;

    /// Load the full stream for an entity.
    fn load_stream(&self, entity_id: &EntityId) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.read_from(entity_id, 1, None)
    }
}

impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    fn append(
        &self,
        entity_id: &EntityId,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).append(entity_id, events, expected_version)
    }

    fn read_from(
        &self,
        entity_id: &EntityId,
        from_sequence: u64,
        limit: Option<usize>,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).read_from(entity_id, from_sequence, limit)
    }

    fn stream_version(&self, entity_id: &EntityId) -> Result<u64, EventStoreError> {
        (**self).stream_version(entity_id)
    }

    fn entity_ids(&self) -> Result<Vec<EntityId>, EventStoreError> {
        (**self).entity_ids()
    }
}

impl UncommittedEvent {
    /// Build an uncommitted event from a typed domain event.
    pub fn from_typed<E>(
        entity_id: EntityId,
        entity_type: impl Into<String>,
        event_id: Uuid,
        event: &E,
        metadata: Metadata,
    ) -> Result<Self, EventStoreError>
    where
        E: counterflow_events::Event + Serialize,
    {
        let payload = serde_json::to_value(event).map_err(|e| {
            EventStoreError::InvalidAppend(format!("payload serialization failed: {e}"))
        })?;

        Ok(Self {
            event_id,
            entity_id,
            entity_type: entity_type.into(),
            event_type: event.event_type().to_string(),
            event_version: event.version(),
            payload,
            metadata,
        })
    }
}

/// Validate a batch before append: one entity, one entity type.
///
/// Returns the batch's entity type.
pub(crate) fn validate_batch<'a>(
    entity_id: &EntityId,
    events: &'a [UncommittedEvent],
) -> Result<&'a str, EventStoreError> {
    let entity_type = events
        .first()
        .map(|e| e.entity_type.as_str())
        .ok_or_else(|| EventStoreError::InvalidAppend("empty batch".to_string()))?;

    for (idx, e) in events.iter().enumerate() {
        if &e.entity_id != entity_id {
            return Err(EventStoreError::InvalidAppend(format!(
                "batch event at index {idx} targets '{}', expected '{entity_id}'",
                e.entity_id
            )));
        }
        if e.entity_type != entity_type {
            return Err(EventStoreError::EntityTypeMismatch(format!(
                "batch contains multiple entity types (index {idx})"
            )));
        }
    }

    Ok(entity_type)
}
