//! Command execution pipeline.
//!
//! ```text
//! CommandEnvelope
//!   ↓
//! 1. Load the entity stream from the log
//!   ↓
//! 2. Rehydrate the aggregate (fold history)
//!   ↓
//! 3. Handle the command (pure decision, zero or more events)
//!   ↓
//! 4. Append with ExpectedVersion::Exact(loaded tail)
//!   ↓
//! 5. Announce committed entries on the notification bus
//! ```
//!
//! The append is the point of no return. A notification that cannot be
//! published is logged and otherwise ignored: consumers read the log, not the
//! bus, so the next dispatch pass still picks the entry up.
//!
//! This module contains no IO itself; it composes infrastructure traits.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use counterflow_core::{Aggregate, AggregateRoot, DomainError, EntityId, ExpectedVersion};
use counterflow_events::{Command, CommandEnvelope, Event, EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug, Error)]
pub enum DispatchError {
    /// The stream moved between load and append; reload and retry.
    #[error("concurrency conflict: {0}")]
    Concurrency(String),

    /// The aggregate rejected the command. Nothing was appended.
    #[error("command rejected: {0}")]
    Rejected(DomainError),

    /// A historical payload could not be decoded into the aggregate's event type.
    #[error("failed to decode stored event: {0}")]
    Deserialize(String),

    #[error(transparent)]
    Store(EventStoreError),
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg),
            other => DispatchError::Store(other),
        }
    }
}

/// Result of a dispatched command.
#[derive(Debug, Clone)]
pub struct Dispatched<A: Aggregate> {
    /// State after the decided events were applied.
    pub aggregate: A,
    /// Events decided by the aggregate (empty when nothing changed).
    pub events: Vec<A::Event>,
    /// Log entries written for `events`, in order.
    pub committed: Vec<StoredEvent>,
}

/// Reusable command execution engine for event-sourced aggregates.
///
/// `S` is the event log, `B` the bus on which committed entries are announced.
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    notifications: B,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, notifications: B) -> Self {
        Self {
            store,
            notifications,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn notifications(&self) -> &B {
        &self.notifications
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Rehydrate an aggregate from its full stream without running a command.
    pub fn load<A>(
        &self,
        entity_id: &EntityId,
        make_aggregate: impl FnOnce(EntityId) -> A,
    ) -> Result<A, DispatchError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        let history = self.store.load_stream(entity_id)?;
        validate_loaded_stream(entity_id, &history)?;

        let mut aggregate = make_aggregate(entity_id.clone());
        apply_history(&mut aggregate, &history)?;
        Ok(aggregate)
    }

    /// Run one command through load, decide, append and notify.
    ///
    /// Returns [`DispatchError::Concurrency`] when another writer appended to
    /// the stream after it was loaded; the caller decides whether to retry.
    pub fn dispatch<A>(
        &self,
        entity_type: &str,
        envelope: &CommandEnvelope<A::Command>,
        make_aggregate: impl FnOnce(EntityId) -> A,
    ) -> Result<Dispatched<A>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Command: Command,
        A::Event: Event + Serialize + DeserializeOwned,
    {
        let entity_id = envelope.target_entity_id();

        let mut aggregate = self.load(entity_id, make_aggregate)?;
        let expected = ExpectedVersion::Exact(aggregate.version());

        let decided = aggregate
            .handle(envelope.command())
            .map_err(DispatchError::Rejected)?;
        if decided.is_empty() {
            debug!(
                entity_id = %entity_id,
                command = envelope.command_name(),
                "command produced no events"
            );
            return Ok(Dispatched {
                aggregate,
                events: decided,
                committed: vec![],
            });
        }

        let uncommitted = decided
            .iter()
            .map(|ev| {
                UncommittedEvent::from_typed(
                    entity_id.clone(),
                    entity_type,
                    Uuid::now_v7(),
                    ev,
                    envelope.metadata().clone(),
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        let committed = self.store.append(entity_id, uncommitted, expected)?;
        aggregate.replay(&decided);

        for stored in &committed {
            if let Err(e) = self.notifications.publish(stored.to_envelope()) {
                warn!(
                    entity_id = %entity_id,
                    sequence_number = stored.sequence_number,
                    error = ?e,
                    "append notification failed; consumers catch up on the next sweep"
                );
            }
        }

        Ok(Dispatched {
            aggregate,
            events: decided,
            committed,
        })
    }
}

fn validate_loaded_stream(entity_id: &EntityId, stream: &[StoredEvent]) -> Result<(), DispatchError> {
    // The log must hand back this entity's entries, gapless from 1.
    for (idx, e) in stream.iter().enumerate() {
        if &e.entity_id != entity_id {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "loaded stream contains foreign entity '{}' at index {idx}",
                e.entity_id
            ))));
        }
        let expected = idx as u64 + 1;
        if e.sequence_number != expected {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "sequence gap in loaded stream (expected {expected}, found {})",
                e.sequence_number
            ))));
        }
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    for stored in history {
        let ev: A::Event = stored
            .decode()
            .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
        aggregate.apply(&ev);
    }
    Ok(())
}
