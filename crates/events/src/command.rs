use counterflow_core::EntityId;

use crate::Metadata;

/// A request to change the state of one entity (command abstraction).
///
/// Commands represent **intent** and are **transient**: they are never
/// persisted. An accepted command becomes an event; a rejected one leaves no
/// trace in the log.
///
/// Commands must be cloneable, thread-safe and own all their data so they can
/// be retried after an optimistic concurrency conflict.
pub trait Command: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable command name (e.g. "increase"), used for logging and routing.
    fn command_name(&self) -> &'static str;
}

/// A command addressed to an entity, with the caller's metadata.
///
/// The metadata is stored next to the resulting event so downstream consumers
/// (e.g. the envelope producer) can propagate it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandEnvelope<C> {
    entity_id: EntityId,
    command: C,
    metadata: Metadata,
}

impl<C: Command> CommandEnvelope<C> {
    pub fn new(entity_id: EntityId, command: C) -> Self {
        Self {
            entity_id,
            command,
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn target_entity_id(&self) -> &EntityId {
        &self.entity_id
    }

    pub fn command(&self) -> &C {
        &self.command
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn command_name(&self) -> &'static str {
        self.command.command_name()
    }
}
