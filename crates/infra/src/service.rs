//! Counter application service: the command-facing surface of the system.
//!
//! Wraps the [`CommandDispatcher`] for the counter aggregate, retries
//! optimistic concurrency conflicts from a fresh read, and exposes both typed
//! helpers and a name-based [`CounterService::invoke`] for generic callers.

use serde_json::{Value as JsonValue, json};
use thiserror::Error;
use tracing::{debug, info};

use counterflow_core::{DomainError, EntityId};
use counterflow_counter::{Counter, CounterCommand, CounterResult, ENTITY_TYPE};
use counterflow_events::{CommandEnvelope, EventBus, EventEnvelope, Metadata};

use crate::command_dispatcher::{CommandDispatcher, DispatchError, Dispatched};
use crate::event_store::{EventStore, EventStoreError};

#[derive(Debug, Error)]
pub enum ServiceError {
    /// A business rule refused the command (e.g. the bounded increase).
    #[error(transparent)]
    Rejected(DomainError),

    #[error("gave up after {attempts} concurrency conflicts")]
    Conflict { attempts: u32 },

    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("invalid arguments for '{command}': {reason}")]
    InvalidArguments { command: String, reason: String },

    #[error(transparent)]
    Store(EventStoreError),

    #[error("failed to decode event: {0}")]
    Deserialize(String),
}

impl ServiceError {
    /// Whether the same command may succeed if tried again later: the log was
    /// unavailable or other writers kept winning the race.
    pub fn is_transient(&self) -> bool {
        matches!(self, ServiceError::Store(_) | ServiceError::Conflict { .. })
    }
}

/// Counter commands over an event log `S`, announcing appends on `B`.
#[derive(Debug)]
pub struct CounterService<S, B> {
    dispatcher: CommandDispatcher<S, B>,
    conflict_retries: u32,
}

impl<S, B> CounterService<S, B> {
    pub fn new(dispatcher: CommandDispatcher<S, B>, conflict_retries: u32) -> Self {
        Self {
            dispatcher,
            conflict_retries,
        }
    }

    pub fn dispatcher(&self) -> &CommandDispatcher<S, B> {
        &self.dispatcher
    }

    pub fn store(&self) -> &S {
        self.dispatcher.store()
    }
}

impl<S, B> CounterService<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Run a command, retrying up to `conflict_retries` times when another
    /// writer appended between load and append.
    pub fn execute(
        &self,
        entity_id: &EntityId,
        command: CounterCommand,
        metadata: Metadata,
    ) -> Result<Dispatched<Counter>, ServiceError> {
        let envelope = CommandEnvelope::new(entity_id.clone(), command).with_metadata(metadata);

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match self.dispatcher.dispatch(ENTITY_TYPE, &envelope, Counter::empty) {
                Ok(done) => {
                    log_outcome(entity_id, command, &done);
                    return Ok(done);
                }
                Err(DispatchError::Concurrency(reason)) if attempts <= self.conflict_retries => {
                    debug!(entity_id = %entity_id, attempts, %reason, "append conflict, retrying");
                }
                Err(DispatchError::Concurrency(_)) => return Err(ServiceError::Conflict { attempts }),
                Err(DispatchError::Rejected(e)) => return Err(ServiceError::Rejected(e)),
                Err(DispatchError::Deserialize(e)) => return Err(ServiceError::Deserialize(e)),
                Err(DispatchError::Store(e)) => return Err(ServiceError::Store(e)),
            }
        }
    }

    /// Unbounded increase; returns the new value.
    pub fn increase(&self, entity_id: &EntityId, delta: i64) -> Result<i64, ServiceError> {
        self.value_after(entity_id, CounterCommand::Increase(delta))
    }

    /// Bounded increase; passing the limit is [`ServiceError::Rejected`].
    pub fn increase_with_error(&self, entity_id: &EntityId, delta: i64) -> Result<i64, ServiceError> {
        self.value_after(entity_id, CounterCommand::IncreaseWithError(delta))
    }

    /// Bounded increase; passing the limit is a typed result, not an error.
    pub fn increase_with_result(
        &self,
        entity_id: &EntityId,
        delta: i64,
    ) -> Result<CounterResult, ServiceError> {
        let done = self.execute(entity_id, CounterCommand::IncreaseWithResult(delta), Metadata::new())?;
        Ok(done.aggregate.increase_result(&done.events))
    }

    pub fn multiply(&self, entity_id: &EntityId, factor: i64) -> Result<i64, ServiceError> {
        self.value_after(entity_id, CounterCommand::Multiply(factor))
    }

    /// Current value, folded from the log. Writes nothing.
    pub fn get(&self, entity_id: &EntityId) -> Result<i64, ServiceError> {
        let counter = self
            .dispatcher
            .load(entity_id, Counter::empty)
            .map_err(|e| match e {
                DispatchError::Deserialize(e) => ServiceError::Deserialize(e),
                DispatchError::Store(e) => ServiceError::Store(e),
                DispatchError::Rejected(e) => ServiceError::Rejected(e),
                DispatchError::Concurrency(_) => ServiceError::Conflict { attempts: 1 },
            })?;
        Ok(counter.value())
    }

    /// Invoke a command by name with JSON arguments.
    ///
    /// Arguments are either a bare integer (`10`), a one-element array
    /// (`[10]`) or an object (`{"value": 10}`). `get` takes none.
    pub fn invoke(
        &self,
        entity_id: &EntityId,
        command_name: &str,
        args: &JsonValue,
        metadata: Metadata,
    ) -> Result<JsonValue, ServiceError> {
        let command = match command_name {
            "get" => return Ok(json!(self.get(entity_id)?)),
            "increase" => CounterCommand::Increase(integer_arg(command_name, args)?),
            "increaseWithError" => CounterCommand::IncreaseWithError(integer_arg(command_name, args)?),
            "increaseWithResult" => CounterCommand::IncreaseWithResult(integer_arg(command_name, args)?),
            "multiply" => CounterCommand::Multiply(integer_arg(command_name, args)?),
            other => return Err(ServiceError::UnknownCommand(other.to_string())),
        };

        let done = self.execute(entity_id, command, metadata)?;
        match command {
            CounterCommand::IncreaseWithResult(_) => {
                serde_json::to_value(done.aggregate.increase_result(&done.events))
                    .map_err(|e| ServiceError::Deserialize(e.to_string()))
            }
            _ => Ok(json!(done.aggregate.value())),
        }
    }

    fn value_after(&self, entity_id: &EntityId, command: CounterCommand) -> Result<i64, ServiceError> {
        let done = self.execute(entity_id, command, Metadata::new())?;
        Ok(done.aggregate.value())
    }
}

fn integer_arg(command: &str, args: &JsonValue) -> Result<i64, ServiceError> {
    let value = match args {
        JsonValue::Array(items) if items.len() == 1 => &items[0],
        JsonValue::Object(fields) => fields.get("value").unwrap_or(&JsonValue::Null),
        other => other,
    };
    value.as_i64().ok_or_else(|| ServiceError::InvalidArguments {
        command: command.to_string(),
        reason: format!("expected an integer, got {args}"),
    })
}

fn log_outcome(entity_id: &EntityId, command: CounterCommand, done: &Dispatched<Counter>) {
    let value = done.aggregate.value();
    match command {
        CounterCommand::Increase(delta)
        | CounterCommand::IncreaseWithError(delta)
        | CounterCommand::IncreaseWithResult(delta) => {
            if done.events.is_empty() {
                info!(entity_id = %entity_id, delta, value, "increase of counter {entity_id} by {delta} refused");
            } else {
                info!(entity_id = %entity_id, delta, value, "counter {entity_id} increased by {delta}");
            }
        }
        CounterCommand::Multiply(factor) => {
            info!(entity_id = %entity_id, factor, value, "counter {entity_id} multiplied by {factor}");
        }
    }
}
