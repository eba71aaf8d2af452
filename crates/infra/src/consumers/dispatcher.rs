//! Consumer dispatch: deliver log entries to registered consumers.
//!
//! For every (consumer, entity) lane the dispatcher reads the log from
//! `cursor + 1`, hands each entry to the consumer and moves the cursor only
//! after `Handled` or `Ignored`. A `Failed` outcome stops that lane; the same
//! entry is delivered again on the next pass (at-least-once).
//!
//! - a lane is processed by at most one thread at a time (per-lane mutex)
//! - different consumers of one entity run concurrently (scoped threads)
//! - the log is read through [`EventStream`], never past the tail observed
//!   when the pass started

use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, error, warn};

use counterflow_core::{ConsumerId, EntityId};
use counterflow_events::{Consumer, ConsumerOutcome};

use super::cursor_store::{ConsumerCursorStore, CursorStoreError};
use crate::event_store::{EventStore, EventStoreError, EventStream};

/// Entries read from the log per page.
pub const DEFAULT_BATCH_SIZE: usize = 64;

#[derive(Debug, Error)]
pub enum ConsumerDispatchError {
    #[error("consumer '{0}' is already registered")]
    DuplicateConsumer(ConsumerId),

    #[error(transparent)]
    Store(#[from] EventStoreError),

    #[error(transparent)]
    Cursor(#[from] CursorStoreError),
}

/// What one consumer did during one pass over one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerReport {
    pub consumer_id: ConsumerId,
    /// Entries handed to `on_event`.
    pub delivered: usize,
    pub handled: usize,
    /// Ignored by the consumer, or not decodable into its event type.
    pub ignored: usize,
    /// Reason of the failure that stopped this lane, if any: a `Failed`
    /// outcome, a panic in the consumer, or a log/cursor error.
    pub failure: Option<String>,
}

impl ConsumerReport {
    fn new(consumer_id: ConsumerId) -> Self {
        Self {
            consumer_id,
            delivered: 0,
            handled: 0,
            ignored: 0,
            failure: None,
        }
    }
}

/// Outcome of one dispatch pass over one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub entity_id: EntityId,
    pub consumers: Vec<ConsumerReport>,
}

impl DispatchReport {
    pub fn consumer(&self, consumer_id: &ConsumerId) -> Option<&ConsumerReport> {
        self.consumers.iter().find(|r| &r.consumer_id == consumer_id)
    }

    pub fn has_failures(&self) -> bool {
        self.consumers.iter().any(|r| r.failure.is_some())
    }
}

type Lane = Arc<Mutex<()>>;

/// Delivers entries of log `S` to consumers of event type `E`, tracking
/// positions in cursor store `C`.
pub struct ConsumerDispatcher<S, C, E> {
    store: S,
    cursors: C,
    consumers: Vec<Arc<dyn Consumer<E>>>,
    lanes: Mutex<HashMap<(ConsumerId, EntityId), Lane>>,
    batch_size: usize,
    _event: PhantomData<fn() -> E>,
}

impl<S, C, E> ConsumerDispatcher<S, C, E> {
    pub fn new(store: S, cursors: C) -> Self {
        Self {
            store,
            cursors,
            consumers: Vec::new(),
            lanes: Mutex::new(HashMap::new()),
            batch_size: DEFAULT_BATCH_SIZE,
            _event: PhantomData,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Add a consumer. Ids must be unique: they key the cursors.
    pub fn register(&mut self, consumer: Arc<dyn Consumer<E>>) -> Result<(), ConsumerDispatchError> {
        if self.consumers.iter().any(|c| c.id() == consumer.id()) {
            return Err(ConsumerDispatchError::DuplicateConsumer(consumer.id().clone()));
        }
        self.consumers.push(consumer);
        Ok(())
    }

    pub fn consumer_ids(&self) -> Vec<ConsumerId> {
        self.consumers.iter().map(|c| c.id().clone()).collect()
    }

    pub fn cursors(&self) -> &C {
        &self.cursors
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn lane(&self, consumer_id: &ConsumerId, entity_id: &EntityId) -> Lane {
        let mut lanes = self.lanes.lock().unwrap_or_else(PoisonError::into_inner);
        lanes
            .entry((consumer_id.clone(), entity_id.clone()))
            .or_default()
            .clone()
    }
}

impl<S, C, E> ConsumerDispatcher<S, C, E>
where
    S: EventStore,
    C: ConsumerCursorStore,
    E: DeserializeOwned,
{
    /// Deliver pending entries of one entity to every consumer.
    ///
    /// Never fails as a whole: a lane that breaks (consumer failure or panic,
    /// log or cursor error) is reported in its [`ConsumerReport`] and retried
    /// on the next pass, while the other lanes carry on.
    pub fn dispatch_entity(&self, entity_id: &EntityId) -> DispatchReport {
        let consumers: Vec<ConsumerReport> = thread::scope(|scope| {
            let running: Vec<_> = self
                .consumers
                .iter()
                .map(|consumer| {
                    let handle = scope.spawn(move || self.run_lane(consumer.as_ref(), entity_id));
                    (consumer.id(), handle)
                })
                .collect();

            running
                .into_iter()
                .map(|(consumer_id, handle)| {
                    handle.join().unwrap_or_else(|payload| {
                        let reason = panic_reason(payload.as_ref());
                        error!(
                            consumer = %consumer_id,
                            entity_id = %entity_id,
                            %reason,
                            "consumer panicked, event will be redelivered"
                        );
                        ConsumerReport {
                            failure: Some(format!("consumer panicked: {reason}")),
                            ..ConsumerReport::new(consumer_id.clone())
                        }
                    })
                })
                .collect()
        });

        DispatchReport {
            entity_id: entity_id.clone(),
            consumers,
        }
    }

    /// [`Self::dispatch_entity`] for every entity in the log.
    ///
    /// Only listing the entities can fail; per-entity problems end up in the
    /// reports.
    pub fn dispatch_all(&self) -> Result<Vec<DispatchReport>, ConsumerDispatchError> {
        let entity_ids = self.store.entity_ids()?;
        Ok(entity_ids
            .iter()
            .map(|entity_id| self.dispatch_entity(entity_id))
            .collect())
    }

    fn run_lane(&self, consumer: &dyn Consumer<E>, entity_id: &EntityId) -> ConsumerReport {
        let mut report = ConsumerReport::new(consumer.id().clone());
        if let Err(err) = self.deliver(consumer, entity_id, &mut report) {
            warn!(
                consumer = %consumer.id(),
                entity_id = %entity_id,
                error = %err,
                "delivery pass aborted, will retry"
            );
            report.failure = Some(err.to_string());
        }
        report
    }

    fn deliver(
        &self,
        consumer: &dyn Consumer<E>,
        entity_id: &EntityId,
        report: &mut ConsumerReport,
    ) -> Result<(), ConsumerDispatchError> {
        let consumer_id = consumer.id();
        let lane = self.lane(consumer_id, entity_id);
        let _guard = lane.lock().unwrap_or_else(PoisonError::into_inner);

        let from = self.cursors.get_cursor(consumer_id, entity_id)? + 1;

        for stored in EventStream::open(&self.store, entity_id.clone(), from, self.batch_size)? {
            let stored = stored?;

            let outcome = match stored.decode::<E>() {
                Ok(event) => {
                    report.delivered += 1;
                    consumer.on_event(&stored.to_envelope().with_payload(event))
                }
                Err(e) => {
                    debug!(
                        consumer = %consumer_id,
                        entity_id = %entity_id,
                        sequence_number = stored.sequence_number,
                        event_type = %stored.event_type,
                        error = %e,
                        "event kind not understood by consumer, skipping"
                    );
                    ConsumerOutcome::Ignored
                }
            };

            match &outcome {
                ConsumerOutcome::Handled => report.handled += 1,
                ConsumerOutcome::Ignored => report.ignored += 1,
                ConsumerOutcome::Failed(reason) => {
                    warn!(
                        consumer = %consumer_id,
                        entity_id = %entity_id,
                        sequence_number = stored.sequence_number,
                        %reason,
                        "consumer failed, event will be redelivered"
                    );
                    report.failure = Some(reason.clone());
                }
            }
            if !outcome.advances_cursor() {
                break;
            }
            self.cursors.advance(consumer_id, entity_id, stored.sequence_number)?;
        }

        Ok(())
    }
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
