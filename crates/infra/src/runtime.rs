//! Wiring of the whole counter pipeline.
//!
//! ```text
//! inbound topic ──► InboundWorker ──► CounterService ──► event log
//!                                            │
//!                                   append notification
//!                                            ▼
//!                                     DispatchWorker ──► CounterEventsConsumer
//!                                                   └──► EnvelopeProducer ──► outbound topic
//! ```

use std::io;
use std::sync::Arc;

use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::info;

use counterflow_counter::CounterEvent;
use counterflow_events::{EventBus, EventEnvelope, InMemoryEventBus, OutboundEnvelope, Subscription};

use crate::command_dispatcher::CommandDispatcher;
use crate::config::CounterConfig;
use crate::consumers::{
    ConsumerCursorStore, ConsumerDispatchError, ConsumerDispatcher, CounterEventsConsumer, DispatchReport,
    EnvelopeProducer,
};
use crate::event_store::EventStore;
use crate::inbound::{InboundCommandAdapter, InboundMessage};
use crate::service::CounterService;
use crate::workers::{DispatchWorker, InboundWorker, WorkerHandle};

/// Bus on which committed log entries are announced.
pub type Notifications = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;

/// Cursor store shared by the runtime's consumers.
pub type Cursors = Arc<dyn ConsumerCursorStore>;

pub type CounterConsumerDispatcher<S> = ConsumerDispatcher<S, Cursors, CounterEvent>;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Consumers(#[from] ConsumerDispatchError),

    #[error("failed to spawn worker: {0}")]
    Spawn(#[from] io::Error),
}

/// Running pipeline over event log `S` with outbound transport `T`.
pub struct CounterRuntime<S, T> {
    service: Arc<CounterService<S, Notifications>>,
    dispatcher: Arc<CounterConsumerDispatcher<S>>,
    events_consumer: Arc<CounterEventsConsumer>,
    producer: Arc<EnvelopeProducer<T>>,
    workers: Vec<WorkerHandle>,
}

impl<S, T> CounterRuntime<S, T>
where
    S: EventStore + Clone + 'static,
    T: EventBus<OutboundEnvelope> + 'static,
{
    /// Build the pipeline and start its workers.
    ///
    /// `cursors` should be durable whenever `store` is (see
    /// `PostgresEventStore::cursor_store`), otherwise every consumer replays
    /// the whole log after a restart. `inbound` is the subscription to the
    /// inbound command topic, if any.
    pub fn start(
        config: &CounterConfig,
        store: S,
        cursors: Cursors,
        transport: T,
        inbound: Option<Subscription<InboundMessage>>,
    ) -> Result<Self, RuntimeError> {
        let notifications: Notifications = Arc::new(InMemoryEventBus::new());
        let notes = notifications.subscribe();

        let service = Arc::new(CounterService::new(
            CommandDispatcher::new(store.clone(), notifications),
            config.conflict_retries,
        ));

        let events_consumer = Arc::new(CounterEventsConsumer::new());
        let producer = Arc::new(EnvelopeProducer::new(
            transport,
            config.events_topic.as_str(),
            config.source.as_str(),
            config.content_type.as_str(),
        ));

        let mut dispatcher: CounterConsumerDispatcher<S> = ConsumerDispatcher::new(store, cursors);
        dispatcher.register(events_consumer.clone())?;
        dispatcher.register(producer.clone())?;
        let dispatcher = Arc::new(dispatcher);

        let mut workers = vec![DispatchWorker::spawn(
            dispatcher.clone(),
            notes,
            config.redelivery_interval,
        )?];
        if let Some(messages) = inbound {
            workers.push(InboundWorker::spawn(
                InboundCommandAdapter::new(service.clone()),
                messages,
                config.redelivery_interval,
            )?);
        }

        info!(
            events_topic = %config.events_topic,
            commands_topic = %config.commands_topic,
            consumers = dispatcher.consumer_ids().len(),
            "counter runtime started"
        );

        Ok(Self {
            service,
            dispatcher,
            events_consumer,
            producer,
            workers,
        })
    }

    pub fn service(&self) -> &Arc<CounterService<S, Notifications>> {
        &self.service
    }

    pub fn dispatcher(&self) -> &Arc<CounterConsumerDispatcher<S>> {
        &self.dispatcher
    }

    pub fn events_consumer(&self) -> &CounterEventsConsumer {
        &self.events_consumer
    }

    pub fn producer(&self) -> &EnvelopeProducer<T> {
        &self.producer
    }

    pub fn inbound_adapter(&self) -> InboundCommandAdapter<S, Notifications> {
        InboundCommandAdapter::new(self.service.clone())
    }

    /// Stop the workers, then run one last delivery pass so nothing appended
    /// before shutdown is left undelivered (unless a consumer keeps failing).
    pub fn shutdown(self) -> Result<Vec<DispatchReport>, ConsumerDispatchError> {
        for worker in self.workers.into_iter().rev() {
            worker.shutdown();
        }
        let reports = self.dispatcher.dispatch_all()?;
        info!(entities = reports.len(), "counter runtime stopped");
        Ok(reports)
    }
}
