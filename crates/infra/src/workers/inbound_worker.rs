use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value as JsonValue;
use tracing::{error, info, warn};

use counterflow_events::{EventBus, EventEnvelope, Subscription};

use super::{WorkerHandle, spawn_worker};
use crate::event_store::EventStore;
use crate::inbound::{InboundCommandAdapter, InboundError, InboundMessage, InboundOutcome};

/// Applies messages from the inbound topic to counters, in arrival order.
///
/// A message that fails for a transient reason (log unavailable, conflicts
/// exhausted) stays at the head of a pending queue and holds back the
/// messages behind it. The queue is retried on every new message and every
/// `retry_interval`. Malformed messages and rejected commands are dropped.
pub struct InboundWorker;

impl InboundWorker {
    pub fn spawn<S, B>(
        adapter: InboundCommandAdapter<S, B>,
        messages: Subscription<InboundMessage>,
        retry_interval: Duration,
    ) -> io::Result<WorkerHandle>
    where
        S: EventStore + 'static,
        B: EventBus<EventEnvelope<JsonValue>> + 'static,
    {
        let pending = Arc::new(PendingMessages::new(adapter));
        let retry = pending.clone();

        spawn_worker(
            "counter-inbound",
            messages,
            move |message: InboundMessage| {
                pending.push(message);
                pending.flush()
            },
            Some((retry_interval, move || retry.flush())),
        )
    }
}

struct PendingMessages<S, B> {
    adapter: InboundCommandAdapter<S, B>,
    queue: Mutex<VecDeque<InboundMessage>>,
}

impl<S, B> PendingMessages<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    fn new(adapter: InboundCommandAdapter<S, B>) -> Self {
        Self {
            adapter,
            queue: Mutex::new(VecDeque::new()),
        }
    }

    fn push(&self, message: InboundMessage) {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(message);
    }

    /// Apply queued messages front to back, stopping at the first transient
    /// failure (which stays queued).
    fn flush(&self) -> Result<(), InboundError> {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);

        while let Some(message) = queue.front() {
            match self.adapter.handle(message.clone()) {
                Ok(InboundOutcome::Applied { entity_id, value }) => {
                    info!(entity_id = %entity_id, value, "inbound command applied");
                }
                Ok(InboundOutcome::Dropped { .. }) => {}
                Err(err) if err.is_transient() => return Err(err),
                Err(err) => {
                    warn!(message_type = %message.message_type, error = %err, "dropping inbound message");
                }
            }
            queue.pop_front();
        }
        Ok(())
    }
}

impl<S, B> Drop for PendingMessages<S, B> {
    fn drop(&mut self) {
        let left = self.queue.get_mut().map_or(0, |q| q.len());
        if left > 0 {
            error!(pending = left, "inbound worker stopped with unapplied messages");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    use counterflow_core::{EntityId, ExpectedVersion};
    use counterflow_events::{InMemoryEventBus, Metadata};

    use crate::command_dispatcher::CommandDispatcher;
    use crate::event_store::{EventStoreError, InMemoryEventStore, StoredEvent, UncommittedEvent};
    use crate::service::CounterService;

    /// Log whose first `failures` appends report a backend outage.
    struct Unreliable {
        inner: InMemoryEventStore,
        failures: AtomicUsize,
    }

    impl EventStore for Unreliable {
        fn append(
            &self,
            entity_id: &EntityId,
            events: Vec<UncommittedEvent>,
            expected_version: ExpectedVersion,
        ) -> Result<Vec<StoredEvent>, EventStoreError> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(EventStoreError::Backend("connection refused".to_string()));
            }
            self.inner.append(entity_id, events, expected_version)
        }

        fn read_from(
            &self,
            entity_id: &EntityId,
            from_sequence: u64,
            limit: Option<usize>,
        ) -> Result<Vec<StoredEvent>, EventStoreError> {
            self.inner.read_from(entity_id, from_sequence, limit)
        }

        fn stream_version(&self, entity_id: &EntityId) -> Result<u64, EventStoreError> {
            self.inner.stream_version(entity_id)
        }

        fn entity_ids(&self) -> Result<Vec<EntityId>, EventStoreError> {
            self.inner.entity_ids()
        }
    }

    type Service = CounterService<Arc<Unreliable>, InMemoryEventBus<EventEnvelope<JsonValue>>>;

    fn service(failures: usize) -> (Arc<Unreliable>, Arc<Service>) {
        let store = Arc::new(Unreliable {
            inner: InMemoryEventStore::new(),
            failures: AtomicUsize::new(failures),
        });
        let service = CounterService::new(CommandDispatcher::new(store.clone(), InMemoryEventBus::new()), 0);
        (store, Arc::new(service))
    }

    fn wait_for_version(store: &Unreliable, entity_id: &EntityId, version: u64) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while store.stream_version(entity_id).unwrap() < version {
            assert!(Instant::now() < deadline, "timed out waiting for version {version}");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn transient_failure_is_retried_in_order() {
        let (store, service) = service(1);
        let bus = InMemoryEventBus::<InboundMessage>::new();
        let worker = InboundWorker::spawn(
            InboundCommandAdapter::new(service.clone()),
            bus.subscribe(),
            Duration::from_millis(10),
        )
        .unwrap();

        bus.publish(InboundMessage::increase_counter("c-1", 5)).unwrap();
        bus.publish(InboundMessage::multiply_counter("c-1", 2)).unwrap();

        let c = EntityId::new("c-1").unwrap();
        wait_for_version(&store, &c, 2);
        worker.shutdown();

        assert_eq!(service.get(&c).unwrap(), 10);
    }

    #[test]
    fn permanent_failures_do_not_block_later_messages() {
        let (store, service) = service(0);
        let pending = PendingMessages::new(InboundCommandAdapter::new(service.clone()));

        pending.push(InboundMessage::new(
            "IncreaseCounter",
            serde_json::json!({ "counterId": "c-1" }),
            Metadata::new(),
        ));
        pending.push(InboundMessage::increase_counter("c-1", 3));
        pending.flush().unwrap();

        let c = EntityId::new("c-1").unwrap();
        assert_eq!(store.stream_version(&c).unwrap(), 1);
        assert_eq!(service.get(&c).unwrap(), 3);
    }

    #[test]
    fn transient_failure_stays_queued() {
        let (store, service) = service(1);
        let pending = PendingMessages::new(InboundCommandAdapter::new(service));
        pending.push(InboundMessage::increase_counter("c-1", 3));

        let err = pending.flush().unwrap_err();
        assert!(err.is_transient());
        assert_eq!(pending.queue.lock().unwrap().len(), 1);

        pending.flush().unwrap();
        assert!(pending.queue.lock().unwrap().is_empty());
        assert_eq!(store.stream_version(&EntityId::new("c-1").unwrap()).unwrap(), 1);
    }
}
