use std::convert::Infallible;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tracing::debug;

use counterflow_events::{EventEnvelope, Subscription};

use super::{WorkerHandle, spawn_worker};
use crate::consumers::{ConsumerCursorStore, ConsumerDispatcher};
use crate::event_store::EventStore;

/// Drives consumer delivery.
///
/// - each append notification triggers a pass over that entity
/// - every `redelivery_interval` a full pass runs over all entities, which
///   retries failed deliveries and covers lost notifications
pub struct DispatchWorker;

impl DispatchWorker {
    pub fn spawn<S, C, E>(
        dispatcher: Arc<ConsumerDispatcher<S, C, E>>,
        notifications: Subscription<EventEnvelope<JsonValue>>,
        redelivery_interval: Duration,
    ) -> io::Result<WorkerHandle>
    where
        S: EventStore + 'static,
        C: ConsumerCursorStore + 'static,
        E: DeserializeOwned + 'static,
    {
        let sweeper = dispatcher.clone();

        spawn_worker(
            "counter-dispatch",
            notifications,
            move |note: EventEnvelope<JsonValue>| {
                let report = dispatcher.dispatch_entity(note.entity_id());
                debug!(
                    entity_id = %report.entity_id,
                    sequence_number = note.sequence_number(),
                    failures = report.has_failures(),
                    "dispatched after append"
                );
                Ok::<_, Infallible>(())
            },
            Some((redelivery_interval, move || sweeper.dispatch_all().map(|_| ()))),
        )
    }
}
