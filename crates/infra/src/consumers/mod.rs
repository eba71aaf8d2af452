//! Event consumers and their delivery machinery.

pub mod cursor_store;
pub mod dispatcher;
pub mod envelope_producer;
pub mod events_consumer;

pub use cursor_store::{ConsumerCursorStore, CursorStoreError, InMemoryCursorStore};
#[cfg(feature = "postgres")]
pub use cursor_store::PostgresCursorStore;
pub use dispatcher::{ConsumerDispatchError, ConsumerDispatcher, ConsumerReport, DispatchReport};
pub use envelope_producer::{ENVELOPE_PRODUCER_ID, EnvelopeProducer};
pub use events_consumer::{CounterEventsConsumer, EVENTS_CONSUMER_ID};
