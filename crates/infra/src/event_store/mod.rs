//! Append-only event log boundary.
//!
//! An infrastructure-facing abstraction for storing and reading per-entity
//! event streams without making storage assumptions.

pub mod in_memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod stream;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresEventStore;
pub use stream::EventStream;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
