//! Event mechanics shared by the domain and infrastructure layers.
//!
//! Nothing in here knows about counters: this crate defines what an event, a
//! command, a log envelope, an outbound envelope and a consumer look like.

pub mod bus;
pub mod command;
pub mod consumer;
pub mod envelope;
pub mod event;
pub mod handler;
pub mod in_memory_bus;
pub mod metadata;
pub mod outbound;

pub use bus::{EventBus, Subscription};
pub use command::{Command, CommandEnvelope};
pub use consumer::{Consumer, ConsumerOutcome};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use handler::execute;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use metadata::Metadata;
pub use outbound::OutboundEnvelope;
