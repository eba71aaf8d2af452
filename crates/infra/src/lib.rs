//! Infrastructure layer: event log, command pipeline, consumer delivery,
//! transports, workers and configuration.

pub mod command_dispatcher;
pub mod config;
pub mod consumers;
pub mod event_bus;
pub mod event_store;
pub mod inbound;
pub mod runtime;
pub mod service;
pub mod workers;


pub use command_dispatcher::{CommandDispatcher, DispatchError, Dispatched};
pub use config::{ConfigError, CounterConfig};
pub use inbound::{InboundCommandAdapter, InboundError, InboundMessage, InboundOutcome};
pub use runtime::{CounterRuntime, RuntimeError};
pub use service::{CounterService, ServiceError};
