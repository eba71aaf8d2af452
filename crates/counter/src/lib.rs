//! Counter domain module (event-sourced).
//!
//! Business rules for the counter, implemented purely as deterministic domain
//! logic (no IO, no storage).

pub mod counter;

pub use counter::{
    Counter, CounterCommand, CounterEvent, CounterResult, ENTITY_TYPE, LIMIT_EXCEEDED_MESSAGE,
    MAX_COUNTER_VALUE,
};
