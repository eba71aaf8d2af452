//! Infrastructure bus implementations.
//!
//! The bus abstraction lives in `counterflow-events` as pure mechanics. This
//! module provides broker-backed transports (e.g. Redis).

#[cfg(feature = "redis")]
pub mod redis_pubsub;

#[cfg(feature = "redis")]
pub use redis_pubsub::{RedisBusError, RedisPubSubTransport};
