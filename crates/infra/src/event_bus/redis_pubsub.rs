//! Redis pub/sub-backed transport (optional).
//!
//! Pub/sub is not durable: subscribers that are offline miss messages. The
//! outbound side still gets at-least-once delivery because a failed `PUBLISH`
//! leaves the producer's cursor in place.

use std::marker::PhantomData;
use std::sync::mpsc;
use std::thread;

use redis::Commands;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};

use counterflow_events::{EventBus, Subscription};

#[derive(Debug, Error)]
pub enum RedisBusError {
    #[error("redis: {0}")]
    Redis(String),
    #[error("serialize: {0}")]
    Serialize(String),
}

/// Redis pub/sub transport carrying JSON-encoded messages of type `M` on one
/// channel (the topic).
#[derive(Debug)]
pub struct RedisPubSubTransport<M> {
    client: redis::Client,
    channel: String,
    _message: PhantomData<fn() -> M>,
}

impl<M> Clone for RedisPubSubTransport<M> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            channel: self.channel.clone(),
            _message: PhantomData,
        }
    }
}

impl<M> RedisPubSubTransport<M> {
    pub fn new(redis_url: impl AsRef<str>, channel: impl Into<String>) -> Result<Self, RedisBusError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| RedisBusError::Redis(e.to_string()))?;
        Ok(Self {
            client,
            channel: channel.into(),
            _message: PhantomData,
        })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

impl<M> EventBus<M> for RedisPubSubTransport<M>
where
    M: Serialize + DeserializeOwned + Send + 'static,
{
    type Error = RedisBusError;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        let payload = serde_json::to_string(&message)
            .map_err(|e| RedisBusError::Serialize(e.to_string()))?;

        let mut conn = self
            .client
            .get_connection()
            .map_err(|e| RedisBusError::Redis(e.to_string()))?;

        let receivers: i64 = conn
            .publish(&self.channel, payload)
            .map_err(|e| RedisBusError::Redis(e.to_string()))?;
        debug!(channel = %self.channel, receivers, "published");

        Ok(())
    }

    fn subscribe(&self) -> Subscription<M> {
        let (tx, rx) = mpsc::channel();

        let client = self.client.clone();
        let channel = self.channel.clone();

        // Forwards pub/sub messages until the subscription is dropped.
        let spawned = thread::Builder::new()
            .name(format!("redis-sub-{channel}"))
            .spawn(move || {
                let mut conn = match client.get_connection() {
                    Ok(c) => c,
                    Err(e) => {
                        warn!(%channel, error = %e, "redis subscription could not connect");
                        return;
                    }
                };

                let mut pubsub = conn.as_pubsub();
                if let Err(e) = pubsub.subscribe(&channel) {
                    warn!(%channel, error = %e, "redis subscribe failed");
                    return;
                }

                loop {
                    let msg = match pubsub.get_message() {
                        Ok(m) => m,
                        Err(_) => return,
                    };

                    let payload: String = match msg.get_payload() {
                        Ok(p) => p,
                        Err(_) => continue,
                    };

                    let message: M = match serde_json::from_str(&payload) {
                        Ok(m) => m,
                        Err(e) => {
                            debug!(%channel, error = %e, "skipping undecodable message");
                            continue;
                        }
                    };

                    if tx.send(message).is_err() {
                        return;
                    }
                }
            });
        if let Err(e) = spawned {
            warn!(channel = %self.channel, error = %e, "failed to spawn redis subscriber thread");
        }

        Subscription::new(rx)
    }
}
