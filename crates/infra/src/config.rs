//! Runtime configuration from environment variables.

use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_EVENTS_TOPIC: &str = "counter-events";
pub const DEFAULT_COMMANDS_TOPIC: &str = "counter-commands";
pub const DEFAULT_SOURCE: &str = "counterflow";
pub const DEFAULT_CONTENT_TYPE: &str = "application/json";
pub const DEFAULT_CONFLICT_RETRIES: u32 = 3;
pub const DEFAULT_REDELIVERY_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}' ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterConfig {
    /// Outbound topic the envelope producer publishes to.
    pub events_topic: String,
    /// Inbound topic carrying `IncreaseCounter` / `MultiplyCounter` messages.
    pub commands_topic: String,
    /// `source` attribute of outbound envelopes.
    pub source: String,
    /// Default `Content-Type` of outbound envelopes.
    pub content_type: String,
    /// Retries after an optimistic concurrency conflict.
    pub conflict_retries: u32,
    /// Period of the dispatch sweep that retries failed deliveries.
    pub redelivery_interval: Duration,
    /// Redis transport for both topics when set; in-memory otherwise.
    pub redis_url: Option<String>,
    /// Postgres event log when set (and built with `postgres`); in-memory otherwise.
    pub database_url: Option<String>,
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            events_topic: DEFAULT_EVENTS_TOPIC.to_string(),
            commands_topic: DEFAULT_COMMANDS_TOPIC.to_string(),
            source: DEFAULT_SOURCE.to_string(),
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            conflict_retries: DEFAULT_CONFLICT_RETRIES,
            redelivery_interval: DEFAULT_REDELIVERY_INTERVAL,
            redis_url: None,
            database_url: None,
        }
    }
}

impl CounterConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unset or blank keys take defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let conflict_retries = match get("COUNTER_CONFLICT_RETRIES") {
            Some(raw) => parse_number("COUNTER_CONFLICT_RETRIES", &raw)?,
            None => defaults.conflict_retries,
        };
        let redelivery_interval = match get("COUNTER_REDELIVERY_INTERVAL_MS") {
            Some(raw) => {
                let ms: u64 = parse_number("COUNTER_REDELIVERY_INTERVAL_MS", &raw)?;
                if ms == 0 {
                    return Err(ConfigError::Invalid {
                        key: "COUNTER_REDELIVERY_INTERVAL_MS",
                        value: raw,
                        reason: "must be greater than zero".to_string(),
                    });
                }
                Duration::from_millis(ms)
            }
            None => defaults.redelivery_interval,
        };

        Ok(Self {
            events_topic: get("COUNTER_EVENTS_TOPIC").unwrap_or(defaults.events_topic),
            commands_topic: get("COUNTER_COMMANDS_TOPIC").unwrap_or(defaults.commands_topic),
            source: get("COUNTER_SOURCE").unwrap_or(defaults.source),
            content_type: get("COUNTER_CONTENT_TYPE").unwrap_or(defaults.content_type),
            conflict_retries,
            redelivery_interval,
            redis_url: get("REDIS_URL"),
            database_url: get("DATABASE_URL"),
        })
    }
}

fn parse_number<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = CounterConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, CounterConfig::default());
        assert_eq!(config.events_topic, "counter-events");
        assert_eq!(config.redelivery_interval, Duration::from_millis(250));
    }

    #[test]
    fn values_override_defaults() {
        let config = CounterConfig::from_lookup(lookup(&[
            ("COUNTER_EVENTS_TOPIC", "out"),
            ("COUNTER_SOURCE", "svc-a"),
            ("COUNTER_CONFLICT_RETRIES", " 7 "),
            ("COUNTER_REDELIVERY_INTERVAL_MS", "20"),
            ("REDIS_URL", "redis://localhost:6379"),
        ]))
        .unwrap();

        assert_eq!(config.events_topic, "out");
        assert_eq!(config.source, "svc-a");
        assert_eq!(config.conflict_retries, 7);
        assert_eq!(config.redelivery_interval, Duration::from_millis(20));
        assert_eq!(config.redis_url.as_deref(), Some("redis://localhost:6379"));
        assert_eq!(config.commands_topic, "counter-commands");
    }

    #[test]
    fn bad_numbers_are_rejected() {
        let err = CounterConfig::from_lookup(lookup(&[("COUNTER_CONFLICT_RETRIES", "many")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "COUNTER_CONFLICT_RETRIES", .. }));

        let err =
            CounterConfig::from_lookup(lookup(&[("COUNTER_REDELIVERY_INTERVAL_MS", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "COUNTER_REDELIVERY_INTERVAL_MS", .. }));
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let config = CounterConfig::from_lookup(lookup(&[("COUNTER_SOURCE", "  "), ("REDIS_URL", "")])).unwrap();
        assert_eq!(config.source, "counterflow");
        assert_eq!(config.redis_url, None);
    }
}
