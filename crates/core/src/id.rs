//! Strongly-typed identifiers used across the domain.
//!
//! Entity ids are caller-chosen strings (e.g. `"001"`, a broker subject), not
//! generated UUIDs, so the newtypes only guarantee they are non-empty.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Identifier of an event-sourced entity instance (one event stream).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId(String);

/// Identifier of a registered event consumer (e.g. `"counter-journal-to-topic"`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ConsumerId(String);

macro_rules! impl_string_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Create an identifier, rejecting empty / whitespace-only values.
            pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
                let value = value.into();
                if value.trim().is_empty() {
                    return Err(DomainError::invalid_id(format!(
                        "{}: must not be empty",
                        $name
                    )));
                }
                Ok(Self(value))
            }

            /// Identifier from a string literal.
            ///
            /// # Panics
            ///
            /// Panics if `value` is blank, like `http::HeaderName::from_static`.
            pub fn from_static(value: &'static str) -> Self {
                assert!(!value.trim().is_empty(), "{} literal must not be empty", $name);
                Self(value.to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $t {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $t {
            type Error = DomainError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$t> for String {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }
    };
}

impl_string_newtype!(EntityId, "EntityId");
impl_string_newtype!(ConsumerId, "ConsumerId");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_blank_ids() {
        assert!(matches!(EntityId::new(""), Err(DomainError::InvalidId(_))));
        assert!(matches!("   ".parse::<ConsumerId>(), Err(DomainError::InvalidId(_))));
    }

    #[test]
    fn serde_is_transparent_and_validated() {
        let id: EntityId = "test-topic".parse().unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"test-topic\"");

        let back: EntityId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);

        assert!(serde_json::from_str::<EntityId>("\"\"").is_err());
    }

    #[test]
    #[should_panic(expected = "must not be empty")]
    fn from_static_panics_on_blank_literal() {
        let _ = ConsumerId::from_static(" ");
    }
}
