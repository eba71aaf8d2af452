//! Domain error model.

use thiserror::Error;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures. Infrastructure
/// concerns belong elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// An identifier was invalid (e.g. empty).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A command would push a bounded value past its limit.
    #[error("{0}")]
    LimitExceeded(String),
}

impl DomainError {
    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn limit_exceeded(msg: impl Into<String>) -> Self {
        Self::LimitExceeded(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_exceeded_displays_message_verbatim() {
        let err = DomainError::limit_exceeded("Increasing the counter above 10000 is blocked");
        assert_eq!(
            err.to_string(),
            "Increasing the counter above 10000 is blocked"
        );
    }

    #[test]
    fn invalid_id_is_prefixed() {
        assert_eq!(
            DomainError::invalid_id("EntityId: must not be empty").to_string(),
            "invalid identifier: EntityId: must not be empty"
        );
    }
}
