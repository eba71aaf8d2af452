//! Event consumer contract.

use counterflow_core::ConsumerId;

use crate::EventEnvelope;

/// Result of delivering one event to one consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumerOutcome {
    /// Side effects are complete; the cursor advances.
    Handled,
    /// The event kind is recognized but irrelevant; the cursor advances.
    Ignored,
    /// Processing failed; the cursor stays and the event is redelivered later.
    Failed(String),
}

impl ConsumerOutcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }

    /// Whether the delivering side should move the cursor past this event.
    pub fn advances_cursor(&self) -> bool {
        !matches!(self, ConsumerOutcome::Failed(_))
    }
}

/// A subscriber to an entity event stream.
///
/// Delivery is **at-least-once**: after a `Failed` outcome (or a crash between
/// side effects and cursor advance) the same event arrives again, so
/// implementations must be idempotent or deduplicate externally.
///
/// Consumers never touch their own cursor; the dispatcher owns it.
pub trait Consumer<E>: Send + Sync {
    /// Stable identifier, used as the cursor key.
    fn id(&self) -> &ConsumerId;

    fn on_event(&self, envelope: &EventEnvelope<E>) -> ConsumerOutcome;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_failure_holds_the_cursor() {
        assert!(ConsumerOutcome::Handled.advances_cursor());
        assert!(ConsumerOutcome::Ignored.advances_cursor());
        assert!(!ConsumerOutcome::failed("broker down").advances_cursor());
    }
}
