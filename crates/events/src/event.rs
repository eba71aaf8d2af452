/// A domain-agnostic event.
///
/// Events are:
/// - **immutable** (treat them as facts)
/// - **tagged** by a stable kind name
/// - designed to be **append-only**
///
/// The append timestamp is assigned by the event log, not by the event.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name/type identifier (e.g. "value-increased").
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32;
}
