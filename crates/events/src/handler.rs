/// Execute an aggregate command deterministically (no IO, no async).
///
/// The canonical event-sourced lifecycle in one step:
///
/// 1. **Decide**: `aggregate.handle(command)` returns events without mutating state.
/// 2. **Evolve**: each event is applied via `aggregate.apply(event)`.
///
/// A rejected command leaves the aggregate untouched. For the full pipeline
/// (persistence, append notification, consumers) use the infra command
/// dispatcher.
pub fn execute<A>(aggregate: &mut A, command: &A::Command) -> Result<Vec<A::Event>, A::Error>
where
    A: counterflow_core::Aggregate,
{
    let events = A::handle(aggregate, command)?;
    for ev in &events {
        A::apply(aggregate, ev);
    }
    Ok(events)
}
