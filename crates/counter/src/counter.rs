use serde::{Deserialize, Serialize};

use counterflow_core::{Aggregate, AggregateRoot, DomainError, EntityId};
use counterflow_events::{Command, Event};

/// Stream/entity type name of counters in the event log.
pub const ENTITY_TYPE: &str = "counter";

/// Upper bound enforced by the bounded increase commands.
pub const MAX_COUNTER_VALUE: i64 = 10_000;

pub const LIMIT_EXCEEDED_MESSAGE: &str = "Increasing the counter above 10000 is blocked";

/// Aggregate root: Counter.
///
/// The whole state is one integer, always equal to the `updated_value` of the
/// last folded event (0 for an empty stream).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Counter {
    id: EntityId,
    value: i64,
    version: u64,
}

impl Counter {
    /// Create the empty state, ready for rehydration.
    pub fn empty(id: EntityId) -> Self {
        Self {
            id,
            value: 0,
            version: 0,
        }
    }

    pub fn value(&self) -> i64 {
        self.value
    }

    /// `value + delta` when it fits in `i64` and stays at or below
    /// [`MAX_COUNTER_VALUE`], `None` otherwise.
    pub fn bounded_sum(&self, delta: i64) -> Option<i64> {
        self.value
            .checked_add(delta)
            .filter(|sum| *sum <= MAX_COUNTER_VALUE)
    }

    pub fn would_exceed_limit(&self, delta: i64) -> bool {
        self.bounded_sum(delta).is_none()
    }

    /// Typed reply of `IncreaseWithResult`, given the state after applying
    /// whatever `handle` decided.
    pub fn increase_result(&self, emitted: &[CounterEvent]) -> CounterResult {
        if emitted.is_empty() {
            CounterResult::ExceedingMaxCounterValue {
                message: LIMIT_EXCEEDED_MESSAGE.to_string(),
            }
        } else {
            CounterResult::Success { value: self.value }
        }
    }

    fn increased(&self, delta: i64) -> CounterEvent {
        CounterEvent::ValueIncreased {
            value: delta,
            updated_value: self.value.wrapping_add(delta),
        }
    }
}

impl AggregateRoot for Counter {
    type Id = EntityId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Commands accepted by a counter.
///
/// The three increase shapes share one business rule but differ in how a
/// rejection reaches the caller:
/// - `Increase` has no limit;
/// - `IncreaseWithError` fails with [`DomainError::LimitExceeded`];
/// - `IncreaseWithResult` succeeds with no event and the caller gets
///   [`CounterResult::ExceedingMaxCounterValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CounterCommand {
    Increase(i64),
    IncreaseWithError(i64),
    IncreaseWithResult(i64),
    /// Zero and negative factors are accepted as-is.
    Multiply(i64),
}

impl Command for CounterCommand {
    fn command_name(&self) -> &'static str {
        match self {
            CounterCommand::Increase(_) => "increase",
            CounterCommand::IncreaseWithError(_) => "increaseWithError",
            CounterCommand::IncreaseWithResult(_) => "increaseWithResult",
            CounterCommand::Multiply(_) => "multiply",
        }
    }
}

/// Counter events. Each variant carries the resulting value, so folding is a
/// plain assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum CounterEvent {
    #[serde(rename = "value-increased")]
    ValueIncreased { value: i64, updated_value: i64 },
    #[serde(rename = "value-multiplied")]
    ValueMultiplied { multiplier: i64, updated_value: i64 },
}

impl CounterEvent {
    pub fn updated_value(&self) -> i64 {
        match self {
            CounterEvent::ValueIncreased { updated_value, .. }
            | CounterEvent::ValueMultiplied { updated_value, .. } => *updated_value,
        }
    }
}

impl Event for CounterEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CounterEvent::ValueIncreased { .. } => "value-increased",
            CounterEvent::ValueMultiplied { .. } => "value-multiplied",
        }
    }

    fn version(&self) -> u32 {
        1
    }
}

/// Reply of `IncreaseWithResult`: rejection is an expected outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CounterResult {
    Success { value: i64 },
    ExceedingMaxCounterValue { message: String },
}

impl Aggregate for Counter {
    type Command = CounterCommand;
    type Event = CounterEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        self.value = event.updated_value();
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match *command {
            CounterCommand::Increase(delta) => Ok(vec![self.increased(delta)]),
            CounterCommand::IncreaseWithError(delta) => match self.bounded_sum(delta) {
                Some(updated_value) => Ok(vec![CounterEvent::ValueIncreased {
                    value: delta,
                    updated_value,
                }]),
                None => Err(DomainError::limit_exceeded(LIMIT_EXCEEDED_MESSAGE)),
            },
            CounterCommand::IncreaseWithResult(delta) => Ok(self
                .bounded_sum(delta)
                .map(|updated_value| CounterEvent::ValueIncreased {
                    value: delta,
                    updated_value,
                })
                .into_iter()
                .collect()),
            CounterCommand::Multiply(factor) => Ok(vec![CounterEvent::ValueMultiplied {
                multiplier: factor,
                updated_value: self.value.wrapping_mul(factor),
            }]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use counterflow_events::execute;
    use proptest::prelude::*;

    fn counter_id() -> EntityId {
        EntityId::new("001").unwrap()
    }

    fn counter_at(value: i64) -> Counter {
        let mut counter = Counter::empty(counter_id());
        counter.apply(&CounterEvent::ValueIncreased {
            value,
            updated_value: value,
        });
        counter
    }

    #[test]
    fn increase_then_multiply() {
        let mut counter = Counter::empty(counter_id());

        let first = execute(&mut counter, &CounterCommand::Increase(10)).unwrap();
        let second = execute(&mut counter, &CounterCommand::Multiply(20)).unwrap();

        assert_eq!(
            first,
            vec![CounterEvent::ValueIncreased {
                value: 10,
                updated_value: 10
            }]
        );
        assert_eq!(
            second,
            vec![CounterEvent::ValueMultiplied {
                multiplier: 20,
                updated_value: 200
            }]
        );
        assert_eq!(counter.value(), 200);
        assert_eq!(counter.version(), 2);
    }

    #[test]
    fn plain_increase_ignores_the_limit() {
        let counter = counter_at(MAX_COUNTER_VALUE);
        let events = counter.handle(&CounterCommand::Increase(1)).unwrap();
        assert_eq!(events[0].updated_value(), MAX_COUNTER_VALUE + 1);
    }

    #[test]
    fn increase_with_error_rejects_past_limit() {
        let mut counter = counter_at(9_999);

        let err = execute(&mut counter, &CounterCommand::IncreaseWithError(2)).unwrap_err();

        assert_eq!(err, DomainError::limit_exceeded(LIMIT_EXCEEDED_MESSAGE));
        assert_eq!(counter.value(), 9_999);
        assert_eq!(counter.version(), 1);
    }

    #[test]
    fn bounded_increase_accepts_exactly_the_limit() {
        let counter = counter_at(9_999);
        let events = counter.handle(&CounterCommand::IncreaseWithError(1)).unwrap();
        assert_eq!(events[0].updated_value(), MAX_COUNTER_VALUE);
    }

    #[test]
    fn increase_with_result_reports_rejection_as_a_value() {
        let mut counter = counter_at(10_000);

        let events = execute(&mut counter, &CounterCommand::IncreaseWithResult(1)).unwrap();

        assert!(events.is_empty());
        assert_eq!(
            counter.increase_result(&events),
            CounterResult::ExceedingMaxCounterValue {
                message: LIMIT_EXCEEDED_MESSAGE.to_string()
            }
        );
    }

    #[test]
    fn increase_with_result_success_carries_new_value() {
        let mut counter = counter_at(5);
        let events = execute(&mut counter, &CounterCommand::IncreaseWithResult(5)).unwrap();
        assert_eq!(counter.increase_result(&events), CounterResult::Success { value: 10 });
    }

    #[test]
    fn huge_delta_is_rejected_not_wrapped() {
        let counter = counter_at(1);
        assert!(counter.would_exceed_limit(i64::MAX));
    }

    #[test]
    fn bounded_increase_rejects_underflow_instead_of_wrapping() {
        let mut counter = counter_at(-1);

        let err = execute(&mut counter, &CounterCommand::IncreaseWithError(i64::MIN)).unwrap_err();
        assert_eq!(err, DomainError::limit_exceeded(LIMIT_EXCEEDED_MESSAGE));

        let events = execute(&mut counter, &CounterCommand::IncreaseWithResult(i64::MIN)).unwrap();
        assert!(events.is_empty());
        assert_eq!(counter.value(), -1);
    }

    #[test]
    fn multiply_by_zero_and_negative_is_allowed() {
        let mut counter = counter_at(7);
        execute(&mut counter, &CounterCommand::Multiply(-3)).unwrap();
        assert_eq!(counter.value(), -21);
        execute(&mut counter, &CounterCommand::Multiply(0)).unwrap();
        assert_eq!(counter.value(), 0);
    }

    #[test]
    fn event_wire_format() {
        let json = serde_json::to_value(CounterEvent::ValueIncreased {
            value: 3,
            updated_value: 3,
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "value-increased", "value": 3, "updatedValue": 3})
        );

        let back: CounterEvent = serde_json::from_value(serde_json::json!({
            "type": "value-multiplied", "multiplier": 4, "updatedValue": 12
        }))
        .unwrap();
        assert_eq!(back.event_type(), "value-multiplied");
        assert_eq!(back.updated_value(), 12);
    }

    #[test]
    fn result_wire_format() {
        let json = serde_json::to_value(CounterResult::Success { value: 10 }).unwrap();
        assert_eq!(json, serde_json::json!({"type": "Success", "value": 10}));
    }

    fn command_strategy() -> impl Strategy<Value = CounterCommand> {
        prop_oneof![
            (-1_000i64..1_000).prop_map(CounterCommand::Increase),
            (-1_000i64..5_000).prop_map(CounterCommand::IncreaseWithError),
            (-1_000i64..5_000).prop_map(CounterCommand::IncreaseWithResult),
            (-5i64..5).prop_map(CounterCommand::Multiply),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: folding the produced history from the empty state
        /// reproduces the live state, and doing it twice gives the same answer.
        #[test]
        fn replay_reproduces_state(commands in prop::collection::vec(command_strategy(), 0..40)) {
            let mut live = Counter::empty(counter_id());
            let mut history = Vec::new();

            for cmd in &commands {
                if let Ok(events) = execute(&mut live, cmd) {
                    history.extend(events);
                }
            }

            let mut first = Counter::empty(counter_id());
            first.replay(&history);
            let mut second = Counter::empty(counter_id());
            second.replay(&history);

            prop_assert_eq!(&first, &live);
            prop_assert_eq!(first, second);
        }

        /// Property: bounded increases emit nothing past the limit (or outside
        /// the `i64` range) and exactly one `ValueIncreased(d, s + d)` otherwise.
        #[test]
        fn bounded_increase_respects_limit(
            start in prop_oneof![-20_000i64..20_000, any::<i64>()],
            delta in prop_oneof![-20_000i64..20_000, any::<i64>()],
        ) {
            let counter = counter_at(start);
            let exact = i128::from(start) + i128::from(delta);
            let accepted = exact <= i128::from(MAX_COUNTER_VALUE) && exact >= i128::from(i64::MIN);

            for cmd in [CounterCommand::IncreaseWithError(delta), CounterCommand::IncreaseWithResult(delta)] {
                let mut state = counter.clone();
                let outcome = execute(&mut state, &cmd);
                prop_assert!(state.value() <= MAX_COUNTER_VALUE.max(start));

                if !accepted {
                    match outcome {
                        Ok(events) => prop_assert!(events.is_empty()),
                        Err(err) => prop_assert!(matches!(err, DomainError::LimitExceeded(_))),
                    }
                    prop_assert_eq!(&state, &counter);
                } else {
                    let events = outcome.unwrap();
                    prop_assert_eq!(events, vec![CounterEvent::ValueIncreased {
                        value: delta,
                        updated_value: start + delta,
                    }]);
                    prop_assert_eq!(state.value(), start + delta);
                }
            }
        }
    }
}
