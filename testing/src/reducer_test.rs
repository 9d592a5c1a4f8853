//! Ergonomic testing utilities for reducers
//!
//! This module provides a fluent API for testing reducers with readable Given-When-Then syntax.

#![allow(clippy::module_name_repetitions)] // ReducerTest is the natural name

use flowstore_core::event::Event;
use flowstore_core::state::State;
use flowstore_core::{Reducer, TransformError};

/// Type alias for state assertion functions
type StateAssertion<S> = Box<dyn FnOnce(&S)>;

/// Type alias for error assertion functions
type ErrorAssertion = Box<dyn FnOnce(&TransformError)>;

/// Fluent API for testing reducers with Given-When-Then syntax
///
/// Events are folded in order; each one sees the state produced by the
/// previous one.
///
/// # Example
///
/// ```
/// use flowstore_core::{event::Event, state::State, Reducer, TransformError};
/// use flowstore_testing::ReducerTest;
///
/// #[derive(Clone, Debug)]
/// enum CounterEvent { Increment }
/// impl Event for CounterEvent {}
///
/// #[derive(Debug)]
/// struct Counter { count: i32 }
/// impl State for Counter {}
///
/// struct CounterReducer;
/// impl Reducer<Counter, CounterEvent> for CounterReducer {
///     fn reduce(&self, state: &Counter, _: &CounterEvent) -> Result<Counter, TransformError> {
///         Ok(Counter { count: state.count + 1 })
///     }
/// }
///
/// ReducerTest::new(CounterReducer)
///     .given_state(Counter { count: 0 })
///     .when_event(CounterEvent::Increment)
///     .when_event(CounterEvent::Increment)
///     .then_state(|state| assert_eq!(state.count, 2))
///     .run();
/// ```
pub struct ReducerTest<R, S, E>
where
    R: Reducer<S, E>,
    S: State,
    E: Event,
{
    reducer: R,
    initial_state: Option<S>,
    events: Vec<E>,
    state_assertions: Vec<StateAssertion<S>>,
    error_assertions: Vec<ErrorAssertion>,
}

impl<R, S, E> ReducerTest<R, S, E>
where
    R: Reducer<S, E>,
    S: State,
    E: Event,
{
    /// Create a new reducer test with the given reducer
    #[must_use]
    pub const fn new(reducer: R) -> Self {
        Self {
            reducer,
            initial_state: None,
            events: Vec::new(),
            state_assertions: Vec::new(),
            error_assertions: Vec::new(),
        }
    }

    /// Set the initial state (Given)
    #[must_use]
    pub fn given_state(mut self, state: S) -> Self {
        self.initial_state = Some(state);
        self
    }

    /// Add an event to apply (When)
    #[must_use]
    pub fn when_event(mut self, event: E) -> Self {
        self.events.push(event);
        self
    }

    /// Add several events to apply in order (When)
    #[must_use]
    pub fn when_events(mut self, events: impl IntoIterator<Item = E>) -> Self {
        self.events.extend(events);
        self
    }

    /// Add an assertion about the final state (Then)
    #[must_use]
    pub fn then_state<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&S) + 'static,
    {
        self.state_assertions.push(Box::new(assertion));
        self
    }

    /// Expect the reducer to fail, and check the error (Then)
    #[must_use]
    pub fn then_error<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&TransformError) + 'static,
    {
        self.error_assertions.push(Box::new(assertion));
        self
    }

    /// Run the test and execute all assertions
    ///
    /// # Panics
    ///
    /// Panics if the initial state or events are not set, if the reducer
    /// fails without `then_error`, succeeds with `then_error`, or if any
    /// assertion fails.
    #[allow(clippy::panic)] // Test code can panic
    #[allow(clippy::expect_used)] // Test code can use expect
    pub fn run(self) {
        let mut state = self
            .initial_state
            .expect("Initial state must be set with given_state()");

        assert!(!self.events.is_empty(), "At least one event must be set with when_event()");

        for event in &self.events {
            match self.reducer.reduce(&state, event) {
                Ok(next) => state = next,
                Err(error) => {
                    assert!(
                        !self.error_assertions.is_empty(),
                        "Reducer failed on {event:?}: {error}"
                    );
                    for assertion in self.error_assertions {
                        assertion(&error);
                    }
                    return;
                },
            }
        }

        assert!(
            self.error_assertions.is_empty(),
            "Expected the reducer to fail, but it produced {state:?}"
        );

        for assertion in self.state_assertions {
            assertion(&state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct TestState {
        count: i32,
    }
    impl State for TestState {}

    #[derive(Clone, Debug)]
    enum TestEvent {
        Increment,
        Decrement,
        Overflow,
    }
    impl Event for TestEvent {}

    struct TestReducer;

    impl Reducer<TestState, TestEvent> for TestReducer {
        fn reduce(&self, state: &TestState, event: &TestEvent) -> Result<TestState, TransformError> {
            match event {
                TestEvent::Increment => Ok(TestState { count: state.count + 1 }),
                TestEvent::Decrement => Ok(TestState { count: state.count - 1 }),
                TestEvent::Overflow => Err(TransformError::rejected("overflow")),
            }
        }
    }

    #[test]
    fn test_reducer_test_increment() {
        ReducerTest::new(TestReducer)
            .given_state(TestState { count: 0 })
            .when_event(TestEvent::Increment)
            .then_state(|state| {
                assert_eq!(state.count, 1);
            })
            .run();
    }

    #[test]
    fn test_reducer_test_folds_events() {
        ReducerTest::new(TestReducer)
            .given_state(TestState { count: 5 })
            .when_events([TestEvent::Decrement, TestEvent::Decrement, TestEvent::Increment])
            .then_state(|state| {
                assert_eq!(state.count, 4);
            })
            .run();
    }

    #[test]
    fn test_reducer_test_error() {
        ReducerTest::new(TestReducer)
            .given_state(TestState { count: 0 })
            .when_event(TestEvent::Increment)
            .when_event(TestEvent::Overflow)
            .then_error(|error| {
                assert_eq!(error.to_string(), "overflow");
            })
            .run();
    }

    #[test]
    #[should_panic(expected = "Reducer failed")]
    fn test_unexpected_error_panics() {
        ReducerTest::new(TestReducer)
            .given_state(TestState { count: 0 })
            .when_event(TestEvent::Overflow)
            .run();
    }
}
