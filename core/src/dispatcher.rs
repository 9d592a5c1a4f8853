//! Runs one event through middleware → reducer → end-connectors.

use crate::error::PipelineError;
use crate::event::Event;
use crate::pipeline::{EndConnector, Middleware, PipelineContext, Reducer};
use crate::state::State;
use std::panic::{AssertUnwindSafe, catch_unwind};

/// The pipeline owned by a store
///
/// The dispatcher is pure orchestration: it computes the event and state to
/// publish but commits nothing. Committing and notifying observers is the
/// store's job.
pub struct Dispatcher<S: State, E: Event> {
    reducer: Box<dyn Reducer<S, E>>,
    middleware: Vec<Box<dyn Middleware<S, E>>>,
    end_connectors: Vec<Box<dyn EndConnector<S, E>>>,
}

impl<S: State, E: Event> Dispatcher<S, E> {
    /// Create a dispatcher with a reducer and empty transform lists
    #[must_use]
    pub fn new(reducer: impl Reducer<S, E> + 'static) -> Self {
        Self {
            reducer: Box::new(reducer),
            middleware: Vec::new(),
            end_connectors: Vec::new(),
        }
    }

    /// Create a dispatcher from already boxed parts
    #[must_use]
    pub fn from_parts(
        reducer: Box<dyn Reducer<S, E>>,
        middleware: Vec<Box<dyn Middleware<S, E>>>,
        end_connectors: Vec<Box<dyn EndConnector<S, E>>>,
    ) -> Self {
        Self {
            reducer,
            middleware,
            end_connectors,
        }
    }

    /// Append a middleware (runs after the ones already added)
    #[must_use]
    pub fn with_middleware(mut self, middleware: impl Middleware<S, E> + 'static) -> Self {
        self.middleware.push(Box::new(middleware));
        self
    }

    /// Append an end-connector (runs after the ones already added)
    #[must_use]
    pub fn with_end_connector(mut self, connector: impl EndConnector<S, E> + 'static) -> Self {
        self.end_connectors.push(Box::new(connector));
        self
    }

    /// Number of middleware in the chain
    #[must_use]
    pub fn middleware_len(&self) -> usize {
        self.middleware.len()
    }

    /// Number of end-connectors in the chain
    #[must_use]
    pub fn end_connector_len(&self) -> usize {
        self.end_connectors.len()
    }

    /// Run one event through the pipeline
    ///
    /// Returns the event as it left the middleware stage and the state as it
    /// left the end-connector stage. Empty transform lists act as identity.
    ///
    /// # Errors
    ///
    /// Returns the first stage failure. Panics raised by a stage are caught and
    /// reported as [`PipelineError::Panicked`].
    pub fn run(&self, ctx: &PipelineContext<'_, S>, event: E) -> Result<(E, S), PipelineError> {
        let mut event = event;
        for (index, middleware) in self.middleware.iter().enumerate() {
            let name = middleware.name();
            event = guard(|| format!("middleware #{index} `{name}`"), || {
                middleware.handle(ctx, event)
            })?
            .map_err(|source| PipelineError::Middleware {
                index,
                name: name.to_string(),
                source,
            })?;
        }

        let current = ctx.state();
        let name = self.reducer.name();
        let mut state = guard(|| format!("reducer `{name}`"), || {
            self.reducer.reduce(&current, &event)
        })?
        .map_err(|source| PipelineError::Reducer {
            name: name.to_string(),
            source,
        })?;

        for (index, connector) in self.end_connectors.iter().enumerate() {
            let name = connector.name();
            state = guard(|| format!("end connector #{index} `{name}`"), || {
                connector.connect(ctx, &event, state)
            })?
            .map_err(|source| PipelineError::EndConnector {
                index,
                name: name.to_string(),
                source,
            })?;
        }

        Ok((event, state))
    }
}

impl<S: State, E: Event> std::fmt::Debug for Dispatcher<S, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("reducer", &self.reducer.name())
            .field("middleware", &self.middleware.len())
            .field("end_connectors", &self.end_connectors.len())
            .finish()
    }
}

fn guard<T>(stage: impl FnOnce() -> String, f: impl FnOnce() -> T) -> Result<T, PipelineError> {
    catch_unwind(AssertUnwindSafe(f)).map_err(|payload| PipelineError::from_panic(stage(), payload.as_ref()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::error::TransformError;
    use crate::pipeline::StateReader;
    use std::sync::Arc;
    use tokio::runtime::Handle;

    #[derive(Clone, Debug, PartialEq)]
    enum Step {
        Add(i64),
        Fail,
        Explode,
    }
    impl Event for Step {}

    #[derive(Debug, PartialEq)]
    struct Total {
        value: i64,
        trail: Vec<&'static str>,
    }
    impl State for Total {}

    struct Fixed(Arc<Total>);

    impl StateReader<Total> for Fixed {
        fn state(&self) -> Arc<Total> {
            Arc::clone(&self.0)
        }

        fn key(&self) -> &str {
            "test.store"
        }
    }

    struct AddReducer;

    impl Reducer<Total, Step> for AddReducer {
        fn reduce(&self, state: &Total, event: &Step) -> Result<Total, TransformError> {
            match event {
                Step::Add(n) => Ok(Total {
                    value: state.value + n,
                    trail: vec!["reducer"],
                }),
                Step::Fail => Err(TransformError::rejected("cannot reduce Fail")),
                Step::Explode => panic!("reducer exploded"),
            }
        }
    }

    fn reader(value: i64) -> Fixed {
        Fixed(Arc::new(Total {
            value,
            trail: Vec::new(),
        }))
    }

    #[tokio::test]
    async fn empty_chains_are_identity() {
        let dispatcher = Dispatcher::new(AddReducer);
        let reader = reader(10);
        let handle = Handle::current();
        let ctx = PipelineContext::<'_, Total>::new(&reader, &handle, 1);

        let (event, state) = dispatcher.run(&ctx, Step::Add(5)).unwrap();

        assert_eq!(event, Step::Add(5));
        assert_eq!(state.value, 15);
    }

    #[tokio::test]
    async fn middleware_runs_left_to_right_before_reducer() {
        let dispatcher = Dispatcher::new(AddReducer)
            .with_middleware(|_: &PipelineContext<'_, Total>, event: Step| -> Result<Step, TransformError> {
                match event {
                    Step::Add(n) => Ok(Step::Add(n * 10)),
                    other => Ok(other),
                }
            })
            .with_middleware(|_: &PipelineContext<'_, Total>, event: Step| -> Result<Step, TransformError> {
                match event {
                    Step::Add(n) => Ok(Step::Add(n + 1)),
                    other => Ok(other),
                }
            });
        let reader = reader(0);
        let handle = Handle::current();
        let ctx = PipelineContext::<'_, Total>::new(&reader, &handle, 1);

        let (event, state) = dispatcher.run(&ctx, Step::Add(2)).unwrap();

        // (2 * 10) + 1, not (2 + 1) * 10
        assert_eq!(event, Step::Add(21));
        assert_eq!(state.value, 21);
    }

    #[tokio::test]
    async fn end_connectors_fold_over_reducer_output() {
        let dispatcher = Dispatcher::new(AddReducer)
            .with_end_connector(|_: &PipelineContext<'_, Total>, _: &Step, mut state: Total| -> Result<Total, TransformError> {
                state.trail.push("first");
                Ok(state)
            })
            .with_end_connector(|ctx: &PipelineContext<'_, Total>, _: &Step, mut state: Total| -> Result<Total, TransformError> {
                // the committed state is still the pre-dispatch value
                assert_eq!(ctx.state().value, 1);
                state.trail.push("second");
                Ok(state)
            });
        let reader = reader(1);
        let handle = Handle::current();
        let ctx = PipelineContext::<'_, Total>::new(&reader, &handle, 7);

        let (_, state) = dispatcher.run(&ctx, Step::Add(1)).unwrap();

        assert_eq!(state.value, 2);
        assert_eq!(state.trail, vec!["reducer", "first", "second"]);
    }

    #[tokio::test]
    async fn reducer_error_is_tagged() {
        let dispatcher = Dispatcher::new(AddReducer);
        let reader = reader(0);
        let handle = Handle::current();
        let ctx = PipelineContext::<'_, Total>::new(&reader, &handle, 1);

        let error = dispatcher.run(&ctx, Step::Fail).unwrap_err();

        assert_eq!(error.stage(), "reducer");
        assert!(error.to_string().contains("cannot reduce Fail"));
    }

    #[tokio::test]
    async fn middleware_error_stops_the_pipeline() {
        let dispatcher = Dispatcher::new(AddReducer)
            .with_middleware(|_: &PipelineContext<'_, Total>, _: Step| -> Result<Step, TransformError> {
                Err(TransformError::rejected("blocked"))
            })
            .with_end_connector(|_: &PipelineContext<'_, Total>, _: &Step, _: Total| -> Result<Total, TransformError> {
                panic!("end connector must not run");
            });
        let reader = reader(0);
        let handle = Handle::current();
        let ctx = PipelineContext::<'_, Total>::new(&reader, &handle, 1);

        let error = dispatcher.run(&ctx, Step::Add(1)).unwrap_err();

        assert!(matches!(error, PipelineError::Middleware { index: 0, .. }));
    }

    #[tokio::test]
    async fn panics_become_pipeline_errors() {
        let dispatcher = Dispatcher::new(AddReducer);
        let reader = reader(0);
        let handle = Handle::current();
        let ctx = PipelineContext::<'_, Total>::new(&reader, &handle, 1);

        let error = dispatcher.run(&ctx, Step::Explode).unwrap_err();

        assert_eq!(error.stage(), "panic");
        assert!(error.to_string().contains("reducer exploded"));
    }
}
