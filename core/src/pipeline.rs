//! The transform pipeline: reducer, middleware and end-connectors.
//!
//! A dispatch runs in three stages, always in this order:
//!
//! 1. every [`Middleware`], left to right, each one receiving the event the
//!    previous one returned
//! 2. the [`Reducer`], computing a candidate state from the committed state and
//!    the final event
//! 3. every [`EndConnector`], left to right, each one receiving the state the
//!    previous one returned
//!
//! Middleware and end-connectors get a [`PipelineContext`]: read access to the
//! committed state plus the store's own execution context. The reducer only
//! sees the state and the event, which keeps it pure.
//!
//! Closures implement all three traits, so small pipelines need no boilerplate:
//!
//! ```
//! use flowstore_core::{PipelineContext, TransformError};
//!
//! #[derive(Clone, Debug)]
//! struct Ping;
//! impl flowstore_core::event::Event for Ping {}
//!
//! #[derive(Debug)]
//! struct Hits(u64);
//! impl flowstore_core::state::State for Hits {}
//!
//! let reducer = |state: &Hits, _event: &Ping| -> Result<Hits, TransformError> { Ok(Hits(state.0 + 1)) };
//! let middleware = |_ctx: &PipelineContext<'_, Hits>, event: Ping| -> Result<Ping, TransformError> { Ok(event) };
//! # let _ = (reducer, middleware);
//! ```

use crate::error::{PipelineError, TransformError};
use crate::event::Event;
use crate::state::State;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

/// Read-only access to a store's committed state
///
/// Implemented by the runtime's shared state cell. Reads never block and
/// never observe a partially applied pipeline.
pub trait StateReader<S>: Send + Sync {
    /// Most recently committed state
    fn state(&self) -> Arc<S>;

    /// Key identifying the store (used in diagnostics)
    fn key(&self) -> &str;
}

/// Execution context handed to middleware and end-connectors
///
/// Lives for exactly one pipeline run on the store's worker.
pub struct PipelineContext<'a, S> {
    reader: &'a dyn StateReader<S>,
    handle: &'a Handle,
    sequence: u64,
    task_failures: Option<&'a UnboundedSender<PipelineError>>,
}

impl<'a, S> PipelineContext<'a, S> {
    /// Create a context for one pipeline run
    ///
    /// # Arguments
    ///
    /// - `reader`: committed-state access for the owning store
    /// - `handle`: the store worker's runtime handle
    /// - `sequence`: dispatch sequence number of the event being processed
    #[must_use]
    pub const fn new(reader: &'a dyn StateReader<S>, handle: &'a Handle, sequence: u64) -> Self {
        Self {
            reader,
            handle,
            sequence,
            task_failures: None,
        }
    }

    /// Report panics of tasks launched through [`PipelineContext::spawn`] to `sink`
    ///
    /// The store worker uses this to poison its store when background work
    /// launched by a transform fails.
    #[must_use]
    pub const fn with_task_failures(mut self, sink: &'a UnboundedSender<PipelineError>) -> Self {
        self.task_failures = Some(sink);
        self
    }

    /// Committed state at the time of the call
    ///
    /// During a pipeline run this is the state *before* the current event,
    /// since nothing is committed until every stage has finished.
    #[must_use]
    pub fn state(&self) -> Arc<S> {
        self.reader.state()
    }

    /// Key of the store running this pipeline
    #[must_use]
    pub fn store_key(&self) -> &str {
        self.reader.key()
    }

    /// Dispatch sequence number, starting at 1 for the first event of a store
    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Runtime handle of the store's worker
    #[must_use]
    pub const fn handle(&self) -> &Handle {
        self.handle
    }

    /// Launch background work on the store's worker
    ///
    /// The task only makes progress while the worker is idle between
    /// pipelines, so it never runs concurrently with a state mutation of the
    /// same store.
    ///
    /// A panic inside the task is a pipeline failure: it is reported as
    /// [`PipelineError::Panicked`] with stage `spawned task`, which poisons
    /// the owning store. The panic still surfaces through the returned
    /// handle.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let task_failures = self.task_failures.cloned();
        self.handle.spawn(async move {
            match AssertUnwindSafe(future).catch_unwind().await {
                Ok(output) => output,
                Err(payload) => {
                    if let Some(sink) = task_failures {
                        let _ = sink.send(PipelineError::from_panic("spawned task", payload.as_ref()));
                    }
                    std::panic::resume_unwind(payload)
                },
            }
        })
    }
}

impl<S> std::fmt::Debug for PipelineContext<'_, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineContext")
            .field("store_key", &self.reader.key())
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

/// Pure mapping from (current state, event) to the next state
///
/// # Example
///
/// ```
/// use flowstore_core::{Reducer, TransformError};
///
/// #[derive(Clone, Debug)]
/// enum Toggle { Flip }
/// impl flowstore_core::event::Event for Toggle {}
///
/// #[derive(Debug, PartialEq)]
/// struct Switch { on: bool }
/// impl flowstore_core::state::State for Switch {}
///
/// struct SwitchReducer;
///
/// impl Reducer<Switch, Toggle> for SwitchReducer {
///     fn reduce(&self, state: &Switch, event: &Toggle) -> Result<Switch, TransformError> {
///         match event {
///             Toggle::Flip => Ok(Switch { on: !state.on }),
///         }
///     }
/// }
///
/// let next = SwitchReducer.reduce(&Switch { on: false }, &Toggle::Flip).unwrap();
/// assert_eq!(next, Switch { on: true });
/// ```
pub trait Reducer<S: State, E: Event>: Send + Sync {
    /// Compute the next state
    ///
    /// # Errors
    ///
    /// Any error is fatal to the owning store: it is reported once and the
    /// store stops accepting events.
    fn reduce(&self, state: &S, event: &E) -> Result<S, TransformError>;

    /// Name used in error reports
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Event transform applied before the reducer
pub trait Middleware<S: State, E: Event>: Send + Sync {
    /// Transform (or pass through) the event
    ///
    /// # Errors
    ///
    /// Any error is fatal to the owning store.
    fn handle(&self, ctx: &PipelineContext<'_, S>, event: E) -> Result<E, TransformError>;

    /// Name used in error reports
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// State transform applied to the reducer's output
pub trait EndConnector<S: State, E: Event>: Send + Sync {
    /// Transform (or pass through) the state produced so far
    ///
    /// `event` is the event as it left the middleware stage.
    ///
    /// # Errors
    ///
    /// Any error is fatal to the owning store.
    fn connect(&self, ctx: &PipelineContext<'_, S>, event: &E, state: S) -> Result<S, TransformError>;

    /// Name used in error reports
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

impl<S, E, F> Reducer<S, E> for F
where
    S: State,
    E: Event,
    F: Fn(&S, &E) -> Result<S, TransformError> + Send + Sync,
{
    fn reduce(&self, state: &S, event: &E) -> Result<S, TransformError> {
        self(state, event)
    }
}

impl<S, E, F> Middleware<S, E> for F
where
    S: State,
    E: Event,
    F: Fn(&PipelineContext<'_, S>, E) -> Result<E, TransformError> + Send + Sync,
{
    fn handle(&self, ctx: &PipelineContext<'_, S>, event: E) -> Result<E, TransformError> {
        self(ctx, event)
    }
}

impl<S, E, F> EndConnector<S, E> for F
where
    S: State,
    E: Event,
    F: Fn(&PipelineContext<'_, S>, &E, S) -> Result<S, TransformError> + Send + Sync,
{
    fn connect(&self, ctx: &PipelineContext<'_, S>, event: &E, state: S) -> Result<S, TransformError> {
        self(ctx, event, state)
    }
}
