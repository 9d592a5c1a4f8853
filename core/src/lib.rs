//! # Flowstore Core
//!
//! Core traits and types for the Flowstore state-management engine.
//!
//! This crate defines the pieces of a unidirectional pipeline, independent of
//! how and where the pipeline is executed:
//!
//! - **Event**: a discrete, application-defined occurrence submitted to a store
//! - **State**: an immutable snapshot of a feature's data
//! - **Reducer**: pure function `(State, Event) → State`
//! - **Middleware**: pre-reducer transform `Event → Event`
//! - **`EndConnector`**: post-reducer transform `(Event, State) → State`
//! - **Dispatcher**: the fold that runs one event through all of the above
//!
//! The runtime crate owns the serialized worker, subscriber registries and the
//! store registry; this crate only knows how to compute the next state.
//!
//! ## Example
//!
//! ```
//! use flowstore_core::{event::Event, state::State, TransformError};
//!
//! #[derive(Clone, Debug)]
//! enum CounterEvent {
//!     Increment,
//!     Reset,
//! }
//! impl Event for CounterEvent {}
//!
//! #[derive(Clone, Debug, Default)]
//! struct CounterState {
//!     count: i64,
//! }
//! impl State for CounterState {}
//!
//! let reducer = |state: &CounterState, event: &CounterEvent| -> Result<CounterState, TransformError> {
//!     Ok(match event {
//!         CounterEvent::Increment => CounterState { count: state.count + 1 },
//!         CounterEvent::Reset => CounterState::default(),
//!     })
//! };
//! # let _ = reducer;
//! ```

/// Event marker
///
/// Events are the only input a store accepts. They are cloned once per
/// dispatch (the submitted copy is published to observers while the other
/// copy travels through the pipeline), so keep them cheap to clone.
pub mod event {
    use std::fmt::Debug;

    /// Capability tag for values that can be dispatched to a store
    ///
    /// Implement it explicitly for each event family:
    ///
    /// ```
    /// use flowstore_core::event::Event;
    ///
    /// #[derive(Clone, Debug)]
    /// enum UsersEvent {
    ///     Loading(bool),
    /// }
    ///
    /// impl Event for UsersEvent {}
    /// ```
    pub trait Event: Clone + Debug + Send + Sync + 'static {}
}

/// State marker
pub mod state {
    use std::fmt::Debug;

    /// Capability tag for values a store holds as its current state
    ///
    /// A state value is never mutated in place. Every successful dispatch
    /// replaces it wholesale with the value produced by the pipeline.
    pub trait State: Debug + Send + Sync + 'static {}
}

pub mod dispatcher;
pub mod error;
pub mod pipeline;

pub use dispatcher::Dispatcher;
pub use error::{PipelineError, TransformError};
pub use pipeline::{EndConnector, Middleware, PipelineContext, Reducer, StateReader};

/// Short name of a type: the last path segment of [`std::any::type_name`]
///
/// Generic arguments are kept, so `short_type_name::<Vec<u8>>()` is `Vec<u8>`.
#[must_use]
pub fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    match base.rfind("::") {
        Some(position) => &full[position + 2..],
        None => full,
    }
}
