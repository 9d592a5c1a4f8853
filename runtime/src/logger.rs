//! Predefined diagnostic middleware and end-connectors.
//!
//! Both transforms emit a `tracing` event at `DEBUG` for every (event, state)
//! pair passing through them and return their input unchanged.

use flowstore_core::event::Event;
use flowstore_core::state::State;
use flowstore_core::{EndConnector, Middleware, PipelineContext, TransformError};

/// What the logging transforms record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogOptions {
    /// Prefix of every message, usually the feature name
    pub prefix: String,
    /// Record the event
    pub log_event: bool,
    /// Record the state
    pub log_state: bool,
}

impl LogOptions {
    /// Log both events and states under `prefix`
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            log_event: true,
            log_state: true,
        }
    }

    /// Enable or disable event logging
    #[must_use]
    pub const fn with_log_event(mut self, enabled: bool) -> Self {
        self.log_event = enabled;
        self
    }

    /// Enable or disable state logging
    #[must_use]
    pub const fn with_log_state(mut self, enabled: bool) -> Self {
        self.log_state = enabled;
        self
    }

    fn log(&self, stage: &'static str, store: &str, sequence: u64, event: &dyn std::fmt::Debug, state: &dyn std::fmt::Debug) {
        if self.log_event {
            tracing::debug!(prefix = %self.prefix, stage, store, sequence, ?event, "event");
        }
        if self.log_state {
            tracing::debug!(prefix = %self.prefix, stage, store, sequence, ?state, "state");
        }
    }
}

/// Logs each event with the committed state before the reducer runs
#[derive(Debug, Clone)]
pub struct LoggerMiddleware {
    options: LogOptions,
}

impl LoggerMiddleware {
    /// Log events and states under `prefix`
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self::with_options(LogOptions::new(prefix))
    }

    /// Log with explicit options
    #[must_use]
    pub const fn with_options(options: LogOptions) -> Self {
        Self { options }
    }

    /// Options in use
    #[must_use]
    pub const fn options(&self) -> &LogOptions {
        &self.options
    }
}

impl<S: State, E: Event> Middleware<S, E> for LoggerMiddleware {
    fn handle(&self, ctx: &PipelineContext<'_, S>, event: E) -> Result<E, TransformError> {
        let state = ctx.state();
        self.options
            .log("middleware", ctx.store_key(), ctx.sequence(), &event, &state);
        Ok(event)
    }

    fn name(&self) -> &str {
        "LoggerMiddleware"
    }
}

/// Logs each event with the state produced so far, after the reducer ran
#[derive(Debug, Clone)]
pub struct LoggerEndConnector {
    options: LogOptions,
}

impl LoggerEndConnector {
    /// Log events and states under `prefix`
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self::with_options(LogOptions::new(prefix))
    }

    /// Log with explicit options
    #[must_use]
    pub const fn with_options(options: LogOptions) -> Self {
        Self { options }
    }

    /// Options in use
    #[must_use]
    pub const fn options(&self) -> &LogOptions {
        &self.options
    }
}

impl<S: State, E: Event> EndConnector<S, E> for LoggerEndConnector {
    fn connect(&self, ctx: &PipelineContext<'_, S>, event: &E, state: S) -> Result<S, TransformError> {
        self.options
            .log("end_connector", ctx.store_key(), ctx.sequence(), event, &state);
        Ok(state)
    }

    fn name(&self) -> &str {
        "LoggerEndConnector"
    }
}
