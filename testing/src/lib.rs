//! # Flowstore Testing
//!
//! Testing utilities and helpers for Flowstore.
//!
//! This crate provides:
//! - [`ReducerTest`]: Given-When-Then checks for a reducer on its own
//! - [`PipelineTest`]: the full middleware → reducer → end-connector fold,
//!   without a store or worker thread
//! - [`RecordingObserver`]: an observer that records every notification and
//!   can wait for a number of them
//!
//! ## Example
//!
//! ```no_run
//! use flowstore_core::{event::Event, state::State, TransformError};
//! use flowstore_runtime::{Store, SubscriptionKind};
//! use flowstore_testing::RecordingObserver;
//! use std::time::Duration;
//!
//! #[derive(Clone, Debug)]
//! struct Tick;
//! impl Event for Tick {}
//!
//! #[derive(Debug, Default)]
//! struct Ticks(u32);
//! impl State for Ticks {}
//!
//! # async fn example() {
//! let store = Store::new(Ticks::default(), |s: &Ticks, _: &Tick| -> Result<Ticks, TransformError> {
//!     Ok(Ticks(s.0 + 1))
//! })
//! .unwrap();
//! let recorder = RecordingObserver::new();
//! let _subscription = store.observe(SubscriptionKind::State, recorder.clone());
//!
//! let _ = store.dispatch(Tick).unwrap();
//! assert!(recorder.wait_for(1, Duration::from_secs(1)).await);
//! assert_eq!(recorder.last_state().map(|s| s.0), Some(1));
//! # }
//! ```

/// Given-When-Then testing for reducers
pub mod reducer_test;


/// Observers that record notifications
pub mod recording;

/// Test helpers and utilities
pub mod helpers {
    /// Install a `tracing` subscriber that writes through the test harness
    ///
    /// Honours `RUST_LOG`, defaulting to `debug` for Flowstore crates. Safe to
    /// call from every test: only the first call installs anything.
    pub fn init_tracing() {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("flowstore=debug,flowstore_runtime=debug"));

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    }
}

// Re-export commonly used items
pub use helpers::init_tracing;
pub use pipeline_test::PipelineTest;
pub use recording::RecordingObserver;
pub use reducer_test::ReducerTest;
