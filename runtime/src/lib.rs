//! # Flowstore Runtime
//!
//! Runtime implementation for the Flowstore state-management engine.
//!
//! This crate provides the [`Store`]: a single-writer holder of one state value
//! that runs every dispatched event through its pipeline on a dedicated worker
//! thread and notifies observers of the outcome.
//!
//! ## Core Components
//!
//! - **Store**: owns the committed state, one serialized worker and three
//!   subscriber registries (state, dispatched events, finished events)
//! - **Subscription**: one observer's registration, with pause/resume/unsubscribe
//!   and optional binding to a [`lifecycle::LifecycleSource`]
//! - **Conflated**: drop-latest receiver for consumers that read at their own pace
//! - **`StoreProvider`**: keyed registry so independent call sites share one store
//! - **Feature**: named façade over one keyed store
//!
//! ## Example
//!
//! ```no_run
//! use flowstore_core::{event::Event, state::State, TransformError};
//! use flowstore_runtime::{Store, SubscriptionKind};
//! use std::sync::Arc;
//!
//! #[derive(Clone, Debug)]
//! enum CounterEvent { Increment }
//! impl Event for CounterEvent {}
//!
//! #[derive(Debug, Default)]
//! struct CounterState { count: i64 }
//! impl State for CounterState {}
//!
//! # async fn example() -> Result<(), flowstore_runtime::StoreError> {
//! let store = Store::new(
//!     CounterState::default(),
//!     |state: &CounterState, _: &CounterEvent| -> Result<CounterState, TransformError> {
//!         Ok(CounterState { count: state.count + 1 })
//!     },
//! )?;
//!
//! let subscription = store.observe(SubscriptionKind::State, |state: &Arc<CounterState>, _: &Arc<CounterEvent>| {
//!     println!("count is now {}", state.count);
//! });
//!
//! store.dispatch(CounterEvent::Increment)?.wait().await?;
//! assert_eq!(store.state().count, 1);
//!
//! subscription.unsubscribe();
//! # Ok(())
//! # }
//! ```

/// Conflated (drop-latest) receivers
pub mod conflated;

/// Store configuration
pub mod config;

/// Keyed features over shared stores
pub mod feature;

/// Lifecycle signal sources and bindings
pub mod lifecycle;

/// Predefined diagnostic middleware and end-connectors
pub mod logger;

/// Prometheus metrics for observability
pub mod metrics;

/// Keyed store registry
pub mod provider;

/// The store and its worker
pub mod store;

/// Subscriptions and subscriber registries
pub mod subscription;

/// Error types for the Store runtime
pub mod error {
    use flowstore_core::PipelineError;
    use std::sync::Arc;
    use thiserror::Error;

    /// Errors that can occur during Store operations
    #[derive(Error, Debug)]
    pub enum StoreError {
        /// The store's pipeline failed earlier and the store no longer
        /// accepts events
        ///
        /// A new store (under a new key) is required.
        #[error("store `{key}` is poisoned: {cause}")]
        Poisoned {
            /// Key of the poisoned store
            key: String,
            /// The pipeline failure that poisoned it
            cause: Arc<PipelineError>,
        },

        /// The pipeline failed while processing this event
        ///
        /// Returned once, through the dispatch handle of the failing event.
        #[error("pipeline failed: {0}")]
        Pipeline(Arc<PipelineError>),

        /// The worker went away without answering (the store was dropped)
        #[error("worker of store `{key}` is no longer running")]
        WorkerUnavailable {
            /// Key of the store
            key: String,
        },

        /// The worker thread or its runtime could not be created
        #[error("failed to start store worker: {0}")]
        Spawn(#[from] std::io::Error),

        /// Timeout waiting for a dispatch to complete
        #[error("timeout waiting for dispatch to complete")]
        Timeout,
    }

    /// Errors from [`crate::StoreProvider`]
    #[derive(Error, Debug)]
    pub enum ProviderError {
        /// Store keys must be non-empty
        #[error("store key can't be empty")]
        EmptyKey,

        /// A store with a different state/event type is registered under the key
        #[error("store `{key}` is registered with a different type than `{expected}`")]
        TypeMismatch {
            /// The requested key
            key: String,
            /// Type that was requested
            expected: &'static str,
        },

        /// The factory failed to build the store
        #[error(transparent)]
        Store(#[from] StoreError),
    }
}

pub use config::{ConfigError, StoreConfig};
pub use conflated::Conflated;
pub use error::{ProviderError, StoreError};
pub use feature::{Feature, FeatureBuilder, store_key};
pub use lifecycle::{
    FeatureBinding, Lifecycle, LifecycleAware, LifecycleListener, LifecyclePhase, LifecycleSignal,
    LifecycleSource,
};
pub use logger::{LogOptions, LoggerEndConnector, LoggerMiddleware};
pub use provider::StoreProvider;
pub use store::{DispatchHandle, Store, StoreBuilder, StoreView};
pub use subscription::{Observer, Subscription, SubscriptionId, SubscriptionKind, SubscriptionStatus};

/// Health check status levels
///
/// Indicates the current health state of a component or system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HealthStatus {
    /// Component is fully operational
    Healthy,

    /// Component is operational but experiencing issues
    Degraded,

    /// Component is not operational
    Unhealthy,
}

impl HealthStatus {
    /// Check if status is healthy
    #[must_use]
    pub const fn is_healthy(self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// Check if status is unhealthy
    #[must_use]
    pub const fn is_unhealthy(self) -> bool {
        matches!(self, Self::Unhealthy)
    }

    /// Get the worst status between two statuses
    #[must_use]
    pub const fn worst(self, other: Self) -> Self {
        match (self, other) {
            (Self::Unhealthy, _) | (_, Self::Unhealthy) => Self::Unhealthy,
            (Self::Degraded, _) | (_, Self::Degraded) => Self::Degraded,
            _ => Self::Healthy,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Health check result for a component
#[derive(Debug, Clone)]
pub struct HealthCheck {
    /// Name of the component being checked
    pub component: String,

    /// Current health status
    pub status: HealthStatus,

    /// Optional message providing details
    pub message: Option<String>,

    /// Optional metadata (e.g., counters, subscriber counts)
    pub metadata: Vec<(String, String)>,
}

impl HealthCheck {
    /// Create a healthy check result
    #[must_use]
    pub fn healthy(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Healthy,
            message: None,
            metadata: Vec::new(),
        }
    }

    /// Create an unhealthy check result
    #[must_use]
    pub fn unhealthy(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Unhealthy,
            message: Some(message.into()),
            metadata: Vec::new(),
        }
    }

    /// Add metadata to the health check
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.push((key.into(), value.into()));
        self
    }

    /// Look up a metadata value by key
    #[must_use]
    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Aggregated health report
///
/// Combines multiple health checks into an overall system status.
#[derive(Debug, Clone)]
pub struct HealthReport {
    /// Overall system status (worst of all checks)
    pub status: HealthStatus,

    /// Individual component checks
    pub checks: Vec<HealthCheck>,

    /// Timestamp when report was generated
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl HealthReport {
    /// Create a new health report from checks
    #[must_use]
    pub fn new(checks: Vec<HealthCheck>) -> Self {
        let status = checks
            .iter()
            .map(|c| c.status)
            .fold(HealthStatus::Healthy, HealthStatus::worst);

        Self {
            status,
            checks,
            timestamp: chrono::Utc::now(),
        }
    }

    /// Check if overall system is healthy
    #[must_use]
    pub const fn is_healthy(&self) -> bool {
        self.status.is_healthy()
    }

    /// Check if overall system is unhealthy
    #[must_use]
    pub const fn is_unhealthy(&self) -> bool {
        self.status.is_unhealthy()
    }
}

/// Poison-tolerant lock helpers
///
/// A panicking observer must not make a registry unusable for everyone else,
/// so poisoned guards are recovered instead of propagated.
pub(crate) mod sync {
    use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

    pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
        lock.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
        lock.write().unwrap_or_else(PoisonError::into_inner)
    }
}
