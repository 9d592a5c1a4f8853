//! Keyed store registry.
//!
//! A [`StoreProvider`] lets independent call sites that ask for "the same
//! feature" share one [`Store`], and therefore one state. Registration is
//! permanent: there is no way to evict a store.
//!
//! Providers are plain values, so tests can use isolated instances. For
//! applications that want a single registry there is
//! [`StoreProvider::global`].

use crate::error::{ProviderError, StoreError};
use crate::store::Store;
use crate::sync::{read, write};
use crate::{HealthCheck, HealthReport};
use flowstore_core::event::Event;
use flowstore_core::state::State;
use std::any::Any;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, LazyLock, RwLock};

static GLOBAL: LazyLock<StoreProvider> = LazyLock::new(StoreProvider::new);

/// Type-erased view of a registered store
trait RegisteredStore: Send + Sync {
    fn health(&self) -> HealthCheck;
    fn as_any(&self) -> &dyn Any;
}

impl<S: State, E: Event> RegisteredStore for Store<S, E> {
    fn health(&self) -> HealthCheck {
        Store::health(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Keyed registry of stores
///
/// # Example
///
/// ```no_run
/// # use flowstore_core::{event::Event, state::State, TransformError};
/// use flowstore_runtime::{Store, StoreProvider};
/// # #[derive(Clone, Debug)] struct Ping;
/// # impl Event for Ping {}
/// # #[derive(Debug, Default)] struct Pings(u64);
/// # impl State for Pings {}
/// # fn reducer(s: &Pings, _: &Ping) -> Result<Pings, TransformError> { Ok(Pings(s.0 + 1)) }
///
/// # fn example() -> Result<(), flowstore_runtime::ProviderError> {
/// let provider = StoreProvider::new();
///
/// let a = provider.get("pings.store", || Store::new(Pings::default(), reducer))?;
/// let b = provider.get("pings.store", || Store::new(Pings::default(), reducer))?;
/// assert!(a.ptr_eq(&b));
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct StoreProvider {
    stores: RwLock<HashMap<String, Arc<dyn RegisteredStore>>>,
}

impl StoreProvider {
    /// Create an empty provider
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide provider, created on first use
    #[must_use]
    pub fn global() -> &'static Self {
        &GLOBAL
    }

    /// Get the store registered under `key`, registering `factory`'s store
    /// if there is none
    ///
    /// Concurrent calls with the same unseen key all return the same store:
    /// the first registration wins and losing candidates are dropped. The
    /// factory runs without any provider lock held, so it may itself use the
    /// provider.
    ///
    /// # Errors
    ///
    /// - [`ProviderError::EmptyKey`] if `key` is empty
    /// - [`ProviderError::TypeMismatch`] if `key` holds a store of other types
    /// - [`ProviderError::Store`] if the factory fails
    pub fn get<S, E, F>(&self, key: &str, factory: F) -> Result<Store<S, E>, ProviderError>
    where
        S: State,
        E: Event,
        F: FnOnce() -> Result<Store<S, E>, StoreError>,
    {
        if key.is_empty() {
            return Err(ProviderError::EmptyKey);
        }

        if let Some(existing) = read(&self.stores).get(key) {
            return downcast(key, existing.as_ref());
        }

        let candidate = factory()?;

        let mut stores = write(&self.stores);
        match stores.entry(key.to_string()) {
            Entry::Occupied(winner) => {
                tracing::debug!(store = %key, "store registered concurrently; discarding candidate");
                downcast(key, winner.get().as_ref())
            },
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(candidate.clone()));
                tracing::debug!(store = %key, "store registered");
                Ok(candidate)
            },
        }
    }

    /// `true` if a store is registered under `key`
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        read(&self.stores).contains_key(key)
    }

    /// Number of registered stores
    #[must_use]
    pub fn len(&self) -> usize {
        read(&self.stores).len()
    }

    /// `true` if no store is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        read(&self.stores).is_empty()
    }

    /// Registered keys, sorted
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = read(&self.stores).keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Health of every registered store
    #[must_use]
    pub fn health(&self) -> HealthReport {
        let stores: Vec<Arc<dyn RegisteredStore>> = read(&self.stores).values().cloned().collect();
        let mut checks: Vec<HealthCheck> = stores.iter().map(|store| store.health()).collect();
        checks.sort_by(|a, b| a.component.cmp(&b.component));
        HealthReport::new(checks)
    }
}

impl std::fmt::Debug for StoreProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreProvider").field("keys", &self.keys()).finish()
    }
}

fn downcast<S: State, E: Event>(key: &str, store: &dyn RegisteredStore) -> Result<Store<S, E>, ProviderError> {
    store
        .as_any()
        .downcast_ref::<Store<S, E>>()
        .cloned()
        .ok_or_else(|| ProviderError::TypeMismatch {
            key: key.to_string(),
            expected: std::any::type_name::<Store<S, E>>(),
        })
}
