//! Keyed features over shared stores.
//!
//! A feature type owns a [`Feature`] value privately and exposes its own
//! operations; outside code reads state and subscribes through
//! [`Feature::store`], which has no `dispatch`.
//!
//! ```no_run
//! use flowstore_core::{event::Event, state::State, TransformError};
//! use flowstore_runtime::{Feature, ProviderError, StoreError, StoreProvider, StoreView};
//!
//! #[derive(Clone, Debug)]
//! enum CartEvent { Add(u32) }
//! impl Event for CartEvent {}
//!
//! #[derive(Debug, Default)]
//! struct Cart { items: Vec<u32> }
//! impl State for Cart {}
//!
//! fn reduce(state: &Cart, event: &CartEvent) -> Result<Cart, TransformError> {
//!     let CartEvent::Add(id) = event;
//!     let mut items = state.items.clone();
//!     items.push(*id);
//!     Ok(Cart { items })
//! }
//!
//! pub struct CartFeature {
//!     feature: Feature<Cart, CartEvent>,
//! }
//!
//! impl CartFeature {
//!     pub fn new(provider: &StoreProvider) -> Result<Self, ProviderError> {
//!         Ok(Self { feature: Feature::new::<Self>(provider, Cart::default(), reduce)? })
//!     }
//!
//!     pub fn add(&self, id: u32) -> Result<(), StoreError> {
//!         self.feature.dispatch(CartEvent::Add(id)).map(drop)
//!     }
//!
//!     pub fn store(&self) -> StoreView<Cart, CartEvent> {
//!         self.feature.store()
//!     }
//! }
//! ```

use crate::config::StoreConfig;
use crate::error::{ProviderError, StoreError};
use crate::provider::StoreProvider;
use crate::store::{DispatchHandle, Store, StoreBuilder, StoreView};
use flowstore_core::event::Event;
use flowstore_core::state::State;
use flowstore_core::{EndConnector, Middleware, Reducer, short_type_name};
use std::sync::Arc;

/// Registry key derived from a type: its full path plus `.store`
///
/// Every construction of the same feature type, anywhere in the process,
/// converges on the same key and therefore on the same store.
#[must_use]
pub fn store_key<T: ?Sized>() -> String {
    format!("{}.store", std::any::type_name::<T>())
}

/// Named façade over one keyed store
pub struct Feature<S: State, E: Event> {
    name: &'static str,
    store: Store<S, E>,
}

impl<S: State, E: Event> Feature<S, E> {
    /// Get or create the store keyed by `Owner`'s type
    ///
    /// # Errors
    ///
    /// See [`StoreProvider::get`].
    pub fn new<Owner: ?Sized>(
        provider: &StoreProvider,
        initial: S,
        reducer: impl Reducer<S, E> + 'static,
    ) -> Result<Self, ProviderError> {
        Self::builder::<Owner>(initial, reducer).build(provider)
    }

    /// Start building a feature keyed by `Owner`'s type
    #[must_use]
    pub fn builder<Owner: ?Sized>(initial: S, reducer: impl Reducer<S, E> + 'static) -> FeatureBuilder<S, E> {
        FeatureBuilder {
            name: short_type_name::<Owner>(),
            key: store_key::<Owner>(),
            store: Store::builder(initial, reducer),
        }
    }

    /// Short name of the owning type
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Key of the underlying store
    #[must_use]
    pub fn key(&self) -> &str {
        self.store.key()
    }

    /// Read-only view of the underlying store
    #[must_use]
    pub fn store(&self) -> StoreView<S, E> {
        self.store.view()
    }

    /// Most recently committed state
    #[must_use]
    pub fn state(&self) -> Arc<S> {
        self.store.state()
    }

    /// Submit an event to the underlying store
    ///
    /// # Errors
    ///
    /// See [`Store::dispatch`].
    pub fn dispatch(&self, event: E) -> Result<DispatchHandle, StoreError> {
        self.store.dispatch(event)
    }
}

impl<S: State, E: Event> Clone for Feature<S, E> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            store: self.store.clone(),
        }
    }
}

impl<S: State, E: Event> std::fmt::Debug for Feature<S, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Feature")
            .field("name", &self.name)
            .field("store", &self.store)
            .finish()
    }
}

/// Builder for [`Feature`]
///
/// Middleware, end-connectors and config only take effect if this build
/// registers the store; when the key is already registered the existing
/// store is used as is.
pub struct FeatureBuilder<S: State, E: Event> {
    name: &'static str,
    key: String,
    store: StoreBuilder<S, E>,
}

impl<S: State, E: Event> FeatureBuilder<S, E> {
    /// Override the registry key
    #[must_use]
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    /// Append a middleware
    #[must_use]
    pub fn middleware(mut self, middleware: impl Middleware<S, E> + 'static) -> Self {
        self.store = self.store.middleware(middleware);
        self
    }

    /// Append an end-connector
    #[must_use]
    pub fn end_connector(mut self, connector: impl EndConnector<S, E> + 'static) -> Self {
        self.store = self.store.end_connector(connector);
        self
    }

    /// Use a custom store configuration
    #[must_use]
    pub fn config(mut self, config: StoreConfig) -> Self {
        self.store = self.store.config(config);
        self
    }

    /// Get or create the store through `provider`
    ///
    /// # Errors
    ///
    /// See [`StoreProvider::get`].
    pub fn build(self, provider: &StoreProvider) -> Result<Feature<S, E>, ProviderError> {
        let Self { name, key, store } = self;
        let store = provider.get(&key, || store.key(key.clone()).build())?;
        Ok(Feature { name, store })
    }
}

impl<S: State, E: Event> std::fmt::Debug for FeatureBuilder<S, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureBuilder")
            .field("name", &self.name)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}
