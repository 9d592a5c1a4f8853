//! # Users Demo
//!
//! Two features over keyed stores, as a screen of a user-management app
//! would use them:
//!
//! - [`GetUsersFeature`] loads the user list when its lifecycle starts,
//!   logging every event and state through the predefined logger transforms
//! - [`DeleteUserFeature`] records a deletion in two steps, pending then done
//!
//! Both hide `dispatch`: callers only see their operations plus a read-only
//! [`StoreView`] for rendering.
//!
//! ## Example
//!
//! ```no_run
//! use flowstore_runtime::{FeatureBinding, Lifecycle, StoreProvider};
//! use std::sync::Arc;
//! use std::time::Duration;
//! use users::{GetUsersFeature, GetUsersUseCase};
//!
//! # async fn example() -> Result<(), flowstore_runtime::ProviderError> {
//! let lifecycle = Arc::new(Lifecycle::new());
//! let feature = Arc::new(GetUsersFeature::new(
//!     StoreProvider::global(),
//!     GetUsersUseCase::new(Duration::from_millis(100)),
//!     tokio::runtime::Handle::current(),
//! )?);
//! let _binding = FeatureBinding::bind(Arc::clone(&feature), &lifecycle);
//!
//! lifecycle.start(); // loads users in the background
//! # Ok(())
//! # }
//! ```

use flowstore_core::event::Event;
use flowstore_core::state::State;
use flowstore_core::{Reducer, TransformError, short_type_name};
use flowstore_runtime::{
    DispatchHandle, Feature, LifecycleAware, LoggerEndConnector, LoggerMiddleware, ProviderError, StoreError,
    StoreProvider, StoreView,
};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// A user as shown in the list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// Identifier
    pub id: u32,
    /// Display name
    pub name: String,
}

impl User {
    /// Create a user
    #[must_use]
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self { id, name: name.into() }
    }
}

// ============================================================================
// Use cases
// ============================================================================

/// Fetches the user list from a (simulated) remote source
#[derive(Debug, Clone)]
pub struct GetUsersUseCase {
    latency: Duration,
}

impl GetUsersUseCase {
    /// Simulate a source answering after `latency`
    #[must_use]
    pub const fn new(latency: Duration) -> Self {
        Self { latency }
    }

    /// Fetch all users
    pub async fn call(&self) -> Vec<User> {
        tokio::time::sleep(self.latency).await;
        vec![User::new(1, "m"), User::new(2, "k")]
    }
}

/// Deletes a user; answers with the id that was deleted
#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteUserUseCase;

impl DeleteUserUseCase {
    /// Delete the user with `id`
    #[must_use]
    pub const fn call(self, id: u32) -> u32 {
        id
    }
}

// ============================================================================
// Get users
// ============================================================================

/// State of the user list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsersState {
    /// A load is in progress
    pub loading: bool,
    /// Loaded users
    pub users: Vec<User>,
}

impl State for UsersState {}

/// Events of the user list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UsersEvent {
    /// Loading started or stopped
    Loading(bool),
    /// Replace the list; also ends loading
    InsertUsers(Vec<User>),
    /// Ask the UI to show an alert; leaves the state untouched
    OpenAlertDialog,
}

impl Event for UsersEvent {}

/// Reducer of the user list
#[derive(Debug, Clone, Copy, Default)]
pub struct UsersReducer;

impl Reducer<UsersState, UsersEvent> for UsersReducer {
    fn reduce(&self, state: &UsersState, event: &UsersEvent) -> Result<UsersState, TransformError> {
        Ok(match event {
            UsersEvent::Loading(loading) => UsersState {
                loading: *loading,
                users: state.users.clone(),
            },
            UsersEvent::InsertUsers(users) => UsersState {
                loading: false,
                users: users.clone(),
            },
            UsersEvent::OpenAlertDialog => state.clone(),
        })
    }

    fn name(&self) -> &str {
        "UsersReducer"
    }
}

/// Loads the user list while its lifecycle is started
pub struct GetUsersFeature {
    feature: Feature<UsersState, UsersEvent>,
    use_case: GetUsersUseCase,
    runtime: Handle,
    job: Mutex<Option<JoinHandle<()>>>,
}

impl GetUsersFeature {
    /// Get or create the feature's store through `provider`
    ///
    /// `runtime` runs the background load started by [`LifecycleAware::start`].
    ///
    /// # Errors
    ///
    /// See [`StoreProvider::get`].
    pub fn new(provider: &StoreProvider, use_case: GetUsersUseCase, runtime: Handle) -> Result<Self, ProviderError> {
        let prefix = short_type_name::<Self>();
        let feature = Feature::builder::<Self>(UsersState::default(), UsersReducer)
            .middleware(LoggerMiddleware::new(prefix))
            .end_connector(LoggerEndConnector::new(prefix))
            .build(provider)?;

        Ok(Self {
            feature,
            use_case,
            runtime,
            job: Mutex::new(None),
        })
    }

    /// Read-only view of the user list store
    #[must_use]
    pub fn store(&self) -> StoreView<UsersState, UsersEvent> {
        self.feature.store()
    }

    /// Load the users now and wait until they are committed
    ///
    /// # Errors
    ///
    /// Returns the store error if any of the dispatches fails.
    pub async fn load(&self) -> Result<(), StoreError> {
        load_users(self.feature.clone(), self.use_case.clone()).await
    }

    /// `true` while a background load started by the lifecycle is running
    #[must_use]
    pub fn is_loading_in_background(&self) -> bool {
        self.job
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|job| !job.is_finished())
    }
}

async fn load_users(feature: Feature<UsersState, UsersEvent>, use_case: GetUsersUseCase) -> Result<(), StoreError> {
    let _ = feature.dispatch(UsersEvent::Loading(true))?;
    let users = use_case.call().await;
    tracing::info!(feature = feature.name(), count = users.len(), "users fetched");

    let _ = feature.dispatch(UsersEvent::InsertUsers(users))?;
    feature.dispatch(UsersEvent::OpenAlertDialog)?.wait().await
}

impl LifecycleAware for GetUsersFeature {
    fn start(&self) {
        let feature = self.feature.clone();
        let use_case = self.use_case.clone();
        let job = self.runtime.spawn(async move {
            if let Err(error) = load_users(feature, use_case).await {
                tracing::error!(%error, "loading users failed");
            }
        });

        let previous = self.job.lock().unwrap_or_else(PoisonError::into_inner).replace(job);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    fn stop(&self) {
        if let Some(job) = self.job.lock().unwrap_or_else(PoisonError::into_inner).take() {
            job.abort();
        }
    }
}

// ============================================================================
// Delete user
// ============================================================================

/// State of a user deletion
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteUserState {
    /// The deletion is pending
    pub loading: bool,
    /// The last deletion completed
    pub user_deleted: bool,
    /// Id of the user concerned, 0 before the first deletion
    pub deleted_user: u32,
}

impl State for DeleteUserState {}

/// Events of a user deletion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteUserEvent {
    /// A deletion of `id` is pending (`deleted == false`) or done
    DeleteUser {
        /// User concerned
        id: u32,
        /// Whether the deletion completed
        deleted: bool,
    },
}

impl Event for DeleteUserEvent {}

/// Reducer of a user deletion
#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteUserReducer;

impl Reducer<DeleteUserState, DeleteUserEvent> for DeleteUserReducer {
    fn reduce(&self, _: &DeleteUserState, event: &DeleteUserEvent) -> Result<DeleteUserState, TransformError> {
        let DeleteUserEvent::DeleteUser { id, deleted } = event;
        Ok(DeleteUserState {
            loading: !deleted,
            user_deleted: *deleted,
            deleted_user: *id,
        })
    }

    fn name(&self) -> &str {
        "DeleteUserReducer"
    }
}

/// Deletes users
pub struct DeleteUserFeature {
    feature: Feature<DeleteUserState, DeleteUserEvent>,
    use_case: DeleteUserUseCase,
}

impl DeleteUserFeature {
    /// Get or create the feature's store through `provider`
    ///
    /// # Errors
    ///
    /// See [`StoreProvider::get`].
    pub fn new(provider: &StoreProvider, use_case: DeleteUserUseCase) -> Result<Self, ProviderError> {
        Ok(Self {
            feature: Feature::new::<Self>(provider, DeleteUserState::default(), DeleteUserReducer)?,
            use_case,
        })
    }

    /// Delete the user with `id`
    ///
    /// Marks the deletion pending, runs the use case and records the outcome.
    /// The returned handle resolves once the outcome is committed.
    ///
    /// # Errors
    ///
    /// Returns the store error if either dispatch is rejected.
    pub fn delete(&self, id: u32) -> Result<DispatchHandle, StoreError> {
        let _ = self.feature.dispatch(DeleteUserEvent::DeleteUser { id, deleted: false })?;
        let deleted = self.use_case.call(id);
        self.feature.dispatch(DeleteUserEvent::DeleteUser { id: deleted, deleted: true })
    }

    /// Read-only view of the deletion store
    #[must_use]
    pub fn store(&self) -> StoreView<DeleteUserState, DeleteUserEvent> {
        self.feature.store()
    }
}
