//! The store and its worker.
//!
//! Each [`Store`] owns one dedicated OS thread running a single-threaded
//! tokio runtime. Dispatched events are queued to that worker and processed
//! strictly one at a time:
//!
//! ```text
//! dispatch(e) ── DispatchedEvents observers (caller thread)
//!      │
//!      └─► queue ─► worker: middleware* → reducer → end-connector*
//!                          │
//!                          ├─ commit (atomic swap of Arc<S>)
//!                          ├─ State observers
//!                          ├─ FinishedEvents observers
//!                          └─ resolve DispatchHandle
//! ```
//!
//! The committed state lives in an `ArcSwap`, so `state()` is a lock-free
//! pointer load from any thread.
//!
//! A pipeline failure poisons the store: the failing dispatch resolves with
//! [`StoreError::Pipeline`], queued dispatches resolve with
//! [`StoreError::Poisoned`], the worker exits and every later `dispatch`
//! fails immediately. A panic in a task launched through
//! [`PipelineContext::spawn`] poisons the store the same way.

use crate::config::StoreConfig;
use crate::conflated::Conflated;
use crate::error::StoreError;
use crate::metrics::StoreMetrics;
use crate::subscription::{Observer, Registry, Subscription, SubscriptionKind};
use crate::sync::lock;
use crate::HealthCheck;
use arc_swap::ArcSwap;
use flowstore_core::event::Event;
use flowstore_core::state::State;
use flowstore_core::{
    Dispatcher, EndConnector, Middleware, PipelineContext, PipelineError, Reducer, StateReader,
    short_type_name,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch};

static ANONYMOUS_STORES: AtomicU64 = AtomicU64::new(1);

/// State shared between store handles and the worker
struct Shared<S, E> {
    key: Arc<str>,
    state: ArcSwap<S>,
    registry: Arc<Registry<S, E>>,
    failure: OnceLock<Arc<PipelineError>>,
    committed: AtomicU64,
}

impl<S, E> StateReader<S> for Shared<S, E>
where
    S: State,
    E: Event,
{
    fn state(&self) -> Arc<S> {
        self.state.load_full()
    }

    fn key(&self) -> &str {
        &self.key
    }
}

impl<S, E> Shared<S, E> {
    fn poisoned(&self) -> Option<StoreError> {
        self.failure.get().map(|cause| StoreError::Poisoned {
            key: self.key.to_string(),
            cause: Arc::clone(cause),
        })
    }

    fn closed(&self) -> StoreError {
        self.poisoned().unwrap_or_else(|| StoreError::WorkerUnavailable {
            key: self.key.to_string(),
        })
    }
}

struct Job<E> {
    event: E,
    sequence: u64,
    done: oneshot::Sender<Result<(), StoreError>>,
}

struct Submitter<E> {
    sender: mpsc::UnboundedSender<Job<E>>,
    last_sequence: u64,
}

struct StoreInner<S, E> {
    shared: Arc<Shared<S, E>>,
    submit: Mutex<Submitter<E>>,
    config: StoreConfig,
}

/// Single-writer holder of one state value
///
/// Cloning a `Store` is cheap and yields another handle to the same store.
/// The worker thread runs until the last handle is dropped (after draining
/// queued events) or until the pipeline fails.
///
/// # Example
///
/// ```no_run
/// use flowstore_core::{event::Event, state::State, TransformError};
/// use flowstore_runtime::Store;
///
/// #[derive(Clone, Debug)]
/// struct Add(i64);
/// impl Event for Add {}
///
/// #[derive(Debug, Default)]
/// struct Sum(i64);
/// impl State for Sum {}
///
/// # fn example() -> Result<(), flowstore_runtime::StoreError> {
/// let store = Store::builder(Sum::default(), |s: &Sum, e: &Add| -> Result<Sum, TransformError> {
///     Ok(Sum(s.0 + e.0))
/// })
/// .key("sum.store")
/// .build()?;
///
/// store.dispatch(Add(2))?.wait_blocking()?;
/// assert_eq!(store.state().0, 2);
/// # Ok(())
/// # }
/// ```
pub struct Store<S: State, E: Event> {
    inner: Arc<StoreInner<S, E>>,
}

impl<S: State, E: Event> Clone for Store<S, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: State, E: Event> Store<S, E> {
    /// Create a store with a reducer and no middleware or end-connectors
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Spawn`] if the worker cannot be started.
    pub fn new(initial: S, reducer: impl Reducer<S, E> + 'static) -> Result<Self, StoreError> {
        Self::builder(initial, reducer).build()
    }

    /// Create a store from already boxed pipeline parts
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Spawn`] if the worker cannot be started.
    pub fn with_pipeline(
        initial: S,
        reducer: impl Reducer<S, E> + 'static,
        middleware: Vec<Box<dyn Middleware<S, E>>>,
        end_connectors: Vec<Box<dyn EndConnector<S, E>>>,
    ) -> Result<Self, StoreError> {
        StoreBuilder {
            key: None,
            initial,
            dispatcher: Dispatcher::from_parts(Box::new(reducer), middleware, end_connectors),
            config: StoreConfig::default(),
        }
        .build()
    }

    /// Start building a store
    #[must_use]
    pub fn builder(initial: S, reducer: impl Reducer<S, E> + 'static) -> StoreBuilder<S, E> {
        StoreBuilder {
            key: None,
            initial,
            dispatcher: Dispatcher::new(reducer),
            config: StoreConfig::default(),
        }
    }

    /// Key identifying this store in logs, metrics and thread names
    #[must_use]
    pub fn key(&self) -> &str {
        &self.inner.shared.key
    }

    /// Configuration the store was built with
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Most recently committed state
    ///
    /// Never blocks and never observes a partially applied pipeline.
    #[must_use]
    pub fn state(&self) -> Arc<S> {
        self.inner.shared.state.load_full()
    }

    /// The pipeline failure that poisoned this store, if any
    #[must_use]
    pub fn failure(&self) -> Option<Arc<PipelineError>> {
        self.inner.shared.failure.get().cloned()
    }

    /// `true` once a pipeline failure has been recorded
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.inner.shared.failure.get().is_some()
    }

    /// Number of dispatches committed so far
    #[must_use]
    pub fn committed(&self) -> u64 {
        self.inner.shared.committed.load(Ordering::Acquire)
    }

    /// Submit an event
    ///
    /// Returns as soon as the event is queued. `DispatchedEvents` observers
    /// have been notified when this returns. The returned handle resolves
    /// once the event's pipeline has committed and published; dropping it
    /// makes the dispatch fire-and-forget.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Poisoned`] if the pipeline failed earlier, or
    /// [`StoreError::WorkerUnavailable`] if the worker is gone.
    pub fn dispatch(&self, event: E) -> Result<DispatchHandle, StoreError> {
        let shared = &self.inner.shared;
        if let Some(error) = shared.poisoned() {
            StoreMetrics::record_rejection(&shared.key);
            tracing::warn!(store = %shared.key, "rejected event: store is poisoned");
            return Err(error);
        }

        if shared.registry.len(SubscriptionKind::DispatchedEvents) > 0 {
            let state = shared.state.load_full();
            let submitted = Arc::new(event.clone());
            if let Err(payload) = shared
                .registry
                .notify(SubscriptionKind::DispatchedEvents, &state, &submitted)
            {
                std::panic::resume_unwind(payload);
            }
        }

        let (done, completion) = oneshot::channel();
        let sequence = {
            let mut submit = lock(&self.inner.submit);
            let sequence = submit.last_sequence + 1;
            if submit.sender.send(Job { event, sequence, done }).is_err() {
                drop(submit);
                StoreMetrics::record_rejection(&shared.key);
                return Err(shared.closed());
            }
            submit.last_sequence = sequence;
            sequence
        };

        StoreMetrics::record_dispatch(&shared.key);
        tracing::debug!(store = %shared.key, sequence, "event dispatched");

        Ok(DispatchHandle {
            key: Arc::clone(&shared.key),
            sequence,
            completion,
        })
    }

    /// Register an observer on one channel
    ///
    /// The subscription starts active. It stays registered until
    /// [`Subscription::unsubscribe`] is called, even if the handle is dropped.
    pub fn observe(&self, kind: SubscriptionKind, observer: impl Observer<S, E>) -> Subscription {
        self.inner.shared.registry.insert(kind, Box::new(observer))
    }

    /// Conflated receiver of committed states
    ///
    /// Holds at most the latest unread state. Dropping the receiver
    /// unsubscribes it.
    #[must_use]
    pub fn subscribe_state(&self) -> Conflated<Arc<S>> {
        let (sender, receiver) = watch::channel(None);
        let subscription = self.observe(SubscriptionKind::State, move |state: &Arc<S>, _: &Arc<E>| {
            sender.send_replace(Some(Arc::clone(state)));
        });
        Conflated::new(receiver, subscription)
    }

    /// Conflated receiver of the events published on `kind`
    #[must_use]
    pub fn subscribe_events(&self, kind: SubscriptionKind) -> Conflated<Arc<E>> {
        let (sender, receiver) = watch::channel(None);
        let subscription = self.observe(kind, move |_: &Arc<S>, event: &Arc<E>| {
            sender.send_replace(Some(Arc::clone(event)));
        });
        Conflated::new(receiver, subscription)
    }

    /// Number of registered subscriptions on `kind`
    #[must_use]
    pub fn subscriber_count(&self, kind: SubscriptionKind) -> usize {
        self.inner.shared.registry.len(kind)
    }

    /// Health of this store
    #[must_use]
    pub fn health(&self) -> HealthCheck {
        let component = format!("store:{}", self.key());
        let check = match self.failure() {
            Some(cause) => HealthCheck::unhealthy(component, format!("poisoned: {cause}")),
            None => HealthCheck::healthy(component),
        };

        check
            .with_metadata("key", self.key())
            .with_metadata("committed", self.committed().to_string())
            .with_metadata(
                "state_subscribers",
                self.subscriber_count(SubscriptionKind::State).to_string(),
            )
            .with_metadata(
                "dispatched_event_subscribers",
                self.subscriber_count(SubscriptionKind::DispatchedEvents).to_string(),
            )
            .with_metadata(
                "finished_event_subscribers",
                self.subscriber_count(SubscriptionKind::FinishedEvents).to_string(),
            )
    }

    /// `true` if both handles refer to the same store
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Read-only view of this store
    #[must_use]
    pub fn view(&self) -> StoreView<S, E> {
        StoreView { store: self.clone() }
    }
}

impl<S: State, E: Event> std::fmt::Debug for Store<S, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("key", &self.key())
            .field("committed", &self.committed())
            .field("poisoned", &self.is_poisoned())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Store`]
pub struct StoreBuilder<S: State, E: Event> {
    key: Option<String>,
    initial: S,
    dispatcher: Dispatcher<S, E>,
    config: StoreConfig,
}

impl<S: State, E: Event> StoreBuilder<S, E> {
    /// Set the store key (defaults to the state's type name plus a counter)
    #[must_use]
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Append a middleware
    #[must_use]
    pub fn middleware(mut self, middleware: impl Middleware<S, E> + 'static) -> Self {
        self.dispatcher = self.dispatcher.with_middleware(middleware);
        self
    }

    /// Append an end-connector
    #[must_use]
    pub fn end_connector(mut self, connector: impl EndConnector<S, E> + 'static) -> Self {
        self.dispatcher = self.dispatcher.with_end_connector(connector);
        self
    }

    /// Use a custom configuration
    #[must_use]
    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Start the worker and return the store
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Spawn`] if the worker thread or its runtime
    /// cannot be created.
    pub fn build(self) -> Result<Store<S, E>, StoreError> {
        let key: Arc<str> = match self.key {
            Some(key) => Arc::from(key),
            None => Arc::from(format!(
                "{}#{}",
                short_type_name::<S>(),
                ANONYMOUS_STORES.fetch_add(1, Ordering::Relaxed)
            )),
        };

        let shared = Arc::new(Shared {
            key: Arc::clone(&key),
            state: ArcSwap::from_pointee(self.initial),
            registry: Arc::new(Registry::new(Arc::clone(&key), self.config.isolate_observer_panics)),
            failure: OnceLock::new(),
            committed: AtomicU64::new(0),
        });

        let (sender, receiver) = mpsc::unbounded_channel();
        let worker = Worker {
            shared: Arc::clone(&shared),
            dispatcher: self.dispatcher,
        };
        worker.spawn(receiver, &self.config)?;

        tracing::debug!(store = %key, "store created");
        Ok(Store {
            inner: Arc::new(StoreInner {
                shared,
                submit: Mutex::new(Submitter {
                    sender,
                    last_sequence: 0,
                }),
                config: self.config,
            }),
        })
    }
}

impl<S: State, E: Event> std::fmt::Debug for StoreBuilder<S, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreBuilder")
            .field("key", &self.key)
            .field("dispatcher", &self.dispatcher)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Read-only handle to a store: state, subscriptions and health, no dispatch
pub struct StoreView<S: State, E: Event> {
    store: Store<S, E>,
}

impl<S: State, E: Event> Clone for StoreView<S, E> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: State, E: Event> StoreView<S, E> {
    /// Key of the underlying store
    #[must_use]
    pub fn key(&self) -> &str {
        self.store.key()
    }

    /// Most recently committed state
    #[must_use]
    pub fn state(&self) -> Arc<S> {
        self.store.state()
    }

    /// See [`Store::observe`]
    pub fn observe(&self, kind: SubscriptionKind, observer: impl Observer<S, E>) -> Subscription {
        self.store.observe(kind, observer)
    }

    /// See [`Store::subscribe_state`]
    #[must_use]
    pub fn subscribe_state(&self) -> Conflated<Arc<S>> {
        self.store.subscribe_state()
    }

    /// See [`Store::subscribe_events`]
    #[must_use]
    pub fn subscribe_events(&self, kind: SubscriptionKind) -> Conflated<Arc<E>> {
        self.store.subscribe_events(kind)
    }

    /// See [`Store::subscriber_count`]
    #[must_use]
    pub fn subscriber_count(&self, kind: SubscriptionKind) -> usize {
        self.store.subscriber_count(kind)
    }

    /// See [`Store::failure`]
    #[must_use]
    pub fn failure(&self) -> Option<Arc<PipelineError>> {
        self.store.failure()
    }

    /// See [`Store::health`]
    #[must_use]
    pub fn health(&self) -> HealthCheck {
        self.store.health()
    }

    /// `true` if both views refer to the same store
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.store.ptr_eq(&other.store)
    }
}

impl<S: State, E: Event> std::fmt::Debug for StoreView<S, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("StoreView").field(&self.store).finish()
    }
}

/// Completion handle of one dispatched event
#[derive(Debug)]
#[must_use = "dropping the handle makes the dispatch fire-and-forget"]
pub struct DispatchHandle {
    key: Arc<str>,
    sequence: u64,
    completion: oneshot::Receiver<Result<(), StoreError>>,
}

impl DispatchHandle {
    /// Position of the event in its store's dispatch order, starting at 1
    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Wait until the event's pipeline has committed and published
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Pipeline`] if this event's pipeline failed,
    /// [`StoreError::Poisoned`] if an earlier event poisoned the store first,
    /// or [`StoreError::WorkerUnavailable`] if the worker went away.
    pub async fn wait(self) -> Result<(), StoreError> {
        match self.completion.await {
            Ok(result) => result,
            Err(_) => Err(StoreError::WorkerUnavailable {
                key: self.key.to_string(),
            }),
        }
    }

    /// Like [`DispatchHandle::wait`] with an upper bound
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Timeout`] if `timeout` elapses first.
    pub async fn wait_timeout(self, timeout: Duration) -> Result<(), StoreError> {
        tokio::time::timeout(timeout, self.wait())
            .await
            .map_err(|_| StoreError::Timeout)?
    }

    /// Block the current thread until completion
    ///
    /// Must not be called from inside an async runtime.
    ///
    /// # Errors
    ///
    /// Same as [`DispatchHandle::wait`].
    pub fn wait_blocking(self) -> Result<(), StoreError> {
        match self.completion.blocking_recv() {
            Ok(result) => result,
            Err(_) => Err(StoreError::WorkerUnavailable {
                key: self.key.to_string(),
            }),
        }
    }
}

/// Runs pipelines for one store
struct Worker<S: State, E: Event> {
    shared: Arc<Shared<S, E>>,
    dispatcher: Dispatcher<S, E>,
}

impl<S: State, E: Event> Worker<S, E> {
    fn spawn(self, receiver: mpsc::UnboundedReceiver<Job<E>>, config: &StoreConfig) -> Result<(), StoreError> {
        let mut builder = std::thread::Builder::new().name(config.thread_name(&self.shared.key));
        if let Some(size) = config.worker_stack_size {
            builder = builder.stack_size(size);
        }

        // The runtime is built on the worker itself so a failure never drops
        // a runtime inside the caller's async context.
        let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel::<std::io::Result<()>>(1);
        builder.spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(runtime) => {
                    let _ = ready_tx.send(Ok(()));
                    runtime
                },
                Err(error) => {
                    let _ = ready_tx.send(Err(error));
                    return;
                },
            };
            runtime.block_on(self.run(receiver));
        })?;

        match ready_rx.recv() {
            Ok(result) => result.map_err(StoreError::Spawn),
            Err(_) => Err(StoreError::Spawn(std::io::Error::other("worker exited during startup"))),
        }
    }

    async fn run(self, mut receiver: mpsc::UnboundedReceiver<Job<E>>) {
        let handle = Handle::current();
        tracing::debug!(store = %self.shared.key, "worker started");

        let (task_failures, mut failed_tasks) = mpsc::unbounded_channel::<PipelineError>();

        loop {
            tokio::select! {
                biased;

                Some(error) = failed_tasks.recv() => {
                    self.poison(error);
                    break;
                },
                job = receiver.recv() => {
                    let Some(job) = job else { break };
                    if !self.process(&handle, &task_failures, job) {
                        break;
                    }
                },
            }
            // Let tasks spawned from the pipeline make progress between events
            tokio::task::yield_now().await;
        }

        receiver.close();
        let mut abandoned = 0_usize;
        while let Ok(job) = receiver.try_recv() {
            let _ = job.done.send(Err(self.shared.closed()));
            abandoned += 1;
        }

        if abandoned > 0 {
            tracing::error!(store = %self.shared.key, abandoned, "worker stopped with queued events");
        }
        tracing::debug!(store = %self.shared.key, "worker stopped");
    }

    /// Run, commit and publish one event; `false` once the store is poisoned
    #[tracing::instrument(
        skip(self, handle, task_failures, job),
        fields(store = %self.shared.key, sequence = job.sequence),
        name = "store_pipeline"
    )]
    fn process(&self, handle: &Handle, task_failures: &mpsc::UnboundedSender<PipelineError>, job: Job<E>) -> bool {
        let started = Instant::now();
        let reader: &dyn StateReader<S> = self.shared.as_ref();
        let ctx = PipelineContext::new(reader, handle, job.sequence).with_task_failures(task_failures);

        let (event, state) = match self.dispatcher.run(&ctx, job.event) {
            Ok(outcome) => outcome,
            Err(error) => {
                let _ = job.done.send(Err(StoreError::Pipeline(self.poison(error))));
                return false;
            },
        };

        let state = Arc::new(state);
        let event = Arc::new(event);
        self.shared.state.store(Arc::clone(&state));
        self.shared.committed.fetch_add(1, Ordering::AcqRel);
        tracing::debug!("state committed");

        let published = self
            .shared
            .registry
            .notify(SubscriptionKind::State, &state, &event)
            .and_then(|_| {
                self.shared
                    .registry
                    .notify(SubscriptionKind::FinishedEvents, &state, &event)
            });
        StoreMetrics::record_pipeline(&self.shared.key, started.elapsed());

        if let Err(payload) = published {
            let error = self.poison(PipelineError::from_panic("observer", payload.as_ref()));
            let _ = job.done.send(Err(StoreError::Pipeline(error)));
            return false;
        }

        let _ = job.done.send(Ok(()));
        true
    }

    /// Record the failure that stops this store
    fn poison(&self, error: PipelineError) -> Arc<PipelineError> {
        let error = Arc::new(error);
        let _ = self.shared.failure.set(Arc::clone(&error));

        StoreMetrics::record_failure(&self.shared.key, error.stage());
        tracing::error!(
            store = %self.shared.key,
            stage = error.stage(),
            error = %error,
            "pipeline failed; store is poisoned"
        );

        error
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use flowstore_core::TransformError;

    #[derive(Clone, Debug, PartialEq)]
    enum CounterEvent {
        Add(i64),
        Fail,
    }
    impl Event for CounterEvent {}

    #[derive(Debug, Default, PartialEq)]
    struct Counter {
        value: i64,
    }
    impl State for Counter {}

    fn reducer(state: &Counter, event: &CounterEvent) -> Result<Counter, TransformError> {
        match event {
            CounterEvent::Add(n) => Ok(Counter {
                value: state.value + n,
            }),
            CounterEvent::Fail => Err(TransformError::rejected("fail requested")),
        }
    }

    fn counter_store() -> Store<Counter, CounterEvent> {
        Store::builder(Counter::default(), reducer).key("counter.store").build().unwrap()
    }

    #[tokio::test]
    async fn dispatch_commits_state() {
        let store = counter_store();

        store.dispatch(CounterEvent::Add(3)).unwrap().wait().await.unwrap();
        store.dispatch(CounterEvent::Add(4)).unwrap().wait().await.unwrap();

        assert_eq!(store.state().value, 7);
        assert_eq!(store.committed(), 2);
    }

    #[tokio::test]
    async fn sequences_follow_submission_order() {
        let store = counter_store();

        let first = store.dispatch(CounterEvent::Add(1)).unwrap();
        let second = store.dispatch(CounterEvent::Add(1)).unwrap();

        assert_eq!(first.sequence(), 1);
        assert_eq!(second.sequence(), 2);
        second.wait().await.unwrap();
    }

    #[tokio::test]
    async fn failure_poisons_store() {
        let store = counter_store();
        store.dispatch(CounterEvent::Add(1)).unwrap().wait().await.unwrap();

        let error = store.dispatch(CounterEvent::Fail).unwrap().wait().await.unwrap_err();
        assert!(matches!(error, StoreError::Pipeline(_)));

        assert!(store.is_poisoned());
        assert_eq!(store.state().value, 1);
        assert!(matches!(
            store.dispatch(CounterEvent::Add(1)),
            Err(StoreError::Poisoned { .. })
        ));
        assert!(store.health().status.is_unhealthy());
    }

    #[tokio::test]
    async fn middleware_sees_sequence_and_key() {
        let store = Store::builder(Counter::default(), reducer)
            .key("ctx.store")
            .middleware(
                |ctx: &PipelineContext<'_, Counter>, event: CounterEvent| -> Result<CounterEvent, TransformError> {
                    assert_eq!(ctx.store_key(), "ctx.store");
                    match event {
                        CounterEvent::Add(_) => Ok(CounterEvent::Add(i64::try_from(ctx.sequence()).unwrap_or(0))),
                        other => Ok(other),
                    }
                },
            )
            .build()
            .unwrap();

        let _first = store.dispatch(CounterEvent::Add(100)).unwrap();
        store.dispatch(CounterEvent::Add(100)).unwrap().wait().await.unwrap();

        // sequences 1 + 2
        assert_eq!(store.state().value, 3);
    }

    #[tokio::test]
    async fn default_key_uses_state_type() {
        let store: Store<Counter, CounterEvent> = Store::new(Counter::default(), reducer).unwrap();

        assert!(store.key().starts_with("Counter#"));
    }

    #[test]
    fn wait_blocking_outside_runtime() {
        let store = counter_store();

        store.dispatch(CounterEvent::Add(5)).unwrap().wait_blocking().unwrap();

        assert_eq!(store.state().value, 5);
    }

    #[tokio::test]
    async fn health_reports_counts() {
        let store = counter_store();
        let _subscription = store.observe(SubscriptionKind::State, |_: &Arc<Counter>, _: &Arc<CounterEvent>| {});
        store.dispatch(CounterEvent::Add(1)).unwrap().wait().await.unwrap();

        let health = store.health();

        assert!(health.status.is_healthy());
        assert_eq!(health.component, "store:counter.store");
        assert_eq!(health.metadata("committed"), Some("1"));
        assert_eq!(health.metadata("state_subscribers"), Some("1"));
    }
}
