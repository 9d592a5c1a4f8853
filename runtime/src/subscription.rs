//! Subscriptions and the per-store subscriber registries.
//!
//! A store keeps one registry per [`SubscriptionKind`]. Observers may be added
//! and removed from any thread while the worker is publishing: every publish
//! round works on a snapshot of the registry taken when the round starts, and
//! each subscriber's [`Gate`] decides at delivery time whether the callback
//! may still run.

use crate::lifecycle::{LifecycleListener, LifecyclePhase, LifecycleSignal, LifecycleSource};
use crate::metrics::{ACTIVE_SUBSCRIPTIONS, NOTIFICATIONS_TOTAL, OBSERVER_PANICS_TOTAL};
use crate::sync::{lock, read, write};
use std::any::Any;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::thread::{self, ThreadId};

/// The three channels a store publishes on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionKind {
    /// Every committed state, after a dispatch completed
    State,

    /// The event as submitted, before the pipeline runs
    DispatchedEvents,

    /// The event as it left the middleware stage, after the pipeline completed
    FinishedEvents,
}

impl SubscriptionKind {
    /// All kinds, in registry order
    pub const ALL: [Self; 3] = [Self::State, Self::DispatchedEvents, Self::FinishedEvents];

    const fn index(self) -> usize {
        match self {
            Self::State => 0,
            Self::DispatchedEvents => 1,
            Self::FinishedEvents => 2,
        }
    }

    /// Label used in logs and metrics
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::State => "state",
            Self::DispatchedEvents => "dispatched_events",
            Self::FinishedEvents => "finished_events",
        }
    }
}

impl std::fmt::Display for SubscriptionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Callback invoked for every publish on the channel it was registered for
///
/// `state` is the committed state for [`SubscriptionKind::State`] and
/// [`SubscriptionKind::FinishedEvents`], and the state at submission time for
/// [`SubscriptionKind::DispatchedEvents`]. Every observer of one publish round
/// receives the same `Arc`s.
///
/// Callbacks for state and finished events run on the store's worker, so a
/// slow observer delays the next dispatch of that store. Consumers that need
/// to read at their own pace should use a [`crate::Conflated`] receiver.
pub trait Observer<S, E>: Send + Sync + 'static {
    /// Handle one notification
    fn on_notify(&self, state: &Arc<S>, event: &Arc<E>);
}

impl<S, E, F> Observer<S, E> for F
where
    F: Fn(&Arc<S>, &Arc<E>) + Send + Sync + 'static,
{
    fn on_notify(&self, state: &Arc<S>, event: &Arc<E>) {
        self(state, event);
    }
}

/// Identifier of a subscription within its store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Raw numeric value
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

/// Lifecycle state of a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionStatus {
    /// Registered and delivering
    Active,

    /// Registered, not delivering
    Paused,

    /// Removed from the store (terminal)
    Unsubscribed,
}

const ACTIVE: u8 = 0;
const PAUSED: u8 = 1;
const UNSUBSCRIBED: u8 = 2;

/// Delivery gate shared between a subscription handle and its registry entry
///
/// A callback only starts while the gate is active and holds `delivery` for
/// its whole duration. Status changes wait for an in-flight callback to
/// finish, so once `pause` or `unsubscribe` returns no further callback runs.
struct Gate {
    status: AtomicU8,
    delivery: Mutex<()>,
    delivering_on: Mutex<Option<ThreadId>>,
}

impl Gate {
    const fn new() -> Self {
        Self {
            status: AtomicU8::new(ACTIVE),
            delivery: Mutex::new(()),
            delivering_on: Mutex::new(None),
        }
    }

    fn status(&self) -> SubscriptionStatus {
        match self.status.load(Ordering::SeqCst) {
            ACTIVE => SubscriptionStatus::Active,
            PAUSED => SubscriptionStatus::Paused,
            _ => SubscriptionStatus::Unsubscribed,
        }
    }

    /// Move to `to` unless already unsubscribed; returns the previous status
    fn transition(&self, to: u8) -> SubscriptionStatus {
        let previous = self
            .status
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current != UNSUBSCRIBED).then_some(to)
            })
            .unwrap_or(UNSUBSCRIBED);

        match previous {
            ACTIVE => SubscriptionStatus::Active,
            PAUSED => SubscriptionStatus::Paused,
            _ => SubscriptionStatus::Unsubscribed,
        }
    }

    fn deliver(&self, callback: impl FnOnce()) -> bool {
        let _delivery = lock(&self.delivery);
        if self.status.load(Ordering::SeqCst) != ACTIVE {
            return false;
        }

        *lock(&self.delivering_on) = Some(thread::current().id());
        let _reset = ClearOnDrop(&self.delivering_on);
        callback();
        true
    }

    /// Block until an in-flight callback on another thread has returned
    ///
    /// A no-op when called from inside the callback itself.
    fn settle(&self) {
        let current = thread::current().id();
        if *lock(&self.delivering_on) != Some(current) {
            drop(lock(&self.delivery));
        }
    }
}

struct ClearOnDrop<'a>(&'a Mutex<Option<ThreadId>>);

impl Drop for ClearOnDrop<'_> {
    fn drop(&mut self) {
        *lock(self.0) = None;
    }
}

/// Type-erased removal hook, so subscription handles need not know the
/// store's state and event types
trait Unregister: Send + Sync {
    fn unregister(&self, kind: SubscriptionKind, id: SubscriptionId);
}

/// Handle for one observer's registration
///
/// Created by [`crate::Store::observe`]. The handle is cheap to clone; all
/// clones control the same registration. Dropping the handle does **not**
/// unsubscribe: the registration stays until [`Subscription::unsubscribe`] is
/// called, directly or through a bound lifecycle.
///
/// The handle refers to its store only weakly: an outstanding subscription
/// never keeps a store alive, and unsubscribing after the store is gone is a
/// no-op.
#[derive(Clone)]
pub struct Subscription {
    inner: Arc<SubscriptionInner>,
}

struct SubscriptionInner {
    id: SubscriptionId,
    kind: SubscriptionKind,
    store_key: Arc<str>,
    gate: Arc<Gate>,
    registry: Mutex<Option<Weak<dyn Unregister>>>,
    detach: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Subscription {
    /// Identifier within the owning store
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.inner.id
    }

    /// Channel this subscription listens on
    #[must_use]
    pub fn kind(&self) -> SubscriptionKind {
        self.inner.kind
    }

    /// Current status
    #[must_use]
    pub fn status(&self) -> SubscriptionStatus {
        self.inner.gate.status()
    }

    /// `true` while callbacks are delivered
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status() == SubscriptionStatus::Active
    }

    /// Stop delivering callbacks until [`Subscription::resume`]
    ///
    /// Nothing published while paused is queued or replayed. When this
    /// returns, no callback of this subscription is running on another thread.
    pub fn pause(&self) {
        if self.inner.gate.transition(PAUSED) == SubscriptionStatus::Active {
            tracing::trace!(store = %self.inner.store_key, id = self.inner.id.0, "subscription paused");
        }
        self.inner.gate.settle();
    }

    /// Resume delivering callbacks; no effect once unsubscribed
    pub fn resume(&self) {
        if self.inner.gate.transition(ACTIVE) == SubscriptionStatus::Paused {
            tracing::trace!(store = %self.inner.store_key, id = self.inner.id.0, "subscription resumed");
        }
    }

    /// Remove the subscription from its store
    ///
    /// Terminal and idempotent. Also detaches any bound lifecycle. When this
    /// returns, the observer will not be called again, even if a publish
    /// round was already in progress.
    pub fn unsubscribe(&self) {
        let previous = self.inner.gate.transition(UNSUBSCRIBED);
        if previous == SubscriptionStatus::Unsubscribed {
            return;
        }

        let registry = lock(&self.inner.registry).take();
        if let Some(registry) = registry.and_then(|weak| weak.upgrade()) {
            registry.unregister(self.inner.kind, self.inner.id);
        }

        let detach = lock(&self.inner.detach).take();
        if let Some(detach) = detach {
            detach();
        }

        self.inner.gate.settle();
        tracing::debug!(
            store = %self.inner.store_key,
            kind = %self.inner.kind,
            id = self.inner.id.0,
            "unsubscribed"
        );
    }

    /// Bind this subscription to a lifecycle
    ///
    /// Start resumes, stop pauses and destroy unsubscribes. Binding to a
    /// source that is already destroyed unsubscribes immediately; binding to a
    /// stopped source pauses. A previous binding is detached first.
    pub fn bind<L>(&self, source: &Arc<L>)
    where
        L: LifecycleSource + 'static,
    {
        if self.status() == SubscriptionStatus::Unsubscribed {
            return;
        }

        match source.current() {
            LifecyclePhase::Destroyed => {
                self.unsubscribe();
                return;
            },
            LifecyclePhase::Stopped => self.pause(),
            LifecyclePhase::Initialized | LifecyclePhase::Started => {},
        }

        let listener_id = source.add_listener(Arc::new(SubscriptionListener(self.clone())));
        let weak_source = Arc::downgrade(source);
        let detach: Box<dyn FnOnce() + Send> = Box::new(move || {
            if let Some(source) = weak_source.upgrade() {
                source.remove_listener(listener_id);
            }
        });

        let previous = lock(&self.inner.detach).replace(detach);
        if let Some(previous) = previous {
            previous();
        }

        // A signal emitted while the listener was being registered is missed
        match source.current() {
            LifecyclePhase::Destroyed => self.unsubscribe(),
            LifecyclePhase::Stopped => self.pause(),
            LifecyclePhase::Initialized | LifecyclePhase::Started => {},
        }
    }

    /// `true` if both handles control the same registration
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("store", &self.inner.store_key)
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("status", &self.status())
            .finish()
    }
}

struct SubscriptionListener(Subscription);

impl LifecycleListener for SubscriptionListener {
    fn on_signal(&self, signal: LifecycleSignal) {
        match signal {
            LifecycleSignal::Start => self.0.resume(),
            LifecycleSignal::Stop => self.0.pause(),
            LifecycleSignal::Destroy => self.0.unsubscribe(),
        }
    }
}

struct Subscriber<S, E> {
    gate: Arc<Gate>,
    observer: Box<dyn Observer<S, E>>,
}

type Channel<S, E> = RwLock<HashMap<SubscriptionId, Arc<Subscriber<S, E>>>>;

/// The three subscriber sets of one store
pub(crate) struct Registry<S, E> {
    store_key: Arc<str>,
    next_id: AtomicU64,
    channels: [Channel<S, E>; 3],
    isolate_panics: bool,
}

impl<S, E> Registry<S, E>
where
    S: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    pub(crate) fn new(store_key: Arc<str>, isolate_panics: bool) -> Self {
        Self {
            store_key,
            next_id: AtomicU64::new(1),
            channels: [
                RwLock::new(HashMap::new()),
                RwLock::new(HashMap::new()),
                RwLock::new(HashMap::new()),
            ],
            isolate_panics,
        }
    }

    pub(crate) fn insert(
        self: &Arc<Self>,
        kind: SubscriptionKind,
        observer: Box<dyn Observer<S, E>>,
    ) -> Subscription {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let gate = Arc::new(Gate::new());
        let subscriber = Arc::new(Subscriber {
            gate: Arc::clone(&gate),
            observer,
        });

        write(&self.channels[kind.index()]).insert(id, subscriber);
        metrics::gauge!(ACTIVE_SUBSCRIPTIONS, "store" => self.store_key.to_string()).increment(1.0);
        tracing::debug!(store = %self.store_key, kind = %kind, id = id.0, "subscribed");

        let registry: Weak<dyn Unregister> = Arc::downgrade(self) as Weak<dyn Unregister>;
        Subscription {
            inner: Arc::new(SubscriptionInner {
                id,
                kind,
                store_key: Arc::clone(&self.store_key),
                gate,
                registry: Mutex::new(Some(registry)),
                detach: Mutex::new(None),
            }),
        }
    }

    pub(crate) fn len(&self, kind: SubscriptionKind) -> usize {
        read(&self.channels[kind.index()]).len()
    }

    /// Deliver one notification to every active subscriber of `kind`
    ///
    /// Returns the number of callbacks that ran. With panic isolation off, the
    /// first observer panic aborts the round and its payload is returned.
    pub(crate) fn notify(
        &self,
        kind: SubscriptionKind,
        state: &Arc<S>,
        event: &Arc<E>,
    ) -> Result<usize, Box<dyn Any + Send>> {
        let snapshot: Vec<Arc<Subscriber<S, E>>> =
            read(&self.channels[kind.index()]).values().cloned().collect();

        let mut delivered = 0;
        for subscriber in snapshot {
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                subscriber
                    .gate
                    .deliver(|| subscriber.observer.on_notify(state, event))
            }));

            match outcome {
                Ok(true) => delivered += 1,
                Ok(false) => {},
                Err(payload) => {
                    metrics::counter!(OBSERVER_PANICS_TOTAL, "store" => self.store_key.to_string())
                        .increment(1);
                    if !self.isolate_panics {
                        return Err(payload);
                    }
                    tracing::warn!(
                        store = %self.store_key,
                        kind = %kind,
                        "observer panicked; continuing with remaining observers"
                    );
                },
            }
        }

        tracing::trace!(store = %self.store_key, kind = %kind, delivered, "publish round complete");
        metrics::counter!(
            NOTIFICATIONS_TOTAL,
            "store" => self.store_key.to_string(),
            "kind" => kind.as_str()
        )
        .increment(delivered as u64);

        Ok(delivered)
    }
}

impl<S, E> Unregister for Registry<S, E>
where
    S: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    fn unregister(&self, kind: SubscriptionKind, id: SubscriptionId) {
        if write(&self.channels[kind.index()]).remove(&id).is_some() {
            metrics::gauge!(ACTIVE_SUBSCRIPTIONS, "store" => self.store_key.to_string()).decrement(1.0);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::lifecycle::{Lifecycle, ListenerId};
    use std::sync::atomic::AtomicUsize;

    fn registry() -> Arc<Registry<u32, &'static str>> {
        Arc::new(Registry::new(Arc::from("test.store"), true))
    }

    fn counting(counter: &Arc<AtomicUsize>) -> Box<dyn Observer<u32, &'static str>> {
        let counter = Arc::clone(counter);
        Box::new(move |_: &Arc<u32>, _: &Arc<&'static str>| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn publish(registry: &Registry<u32, &'static str>, kind: SubscriptionKind) -> usize {
        registry.notify(kind, &Arc::new(1), &Arc::new("event")).unwrap()
    }

    #[test]
    fn notifies_only_matching_kind() {
        let registry = registry();
        let calls = Arc::new(AtomicUsize::new(0));
        let _subscription = registry.insert(SubscriptionKind::FinishedEvents, counting(&calls));

        assert_eq!(publish(&registry, SubscriptionKind::State), 0);
        assert_eq!(publish(&registry, SubscriptionKind::FinishedEvents), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn pause_suppresses_until_resume() {
        let registry = registry();
        let calls = Arc::new(AtomicUsize::new(0));
        let subscription = registry.insert(SubscriptionKind::State, counting(&calls));

        subscription.pause();
        assert_eq!(subscription.status(), SubscriptionStatus::Paused);
        publish(&registry, SubscriptionKind::State);
        publish(&registry, SubscriptionKind::State);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        subscription.resume();
        publish(&registry, SubscriptionKind::State);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_is_terminal_and_idempotent() {
        let registry = registry();
        let calls = Arc::new(AtomicUsize::new(0));
        let subscription = registry.insert(SubscriptionKind::State, counting(&calls));

        subscription.unsubscribe();
        subscription.unsubscribe();
        subscription.resume();

        assert_eq!(subscription.status(), SubscriptionStatus::Unsubscribed);
        assert_eq!(registry.len(SubscriptionKind::State), 0);
        assert_eq!(publish(&registry, SubscriptionKind::State), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unsubscribe_inside_callback_does_not_deadlock() {
        let registry = registry();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let calls = Arc::new(AtomicUsize::new(0));

        let observer_slot = Arc::clone(&slot);
        let observer_calls = Arc::clone(&calls);
        let subscription = registry.insert(
            SubscriptionKind::State,
            Box::new(move |_: &Arc<u32>, _: &Arc<&'static str>| {
                observer_calls.fetch_add(1, Ordering::SeqCst);
                if let Some(subscription) = observer_slot.lock().unwrap().as_ref() {
                    subscription.unsubscribe();
                }
            }),
        );
        *slot.lock().unwrap() = Some(subscription.clone());

        publish(&registry, SubscriptionKind::State);
        publish(&registry, SubscriptionKind::State);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(subscription.status(), SubscriptionStatus::Unsubscribed);
    }

    #[test]
    fn unsubscribe_after_registry_dropped_is_noop() {
        let registry = registry();
        let subscription = registry.insert(SubscriptionKind::State, Box::new(|_: &Arc<u32>, _: &Arc<&'static str>| {}));
        drop(registry);

        subscription.unsubscribe();
        assert_eq!(subscription.status(), SubscriptionStatus::Unsubscribed);
    }

    #[test]
    fn isolated_panic_does_not_stop_the_round() {
        let registry = registry();
        let calls = Arc::new(AtomicUsize::new(0));
        let _bad = registry.insert(
            SubscriptionKind::State,
            Box::new(|_: &Arc<u32>, _: &Arc<&'static str>| panic!("observer failure")),
        );
        let _good = registry.insert(SubscriptionKind::State, counting(&calls));

        assert_eq!(publish(&registry, SubscriptionKind::State), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unisolated_panic_is_returned() {
        let registry: Arc<Registry<u32, &'static str>> = Arc::new(Registry::new(Arc::from("strict"), false));
        let _bad = registry.insert(
            SubscriptionKind::State,
            Box::new(|_: &Arc<u32>, _: &Arc<&'static str>| panic!("observer failure")),
        );

        let outcome = registry.notify(SubscriptionKind::State, &Arc::new(1), &Arc::new("event"));
        assert!(outcome.is_err());
    }

    #[test]
    fn lifecycle_drives_subscription() {
        let registry = registry();
        let calls = Arc::new(AtomicUsize::new(0));
        let subscription = registry.insert(SubscriptionKind::State, counting(&calls));
        let lifecycle = Arc::new(Lifecycle::new());
        subscription.bind(&lifecycle);

        lifecycle.start();
        publish(&registry, SubscriptionKind::State);
        lifecycle.stop();
        publish(&registry, SubscriptionKind::State);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        lifecycle.start();
        publish(&registry, SubscriptionKind::State);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        lifecycle.destroy();
        assert_eq!(subscription.status(), SubscriptionStatus::Unsubscribed);
        assert_eq!(registry.len(SubscriptionKind::State), 0);
        assert_eq!(lifecycle.listener_count(), 0);
    }

    #[test]
    fn binding_to_destroyed_lifecycle_unsubscribes() {
        let registry = registry();
        let subscription = registry.insert(SubscriptionKind::State, Box::new(|_: &Arc<u32>, _: &Arc<&'static str>| {}));
        let lifecycle = Arc::new(Lifecycle::new());
        lifecycle.destroy();

        subscription.bind(&lifecycle);

        assert_eq!(subscription.status(), SubscriptionStatus::Unsubscribed);
        assert_eq!(lifecycle.listener_count(), 0);
    }

    #[test]
    fn unsubscribe_detaches_lifecycle_listener() {
        let registry = registry();
        let subscription = registry.insert(SubscriptionKind::State, Box::new(|_: &Arc<u32>, _: &Arc<&'static str>| {}));
        let lifecycle = Arc::new(Lifecycle::new());
        subscription.bind(&lifecycle);
        assert_eq!(lifecycle.listener_count(), 1);

        subscription.unsubscribe();

        assert_eq!(lifecycle.listener_count(), 0);
    }

    /// Destroys itself just before accepting a listener
    struct DestroyedWhileRegistering(Lifecycle);

    impl LifecycleSource for DestroyedWhileRegistering {
        fn current(&self) -> LifecyclePhase {
            self.0.current()
        }

        fn add_listener(&self, listener: Arc<dyn LifecycleListener>) -> ListenerId {
            self.0.destroy();
            self.0.add_listener(listener)
        }

        fn remove_listener(&self, id: ListenerId) -> bool {
            self.0.remove_listener(id)
        }
    }

    #[test]
    fn destroy_during_bind_unsubscribes() {
        let registry = registry();
        let calls = Arc::new(AtomicUsize::new(0));
        let subscription = registry.insert(SubscriptionKind::State, counting(&calls));
        let source = Arc::new(DestroyedWhileRegistering(Lifecycle::new()));

        subscription.bind(&source);

        assert_eq!(subscription.status(), SubscriptionStatus::Unsubscribed);
        assert_eq!(registry.len(SubscriptionKind::State), 0);
        assert_eq!(publish(&registry, SubscriptionKind::State), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
