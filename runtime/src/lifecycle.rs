//! Lifecycle signal sources and bindings.
//!
//! A [`LifecycleSource`] emits start, stop and destroy signals. The runtime
//! depends on that interface only: a UI toolkit, a connection or a request
//! scope can adapt its own lifecycle to it. [`Lifecycle`] is the in-process
//! implementation used by applications and tests.
//!
//! Two things can be bound to a source:
//! - a [`crate::Subscription`], through [`crate::Subscription::bind`]
//! - any [`LifecycleAware`] value, through [`FeatureBinding`]

use crate::sync::lock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Signal emitted by a [`LifecycleSource`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleSignal {
    /// The scope became active
    Start,
    /// The scope became inactive but may start again
    Stop,
    /// The scope ended for good
    Destroy,
}

/// Current phase of a [`LifecycleSource`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    /// Created, never started
    Initialized,
    /// Between a start and the next stop
    Started,
    /// Stopped, may start again
    Stopped,
    /// Terminal
    Destroyed,
}

/// Handle identifying one listener registration on a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Receiver of lifecycle signals
pub trait LifecycleListener: Send + Sync {
    /// Handle one signal
    fn on_signal(&self, signal: LifecycleSignal);
}

impl<F> LifecycleListener for F
where
    F: Fn(LifecycleSignal) + Send + Sync,
{
    fn on_signal(&self, signal: LifecycleSignal) {
        self(signal);
    }
}

/// Abstract start/stop/destroy signal source
///
/// Implementations must not hold internal locks while calling listeners:
/// listeners are allowed to remove themselves from inside `on_signal`.
pub trait LifecycleSource: Send + Sync {
    /// Current phase
    fn current(&self) -> LifecyclePhase;

    /// Register a listener for future signals
    fn add_listener(&self, listener: Arc<dyn LifecycleListener>) -> ListenerId;

    /// Remove a listener; returns `false` if it was not registered
    fn remove_listener(&self, id: ListenerId) -> bool;
}

/// In-process lifecycle signal source
///
/// # Example
///
/// ```
/// use flowstore_runtime::lifecycle::{Lifecycle, LifecyclePhase, LifecycleSignal, LifecycleSource};
/// use std::sync::{Arc, Mutex};
///
/// let lifecycle = Lifecycle::new();
/// let seen = Arc::new(Mutex::new(Vec::new()));
/// let sink = Arc::clone(&seen);
/// lifecycle.add_listener(Arc::new(move |signal: LifecycleSignal| sink.lock().unwrap().push(signal)));
///
/// lifecycle.start();
/// lifecycle.destroy();
///
/// assert_eq!(lifecycle.current(), LifecyclePhase::Destroyed);
/// assert_eq!(*seen.lock().unwrap(), vec![LifecycleSignal::Start, LifecycleSignal::Destroy]);
/// ```
pub struct Lifecycle {
    inner: Mutex<LifecycleInner>,
}

struct LifecycleInner {
    phase: LifecyclePhase,
    next_id: u64,
    listeners: Vec<(ListenerId, Arc<dyn LifecycleListener>)>,
}

impl Lifecycle {
    /// Create a lifecycle in [`LifecyclePhase::Initialized`]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(LifecycleInner {
                phase: LifecyclePhase::Initialized,
                next_id: 0,
                listeners: Vec::new(),
            }),
        }
    }

    /// Move to [`LifecyclePhase::Started`] and emit [`LifecycleSignal::Start`]
    ///
    /// No effect when already started or destroyed.
    pub fn start(&self) {
        self.transition(LifecycleSignal::Start, |phase| {
            matches!(phase, LifecyclePhase::Initialized | LifecyclePhase::Stopped)
                .then_some(LifecyclePhase::Started)
        });
    }

    /// Move to [`LifecyclePhase::Stopped`] and emit [`LifecycleSignal::Stop`]
    ///
    /// Only a started lifecycle can stop.
    pub fn stop(&self) {
        self.transition(LifecycleSignal::Stop, |phase| {
            (phase == LifecyclePhase::Started).then_some(LifecyclePhase::Stopped)
        });
    }

    /// Move to [`LifecyclePhase::Destroyed`], emit [`LifecycleSignal::Destroy`]
    /// and drop every listener
    pub fn destroy(&self) {
        self.transition(LifecycleSignal::Destroy, |phase| {
            (phase != LifecyclePhase::Destroyed).then_some(LifecyclePhase::Destroyed)
        });
    }

    /// Number of registered listeners
    #[must_use]
    pub fn listener_count(&self) -> usize {
        lock(&self.inner).listeners.len()
    }

    fn transition(&self, signal: LifecycleSignal, next: impl FnOnce(LifecyclePhase) -> Option<LifecyclePhase>) {
        let listeners: Vec<Arc<dyn LifecycleListener>> = {
            let mut inner = lock(&self.inner);
            let Some(phase) = next(inner.phase) else {
                return;
            };
            inner.phase = phase;

            if phase == LifecyclePhase::Destroyed {
                std::mem::take(&mut inner.listeners)
                    .into_iter()
                    .map(|(_, listener)| listener)
                    .collect()
            } else {
                inner.listeners.iter().map(|(_, listener)| Arc::clone(listener)).collect()
            }
        };

        tracing::trace!(?signal, listeners = listeners.len(), "lifecycle signal");
        for listener in listeners {
            listener.on_signal(signal);
        }
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = lock(&self.inner);
        f.debug_struct("Lifecycle")
            .field("phase", &inner.phase)
            .field("listeners", &inner.listeners.len())
            .finish()
    }
}

impl LifecycleSource for Lifecycle {
    fn current(&self) -> LifecyclePhase {
        lock(&self.inner).phase
    }

    fn add_listener(&self, listener: Arc<dyn LifecycleListener>) -> ListenerId {
        let mut inner = lock(&self.inner);
        let id = ListenerId(inner.next_id);
        inner.next_id += 1;
        if inner.phase != LifecyclePhase::Destroyed {
            inner.listeners.push((id, listener));
        }
        id
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        let mut inner = lock(&self.inner);
        let before = inner.listeners.len();
        inner.listeners.retain(|(existing, _)| *existing != id);
        inner.listeners.len() != before
    }
}

/// Something that runs only while a lifecycle is started
///
/// Typically a feature that loads data on start and releases resources on
/// stop.
pub trait LifecycleAware: Send + Sync {
    /// The bound lifecycle started
    fn start(&self);

    /// The bound lifecycle stopped, or was destroyed while started
    fn stop(&self);
}

/// Binding of one [`LifecycleAware`] value to a [`LifecycleSource`]
///
/// Start calls `start` and stop calls `stop`. Destroy and [`clear`] call
/// `stop` if the value is started, then detach from the source and release
/// the value; `get` returns `None` afterwards.
///
/// [`clear`]: FeatureBinding::clear
pub struct FeatureBinding<F> {
    inner: Arc<BindingInner<F>>,
}

struct BindingInner<F> {
    feature: Mutex<Option<Arc<F>>>,
    started: AtomicBool,
    detach: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl<F> FeatureBinding<F>
where
    F: LifecycleAware + 'static,
{
    /// Bind `feature` to `source`
    ///
    /// If the source is already started, `start` is called immediately. If it
    /// is already destroyed, the binding is empty from the outset.
    pub fn bind<L>(feature: Arc<F>, source: &Arc<L>) -> Self
    where
        L: LifecycleSource + 'static,
    {
        let inner = Arc::new(BindingInner {
            feature: Mutex::new(None),
            started: AtomicBool::new(false),
            detach: Mutex::new(None),
        });
        let binding = Self { inner };

        if source.current() == LifecyclePhase::Destroyed {
            return binding;
        }

        *lock(&binding.inner.feature) = Some(feature);
        let listener_id = source.add_listener(Arc::new(BindingListener(Arc::clone(&binding.inner))));
        let weak_source = Arc::downgrade(source);
        *lock(&binding.inner.detach) = Some(Box::new(move || {
            if let Some(source) = weak_source.upgrade() {
                source.remove_listener(listener_id);
            }
        }));

        // A signal emitted while the listener was being registered is missed
        match source.current() {
            LifecyclePhase::Destroyed => binding.inner.clear(),
            LifecyclePhase::Started => binding.inner.handle(LifecycleSignal::Start),
            LifecyclePhase::Initialized | LifecyclePhase::Stopped => {},
        }
        binding
    }

    /// The bound value, until destroyed or cleared
    #[must_use]
    pub fn get(&self) -> Option<Arc<F>> {
        lock(&self.inner.feature).clone()
    }

    /// `true` between a start and the next stop
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    /// Stop the value if started, detach from the source and release it
    pub fn clear(&self) {
        self.inner.clear();
    }
}

impl<F> std::fmt::Debug for FeatureBinding<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureBinding")
            .field("bound", &lock(&self.inner.feature).is_some())
            .field("started", &self.inner.started.load(Ordering::SeqCst))
            .finish()
    }
}

impl<F: LifecycleAware> BindingInner<F> {
    fn handle(&self, signal: LifecycleSignal) {
        let Some(feature) = lock(&self.feature).clone() else {
            return;
        };

        match signal {
            LifecycleSignal::Start => {
                if !self.started.swap(true, Ordering::SeqCst) {
                    feature.start();
                }
            },
            LifecycleSignal::Stop => {
                if self.started.swap(false, Ordering::SeqCst) {
                    feature.stop();
                }
            },
            LifecycleSignal::Destroy => self.clear(),
        }
    }

    fn clear(&self) {
        let feature = lock(&self.feature).take();
        if let Some(feature) = feature {
            if self.started.swap(false, Ordering::SeqCst) {
                feature.stop();
            }
        }

        let detach = lock(&self.detach).take();
        if let Some(detach) = detach {
            detach();
        }
    }
}

struct BindingListener<F>(Arc<BindingInner<F>>);

impl<F: LifecycleAware + 'static> LifecycleListener for BindingListener<F> {
    fn on_signal(&self, signal: LifecycleSignal) {
        self.0.handle(signal);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Tracked {
        calls: Mutex<Vec<&'static str>>,
    }

    impl LifecycleAware for Tracked {
        fn start(&self) {
            self.calls.lock().unwrap().push("start");
        }

        fn stop(&self) {
            self.calls.lock().unwrap().push("stop");
        }
    }

    #[test]
    fn phases_follow_valid_transitions() {
        let lifecycle = Lifecycle::new();
        lifecycle.stop();
        assert_eq!(lifecycle.current(), LifecyclePhase::Initialized);

        lifecycle.start();
        lifecycle.stop();
        assert_eq!(lifecycle.current(), LifecyclePhase::Stopped);

        lifecycle.destroy();
        lifecycle.start();
        assert_eq!(lifecycle.current(), LifecyclePhase::Destroyed);
    }

    #[test]
    fn destroy_releases_listeners() {
        let lifecycle = Lifecycle::new();
        lifecycle.add_listener(Arc::new(|_: LifecycleSignal| {}));
        assert_eq!(lifecycle.listener_count(), 1);

        lifecycle.destroy();
        assert_eq!(lifecycle.listener_count(), 0);

        lifecycle.add_listener(Arc::new(|_: LifecycleSignal| {}));
        assert_eq!(lifecycle.listener_count(), 0);
    }

    #[test]
    fn binding_follows_signals() {
        let lifecycle = Arc::new(Lifecycle::new());
        let tracked = Arc::new(Tracked::default());
        let binding = FeatureBinding::bind(Arc::clone(&tracked), &lifecycle);

        lifecycle.start();
        assert!(binding.is_started());
        lifecycle.stop();
        lifecycle.start();
        lifecycle.destroy();

        assert_eq!(*tracked.calls.lock().unwrap(), vec!["start", "stop", "start", "stop"]);
        assert!(binding.get().is_none());
        assert_eq!(lifecycle.listener_count(), 0);
    }

    #[test]
    fn destroy_after_stop_does_not_stop_twice() {
        let lifecycle = Arc::new(Lifecycle::new());
        let tracked = Arc::new(Tracked::default());
        let _binding = FeatureBinding::bind(Arc::clone(&tracked), &lifecycle);

        lifecycle.start();
        lifecycle.stop();
        lifecycle.destroy();

        assert_eq!(*tracked.calls.lock().unwrap(), vec!["start", "stop"]);
    }

    #[test]
    fn binding_to_started_source_starts_immediately() {
        let lifecycle = Arc::new(Lifecycle::new());
        lifecycle.start();
        let tracked = Arc::new(Tracked::default());

        let binding = FeatureBinding::bind(Arc::clone(&tracked), &lifecycle);

        assert!(binding.is_started());
        assert_eq!(*tracked.calls.lock().unwrap(), vec!["start"]);
    }

    #[test]
    fn clear_stops_and_detaches() {
        let lifecycle = Arc::new(Lifecycle::new());
        let tracked = Arc::new(Tracked::default());
        let binding = FeatureBinding::bind(Arc::clone(&tracked), &lifecycle);
        lifecycle.start();

        binding.clear();
        lifecycle.stop();
        lifecycle.start();

        assert!(binding.get().is_none());
        assert!(!binding.is_started());
        assert_eq!(lifecycle.listener_count(), 0);
        assert_eq!(*tracked.calls.lock().unwrap(), vec!["start", "stop"]);
    }

    #[test]
    fn binding_to_destroyed_source_is_empty() {
        let lifecycle = Arc::new(Lifecycle::new());
        lifecycle.destroy();

        let binding = FeatureBinding::bind(Arc::new(Tracked::default()), &lifecycle);

        assert!(binding.get().is_none());
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
    fn destroy_during_bind_releases_the_value() {
        let source = Arc::new(DestroyedWhileRegistering(Lifecycle::new()));
        source.0.start();
        let tracked = Arc::new(Tracked::default());

        let binding = FeatureBinding::bind(Arc::clone(&tracked), &source);

        assert!(binding.get().is_none());
        assert!(!binding.is_started());
        assert!(tracked.calls.lock().unwrap().is_empty());
    }
}
