//! Observers that record notifications
//!
//! [`RecordingObserver`] keeps every `(state, event)` pair it is notified
//! with. Clones share the same recording, so one clone can be registered with
//! a store while the test keeps another to inspect.

use flowstore_runtime::Observer;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;

type Call<S, E> = (Arc<S>, Arc<E>);

struct Recording<S, E> {
    calls: Mutex<Vec<Call<S, E>>>,
    count: watch::Sender<usize>,
}

/// Observer that records every notification it receives
pub struct RecordingObserver<S, E> {
    inner: Arc<Recording<S, E>>,
}

impl<S, E> RecordingObserver<S, E> {
    /// Create an empty recording
    #[must_use]
    pub fn new() -> Self {
        let (count, _) = watch::channel(0);
        Self {
            inner: Arc::new(Recording {
                calls: Mutex::new(Vec::new()),
                count,
            }),
        }
    }

    fn calls_guard(&self) -> MutexGuard<'_, Vec<Call<S, E>>> {
        self.inner.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every recorded `(state, event)` pair, oldest first
    #[must_use]
    pub fn calls(&self) -> Vec<(Arc<S>, Arc<E>)> {
        self.calls_guard().clone()
    }

    /// Recorded states, oldest first
    #[must_use]
    pub fn states(&self) -> Vec<Arc<S>> {
        self.calls_guard().iter().map(|(state, _)| Arc::clone(state)).collect()
    }

    /// Recorded events, oldest first
    #[must_use]
    pub fn events(&self) -> Vec<Arc<E>> {
        self.calls_guard().iter().map(|(_, event)| Arc::clone(event)).collect()
    }

    /// Number of notifications so far
    #[must_use]
    pub fn len(&self) -> usize {
        self.calls_guard().len()
    }

    /// Whether nothing was recorded yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.calls_guard().is_empty()
    }

    /// Most recently recorded state
    #[must_use]
    pub fn last_state(&self) -> Option<Arc<S>> {
        self.calls_guard().last().map(|(state, _)| Arc::clone(state))
    }

    /// Most recently recorded event
    #[must_use]
    pub fn last_event(&self) -> Option<Arc<E>> {
        self.calls_guard().last().map(|(_, event)| Arc::clone(event))
    }

    /// Forget everything recorded so far
    pub fn clear(&self) {
        self.calls_guard().clear();
        self.inner.count.send_replace(0);
    }

    /// Wait until at least `count` notifications were recorded
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let mut receiver = self.inner.count.subscribe();
        tokio::time::timeout(timeout, receiver.wait_for(|recorded| *recorded >= count))
            .await
            .is_ok_and(|result| result.is_ok())
    }
}

impl<S, E> Default for RecordingObserver<S, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S, E> Clone for RecordingObserver<S, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S, E> std::fmt::Debug for RecordingObserver<S, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingObserver")
            .field("len", &self.len())
            .finish()
    }
}

impl<S, E> Observer<S, E> for RecordingObserver<S, E>
where
    S: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    fn on_notify(&self, state: &Arc<S>, event: &Arc<E>) {
        let len = {
            let mut calls = self.calls_guard();
            calls.push((Arc::clone(state), Arc::clone(event)));
            calls.len()
        };
        self.inner.count.send_replace(len);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use flowstore_core::event::Event;
    use flowstore_core::state::State;
    use flowstore_core::TransformError;
    use flowstore_runtime::{Store, SubscriptionKind};

    #[derive(Clone, Debug, PartialEq)]
    struct Note(&'static str);
    impl Event for Note {}

    #[derive(Debug, Default)]
    struct Notes(Vec<&'static str>);
    impl State for Notes {}

    fn append(state: &Notes, event: &Note) -> Result<Notes, TransformError> {
        let mut notes = state.0.clone();
        notes.push(event.0);
        Ok(Notes(notes))
    }

    #[test]
    fn records_direct_notifications() {
        let recorder = RecordingObserver::<u8, &'static str>::new();

        recorder.on_notify(&Arc::new(1), &Arc::new("one"));
        recorder.on_notify(&Arc::new(2), &Arc::new("two"));

        assert_eq!(recorder.len(), 2);
        assert_eq!(recorder.last_state().as_deref(), Some(&2));
        assert_eq!(recorder.events().iter().map(|e| **e).collect::<Vec<_>>(), vec!["one", "two"]);

        recorder.clear();
        assert!(recorder.is_empty());
        assert_eq!(recorder.last_event(), None);
    }

    #[tokio::test]
    async fn waits_for_store_notifications() {
        let store = Store::new(Notes::default(), append).unwrap();
        let recorder = RecordingObserver::new();
        let _subscription = store.observe(SubscriptionKind::FinishedEvents, recorder.clone());

        let _first = store.dispatch(Note("a")).unwrap();
        let _second = store.dispatch(Note("b")).unwrap();

        assert!(recorder.wait_for(2, Duration::from_secs(5)).await);
        assert_eq!(recorder.last_state().unwrap().0, vec!["a", "b"]);
        assert_eq!(recorder.last_event(), Some(Arc::new(Note("b"))));
    }

    #[tokio::test]
    async fn wait_times_out_without_notifications() {
        let recorder = RecordingObserver::<Notes, Note>::new();

        assert!(!recorder.wait_for(1, Duration::from_millis(20)).await);
    }
}
