//! Conflated (drop-latest) receivers.
//!
//! A [`Conflated`] receiver is a single overwritable slot plus a wake-up
//! signal. The store's worker overwrites the slot on every publish and never
//! waits for the reader; a reader that falls behind skips straight to the
//! newest value.

use crate::subscription::{Subscription, SubscriptionStatus};
use futures::Stream;
use tokio::sync::watch;

/// Receiver that keeps only the most recent unread value
///
/// Created by [`crate::Store::subscribe_state`] and
/// [`crate::Store::subscribe_events`]. Starts empty: values published before
/// the receiver existed are not delivered. Dropping the receiver unsubscribes
/// it from the store.
///
/// # Example
///
/// ```no_run
/// # use flowstore_core::{event::Event, state::State, TransformError};
/// # use flowstore_runtime::Store;
/// # #[derive(Clone, Debug)] struct Tick;
/// # impl Event for Tick {}
/// # #[derive(Debug, Default)] struct Ticks(u64);
/// # impl State for Ticks {}
/// # async fn example() -> Result<(), flowstore_runtime::StoreError> {
/// # let store = Store::new(Ticks::default(), |s: &Ticks, _: &Tick| -> Result<Ticks, TransformError> { Ok(Ticks(s.0 + 1)) })?;
/// let mut states = store.subscribe_state();
///
/// store.dispatch(Tick)?;
/// store.dispatch(Tick)?.wait().await?;
///
/// // Both dispatches completed before the read: only the latest survives
/// let latest = states.recv().await;
/// assert_eq!(latest.map(|s| s.0), Some(2));
/// # Ok(())
/// # }
/// ```
pub struct Conflated<T> {
    receiver: watch::Receiver<Option<T>>,
    subscription: Subscription,
}

impl<T> Conflated<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(crate) const fn new(receiver: watch::Receiver<Option<T>>, subscription: Subscription) -> Self {
        Self { receiver, subscription }
    }

    /// Wait for a value newer than the last one read
    ///
    /// Returns `None` once the subscription is gone (unsubscribed, or the
    /// store dropped) and no unread value remains.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            self.receiver.changed().await.ok()?;
            if let Some(value) = self.receiver.borrow_and_update().clone() {
                return Some(value);
            }
        }
    }

    /// Take the unread value, if any, without waiting
    pub fn try_recv(&mut self) -> Option<T> {
        let slot = self.receiver.borrow_and_update();
        if slot.has_changed() { slot.clone() } else { None }
    }

    /// Most recent value, read or not
    #[must_use]
    pub fn latest(&self) -> Option<T> {
        self.receiver.borrow().clone()
    }

    /// Consume the receiver as a stream of values
    pub fn into_stream(self) -> impl Stream<Item = T> + Send {
        futures::stream::unfold(self, |mut receiver| async move {
            receiver.recv().await.map(|value| (value, receiver))
        })
    }

    /// Call `f` for every value until the subscription ends
    pub async fn for_each(mut self, mut f: impl FnMut(T)) {
        while let Some(value) = self.recv().await {
            f(value);
        }
    }

    /// Stop receiving values until [`Conflated::resume`]
    pub fn pause(&self) {
        self.subscription.pause();
    }

    /// Resume receiving values
    pub fn resume(&self) {
        self.subscription.resume();
    }

    /// Status of the underlying subscription
    #[must_use]
    pub fn status(&self) -> SubscriptionStatus {
        self.subscription.status()
    }

    /// The underlying subscription, e.g. for lifecycle binding
    #[must_use]
    pub const fn subscription(&self) -> &Subscription {
        &self.subscription
    }
}

impl<T> Drop for Conflated<T> {
    fn drop(&mut self) {
        self.subscription.unsubscribe();
    }
}

impl<T> std::fmt::Debug for Conflated<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conflated")
            .field("subscription", &self.subscription)
            .finish_non_exhaustive()
    }
}
