//! Reactive state containers.
//!
//! A [`Store`] is the single place state lives for components, scenes,
//! matches and players. Mutations go through [`Store::set`], which notifies
//! every subscriber synchronously before returning. On the server the
//! replication bridge is just another subscriber, so client and server code
//! paths stay structurally identical: both react to store updates, only the
//! origin of the mutation differs.

use std::fmt;

/// Subscriber callback. Runs synchronously after every mutation.
pub type Subscriber<S> = Box<dyn FnMut(&S) + Send>;

/// Handle for removing a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

/// A minimal get/set/subscribe state container.
pub struct Store<S> {
    state: S,
    next_id: u64,
    subscribers: Vec<(SubscriptionId, Subscriber<S>)>,
}

impl<S: fmt::Debug> fmt::Debug for Store<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("state", &self.state)
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

impl<S> Store<S> {
    pub fn new(state: S) -> Self {
        Self {
            state,
            next_id: 0,
            subscribers: Vec::new(),
        }
    }

    /// Current state snapshot.
    pub fn get(&self) -> &S {
        &self.state
    }

    /// Mutates the state and notifies all subscribers in registration order.
    pub fn set(&mut self, f: impl FnOnce(&mut S)) {
        f(&mut self.state);
        for (_, subscriber) in self.subscribers.iter_mut() {
            subscriber(&self.state);
        }
    }

    /// Replaces the state wholesale and notifies subscribers. Used by the
    /// client when applying a server diff.
    pub fn replace(&mut self, state: S) {
        self.set(|s| *s = state);
    }

    pub fn subscribe(&mut self, subscriber: Subscriber<S>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.subscribers.push((id, subscriber));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) {
        self.subscribers.retain(|(sid, _)| *sid != id);
    }
}

impl<S: Clone> Store<S> {
    /// Cloned state snapshot, for callers that need to drop the borrow.
    pub fn cloned(&self) -> S {
        self.state.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn set_notifies_subscribers_in_order() {
        let mut store = Store::new(0u32);
        let seen = Arc::new(AtomicUsize::new(0));

        let seen1 = seen.clone();
        store.subscribe(Box::new(move |s| {
            assert_eq!(seen1.fetch_add(1, Ordering::SeqCst) % 2, 0);
            assert_eq!(*s, 7);
        }));
        let seen2 = seen.clone();
        store.subscribe(Box::new(move |_| {
            assert_eq!(seen2.fetch_add(1, Ordering::SeqCst) % 2, 1);
        }));

        store.set(|s| *s = 7);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unsubscribe_stops_notifications() {
        let mut store = Store::new(0u32);
        let seen = Arc::new(AtomicUsize::new(0));

        let seen1 = seen.clone();
        let id = store.subscribe(Box::new(move |_| {
            seen1.fetch_add(1, Ordering::SeqCst);
        }));

        store.set(|s| *s = 1);
        store.unsubscribe(id);
        store.set(|s| *s = 2);

        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
