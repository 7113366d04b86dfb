//! Synchronous event dispatch with RAII unsubscription.
//!
//! [`Dispatcher<E>`] keeps its subscribers as `Weak` callbacks; the strong
//! handle lives inside the [`Subscription`] returned to the caller, so
//! dropping the subscription is the unsubscribe. Dead callbacks are cleaned
//! up lazily during notification.
//!
//! # Invariants
//!
//! 1. Subscribers are notified in registration order.
//! 2. Notification clones the live callback handles out of the interior
//!    borrow before invoking any of them, so a callback may subscribe,
//!    notify, or drop subscriptions on the same dispatcher without a
//!    `RefCell` double-borrow.
//! 3. Dropping a [`Subscription`] removes the callback before the next
//!    notification cycle.

use std::any::Any;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// RAII guard for a registered callback. Dropping it unsubscribes.
///
/// The guard is type-erased so heterogeneous subscriptions can be held in
/// one collection (a binding's teardown set).
pub struct Subscription {
    _keep: Rc<dyn Any>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish()
    }
}

/// Single-threaded event dispatcher.
pub struct Dispatcher<E> {
    subscribers: RefCell<Vec<Weak<Box<dyn Fn(&E)>>>>,
}

impl<E: 'static> Default for Dispatcher<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for Dispatcher<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("subscribers", &self.subscribers.borrow().len())
            .finish()
    }
}

impl<E: 'static> Dispatcher<E> {
    /// Create a dispatcher with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscribers: RefCell::new(Vec::new()),
        }
    }

    /// Register `callback` and return the guard that keeps it alive.
    #[must_use]
    pub fn subscribe(&self, callback: impl Fn(&E) + 'static) -> Subscription {
        let strong: Rc<Box<dyn Fn(&E)>> = Rc::new(Box::new(callback));
        self.subscribers.borrow_mut().push(Rc::downgrade(&strong));
        Subscription { _keep: strong }
    }

    /// Invoke every live subscriber with `event`, in registration order.
    ///
    /// Dead entries (dropped subscriptions) are pruned before dispatch.
    pub fn notify(&self, event: &E) {
        let live: Vec<Rc<Box<dyn Fn(&E)>>> = {
            let mut subs = self.subscribers.borrow_mut();
            subs.retain(|weak| weak.strong_count() > 0);
            subs.iter().filter_map(Weak::upgrade).collect()
        };
        for callback in live {
            callback(event);
        }
    }

    /// Number of currently live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .borrow()
            .iter()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn notifies_in_registration_order() {
        let dispatcher = Dispatcher::<u32>::new();
        let order = Rc::new(RefCell::new(Vec::new()));

        let o1 = Rc::clone(&order);
        let _s1 = dispatcher.subscribe(move |v| o1.borrow_mut().push(("first", *v)));
        let o2 = Rc::clone(&order);
        let _s2 = dispatcher.subscribe(move |v| o2.borrow_mut().push(("second", *v)));

        dispatcher.notify(&7);
        assert_eq!(&*order.borrow(), &[("first", 7), ("second", 7)]);
    }

    #[test]
    fn drop_unsubscribes() {
        let dispatcher = Dispatcher::<()>::new();
        let hits = Rc::new(Cell::new(0));

        let h = Rc::clone(&hits);
        let sub = dispatcher.subscribe(move |()| h.set(h.get() + 1));
        dispatcher.notify(&());
        assert_eq!(hits.get(), 1);

        drop(sub);
        dispatcher.notify(&());
        assert_eq!(hits.get(), 1, "callback must not fire after drop");
    }

    #[test]
    fn subscriber_count_tracks_live() {
        let dispatcher = Dispatcher::<()>::new();
        let s1 = dispatcher.subscribe(|()| {});
        let _s2 = dispatcher.subscribe(|()| {});
        assert_eq!(dispatcher.subscriber_count(), 2);
        drop(s1);
        assert_eq!(dispatcher.subscriber_count(), 1);
    }

    #[test]
    fn callback_may_subscribe_reentrantly() {
        let dispatcher = Rc::new(Dispatcher::<()>::new());
        let held = Rc::new(RefCell::new(Vec::new()));

        let d = Rc::clone(&dispatcher);
        let h = Rc::clone(&held);
        let _s = dispatcher.subscribe(move |()| {
            h.borrow_mut().push(d.subscribe(|()| {}));
        });

        dispatcher.notify(&());
        assert_eq!(dispatcher.subscriber_count(), 2);
    }

    #[test]
    fn callback_dropping_own_subscription_still_fires_once() {
        let dispatcher = Rc::new(Dispatcher::<()>::new());
        let hits = Rc::new(Cell::new(0));
        let slot: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));

        let h = Rc::clone(&hits);
        let s = Rc::clone(&slot);
        let sub = dispatcher.subscribe(move |()| {
            h.set(h.get() + 1);
            s.borrow_mut().take();
        });
        *slot.borrow_mut() = Some(sub);

        dispatcher.notify(&());
        assert_eq!(hits.get(), 1);
        dispatcher.notify(&());
        assert_eq!(hits.get(), 1, "self-removed callback must not fire again");
    }
}
