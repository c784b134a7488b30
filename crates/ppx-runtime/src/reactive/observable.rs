#![forbid(unsafe_code)]

//! Versioned shared cell with change notification.
//!
//! [`Observable<T>`] is the atom of the overlay store: every piece of state
//! lives in one, and every derived read is a [`Computed`](super::Computed)
//! over them.
//!
//! # Invariants
//!
//! 1. `version` increases by exactly 1 per value-changing write.
//! 2. Writing a value equal to the current one is a no-op (no version bump,
//!    no notification).
//! 3. Subscribers run in registration order.
//! 4. Inside a [`BatchScope`](super::BatchScope), values update immediately
//!    and notifications are deferred, one per subscriber.
//!
//! # Failure Modes
//!
//! - A subscriber that drops its [`Subscription`] stops receiving calls; the
//!   dead entry is pruned at the next notification.
//! - Writing from inside a subscriber is allowed; no borrow is held while
//!   callbacks run.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use tracing::info_span;

use super::batch;

type Callback<T> = Rc<dyn Fn(&T)>;
type WeakCallback<T> = Weak<dyn Fn(&T)>;

struct Slot<T> {
    value: T,
    version: u64,
    subscribers: Vec<WeakCallback<T>>,
}

/// Shared, version-tracked value. Clones are handles to the same cell.
pub struct Observable<T> {
    cell: Rc<RefCell<Slot<T>>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Rc::clone(&self.cell),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cell = self.cell.borrow();
        f.debug_struct("Observable")
            .field("value", &cell.value)
            .field("version", &cell.version)
            .finish()
    }
}

impl<T: Clone + PartialEq + 'static> Observable<T> {
    #[must_use]
    pub fn new(value: T) -> Self {
        Self {
            cell: Rc::new(RefCell::new(Slot {
                value,
                version: 0,
                subscribers: Vec::new(),
            })),
        }
    }

    /// Clone of the current value.
    #[must_use]
    pub fn get(&self) -> T {
        self.cell.borrow().value.clone()
    }

    /// Borrow the current value for the duration of `f`.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.cell.borrow().value)
    }

    /// Replace the value. Returns `true` if it changed.
    pub fn set(&self, value: T) -> bool {
        {
            let mut cell = self.cell.borrow_mut();
            if cell.value == value {
                return false;
            }
            cell.value = value;
            cell.version += 1;
        }
        self.notify();
        true
    }

    /// Mutate in place. Returns `true` if the value changed.
    ///
    /// `f` works on a copy, so an edit that leaves the value equal is not
    /// observable and costs one clone.
    pub fn update(&self, f: impl FnOnce(&mut T)) -> bool {
        let mut next = self.get();
        f(&mut next);
        self.set(next)
    }

    /// Register `callback`; it runs with the new value after each change
    /// until the returned guard is dropped.
    pub fn subscribe(&self, callback: impl Fn(&T) + 'static) -> Subscription {
        let strong: Callback<T> = Rc::new(callback);
        self.cell
            .borrow_mut()
            .subscribers
            .push(Rc::downgrade(&strong));
        Subscription {
            _guard: Box::new(strong),
        }
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.cell.borrow().version
    }

    /// Registered subscribers, including dropped ones not yet pruned.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.cell.borrow().subscribers.len()
    }

    fn notify(&self) {
        let live: Vec<Callback<T>> = {
            let mut cell = self.cell.borrow_mut();
            cell.subscribers.retain(|w| w.strong_count() > 0);
            cell.subscribers.iter().filter_map(Weak::upgrade).collect()
        };
        if live.is_empty() {
            return;
        }

        if batch::is_batching() {
            for callback in live {
                let key = Rc::as_ptr(&callback) as *const () as usize;
                let source = self.clone();
                batch::defer_keyed(key, move || {
                    let latest = source.get();
                    callback(&latest);
                });
            }
            return;
        }

        let value = self.get();
        let _span = info_span!("ppx.propagate", subscribers = live.len()).entered();
        for callback in &live {
            callback(&value);
        }
    }
}

/// RAII guard for a subscriber callback. Dropping it unsubscribes.
#[must_use = "dropping the subscription unsubscribes immediately"]
pub struct Subscription {
    _guard: Box<dyn std::any::Any>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn set_bumps_version_once_per_change() {
        let obs = Observable::new(1);
        assert!(obs.set(2));
        assert!(!obs.set(2));
        assert_eq!(obs.version(), 1);
        assert_eq!(obs.get(), 2);
    }

    #[test]
    fn update_without_change_is_silent() {
        let obs = Observable::new(vec![1, 2]);
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        let _sub = obs.subscribe(move |_| h.set(h.get() + 1));
        assert!(!obs.update(|v| v.sort()));
        assert!(obs.update(|v| v.push(3)));
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn subscribers_see_new_value_in_order() {
        let obs = Observable::new(0);
        let log = Rc::new(RefCell::new(Vec::new()));
        let a = Rc::clone(&log);
        let b = Rc::clone(&log);
        let _s1 = obs.subscribe(move |v| a.borrow_mut().push(("a", *v)));
        let _s2 = obs.subscribe(move |v| b.borrow_mut().push(("b", *v)));
        obs.set(7);
        assert_eq!(*log.borrow(), vec![("a", 7), ("b", 7)]);
    }

    #[test]
    fn dropped_subscription_is_pruned() {
        let obs = Observable::new(0);
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        let sub = obs.subscribe(move |_| h.set(h.get() + 1));
        obs.set(1);
        drop(sub);
        obs.set(2);
        assert_eq!(hits.get(), 1);
        assert_eq!(obs.subscriber_count(), 0);
    }

    #[test]
    fn reentrant_write_from_subscriber() {
        let source = Observable::new(0);
        let mirror = Observable::new(0);
        let m = mirror.clone();
        let _sub = source.subscribe(move |v| {
            m.set(*v * 10);
        });
        source.set(4);
        assert_eq!(mirror.get(), 40);
    }

    #[test]
    fn clones_share_state() {
        let a = Observable::new(String::from("x"));
        let b = a.clone();
        b.set("y".into());
        assert_eq!(a.get(), "y");
        assert_eq!(a.version(), b.version());
    }
}
