#![forbid(unsafe_code)]

//! Notification batching for multi-atom actions.
//!
//! A store action usually touches several observables (closing the menu
//! hides the panel and clears the active image). Without batching, the
//! first write would notify subscribers while the others are still pending,
//! and a subscriber reading the store would see a half-applied action.
//! Inside a [`BatchScope`] values change immediately but notifications are
//! queued; the outermost scope runs them on drop, each subscriber once, with
//! the final value.
//!
//! # Invariants
//!
//! 1. Only the outermost scope flushes.
//! 2. A subscriber queued twice in one batch runs once, at its first
//!    queue position.
//! 3. Notifications raised while flushing run immediately (the batch is
//!    already closed).

use std::cell::RefCell;

use tracing::debug_span;

type Deferred = Box<dyn FnOnce()>;

struct Pending {
    key: Option<usize>,
    run: Deferred,
}

struct Batch {
    depth: u32,
    queue: Vec<Pending>,
}

thread_local! {
    static BATCH: RefCell<Option<Batch>> = const { RefCell::new(None) };
}

/// True while a batch scope is open on this thread.
pub fn is_batching() -> bool {
    BATCH.with(|b| b.borrow().is_some())
}

/// Queue `f` for the end of the current batch, or run it now.
///
/// Returns `true` if it was queued.
pub fn defer(f: impl FnOnce() + 'static) -> bool {
    enqueue(None, Box::new(f))
}

/// Like [`defer`], but a later call with the same `key` in the same batch
/// replaces the queued closure in place.
pub fn defer_keyed(key: usize, f: impl FnOnce() + 'static) -> bool {
    enqueue(Some(key), Box::new(f))
}

fn enqueue(key: Option<usize>, run: Deferred) -> bool {
    let leftover = BATCH.with(|b| {
        let mut guard = b.borrow_mut();
        let Some(batch) = guard.as_mut() else {
            return Some(run);
        };
        let existing = key.and_then(|k| batch.queue.iter().position(|p| p.key == Some(k)));
        match existing {
            Some(index) => batch.queue[index].run = run,
            None => batch.queue.push(Pending { key, run }),
        }
        None
    });
    match leftover {
        Some(run) => {
            run();
            false
        }
        None => true,
    }
}

/// RAII guard that opens a batch. Nested scopes join the outer batch.
pub struct BatchScope {
    root: bool,
}

impl BatchScope {
    #[must_use]
    pub fn new() -> Self {
        let root = BATCH.with(|b| {
            let mut guard = b.borrow_mut();
            match guard.as_mut() {
                Some(batch) => {
                    batch.depth += 1;
                    false
                }
                None => {
                    *guard = Some(Batch {
                        depth: 1,
                        queue: Vec::new(),
                    });
                    true
                }
            }
        });
        Self { root }
    }

    /// Notifications queued so far in the current batch.
    #[must_use]
    pub fn pending(&self) -> usize {
        BATCH.with(|b| b.borrow().as_ref().map_or(0, |batch| batch.queue.len()))
    }
}

impl Default for BatchScope {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for BatchScope {
    fn drop(&mut self) {
        let closed = BATCH.with(|b| {
            let mut guard = b.borrow_mut();
            let last = match guard.as_mut() {
                Some(batch) => {
                    batch.depth = batch.depth.saturating_sub(1);
                    batch.depth == 0
                }
                None => false,
            };
            if last { guard.take() } else { None }
        });

        let Some(batch) = closed else {
            return;
        };
        if batch.queue.is_empty() {
            return;
        }
        let _span = debug_span!("ppx.batch_flush", notifications = batch.queue.len()).entered();
        for pending in batch.queue {
            (pending.run)();
        }
    }
}

impl std::fmt::Debug for BatchScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchScope")
            .field("root", &self.root)
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Observable;
    use std::cell::Cell;
    use std::rc::Rc;

    fn counter() -> (Rc<Cell<u32>>, impl Fn(&i32) + 'static) {
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        (hits, move |_: &i32| h.set(h.get() + 1))
    }

    #[test]
    fn batch_runs_each_subscriber_once_with_final_value() {
        let obs = Observable::new(0);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        let _sub = obs.subscribe(move |v| s.borrow_mut().push(*v));
        {
            let _batch = BatchScope::new();
            obs.set(1);
            obs.set(2);
            obs.set(3);
            assert!(seen.borrow().is_empty());
            assert_eq!(obs.get(), 3);
        }
        assert_eq!(*seen.borrow(), vec![3]);
    }

    #[test]
    fn nested_scope_defers_to_outer() {
        let obs = Observable::new(0);
        let (hits, cb) = counter();
        let _sub = obs.subscribe(cb);
        {
            let _outer = BatchScope::new();
            {
                let _inner = BatchScope::new();
                obs.set(1);
            }
            assert_eq!(hits.get(), 0);
            assert!(is_batching());
        }
        assert_eq!(hits.get(), 1);
        assert!(!is_batching());
    }

    #[test]
    fn multiple_observables_flush_in_first_write_order() {
        let a = Observable::new(0);
        let b = Observable::new(0);
        let order = Rc::new(RefCell::new(Vec::new()));
        let oa = Rc::clone(&order);
        let ob = Rc::clone(&order);
        let _sa = a.subscribe(move |_| oa.borrow_mut().push("a"));
        let _sb = b.subscribe(move |_| ob.borrow_mut().push("b"));
        {
            let _batch = BatchScope::new();
            b.set(1);
            a.set(1);
            b.set(2);
        }
        assert_eq!(*order.borrow(), vec!["b", "a"]);
    }

    #[test]
    fn writes_during_flush_notify_immediately() {
        let source = Observable::new(0);
        let mirror = Observable::new(0);
        let (hits, cb) = counter();
        let _m = mirror.subscribe(cb);
        let m = mirror.clone();
        let _s = source.subscribe(move |v| {
            m.set(*v);
        });
        {
            let _batch = BatchScope::new();
            source.set(5);
        }
        assert_eq!(mirror.get(), 5);
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn defer_without_batch_runs_now() {
        let ran = Rc::new(Cell::new(false));
        let r = Rc::clone(&ran);
        assert!(!defer(move || r.set(true)));
        assert!(ran.get());
    }

    #[test]
    fn keyed_defer_keeps_latest_closure() {
        let log = Rc::new(RefCell::new(Vec::new()));
        {
            let batch = BatchScope::new();
            let l1 = Rc::clone(&log);
            let l2 = Rc::clone(&log);
            assert!(defer_keyed(7, move || l1.borrow_mut().push(1)));
            assert!(defer_keyed(7, move || l2.borrow_mut().push(2)));
            assert_eq!(batch.pending(), 1);
        }
        assert_eq!(*log.borrow(), vec![2]);
    }
}
