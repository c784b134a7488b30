#![forbid(unsafe_code)]

//! Derived values over observables.
//!
//! A [`Computed<T>`] caches the result of a pure function of other sources.
//! It is refreshed two ways:
//!
//! - lazily on every read, by comparing the recorded versions of its
//!   sources with their current versions; and
//! - eagerly when a source notifies, so subscribers of the computed value
//!   hear about changes without polling.
//!
//! The lazy path is what makes reads inside a [`BatchScope`](super::BatchScope)
//! consistent: notifications are still queued, but versions have moved, so
//! a read recomputes from the committed state.
//!
//! # Invariants
//!
//! 1. `get()` always equals `compute()` evaluated on the current sources.
//! 2. The cached value's version only moves when the derived value changes,
//!    so chained computeds skip work when an upstream change is irrelevant.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use super::observable::{Observable, Subscription};

/// Anything a [`Computed`] can depend on.
pub trait Source {
    /// Version that moves whenever the source's value changes.
    fn version(&self) -> u64;

    /// Call `on_change` after each change until the guard drops.
    fn watch(&self, on_change: Rc<dyn Fn()>) -> Subscription;
}

impl<T: Clone + PartialEq + 'static> Source for Observable<T> {
    fn version(&self) -> u64 {
        Observable::version(self)
    }

    fn watch(&self, on_change: Rc<dyn Fn()>) -> Subscription {
        self.subscribe(move |_| on_change())
    }
}

/// Box a source handle for [`Computed::new`].
pub fn dep<S: Source + Clone + 'static>(source: &S) -> Box<dyn Source> {
    Box::new(source.clone())
}

struct Derivation<T> {
    compute: Box<dyn Fn() -> T>,
    sources: Vec<Box<dyn Source>>,
    seen: RefCell<Vec<u64>>,
    cache: Observable<T>,
    watches: RefCell<Vec<Subscription>>,
}

impl<T: Clone + PartialEq + 'static> Derivation<T> {
    fn versions(&self) -> Vec<u64> {
        self.sources.iter().map(|s| s.version()).collect()
    }

    fn refresh(&self) {
        let current = self.versions();
        if *self.seen.borrow() == current {
            return;
        }
        *self.seen.borrow_mut() = current;
        let value = (self.compute)();
        self.cache.set(value);
    }
}

/// Cached derived value. Clones share the cache.
pub struct Computed<T> {
    derivation: Rc<Derivation<T>>,
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            derivation: Rc::clone(&self.derivation),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Computed")
            .field("cache", &self.derivation.cache)
            .field("sources", &self.derivation.sources.len())
            .finish()
    }
}

impl<T: Clone + PartialEq + 'static> Computed<T> {
    /// Derive a value from `sources` with `compute`.
    ///
    /// `compute` must read only the listed sources; anything else it reads
    /// will not trigger a refresh.
    pub fn new(
        sources: impl IntoIterator<Item = Box<dyn Source>>,
        compute: impl Fn() -> T + 'static,
    ) -> Self {
        let sources: Vec<Box<dyn Source>> = sources.into_iter().collect();
        let seen = sources.iter().map(|s| s.version()).collect();
        let initial = compute();
        let derivation = Rc::new(Derivation {
            compute: Box::new(compute),
            sources,
            seen: RefCell::new(seen),
            cache: Observable::new(initial),
            watches: RefCell::new(Vec::new()),
        });

        let weak: Weak<Derivation<T>> = Rc::downgrade(&derivation);
        let watches = derivation
            .sources
            .iter()
            .map(|source| {
                let weak = weak.clone();
                source.watch(Rc::new(move || {
                    if let Some(d) = weak.upgrade() {
                        d.refresh();
                    }
                }))
            })
            .collect();
        *derivation.watches.borrow_mut() = watches;

        Self { derivation }
    }

    #[must_use]
    pub fn get(&self) -> T {
        self.derivation.refresh();
        self.derivation.cache.get()
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.derivation.refresh();
        self.derivation.cache.with(f)
    }

    /// Version of the derived value (refreshes first).
    #[must_use]
    pub fn version(&self) -> u64 {
        self.derivation.refresh();
        self.derivation.cache.version()
    }

    /// Run `callback` whenever the derived value changes.
    pub fn subscribe(&self, callback: impl Fn(&T) + 'static) -> Subscription {
        self.derivation.cache.subscribe(callback)
    }
}

impl<T: Clone + PartialEq + 'static> Source for Computed<T> {
    fn version(&self) -> u64 {
        Computed::version(self)
    }

    fn watch(&self, on_change: Rc<dyn Fn()>) -> Subscription {
        self.subscribe(move |_| on_change())
    }
}
