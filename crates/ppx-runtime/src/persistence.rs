#![forbid(unsafe_code)]

//! Synchronization between the store's saved-image collection and durable
//! key-value storage.
//!
//! Durable storage is the source of truth shared by every context (page
//! overlay, popup). Each context runs one [`PersistenceSync`]:
//!
//! - [`initialize`](PersistenceSync::initialize) loads the stored
//!   collection into the store.
//! - Store changes mark the collection dirty. Structural changes (an image
//!   added, deleted or evicted) are due immediately; geometry-only edits are
//!   due after a trailing debounce that restarts on every edit.
//! - The host polls [`flush_due`](PersistenceSync::flush_due) (at the time
//!   reported by [`next_due`](PersistenceSync::next_due)) and calls
//!   [`flush_now`](PersistenceSync::flush_now) on teardown.
//! - Change notifications from other contexts go through
//!   [`apply_external_change`](PersistenceSync::apply_external_change),
//!   which replaces the collection unconditionally.
//!
//! # Invariants
//!
//! 1. Applying a loaded or external collection never schedules a write.
//! 2. The whole collection is written; there is no merge. Two contexts
//!    writing concurrently race and the later write wins.
//! 3. Storage errors are logged and returned to the caller; the store is
//!    never touched on failure.
//!
//! # Failure Modes
//!
//! - Storage unavailable: `initialize` leaves the store empty and the live
//!   session keeps working in memory.
//! - Context torn down inside the debounce window without `flush_now`: the
//!   last geometry edit is lost.
//! - A failed write stays pending and is retried by the next flush.

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;
use std::time::Duration;

use ppx_core::Clock;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::logging::LOG_TARGET;
use crate::model::{ImageId, SavedImages};
use crate::reactive::{Observable, Subscription};
use crate::store::OverlayStore;

/// Durable storage failure.
#[derive(Debug)]
pub enum StorageError {
    /// The storage API is missing or access was denied.
    Unavailable(String),
    /// The backend rejected a read or write.
    Backend(String),
    /// The collection could not be serialized.
    Encode(serde_json::Error),
    /// The stored value does not have the expected shape.
    Decode(serde_json::Error),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable(why) => write!(f, "storage unavailable: {why}"),
            Self::Backend(why) => write!(f, "storage backend error: {why}"),
            Self::Encode(e) => write!(f, "could not encode saved images: {e}"),
            Self::Decode(e) => write!(f, "could not decode saved images: {e}"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Encode(e) | Self::Decode(e) => Some(e),
            _ => None,
        }
    }
}

/// Async key-value storage reached through the host (e.g. `chrome.storage.local`).
#[allow(async_fn_in_trait)]
pub trait StorageGateway {
    /// Value under `key`, or `None` if absent.
    async fn read(&self, key: &str) -> Result<Option<Value>, StorageError>;

    /// Store `value` under `key`, replacing any previous value.
    async fn write(&self, key: &str, value: Value) -> Result<(), StorageError>;
}

impl<G: StorageGateway + ?Sized> StorageGateway for Rc<G> {
    async fn read(&self, key: &str) -> Result<Option<Value>, StorageError> {
        (**self).read(key).await
    }

    async fn write(&self, key: &str, value: Value) -> Result<(), StorageError> {
        (**self).write(key, value).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingWrite {
    due: Duration,
    structural: bool,
}

#[derive(Debug, Default)]
struct SyncState {
    /// Collection as last loaded from or written to storage.
    persisted: SavedImages,
    /// Collection currently being written.
    in_flight: Option<SavedImages>,
    pending: Option<PendingWrite>,
}

impl SyncState {
    fn persisted_ids(&self) -> BTreeSet<ImageId> {
        self.persisted.ids()
    }

    fn on_store_change(&mut self, images: &SavedImages, now: Duration, debounce: Duration) {
        if *images == self.persisted {
            self.pending = None;
            return;
        }
        let structural = images.ids() != self.persisted_ids();
        self.pending = Some(match self.pending {
            Some(p) if p.structural => p,
            _ if structural => PendingWrite {
                due: now,
                structural: true,
            },
            _ => PendingWrite {
                due: now.saturating_add(debounce),
                structural: false,
            },
        });
    }
}

/// Keeps one store's collection in step with durable storage.
pub struct PersistenceSync<G> {
    store: Rc<OverlayStore>,
    gateway: G,
    clock: Rc<dyn Clock>,
    key: String,
    state: Rc<RefCell<SyncState>>,
    _watch: Subscription,
}

impl<G: StorageGateway> PersistenceSync<G> {
    pub fn new(store: Rc<OverlayStore>, gateway: G, clock: Rc<dyn Clock>) -> Self {
        let state = Rc::new(RefCell::new(SyncState::default()));
        let debounce = store.config().debounce();
        let key = store.config().storage_key.clone();

        let watch = {
            let state = Rc::clone(&state);
            let clock = Rc::clone(&clock);
            store.subscribe_saved_images(move |images| {
                state
                    .borrow_mut()
                    .on_store_change(images, clock.monotonic(), debounce);
            })
        };

        Self {
            store,
            gateway,
            clock,
            key,
            state,
            _watch: watch,
        }
    }

    #[must_use]
    pub fn store(&self) -> &Rc<OverlayStore> {
        &self.store
    }

    #[must_use]
    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    /// Load the stored collection into the store.
    ///
    /// Anything created in memory before the load completes is replaced.
    /// Returns the number of images loaded.
    pub async fn initialize(&self) -> Result<usize, StorageError> {
        let stored = match self.gateway.read(&self.key).await {
            Ok(value) => value,
            Err(e) => {
                warn!(target: LOG_TARGET, error = %e, "failed to load saved images");
                return Err(e);
            }
        };
        let images = match stored {
            Some(value) => match decode(value) {
                Ok(images) => images,
                Err(e) => {
                    warn!(target: LOG_TARGET, error = %e, "ignoring malformed saved images");
                    return Err(e);
                }
            },
            None => SavedImages::new(),
        };
        let count = self.apply(images);
        info!(target: LOG_TARGET, count, "saved images loaded");
        Ok(count)
    }

    /// Replace the collection with a value written by another context.
    ///
    /// `None` means the key was removed. An echo of this context's own
    /// write, or a malformed value, is ignored. Returns `true` if applied.
    pub fn apply_external_change(&self, new_value: Option<&Value>) -> bool {
        let images = match new_value {
            Some(value) => match decode(value.clone()) {
                Ok(images) => images,
                Err(e) => {
                    warn!(target: LOG_TARGET, error = %e, "ignoring malformed storage change");
                    return false;
                }
            },
            None => SavedImages::new(),
        };
        {
            let state = self.state.borrow();
            if state.in_flight.as_ref() == Some(&images) || state.persisted == images {
                debug!(target: LOG_TARGET, "ignoring storage echo");
                return false;
            }
        }
        self.apply(images);
        true
    }

    fn apply(&self, mut images: SavedImages) -> usize {
        images.truncate_to(self.store.config().max_images);
        let count = images.len();
        {
            let mut state = self.state.borrow_mut();
            state.persisted = images.clone();
            state.pending = None;
        }
        self.store.replace_saved_images(images);
        count
    }

    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.state.borrow().pending.is_some()
    }

    /// Monotonic time at which the pending write becomes due.
    #[must_use]
    pub fn next_due(&self) -> Option<Duration> {
        self.state.borrow().pending.map(|p| p.due)
    }

    /// Write if a pending write is due. Returns `true` if a write happened.
    pub async fn flush_due(&self) -> Result<bool, StorageError> {
        let due = self
            .state
            .borrow()
            .pending
            .is_some_and(|p| p.due <= self.clock.monotonic());
        if !due {
            return Ok(false);
        }
        self.write_current().await.map(|()| true)
    }

    /// Write any pending change now, ignoring the debounce window.
    pub async fn flush_now(&self) -> Result<bool, StorageError> {
        if !self.has_pending() {
            return Ok(false);
        }
        self.write_current().await.map(|()| true)
    }

    async fn write_current(&self) -> Result<(), StorageError> {
        let images = self.store.saved_images();
        let value = serde_json::to_value(&images).map_err(StorageError::Encode)?;
        let attempted = {
            let mut state = self.state.borrow_mut();
            state.in_flight = Some(images.clone());
            state.pending.take()
        };

        let result = self.gateway.write(&self.key, value).await;

        let mut state = self.state.borrow_mut();
        state.in_flight = None;
        match result {
            Ok(()) => {
                debug!(target: LOG_TARGET, count = images.len(), "saved images written");
                state.persisted = images;
                Ok(())
            }
            Err(e) => {
                warn!(target: LOG_TARGET, error = %e, "failed to write saved images");
                // Keep the change queued unless a newer edit already re-queued it.
                if state.pending.is_none() {
                    state.pending = attempted;
                }
                Err(e)
            }
        }
    }
}

impl<G> std::fmt::Debug for PersistenceSync<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("PersistenceSync")
            .field("key", &self.key)
            .field("persisted", &state.persisted.len())
            .field("pending", &state.pending)
            .finish()
    }
}

fn decode(value: Value) -> Result<SavedImages, StorageError> {
    serde_json::from_value(value).map_err(StorageError::Decode)
}

/// A change to one key of a [`MemoryStorage`].
#[derive(Debug, Clone, PartialEq)]
pub struct StorageChange {
    pub key: String,
    pub new_value: Option<Value>,
    seq: u64,
}

#[derive(Default)]
struct MemoryInner {
    values: HashMap<String, Value>,
    writes: usize,
    unavailable: bool,
    seq: u64,
}

/// In-memory [`StorageGateway`] with change notifications.
///
/// Clones share the same backing map, so two contexts built over clones of
/// one `MemoryStorage` see each other's writes, like two extension pages
/// sharing `chrome.storage`.
#[derive(Clone)]
pub struct MemoryStorage {
    inner: Rc<RefCell<MemoryInner>>,
    changes: Observable<Option<StorageChange>>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("MemoryStorage")
            .field("keys", &inner.values.len())
            .field("writes", &inner.writes)
            .field("unavailable", &inner.unavailable)
            .finish()
    }
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(MemoryInner::default())),
            changes: Observable::new(None),
        }
    }

    /// Simulate the storage API disappearing (or coming back).
    pub fn set_available(&self, available: bool) {
        self.inner.borrow_mut().unavailable = !available;
    }

    /// Successful writes so far.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.inner.borrow().writes
    }

    #[must_use]
    pub fn value(&self, key: &str) -> Option<Value> {
        self.inner.borrow().values.get(key).cloned()
    }

    /// Seed a value without counting a write or notifying.
    pub fn seed(&self, key: &str, value: Value) {
        self.inner.borrow_mut().values.insert(key.to_owned(), value);
    }

    /// Observe every successful write.
    pub fn on_change(&self, f: impl Fn(&StorageChange) + 'static) -> Subscription {
        self.changes.subscribe(move |change| {
            if let Some(change) = change {
                f(change);
            }
        })
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.inner.borrow().unavailable {
            Err(StorageError::Unavailable("memory storage disabled".to_owned()))
        } else {
            Ok(())
        }
    }
}

impl StorageGateway for MemoryStorage {
    async fn read(&self, key: &str) -> Result<Option<Value>, StorageError> {
        self.check()?;
        Ok(self.value(key))
    }

    async fn write(&self, key: &str, value: Value) -> Result<(), StorageError> {
        self.check()?;
        let change = {
            let mut inner = self.inner.borrow_mut();
            inner.values.insert(key.to_owned(), value.clone());
            inner.writes += 1;
            inner.seq += 1;
            StorageChange {
                key: key.to_owned(),
                new_value: Some(value),
                seq: inner.seq,
            }
        };
        self.changes.set(Some(change));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OverlayConfig;
    use crate::model::SavedImage;
    use pollster::block_on;
    use ppx_core::{DeterministicClock, Position, Size};
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    struct Fixture {
        clock: DeterministicClock,
        storage: MemoryStorage,
        sync: PersistenceSync<MemoryStorage>,
    }

    fn fixture() -> Fixture {
        let clock = DeterministicClock::starting_at(10_000);
        let storage = MemoryStorage::new();
        let store = Rc::new(OverlayStore::new(
            OverlayConfig::default(),
            Rc::new(clock.clone()),
        ));
        let sync = PersistenceSync::new(store, storage.clone(), Rc::new(clock.clone()));
        Fixture {
            clock,
            storage,
            sync,
        }
    }

    fn id(n: u128) -> ImageId {
        ImageId::from_uuid(Uuid::from_u128(n))
    }

    fn create(f: &Fixture, n: u128) -> ImageId {
        let id = id(n);
        f.sync
            .store()
            .create_image(id, "data:image/png;base64,AAA", Position::ORIGIN, Size::new(100, 50));
        id
    }

    #[test]
    fn structural_change_is_due_immediately() {
        let f = fixture();
        block_on(f.sync.initialize()).expect("load");
        create(&f, 1);
        assert_eq!(f.sync.next_due(), Some(Duration::ZERO));
        assert!(block_on(f.sync.flush_due()).expect("flush"));
        assert_eq!(f.storage.write_count(), 1);
        assert!(!f.sync.has_pending());
    }

    #[test]
    fn geometry_edits_are_debounced() {
        let f = fixture();
        create(&f, 1);
        block_on(f.sync.flush_due()).expect("flush");

        for step in 1..=10 {
            f.sync.store().set_position(Position::new(step * 12, step * 8));
            f.clock.advance_ms(40);
            assert!(!block_on(f.sync.flush_due()).expect("flush"));
        }
        assert_eq!(f.storage.write_count(), 1);

        f.clock.advance_ms(500);
        assert!(block_on(f.sync.flush_due()).expect("flush"));
        assert_eq!(f.storage.write_count(), 2);

        let stored: SavedImages =
            serde_json::from_value(f.storage.value("savedImagesAtom").expect("stored"))
                .expect("decode");
        assert_eq!(
            stored.get(&id(1)).map(|i| i.position),
            Some(Position::new(120, 80))
        );
    }

    #[test]
    fn structural_change_overrides_debounce() {
        let f = fixture();
        create(&f, 1);
        block_on(f.sync.flush_due()).expect("flush");
        f.sync.store().set_position(Position::new(3, 3));
        assert!(f.sync.next_due() > Some(Duration::ZERO));
        create(&f, 2);
        assert_eq!(f.sync.next_due(), Some(f.clock.monotonic()));
    }

    #[test]
    fn reverting_to_persisted_clears_pending() {
        let f = fixture();
        create(&f, 1);
        block_on(f.sync.flush_due()).expect("flush");
        f.sync.store().set_position(Position::new(3, 3));
        assert!(f.sync.has_pending());
        f.sync.store().set_position(Position::ORIGIN);
        assert!(!f.sync.has_pending());
    }

    #[test]
    fn initialize_loads_without_writing_back() {
        let f = fixture();
        let image = SavedImage::new(id(7), "data:,", 1, Position::new(4, 5), Size::new(10, 10));
        let images: SavedImages = [image].into_iter().collect();
        f.storage.seed(
            "savedImagesAtom",
            serde_json::to_value(&images).expect("encode"),
        );
        assert_eq!(block_on(f.sync.initialize()).expect("load"), 1);
        assert_eq!(f.sync.store().saved_images(), images);
        assert!(!f.sync.has_pending());
        assert!(!block_on(f.sync.flush_now()).expect("flush"));
        assert_eq!(f.storage.write_count(), 0);
    }

    #[test]
    fn initialize_replaces_pre_load_mutations() {
        let f = fixture();
        create(&f, 1);
        block_on(f.sync.initialize()).expect("load");
        assert!(f.sync.store().saved_images().is_empty());
        assert_eq!(f.sync.store().active_image_id(), None);
        assert!(!f.sync.has_pending());
    }

    #[test]
    fn unavailable_storage_degrades_to_memory() {
        let f = fixture();
        f.storage.set_available(false);
        assert!(matches!(
            block_on(f.sync.initialize()),
            Err(StorageError::Unavailable(_))
        ));
        create(&f, 1);
        assert!(block_on(f.sync.flush_due()).is_err());
        assert_eq!(f.sync.store().saved_images().len(), 1);
    }

    #[test]
    fn failed_write_stays_pending_and_retries() {
        let f = fixture();
        block_on(f.sync.initialize()).expect("load");
        let a = create(&f, 1);
        f.storage.set_available(false);
        assert!(block_on(f.sync.flush_due()).is_err());
        assert!(f.sync.has_pending());
        assert_eq!(f.storage.write_count(), 0);

        f.storage.set_available(true);
        assert!(block_on(f.sync.flush_due()).expect("retry"));
        assert!(!f.sync.has_pending());
        let stored: SavedImages =
            serde_json::from_value(f.storage.value("savedImagesAtom").expect("stored"))
                .expect("decode");
        assert!(stored.contains(&a));
    }

    #[test]
    fn malformed_stored_value_is_rejected() {
        let f = fixture();
        f.storage
            .seed("savedImagesAtom", serde_json::json!({"x": {"id": "nope"}}));
        assert!(matches!(
            block_on(f.sync.initialize()),
            Err(StorageError::Decode(_))
        ));
        assert!(f.sync.store().saved_images().is_empty());
    }

    #[test]
    fn external_change_replaces_and_ignores_echo() {
        let f = fixture();
        create(&f, 1);
        block_on(f.sync.flush_now()).expect("flush");
        let own = f.storage.value("savedImagesAtom");
        assert!(!f.sync.apply_external_change(own.as_ref()));

        assert!(f.sync.apply_external_change(None));
        assert!(f.sync.store().saved_images().is_empty());
        assert_eq!(f.sync.store().active_image_id(), None);
        assert!(!f.sync.has_pending());
    }

    #[test]
    fn flush_now_skips_debounce() {
        let f = fixture();
        create(&f, 1);
        block_on(f.sync.flush_now()).expect("flush");
        f.sync.store().set_position(Position::new(9, 9));
        assert!(block_on(f.sync.flush_now()).expect("flush"));
        assert_eq!(f.storage.write_count(), 2);
    }
}
