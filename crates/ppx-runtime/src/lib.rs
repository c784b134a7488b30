#![forbid(unsafe_code)]

//! Host-independent runtime for the pixel-perfect overlay.
//!
//! The pieces, bottom up:
//!
//! - [`reactive`]: observable cells, computed views and batched propagation.
//! - [`model`]: the saved-image collection and its stored JSON shape.
//! - [`store`]: the single source of truth with every state action.
//! - [`persistence`]: debounced write-through to a storage backend plus
//!   cross-context change handling.
//! - [`overlay`]: pointer routing from gestures into the store.
//!
//! Nothing here touches a browser API; the web crate supplies gateways.

pub mod config;
pub mod logging;
pub mod model;
pub mod overlay;
pub mod persistence;
pub mod reactive;
pub mod store;

pub use config::{ConfigError, OverlayConfig, SAVED_IMAGES_KEY};
pub use model::{ImageId, SavedImage, SavedImages};
pub use overlay::{OverlayController, PointerDispatch, PointerIgnoredReason};
pub use persistence::{
    MemoryStorage, PersistenceSync, StorageChange, StorageError, StorageGateway,
};
pub use reactive::{BatchScope, Computed, Observable, Subscription};
pub use store::{ActiveGeometry, DeferredTask, OverlayStore};
