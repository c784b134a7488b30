#![forbid(unsafe_code)]

//! Saved-image data model and its durable JSON shape.
//!
//! The collection is persisted under one key as a JSON object mapping the
//! hyphenated UUID to the image record:
//!
//! ```json
//! { "5f0c…": { "id": "5f0c…", "dataUrl": "data:image/png;base64,…",
//!              "created": 1700000000000,
//!              "position": { "x": 0, "y": 0 },
//!              "size": { "width": 640, "height": 480 } } }
//! ```
//!
//! # Invariants
//!
//! 1. Map key and record `id` agree (enforced on insert and on load).
//! 2. [`SavedImages::insert_evicting`] never leaves more than `max` entries;
//!    it evicts by ascending `(created, id)`. Images created in the same
//!    millisecond are ordered by UUID, not by insertion order.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::Rc;

use ppx_core::{Position, Size};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identity of a saved image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageId(Uuid);

impl ImageId {
    /// Fresh random (v4) id.
    #[must_use]
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Parse a hyphenated (or simple) UUID string.
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }

    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.hyphenated().fmt(f)
    }
}

/// A pasted or uploaded reference image.
///
/// `data_url` is shared (`Rc<str>`): it can be megabytes, and the record is
/// cloned on every geometry update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedImage {
    pub id: ImageId,
    pub data_url: Rc<str>,
    /// Creation time, Unix milliseconds.
    pub created: u64,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub size: Size,
}

impl SavedImage {
    #[must_use]
    pub fn new(
        id: ImageId,
        data_url: impl Into<Rc<str>>,
        created: u64,
        position: Position,
        size: Size,
    ) -> Self {
        Self {
            id,
            data_url: data_url.into(),
            created,
            position,
            size,
        }
    }

    fn eviction_key(&self) -> (u64, ImageId) {
        (self.created, self.id)
    }
}

/// The saved-image collection, keyed by id.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(transparent)]
pub struct SavedImages {
    entries: BTreeMap<ImageId, SavedImage>,
}

impl SavedImages {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: &ImageId) -> Option<&SavedImage> {
        self.entries.get(id)
    }

    #[must_use]
    pub fn contains(&self, id: &ImageId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SavedImage> {
        self.entries.values()
    }

    /// Key set, used to tell structural changes from geometry edits.
    #[must_use]
    pub fn ids(&self) -> BTreeSet<ImageId> {
        self.entries.keys().copied().collect()
    }

    /// Images ordered newest first, for the gallery.
    #[must_use]
    pub fn newest_first(&self) -> Vec<&SavedImage> {
        let mut images: Vec<&SavedImage> = self.entries.values().collect();
        images.sort_by(|a, b| b.eviction_key().cmp(&a.eviction_key()));
        images
    }

    /// Insert `image`, evicting the oldest entries so that at most `max`
    /// remain. Replacing an existing id never evicts. Returns evicted ids.
    pub fn insert_evicting(&mut self, image: SavedImage, max: usize) -> Vec<ImageId> {
        let mut evicted = Vec::new();
        if !self.entries.contains_key(&image.id) {
            while !self.entries.is_empty() && self.entries.len() >= max.max(1) {
                match self.oldest() {
                    Some(oldest) => {
                        self.entries.remove(&oldest);
                        evicted.push(oldest);
                    }
                    None => break,
                }
            }
        }
        self.entries.insert(image.id, image);
        evicted
    }

    pub fn remove(&mut self, id: &ImageId) -> Option<SavedImage> {
        self.entries.remove(id)
    }

    /// Mutable access for in-place geometry edits.
    pub fn get_mut(&mut self, id: &ImageId) -> Option<&mut SavedImage> {
        self.entries.get_mut(id)
    }

    /// Drop the oldest entries until at most `max` remain.
    pub fn truncate_to(&mut self, max: usize) -> Vec<ImageId> {
        let mut evicted = Vec::new();
        while self.entries.len() > max {
            match self.oldest() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                    evicted.push(oldest);
                }
                None => break,
            }
        }
        evicted
    }

    fn oldest(&self) -> Option<ImageId> {
        self.entries
            .values()
            .min_by_key(|img| img.eviction_key())
            .map(|img| img.id)
    }
}

impl FromIterator<SavedImage> for SavedImages {
    fn from_iter<I: IntoIterator<Item = SavedImage>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|img| (img.id, img)).collect(),
        }
    }
}

/// Stored shape accepted on load: an id-keyed object or, from older builds,
/// a plain array of records. Records are re-keyed by their own `id`.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredImages {
    Map(BTreeMap<String, SavedImage>),
    List(Vec<SavedImage>),
}

impl<'de> Deserialize<'de> for SavedImages {
    fn deserialize<D: serde::Deserializer<'de>>(de: D) -> Result<Self, D::Error> {
        Ok(match StoredImages::deserialize(de)? {
            StoredImages::Map(map) => map.into_values().collect(),
            StoredImages::List(list) => list.into_iter().collect(),
        })
    }
}
