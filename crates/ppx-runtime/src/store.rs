#![forbid(unsafe_code)]

//! The overlay store: every piece of overlay, menu and image state, and the
//! named actions that are the only way to change it.
//!
//! Each action opens a [`BatchScope`], so subscribers never observe a
//! half-applied action, and returns `true` if it changed anything. Actions
//! never fail: stale ids, a missing active image, and lock/center
//! rejections are no-ops.
//!
//! # Invariants
//!
//! 1. `active_image_id`, when set, names an entry of `saved_images`.
//! 2. The image panel is only visible while the main menu is visible.
//! 3. `saved_images` holds at most `config.max_images` entries.
//! 4. While locked, no action changes the active image's geometry.
//! 5. While centered, X is derived from the viewport and never set directly.
//!
//! # Deferred work
//!
//! Re-centering and viewport re-clamping are queued rather than applied
//! inline; the host drains the queue with [`OverlayStore::run_deferred`]
//! once per event-loop turn. While centered, a recenter is queued whenever
//! the active image changes, is created or changes size. The re-clamp is
//! skipped when `allow_outside_viewport` is set.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use ppx_core::geometry::{centered_x, clamp_into_viewport};
use ppx_core::{Clock, Direction, OverlayGeometry, Position, Size, Viewport};
use tracing::{debug, trace};

use crate::config::OverlayConfig;
use crate::model::{ImageId, SavedImage, SavedImages};
use crate::reactive::{BatchScope, Computed, Observable, Subscription, dep};

/// Work queued by an action for the next [`OverlayStore::run_deferred`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredTask {
    /// Recompute X so the active overlay is horizontally centered.
    Recenter,
    /// Pull the active overlay back inside the viewport.
    ClampToViewport,
}

/// Geometry of the active image together with its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveGeometry {
    pub id: ImageId,
    pub geometry: OverlayGeometry,
}

/// Central reactive state container.
pub struct OverlayStore {
    config: OverlayConfig,
    clock: Rc<dyn Clock>,

    saved_images: Observable<SavedImages>,
    active_image_id: Observable<Option<ImageId>>,
    main_menu_visible: Observable<bool>,
    image_panel_visible: Observable<bool>,
    opacity: Observable<u8>,
    locked: Observable<bool>,
    diff_mode: Observable<bool>,
    centered: Observable<bool>,
    viewport: Observable<Viewport>,

    current_image: Computed<Option<SavedImage>>,
    image_src: Computed<Option<Rc<str>>>,
    position: Computed<Option<Position>>,
    size: Computed<Option<Size>>,
    active_geometry: Computed<Option<ActiveGeometry>>,

    deferred: RefCell<VecDeque<DeferredTask>>,
}

impl std::fmt::Debug for OverlayStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlayStore")
            .field("images", &self.saved_images.with(SavedImages::len))
            .field("active_image_id", &self.active_image_id.get())
            .field("main_menu_visible", &self.main_menu_visible.get())
            .field("image_panel_visible", &self.image_panel_visible.get())
            .field("opacity", &self.opacity.get())
            .field("locked", &self.locked.get())
            .field("diff_mode", &self.diff_mode.get())
            .field("centered", &self.centered.get())
            .field("deferred", &self.deferred.borrow().len())
            .finish()
    }
}

impl OverlayStore {
    /// Empty store. The collection stays empty until persistence loads it.
    pub fn new(config: OverlayConfig, clock: Rc<dyn Clock>) -> Self {
        let saved_images = Observable::new(SavedImages::new());
        let active_image_id = Observable::new(None);

        let current_image = {
            let (images, active) = (saved_images.clone(), active_image_id.clone());
            Computed::new([dep(&saved_images), dep(&active_image_id)], move || {
                let id = active.get()?;
                images.with(|all| all.get(&id).cloned())
            })
        };
        let image_src = {
            let current = current_image.clone();
            Computed::new([dep(&current_image)], move || {
                current.with(|img| img.as_ref().map(|i| Rc::clone(&i.data_url)))
            })
        };
        let position = {
            let current = current_image.clone();
            Computed::new([dep(&current_image)], move || {
                current.with(|img| img.as_ref().map(|i| i.position))
            })
        };
        let size = {
            let current = current_image.clone();
            Computed::new([dep(&current_image)], move || {
                current.with(|img| img.as_ref().map(|i| i.size))
            })
        };
        let active_geometry = {
            let current = current_image.clone();
            Computed::new([dep(&current_image)], move || {
                current.with(|img| {
                    img.as_ref().map(|i| ActiveGeometry {
                        id: i.id,
                        geometry: OverlayGeometry {
                            position: i.position,
                            size: i.size,
                        },
                    })
                })
            })
        };

        Self {
            opacity: Observable::new(config.default_opacity.min(100)),
            config,
            clock,
            saved_images,
            active_image_id,
            main_menu_visible: Observable::new(false),
            image_panel_visible: Observable::new(false),
            locked: Observable::new(false),
            diff_mode: Observable::new(false),
            centered: Observable::new(false),
            viewport: Observable::new(Viewport::default()),
            current_image,
            image_src,
            position,
            size,
            active_geometry,
            deferred: RefCell::new(VecDeque::new()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &OverlayConfig {
        &self.config
    }

    // =========================================================================
    // Reads
    // =========================================================================

    #[must_use]
    pub fn saved_images(&self) -> SavedImages {
        self.saved_images.get()
    }

    pub fn with_saved_images<R>(&self, f: impl FnOnce(&SavedImages) -> R) -> R {
        self.saved_images.with(f)
    }

    #[must_use]
    pub fn active_image_id(&self) -> Option<ImageId> {
        self.active_image_id.get()
    }

    #[must_use]
    pub fn current_image(&self) -> Option<SavedImage> {
        self.current_image.get()
    }

    #[must_use]
    pub fn image_src(&self) -> Option<Rc<str>> {
        self.image_src.get()
    }

    #[must_use]
    pub fn position(&self) -> Option<Position> {
        self.position.get()
    }

    #[must_use]
    pub fn size(&self) -> Option<Size> {
        self.size.get()
    }

    #[must_use]
    pub fn active_geometry(&self) -> Option<ActiveGeometry> {
        self.active_geometry.get()
    }

    #[must_use]
    pub fn is_main_menu_visible(&self) -> bool {
        self.main_menu_visible.get()
    }

    #[must_use]
    pub fn is_image_panel_visible(&self) -> bool {
        self.image_panel_visible.get()
    }

    #[must_use]
    pub fn opacity(&self) -> u8 {
        self.opacity.get()
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.locked.get()
    }

    #[must_use]
    pub fn is_diff_mode(&self) -> bool {
        self.diff_mode.get()
    }

    #[must_use]
    pub fn is_centered(&self) -> bool {
        self.centered.get()
    }

    #[must_use]
    pub fn viewport(&self) -> Viewport {
        self.viewport.get()
    }

    /// Tasks waiting for [`Self::run_deferred`].
    #[must_use]
    pub fn pending_tasks(&self) -> Vec<DeferredTask> {
        self.deferred.borrow().iter().copied().collect()
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Observe the whole collection (persistence uses this).
    pub fn subscribe_saved_images(&self, f: impl Fn(&SavedImages) + 'static) -> Subscription {
        self.saved_images.subscribe(f)
    }

    /// Observe the active image's geometry.
    pub fn subscribe_active_geometry(
        &self,
        f: impl Fn(&Option<ActiveGeometry>) + 'static,
    ) -> Subscription {
        self.active_geometry.subscribe(f)
    }

    /// Observe the active image (the view re-renders from this).
    pub fn subscribe_current_image(
        &self,
        f: impl Fn(&Option<SavedImage>) + 'static,
    ) -> Subscription {
        self.current_image.subscribe(f)
    }

    // =========================================================================
    // Image collection
    // =========================================================================

    /// Insert a new image (evicting the oldest at capacity) and make it active.
    pub fn create_image(
        &self,
        id: ImageId,
        data_url: impl Into<Rc<str>>,
        position: Position,
        size: Size,
    ) -> bool {
        let _batch = BatchScope::new();
        let image = SavedImage::new(id, data_url, self.clock.unix_millis(), position, size);
        let max = self.config.max_images;
        let mut evicted = Vec::new();
        self.saved_images.update(|images| {
            evicted = images.insert_evicting(image, max);
        });
        if !evicted.is_empty() {
            debug!(count = evicted.len(), "evicted oldest saved images");
        }
        self.active_image_id.set(Some(id));
        if self.centered.get() {
            self.queue(DeferredTask::Recenter);
        }
        debug!(%id, "image created");
        true
    }

    /// Remove an image; clears the active reference if it pointed there.
    pub fn delete_image(&self, id: ImageId) -> bool {
        let _batch = BatchScope::new();
        let removed = self.saved_images.update(|images| {
            images.remove(&id);
        });
        if removed && self.active_image_id.get() == Some(id) {
            self.active_image_id.set(None);
        }
        removed
    }

    pub fn update_image_position(&self, id: ImageId, position: Position) -> bool {
        self.edit_image(id, |img| img.position = position)
    }

    pub fn update_image_size(&self, id: ImageId, size: Size) -> bool {
        let _batch = BatchScope::new();
        let resized = self.resizes(id, size);
        let changed = self.edit_image(id, |img| img.size = size);
        if resized {
            self.recenter_if_active(id);
        }
        changed
    }

    /// Replace both geometry fields of one image.
    pub fn update_image_state(&self, id: ImageId, position: Position, size: Size) -> bool {
        let _batch = BatchScope::new();
        let resized = self.resizes(id, size);
        let changed = self.edit_image(id, |img| {
            img.position = position;
            img.size = size;
        });
        if resized {
            self.recenter_if_active(id);
        }
        changed
    }

    fn resizes(&self, id: ImageId, size: Size) -> bool {
        self.saved_images
            .with(|images| images.get(&id).is_some_and(|img| img.size != size))
    }

    /// A new width moves the centered X.
    fn recenter_if_active(&self, id: ImageId) {
        if self.centered.get() && self.active_image_id.get() == Some(id) {
            self.queue(DeferredTask::Recenter);
        }
    }

    fn edit_image(&self, id: ImageId, edit: impl FnOnce(&mut SavedImage)) -> bool {
        let _batch = BatchScope::new();
        self.saved_images.update(|images| {
            if let Some(img) = images.get_mut(&id) {
                edit(img);
            }
        })
    }

    /// Replace the whole collection (load or external change).
    ///
    /// Enforces capacity and clears a dangling active reference.
    pub fn replace_saved_images(&self, mut images: SavedImages) -> bool {
        let _batch = BatchScope::new();
        images.truncate_to(self.config.max_images);
        let active_gone = self
            .active_image_id
            .get()
            .is_some_and(|id| !images.contains(&id));
        let changed = self.saved_images.set(images);
        if active_gone {
            self.active_image_id.set(None);
        }
        changed || active_gone
    }

    // =========================================================================
    // Active image
    // =========================================================================

    /// Set or clear the active image. Unknown ids are ignored.
    pub fn set_active_image(&self, id: Option<ImageId>) -> bool {
        let _batch = BatchScope::new();
        if let Some(id) = id
            && !self.saved_images.with(|images| images.contains(&id))
        {
            trace!(%id, "ignoring unknown active image");
            return false;
        }
        let changed = self.active_image_id.set(id);
        if changed && id.is_some() && self.centered.get() {
            self.queue(DeferredTask::Recenter);
        }
        changed
    }

    pub fn show_overlay(&self, id: ImageId) -> bool {
        self.set_active_image(Some(id))
    }

    pub fn hide_overlay(&self) -> bool {
        self.set_active_image(None)
    }

    /// Route to the active image's position. No-op without an active image.
    pub fn set_position(&self, position: Position) -> bool {
        match self.active_image_id.get() {
            Some(id) => self.update_image_position(id, position),
            None => false,
        }
    }

    /// Route to the active image's size. No-op without an active image.
    pub fn set_size(&self, size: Size) -> bool {
        match self.active_image_id.get() {
            Some(id) => self.update_image_size(id, size),
            None => false,
        }
    }

    /// Set position and size of the active image together.
    pub fn set_geometry(&self, geometry: OverlayGeometry) -> bool {
        match self.active_image_id.get() {
            Some(id) => self.update_image_state(id, geometry.position, geometry.size),
            None => false,
        }
    }

    // =========================================================================
    // Display settings
    // =========================================================================

    /// Swap between 0 and the default opacity.
    pub fn toggle_opacity(&self) -> bool {
        let _batch = BatchScope::new();
        let next = if self.opacity.get() == 0 {
            self.config.default_opacity.min(100)
        } else {
            0
        };
        self.opacity.set(next)
    }

    /// Set opacity, clamped to `0..=100`.
    pub fn set_opacity(&self, opacity: u8) -> bool {
        let _batch = BatchScope::new();
        self.opacity.set(opacity.min(100))
    }

    pub fn toggle_lock(&self) -> bool {
        self.set_locked(!self.locked.get())
    }

    pub fn set_locked(&self, locked: bool) -> bool {
        let _batch = BatchScope::new();
        self.locked.set(locked)
    }

    pub fn toggle_diff(&self) -> bool {
        self.set_diff_mode(!self.diff_mode.get())
    }

    pub fn set_diff_mode(&self, diff: bool) -> bool {
        let _batch = BatchScope::new();
        self.diff_mode.set(diff)
    }

    /// Toggle centered mode; enabling queues a recenter pass.
    pub fn toggle_center(&self) -> bool {
        self.set_centered(!self.centered.get())
    }

    pub fn set_centered(&self, centered: bool) -> bool {
        let _batch = BatchScope::new();
        let changed = self.centered.set(centered);
        if changed && centered {
            self.queue(DeferredTask::Recenter);
        }
        changed
    }

    // =========================================================================
    // Menus
    // =========================================================================

    pub fn toggle_main_menu(&self) -> bool {
        self.set_main_menu_visible(!self.main_menu_visible.get())
    }

    /// Opening just shows the menu. Closing hides the image panel and
    /// clears the active image as well.
    pub fn set_main_menu_visible(&self, visible: bool) -> bool {
        let _batch = BatchScope::new();
        let mut changed = self.main_menu_visible.set(visible);
        if !visible {
            changed |= self.image_panel_visible.set(false);
            changed |= self.active_image_id.set(None);
        }
        changed
    }

    pub fn close_main_menu(&self) -> bool {
        self.set_main_menu_visible(false)
    }

    pub fn toggle_image_panel(&self) -> bool {
        self.set_image_panel_visible(!self.image_panel_visible.get())
    }

    /// Showing the panel also shows the main menu.
    pub fn set_image_panel_visible(&self, visible: bool) -> bool {
        let _batch = BatchScope::new();
        let mut changed = false;
        if visible {
            changed |= self.main_menu_visible.set(true);
        }
        changed |= self.image_panel_visible.set(visible);
        changed
    }

    // =========================================================================
    // Moves
    // =========================================================================

    /// Nudge the active overlay by the configured step.
    ///
    /// Rejected while locked. While centered, horizontal nudges are rejected
    /// and vertical nudges re-derive X from the viewport.
    pub fn move_overlay(&self, direction: Direction) -> bool {
        let _batch = BatchScope::new();
        if self.locked.get() {
            return false;
        }
        let centered = self.centered.get();
        if centered && direction.is_horizontal() {
            return false;
        }
        let (Some(position), Some(size)) = (self.position.get(), self.size.get()) else {
            return false;
        };
        let step = i32::try_from(self.config.nudge_step).unwrap_or(i32::MAX);
        let mut next = direction.apply(position, step);
        if centered {
            next.x = centered_x(self.viewport.get().width, size.width);
        }
        self.set_position(next)
    }

    /// Numeric X input. Rejected while locked or centered.
    pub fn edit_position_x(&self, x: i32) -> bool {
        if self.locked.get() || self.centered.get() {
            return false;
        }
        match self.position.get() {
            Some(position) => self.set_position(Position { x, ..position }),
            None => false,
        }
    }

    /// Numeric Y input. Rejected while locked.
    pub fn edit_position_y(&self, y: i32) -> bool {
        if self.locked.get() {
            return false;
        }
        match self.position.get() {
            Some(position) => self.set_position(Position { y, ..position }),
            None => false,
        }
    }

    /// Move the active overlay to the origin. Rejected while locked.
    pub fn reset_position(&self) -> bool {
        let _batch = BatchScope::new();
        if self.locked.get() {
            return false;
        }
        let changed = self.set_position(Position::ORIGIN);
        if self.centered.get() {
            self.queue(DeferredTask::Recenter);
        }
        changed
    }

    // =========================================================================
    // Viewport and deferred work
    // =========================================================================

    /// Record a new viewport size and queue a re-clamp.
    pub fn set_viewport(&self, viewport: Viewport) -> bool {
        let _batch = BatchScope::new();
        let changed = self.viewport.set(viewport);
        if changed {
            self.queue(DeferredTask::ClampToViewport);
            if self.centered.get() {
                self.queue(DeferredTask::Recenter);
            }
        }
        changed
    }

    fn queue(&self, task: DeferredTask) {
        let mut deferred = self.deferred.borrow_mut();
        if !deferred.contains(&task) {
            deferred.push_back(task);
        }
    }

    /// Run queued tasks. Returns how many ran.
    pub fn run_deferred(&self) -> usize {
        let mut ran = 0;
        loop {
            let next = self.deferred.borrow_mut().pop_front();
            let Some(task) = next else {
                break;
            };
            ran += 1;
            match task {
                DeferredTask::Recenter => {
                    self.recenter();
                }
                DeferredTask::ClampToViewport => {
                    self.clamp_to_viewport();
                }
            }
        }
        ran
    }

    fn recenter(&self) -> bool {
        if !self.centered.get() {
            return false;
        }
        let (Some(position), Some(size)) = (self.position.get(), self.size.get()) else {
            return false;
        };
        let x = centered_x(self.viewport.get().width, size.width);
        self.set_position(Position { x, ..position })
    }

    fn clamp_to_viewport(&self) -> bool {
        if self.config.allow_outside_viewport {
            return false;
        }
        let (Some(position), Some(size)) = (self.position.get(), self.size.get()) else {
            return false;
        };
        let viewport = self.viewport.get();
        if viewport.width == 0 || viewport.height == 0 {
            return false;
        }
        match clamp_into_viewport(position, size, viewport, self.centered.get()) {
            Some(corrected) => {
                debug!(x = corrected.x, y = corrected.y, "overlay re-clamped to viewport");
                self.set_position(corrected)
            }
            None => false,
        }
    }
}
