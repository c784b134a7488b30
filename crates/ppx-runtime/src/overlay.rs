#![forbid(unsafe_code)]

//! Pointer interaction for one overlay instance.
//!
//! [`OverlayController`] routes normalized pointer events to the drag or
//! resize controller and commits every computed geometry to the store
//! immediately. Resize handles are hit-tested before the body, so a
//! pointer-down reports exactly one [`HitTarget`].
//!
//! # Invariants
//!
//! 1. At most one gesture (drag or resize) is active at a time.
//! 2. A locked overlay never starts a gesture, and moves that arrive after
//!    the overlay was locked mid-gesture are dropped.
//! 3. Up and cancel always end the active gesture and release its capture.

use std::rc::Rc;

use ppx_core::{
    CaptureHost, Corner, DragConstraints, DragController, GestureIgnoredReason, GestureKind,
    GestureOutcome, HitTarget, OverlayGeometry, PointerEvent, PointerPhase, ResizeController,
    Size,
};
use tracing::trace;

use crate::store::OverlayStore;

/// Why a pointer event had no effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerIgnoredReason {
    /// No active image to move or resize.
    NoActiveImage,
    /// Pointer-down while another gesture is active.
    Busy,
    /// Pointer-down without a hit target, or move/up with no gesture.
    NoGesture,
    /// Overlay is locked.
    Locked,
    /// The gesture controller rejected the event.
    Gesture(GestureIgnoredReason),
}

/// What one pointer event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerDispatch {
    Started(GestureKind),
    /// A new geometry was committed to the store.
    Committed(OverlayGeometry),
    Ended(GestureKind),
    Ignored(PointerIgnoredReason),
}

/// Routes pointer input for the active overlay.
pub struct OverlayController<H: CaptureHost + ?Sized> {
    store: Rc<OverlayStore>,
    drag: DragController<H>,
    resize: ResizeController<H>,
    natural_size: Option<Size>,
}

impl<H: CaptureHost + ?Sized> OverlayController<H> {
    pub fn new(store: Rc<OverlayStore>, host: Rc<H>) -> Self {
        let limits = store.config().resize_limits();
        Self {
            drag: DragController::new(Rc::clone(&host)),
            resize: ResizeController::with_limits(host, limits),
            store,
            natural_size: None,
        }
    }

    /// Record the bitmap's natural size once the view has measured it.
    pub fn set_natural_size(&mut self, size: Option<Size>) {
        self.natural_size = size.filter(|s| !s.is_empty());
    }

    /// Gesture currently in progress.
    #[must_use]
    pub fn active_gesture(&self) -> Option<GestureKind> {
        if self.drag.is_active() {
            Some(GestureKind::Drag)
        } else if self.resize.is_active() {
            Some(GestureKind::Resize)
        } else {
            None
        }
    }

    /// Handle one pointer event. `target` is only consulted on pointer-down.
    pub fn handle_pointer(
        &mut self,
        event: PointerEvent,
        target: Option<HitTarget>,
    ) -> PointerDispatch {
        match event.phase {
            PointerPhase::Down => self.begin(event, target),
            PointerPhase::Move => self.update(event),
            PointerPhase::Up | PointerPhase::Cancel => self.end(),
        }
    }

    fn begin(&mut self, event: PointerEvent, target: Option<HitTarget>) -> PointerDispatch {
        let Some(target) = target else {
            return PointerDispatch::Ignored(PointerIgnoredReason::NoGesture);
        };
        if self.active_gesture().is_some() {
            return PointerDispatch::Ignored(PointerIgnoredReason::Busy);
        }
        let Some(active) = self.store.active_geometry() else {
            return PointerDispatch::Ignored(PointerIgnoredReason::NoActiveImage);
        };
        let locked = self.store.is_locked();
        let at = event.usable_position();
        let aspect = self.aspect_ratio(active.geometry.size);

        let (outcome, kind) = match target {
            HitTarget::Body => (
                discard(self.drag.begin(event.kind, at, active.geometry.position, locked)),
                GestureKind::Drag,
            ),
            HitTarget::Handle(corner) => (
                discard(self.resize.begin(
                    corner,
                    event.kind,
                    at,
                    active.geometry,
                    aspect,
                    locked,
                )),
                GestureKind::Resize,
            ),
        };
        match outcome {
            GestureOutcome::Started => PointerDispatch::Started(kind),
            GestureOutcome::Ignored(GestureIgnoredReason::Disabled) => {
                PointerDispatch::Ignored(PointerIgnoredReason::Locked)
            }
            GestureOutcome::Ignored(reason) => {
                PointerDispatch::Ignored(PointerIgnoredReason::Gesture(reason))
            }
            GestureOutcome::Updated(()) | GestureOutcome::Ended => {
                PointerDispatch::Ignored(PointerIgnoredReason::NoGesture)
            }
        }
    }

    fn update(&mut self, event: PointerEvent) -> PointerDispatch {
        let Some(kind) = self.active_gesture() else {
            return PointerDispatch::Ignored(PointerIgnoredReason::NoGesture);
        };
        if self.store.is_locked() {
            return PointerDispatch::Ignored(PointerIgnoredReason::Locked);
        }
        let Some(current) = self.store.active_geometry() else {
            return PointerDispatch::Ignored(PointerIgnoredReason::NoActiveImage);
        };
        let at = event.usable_position();

        let outcome = match kind {
            GestureKind::Drag => {
                let constraints = DragConstraints {
                    viewport: self.store.viewport(),
                    element: current.geometry.size,
                    allow_outside_viewport: self.store.config().allow_outside_viewport,
                    centered: self.store.is_centered(),
                };
                match self.drag.update(at, &constraints) {
                    GestureOutcome::Updated(position) => GestureOutcome::Updated(OverlayGeometry {
                        position,
                        size: current.geometry.size,
                    }),
                    GestureOutcome::Started => GestureOutcome::Started,
                    GestureOutcome::Ended => GestureOutcome::Ended,
                    GestureOutcome::Ignored(reason) => GestureOutcome::Ignored(reason),
                }
            }
            GestureKind::Resize => self.resize.update(at),
        };

        match outcome {
            GestureOutcome::Updated(geometry) => {
                self.store.set_geometry(geometry);
                trace!(
                    x = geometry.position.x,
                    y = geometry.position.y,
                    w = geometry.size.width,
                    h = geometry.size.height,
                    "geometry committed"
                );
                PointerDispatch::Committed(geometry)
            }
            GestureOutcome::Ignored(reason) => {
                PointerDispatch::Ignored(PointerIgnoredReason::Gesture(reason))
            }
            GestureOutcome::Started | GestureOutcome::Ended => {
                PointerDispatch::Ignored(PointerIgnoredReason::NoGesture)
            }
        }
    }

    fn end(&mut self) -> PointerDispatch {
        if matches!(self.drag.end(), GestureOutcome::Ended) {
            return PointerDispatch::Ended(GestureKind::Drag);
        }
        if matches!(self.resize.end(), GestureOutcome::Ended) {
            return PointerDispatch::Ended(GestureKind::Resize);
        }
        PointerDispatch::Ignored(PointerIgnoredReason::NoGesture)
    }

    fn aspect_ratio(&self, displayed: Size) -> f64 {
        self.natural_size
            .or(Some(displayed))
            .and_then(|s| s.aspect_ratio())
            .unwrap_or(1.0)
    }

    /// Hit-test a point against the active overlay's handles and body.
    ///
    /// Handles are `handle_size` squares centred on each corner and win over
    /// the body.
    #[must_use]
    pub fn hit_test(&self, x: f64, y: f64, handle_size: f64) -> Option<HitTarget> {
        let geometry = self.store.active_geometry()?.geometry;
        let left = f64::from(geometry.position.x);
        let top = f64::from(geometry.position.y);
        let right = left + f64::from(geometry.size.width);
        let bottom = top + f64::from(geometry.size.height);
        let half = handle_size / 2.0;
        let near = |px: f64, py: f64| (x - px).abs() <= half && (y - py).abs() <= half;

        Corner::ALL
            .into_iter()
            .find(|corner| match corner {
                Corner::TopLeft => near(left, top),
                Corner::TopRight => near(right, top),
                Corner::BottomRight => near(right, bottom),
                Corner::BottomLeft => near(left, bottom),
            })
            .map(HitTarget::Handle)
            .or_else(|| {
                (x >= left && x <= right && y >= top && y <= bottom).then_some(HitTarget::Body)
            })
    }
}

impl<H: CaptureHost + ?Sized> std::fmt::Debug for OverlayController<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlayController")
            .field("active_gesture", &self.active_gesture())
            .field("natural_size", &self.natural_size)
            .finish()
    }
}

/// Drop the payload of a begin/end outcome.
fn discard<T>(outcome: GestureOutcome<T>) -> GestureOutcome<()> {
    match outcome {
        GestureOutcome::Started => GestureOutcome::Started,
        GestureOutcome::Updated(_) => GestureOutcome::Updated(()),
        GestureOutcome::Ended => GestureOutcome::Ended,
        GestureOutcome::Ignored(reason) => GestureOutcome::Ignored(reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OverlayConfig;
    use crate::model::ImageId;
    use ppx_core::{
        CaptureRequest, DeterministicClock, PointerPosition, Position, Viewport,
    };
    use pretty_assertions::assert_eq;
    use std::cell::Cell;

    #[derive(Default)]
    struct CountingHost {
        held: Cell<i32>,
    }

    impl CaptureHost for CountingHost {
        fn acquire(&self, _: CaptureRequest) {
            self.held.set(self.held.get() + 1);
        }
        fn release(&self, _: CaptureRequest) {
            self.held.set(self.held.get() - 1);
        }
    }

    fn setup(size: Size) -> (Rc<OverlayStore>, Rc<CountingHost>, OverlayController<CountingHost>) {
        let store = Rc::new(OverlayStore::new(
            OverlayConfig::default(),
            Rc::new(DeterministicClock::new()),
        ));
        store.set_viewport(Viewport::new(1280, 800));
        store.create_image(ImageId::new_v4(), "data:,", Position::ORIGIN, size);
        store.run_deferred();
        let host = Rc::new(CountingHost::default());
        let controller = OverlayController::new(Rc::clone(&store), Rc::clone(&host));
        (store, host, controller)
    }

    fn mouse(phase: PointerPhase, x: f64, y: f64) -> PointerEvent {
        PointerEvent::mouse(phase, x, y)
    }

    #[test]
    fn drag_commits_each_move() {
        let (store, host, mut c) = setup(Size::new(200, 100));
        assert_eq!(
            c.handle_pointer(mouse(PointerPhase::Down, 0.0, 0.0), Some(HitTarget::Body)),
            PointerDispatch::Started(GestureKind::Drag)
        );
        assert_eq!(host.held.get(), 1);
        c.handle_pointer(mouse(PointerPhase::Move, 60.0, 40.0), None);
        assert_eq!(store.position(), Some(Position::new(60, 40)));
        c.handle_pointer(mouse(PointerPhase::Move, 120.0, 80.0), None);
        assert_eq!(store.position(), Some(Position::new(120, 80)));
        assert_eq!(
            c.handle_pointer(mouse(PointerPhase::Up, 120.0, 80.0), None),
            PointerDispatch::Ended(GestureKind::Drag)
        );
        assert_eq!(host.held.get(), 0);
    }

    #[test]
    fn resize_uses_natural_aspect() {
        let (store, _host, mut c) = setup(Size::new(200, 100));
        c.set_natural_size(Some(Size::new(400, 200)));
        c.handle_pointer(
            mouse(PointerPhase::Down, 200.0, 100.0),
            Some(HitTarget::Handle(Corner::BottomRight)),
        );
        c.handle_pointer(mouse(PointerPhase::Move, 300.0, 300.0), None);
        assert_eq!(store.size(), Some(Size::new(300, 150)));
        assert_eq!(store.position(), Some(Position::ORIGIN));
    }

    #[test]
    fn one_gesture_at_a_time() {
        let (_store, host, mut c) = setup(Size::new(200, 100));
        c.handle_pointer(mouse(PointerPhase::Down, 0.0, 0.0), Some(HitTarget::Body));
        let second = c.handle_pointer(
            mouse(PointerPhase::Down, 200.0, 100.0),
            Some(HitTarget::Handle(Corner::BottomRight)),
        );
        assert_eq!(second, PointerDispatch::Ignored(PointerIgnoredReason::Busy));
        assert_eq!(host.held.get(), 1);
    }

    #[test]
    fn locked_blocks_drag_and_resize() {
        let (store, host, mut c) = setup(Size::new(200, 100));
        store.toggle_lock();
        let drag = c.handle_pointer(mouse(PointerPhase::Down, 0.0, 0.0), Some(HitTarget::Body));
        let resize = c.handle_pointer(
            mouse(PointerPhase::Down, 0.0, 0.0),
            Some(HitTarget::Handle(Corner::TopLeft)),
        );
        assert_eq!(drag, PointerDispatch::Ignored(PointerIgnoredReason::Locked));
        assert_eq!(resize, PointerDispatch::Ignored(PointerIgnoredReason::Locked));
        assert_eq!(host.held.get(), 0);
        assert_eq!(store.position(), Some(Position::ORIGIN));
        assert_eq!(store.size(), Some(Size::new(200, 100)));
    }

    #[test]
    fn lock_mid_drag_drops_moves_and_cancel_releases() {
        let (store, host, mut c) = setup(Size::new(200, 100));
        c.handle_pointer(mouse(PointerPhase::Down, 0.0, 0.0), Some(HitTarget::Body));
        c.handle_pointer(mouse(PointerPhase::Move, 10.0, 10.0), None);
        store.set_locked(true);
        c.handle_pointer(mouse(PointerPhase::Move, 50.0, 50.0), None);
        assert_eq!(store.position(), Some(Position::new(10, 10)));
        c.handle_pointer(PointerEvent::touch(PointerPhase::Cancel, None), None);
        assert_eq!(host.held.get(), 0);
        assert_eq!(c.active_gesture(), None);
    }

    #[test]
    fn no_active_image_ignores_down() {
        let (store, host, mut c) = setup(Size::new(200, 100));
        store.hide_overlay();
        let out = c.handle_pointer(mouse(PointerPhase::Down, 0.0, 0.0), Some(HitTarget::Body));
        assert_eq!(
            out,
            PointerDispatch::Ignored(PointerIgnoredReason::NoActiveImage)
        );
        assert_eq!(host.held.get(), 0);
    }

    #[test]
    fn centered_drag_moves_only_y() {
        let (store, _host, mut c) = setup(Size::new(200, 100));
        store.toggle_center();
        store.run_deferred();
        let x = store.position().map(|p| p.x);
        c.handle_pointer(mouse(PointerPhase::Down, 600.0, 10.0), Some(HitTarget::Body));
        c.handle_pointer(
            PointerEvent::touch(PointerPhase::Move, Some(PointerPosition::new(900.0, 60.0))),
            None,
        );
        assert_eq!(store.position().map(|p| p.x), x);
        assert_eq!(store.position().map(|p| p.y), Some(50));
    }

    #[test]
    fn drag_move_without_position_keeps_session() {
        let (store, host, mut c) = setup(Size::new(200, 100));
        c.handle_pointer(mouse(PointerPhase::Down, 0.0, 0.0), Some(HitTarget::Body));
        c.handle_pointer(mouse(PointerPhase::Move, 30.0, 30.0), None);
        let out = c.handle_pointer(PointerEvent::touch(PointerPhase::Move, None), None);
        assert_eq!(
            out,
            PointerDispatch::Ignored(PointerIgnoredReason::Gesture(
                GestureIgnoredReason::MissingPosition
            ))
        );
        assert_eq!(store.position(), Some(Position::new(30, 30)));
        assert_eq!(c.active_gesture(), Some(GestureKind::Drag));
        assert_eq!(host.held.get(), 1);
    }

    #[test]
    fn viewport_reclamp_mid_drag_keeps_start_snapshot() {
        let (store, _host, mut c) = setup(Size::new(200, 100));
        c.handle_pointer(mouse(PointerPhase::Down, 0.0, 0.0), Some(HitTarget::Body));
        c.handle_pointer(mouse(PointerPhase::Move, 1000.0, 600.0), None);
        assert_eq!(store.position(), Some(Position::new(1000, 600)));

        store.set_viewport(Viewport::new(800, 600));
        store.run_deferred();
        assert_eq!(store.position(), Some(Position::new(600, 500)));
        assert_eq!(c.active_gesture(), Some(GestureKind::Drag));

        // Still measured from the drag's starting position, not the clamp.
        assert_eq!(
            c.handle_pointer(mouse(PointerPhase::Move, 100.0, 50.0), None),
            PointerDispatch::Committed(OverlayGeometry {
                position: Position::new(100, 50),
                size: Size::new(200, 100),
            })
        );
        assert_eq!(store.position(), Some(Position::new(100, 50)));
    }

    #[test]
    fn hit_test_prefers_handles() {
        let (store, _host, c) = setup(Size::new(200, 100));
        store.set_position(Position::new(100, 100));
        assert_eq!(
            c.hit_test(101.0, 99.0, 12.0),
            Some(HitTarget::Handle(Corner::TopLeft))
        );
        assert_eq!(
            c.hit_test(300.0, 200.0, 12.0),
            Some(HitTarget::Handle(Corner::BottomRight))
        );
        assert_eq!(c.hit_test(200.0, 150.0, 12.0), Some(HitTarget::Body));
        assert_eq!(c.hit_test(10.0, 10.0, 12.0), None);
    }
}
