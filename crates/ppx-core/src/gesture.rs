#![forbid(unsafe_code)]

//! Drag and resize gesture controllers with scoped pointer capture.
//!
//! A gesture begins on pointer-down, receives moves, and ends on up/cancel.
//! At begin time the controller records an immutable start snapshot and
//! acquires a [`CaptureLease`] from the [`CaptureHost`]. The lease holds the
//! page-level suppressions (text selection, touch scrolling, pointer events
//! on the page for drags) and releases them when dropped, so every exit path
//! (normal end, cancel, controller teardown) restores the page.
//!
//! # Invariants
//!
//! 1. At most one session per controller; a second begin is ignored.
//! 2. The start snapshot never changes during a session; every update is
//!    computed from it, not from intermediate results.
//! 3. Every acquired capture is released exactly once.
//!
//! # Failure Modes
//!
//! - Begin while disabled (locked overlay): ignored with
//!   [`GestureIgnoredReason::Disabled`], nothing acquired.
//! - Move without a usable position (empty touch list, non-finite
//!   coordinates): ignored, session stays active.

use std::fmt;
use std::rc::Rc;

use crate::event::PointerKind;
use crate::geometry::{
    Corner, DragConstraints, OverlayGeometry, PointerPosition, Position, ResizeLimits, Size,
    compute_drag_position, compute_resize_with_limits,
};

/// Which gesture a capture belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GestureKind {
    Drag,
    Resize,
}

impl fmt::Display for GestureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Drag => f.write_str("drag"),
            Self::Resize => f.write_str("resize"),
        }
    }
}

/// Page-level side effects requested for the lifetime of a gesture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CaptureRequest {
    pub gesture: GestureKind,
    pub pointer: PointerKind,
    /// Disable text selection on the page.
    pub suppress_selection: bool,
    /// Disable touch scrolling / panning on the page.
    pub suppress_touch_scroll: bool,
    /// Stop the page under the overlay from receiving pointer events.
    pub block_page_pointer_events: bool,
}

impl CaptureRequest {
    #[must_use]
    pub const fn for_drag(pointer: PointerKind) -> Self {
        Self {
            gesture: GestureKind::Drag,
            pointer,
            suppress_selection: true,
            suppress_touch_scroll: matches!(pointer, PointerKind::Touch),
            block_page_pointer_events: true,
        }
    }

    #[must_use]
    pub const fn for_resize(pointer: PointerKind) -> Self {
        Self {
            gesture: GestureKind::Resize,
            pointer,
            suppress_selection: true,
            suppress_touch_scroll: matches!(pointer, PointerKind::Touch),
            block_page_pointer_events: false,
        }
    }
}

/// Applies and reverts page-level capture side effects.
///
/// Implemented by the DOM layer in the browser build and by recording fakes
/// in tests. `release` is always called with the same request that was
/// passed to `acquire`.
pub trait CaptureHost {
    fn acquire(&self, request: CaptureRequest);
    fn release(&self, request: CaptureRequest);
}

/// RAII guard for an acquired capture. Releases on drop.
#[must_use = "dropping the lease releases the capture immediately"]
pub struct CaptureLease<H: CaptureHost + ?Sized> {
    host: Rc<H>,
    request: CaptureRequest,
}

impl<H: CaptureHost + ?Sized> CaptureLease<H> {
    /// Acquire `request` on `host`.
    pub fn acquire(host: Rc<H>, request: CaptureRequest) -> Self {
        host.acquire(request);
        tracing::trace!(gesture = %request.gesture, "capture acquired");
        Self { host, request }
    }

    #[must_use]
    pub fn request(&self) -> CaptureRequest {
        self.request
    }
}

impl<H: CaptureHost + ?Sized> Drop for CaptureLease<H> {
    fn drop(&mut self) {
        self.host.release(self.request);
        tracing::trace!(gesture = %self.request.gesture, "capture released");
    }
}

impl<H: CaptureHost + ?Sized> fmt::Debug for CaptureLease<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureLease")
            .field("request", &self.request)
            .finish()
    }
}

/// Deterministic reason why a gesture signal was ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GestureIgnoredReason {
    /// The overlay is locked.
    Disabled,
    /// Another session on this controller is in progress.
    AlreadyActive,
    /// Update or end without a session.
    NotActive,
    /// Event had no usable (present and finite) position.
    MissingPosition,
}

/// Outcome of one controller call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GestureOutcome<T> {
    Started,
    Updated(T),
    Ended,
    Ignored(GestureIgnoredReason),
}

impl<T> GestureOutcome<T> {
    /// The updated value, if this outcome carries one.
    pub fn into_update(self) -> Option<T> {
        match self {
            Self::Updated(value) => Some(value),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_ignored(&self) -> bool {
        matches!(self, Self::Ignored(_))
    }
}

/// Immutable start state for a drag session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DragSnapshot {
    pub pointer: PointerKind,
    pub pointer_start: PointerPosition,
    pub start_position: Position,
}

struct DragSession<H: CaptureHost + ?Sized> {
    snapshot: DragSnapshot,
    _lease: CaptureLease<H>,
}

/// Drag gesture controller.
pub struct DragController<H: CaptureHost + ?Sized> {
    host: Rc<H>,
    session: Option<DragSession<H>>,
}

impl<H: CaptureHost + ?Sized> DragController<H> {
    pub fn new(host: Rc<H>) -> Self {
        Self {
            host,
            session: None,
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    #[must_use]
    pub fn snapshot(&self) -> Option<DragSnapshot> {
        self.session.as_ref().map(|s| s.snapshot)
    }

    /// Start a drag at `at` for an overlay currently at `start_position`.
    pub fn begin(
        &mut self,
        pointer: PointerKind,
        at: Option<PointerPosition>,
        start_position: Position,
        disabled: bool,
    ) -> GestureOutcome<Position> {
        if disabled {
            return GestureOutcome::Ignored(GestureIgnoredReason::Disabled);
        }
        if self.session.is_some() {
            return GestureOutcome::Ignored(GestureIgnoredReason::AlreadyActive);
        }
        let Some(at) = at.filter(PointerPosition::is_finite) else {
            return GestureOutcome::Ignored(GestureIgnoredReason::MissingPosition);
        };
        let lease = CaptureLease::acquire(Rc::clone(&self.host), CaptureRequest::for_drag(pointer));
        self.session = Some(DragSession {
            snapshot: DragSnapshot {
                pointer,
                pointer_start: at,
                start_position,
            },
            _lease: lease,
        });
        tracing::debug!(x = start_position.x, y = start_position.y, "drag started");
        GestureOutcome::Started
    }

    /// Compute the overlay position for a pointer at `at`.
    pub fn update(
        &mut self,
        at: Option<PointerPosition>,
        constraints: &DragConstraints,
    ) -> GestureOutcome<Position> {
        let Some(session) = self.session.as_ref() else {
            return GestureOutcome::Ignored(GestureIgnoredReason::NotActive);
        };
        let Some(at) = at.filter(PointerPosition::is_finite) else {
            return GestureOutcome::Ignored(GestureIgnoredReason::MissingPosition);
        };
        let snap = session.snapshot;
        GestureOutcome::Updated(compute_drag_position(
            snap.start_position,
            snap.pointer_start,
            at,
            constraints,
        ))
    }

    /// End the session (pointer up or cancel) and release the capture.
    pub fn end(&mut self) -> GestureOutcome<Position> {
        match self.session.take() {
            Some(_) => {
                tracing::debug!("drag ended");
                GestureOutcome::Ended
            }
            None => GestureOutcome::Ignored(GestureIgnoredReason::NotActive),
        }
    }
}

impl<H: CaptureHost + ?Sized> fmt::Debug for DragController<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DragController")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

/// Immutable start state for a resize session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResizeSnapshot {
    pub corner: Corner,
    pub pointer: PointerKind,
    pub pointer_start: PointerPosition,
    pub start_size: Size,
    pub start_position: Position,
    pub natural_aspect_ratio: f64,
}

struct ResizeSession<H: CaptureHost + ?Sized> {
    snapshot: ResizeSnapshot,
    _lease: CaptureLease<H>,
}

/// Corner-resize gesture controller.
pub struct ResizeController<H: CaptureHost + ?Sized> {
    host: Rc<H>,
    limits: ResizeLimits,
    session: Option<ResizeSession<H>>,
}

impl<H: CaptureHost + ?Sized> ResizeController<H> {
    pub fn new(host: Rc<H>) -> Self {
        Self::with_limits(host, ResizeLimits::default())
    }

    pub fn with_limits(host: Rc<H>, limits: ResizeLimits) -> Self {
        Self {
            host,
            limits,
            session: None,
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    #[must_use]
    pub fn snapshot(&self) -> Option<ResizeSnapshot> {
        self.session.as_ref().map(|s| s.snapshot)
    }

    /// Start a resize from `corner`.
    ///
    /// `natural_aspect_ratio` is the bitmap's natural width over height; it
    /// is captured once so the ratio cannot drift during the session.
    pub fn begin(
        &mut self,
        corner: Corner,
        pointer: PointerKind,
        at: Option<PointerPosition>,
        start: OverlayGeometry,
        natural_aspect_ratio: f64,
        disabled: bool,
    ) -> GestureOutcome<OverlayGeometry> {
        if disabled {
            return GestureOutcome::Ignored(GestureIgnoredReason::Disabled);
        }
        if self.session.is_some() {
            return GestureOutcome::Ignored(GestureIgnoredReason::AlreadyActive);
        }
        let Some(at) = at.filter(PointerPosition::is_finite) else {
            return GestureOutcome::Ignored(GestureIgnoredReason::MissingPosition);
        };
        let lease =
            CaptureLease::acquire(Rc::clone(&self.host), CaptureRequest::for_resize(pointer));
        self.session = Some(ResizeSession {
            snapshot: ResizeSnapshot {
                corner,
                pointer,
                pointer_start: at,
                start_size: start.size,
                start_position: start.position,
                natural_aspect_ratio,
            },
            _lease: lease,
        });
        tracing::debug!(corner = corner.label(), "resize started");
        GestureOutcome::Started
    }

    /// Compute the overlay geometry for a pointer at `at`.
    pub fn update(&mut self, at: Option<PointerPosition>) -> GestureOutcome<OverlayGeometry> {
        let Some(session) = self.session.as_ref() else {
            return GestureOutcome::Ignored(GestureIgnoredReason::NotActive);
        };
        let Some(at) = at.filter(PointerPosition::is_finite) else {
            return GestureOutcome::Ignored(GestureIgnoredReason::MissingPosition);
        };
        let snap = session.snapshot;
        GestureOutcome::Updated(compute_resize_with_limits(
            snap.corner,
            snap.start_size,
            snap.start_position,
            at.delta_from(snap.pointer_start),
            snap.natural_aspect_ratio,
            self.limits,
        ))
    }

    pub fn end(&mut self) -> GestureOutcome<OverlayGeometry> {
        match self.session.take() {
            Some(_) => {
                tracing::debug!("resize ended");
                GestureOutcome::Ended
            }
            None => GestureOutcome::Ignored(GestureIgnoredReason::NotActive),
        }
    }
}

impl<H: CaptureHost + ?Sized> fmt::Debug for ResizeController<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResizeController")
            .field("limits", &self.limits)
            .field("snapshot", &self.snapshot())
            .finish()
    }
}
