#![forbid(unsafe_code)]

//! `ppx-core` holds the pure parts of the pixel-perfect overlay.
//!
//! - [`geometry`]: drag clamping, aspect-locked corner resize, viewport
//!   re-clamping, and high-DPI screenshot normalization.
//! - [`event`]: normalized mouse/touch pointer events.
//! - [`gesture`]: drag and resize controllers that own scoped page capture.
//! - [`clock`]: injectable time sources.
//!
//! Nothing here touches the DOM, storage, or messaging; the runtime and web
//! crates wire these pieces to the outside world.

pub mod clock;
pub mod event;
pub mod geometry;
pub mod gesture;

pub use clock::{Clock, DeterministicClock, SystemClock};
pub use event::{HitTarget, PointerEvent, PointerKind, PointerPhase};
pub use geometry::{
    Corner, Direction, DisplayMetrics, DragConstraints, OverlayGeometry, PointerPosition,
    Position, ResizeLimits, Size, Viewport,
};
pub use gesture::{
    CaptureHost, CaptureLease, CaptureRequest, DragController, GestureIgnoredReason,
    GestureKind, GestureOutcome, ResizeController,
};
