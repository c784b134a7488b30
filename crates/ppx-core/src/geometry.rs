#![forbid(unsafe_code)]

//! Geometry engine: pure functions for overlay placement.
//!
//! Everything in this module is side-effect free. Gesture controllers call
//! into it with immutable start snapshots; the store commits the results.
//!
//! # Coordinate model
//!
//! Positions are integer CSS-pixel offsets relative to the page viewport
//! (origin top-left). Sizes are integer CSS pixels. Pointer coordinates are
//! `f64` because browsers report fractional client coordinates; results are
//! rounded once, at the end of each computation.
//!
//! # Invariants
//!
//! 1. [`compute_resize`] keeps the corner opposite to the dragged handle
//!    stationary (exactly, in integer pixels).
//! 2. [`compute_resize`] always yields `width == round(height * aspect)`.
//! 3. [`compute_drag_position`] never moves X while `centered` is set.

/// Minimum overlay height produced by a resize gesture.
pub const MIN_OVERLAY_HEIGHT: u32 = 50;

/// Lower bound for the resize scale factor relative to the start size.
pub const MIN_RESIZE_SCALE: f64 = 0.1;

/// Tolerance (device pixels) for matching a bitmap to the physical screen size.
const FULL_SCREEN_TOLERANCE: f64 = 100.0;

/// Tighter tolerance used when one axis matches the physical screen exactly.
const FULL_SCREEN_EDGE_TOLERANCE: f64 = 50.0;

/// Partial screenshots larger than this (CSS px times DPR) are treated as high-DPI.
const PARTIAL_SCREENSHOT_MIN_WIDTH: f64 = 600.0;
const PARTIAL_SCREENSHOT_MIN_HEIGHT: f64 = 400.0;

/// Share of the viewport a non-screenshot image may occupy.
const VIEWPORT_FIT_RATIO: f64 = 0.8;
const VIEWPORT_FLOOR_WIDTH: f64 = 800.0;
const VIEWPORT_FLOOR_HEIGHT: f64 = 600.0;

/// Absolute cap for non-screenshot images.
const ABSOLUTE_MAX_WIDTH: f64 = 1200.0;
const ABSOLUTE_MAX_HEIGHT: f64 = 900.0;

/// Integer pixel offset relative to the page viewport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Position {
    #[cfg_attr(feature = "serde", serde(deserialize_with = "px::signed"))]
    pub x: i32,
    #[cfg_attr(feature = "serde", serde(deserialize_with = "px::signed"))]
    pub y: i32,
}

impl Position {
    /// The top-left corner of the viewport.
    pub const ORIGIN: Self = Self { x: 0, y: 0 };

    #[inline]
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Offset by `(dx, dy)`, saturating at the `i32` range.
    #[inline]
    #[must_use]
    pub const fn offset(self, dx: i32, dy: i32) -> Self {
        Self {
            x: self.x.saturating_add(dx),
            y: self.y.saturating_add(dy),
        }
    }
}

/// Integer pixel dimensions of an overlay or bitmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Size {
    #[cfg_attr(feature = "serde", serde(deserialize_with = "px::unsigned"))]
    pub width: u32,
    #[cfg_attr(feature = "serde", serde(deserialize_with = "px::unsigned"))]
    pub height: u32,
}

impl Size {
    #[inline]
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// True if either dimension is zero.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// `width / height`, or `None` for an empty size.
    #[inline]
    #[must_use]
    pub fn aspect_ratio(&self) -> Option<f64> {
        (!self.is_empty()).then(|| f64::from(self.width) / f64::from(self.height))
    }
}

/// Dimensions of the visible page viewport in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    #[inline]
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Largest X that keeps an element of `element` width fully visible.
    #[inline]
    #[must_use]
    pub fn max_x(&self, element: Size) -> i32 {
        max_offset(self.width, element.width)
    }

    /// Largest Y that keeps an element of `element` height fully visible.
    #[inline]
    #[must_use]
    pub fn max_y(&self, element: Size) -> i32 {
        max_offset(self.height, element.height)
    }

    /// The viewport as a [`Size`] bound.
    #[inline]
    #[must_use]
    pub const fn as_size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

/// Client-space pointer coordinates as reported by the browser.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PointerPosition {
    pub x: f64,
    pub y: f64,
}

impl PointerPosition {
    #[inline]
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    #[inline]
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    /// Delta from `origin` to `self`.
    #[inline]
    #[must_use]
    pub fn delta_from(self, origin: PointerPosition) -> (f64, f64) {
        (self.x - origin.x, self.y - origin.y)
    }
}

/// Resize handle anchored at one corner of the overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub enum Corner {
    TopLeft,
    TopRight,
    BottomRight,
    BottomLeft,
}

impl Corner {
    pub const ALL: [Corner; 4] = [
        Corner::TopLeft,
        Corner::TopRight,
        Corner::BottomRight,
        Corner::BottomLeft,
    ];

    /// Sign applied to a pointer delta so that positive means "grow".
    const fn growth_signs(self) -> (f64, f64) {
        match self {
            Self::TopLeft => (-1.0, -1.0),
            Self::TopRight => (1.0, -1.0),
            Self::BottomRight => (1.0, 1.0),
            Self::BottomLeft => (-1.0, 1.0),
        }
    }

    /// Whether the right edge stays fixed (the handle is on the left side).
    const fn anchors_right(self) -> bool {
        matches!(self, Self::TopLeft | Self::BottomLeft)
    }

    /// Whether the bottom edge stays fixed (the handle is on the top side).
    const fn anchors_bottom(self) -> bool {
        matches!(self, Self::TopLeft | Self::TopRight)
    }

    /// Stable lowercase label used in logs and the JS bridge.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::TopLeft => "topLeft",
            Self::TopRight => "topRight",
            Self::BottomRight => "bottomRight",
            Self::BottomLeft => "bottomLeft",
        }
    }
}

/// Nudge direction for keyboard / button moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    #[inline]
    #[must_use]
    pub const fn is_horizontal(self) -> bool {
        matches!(self, Self::Left | Self::Right)
    }

    /// Apply a `step`-pixel move in this direction.
    #[must_use]
    pub const fn apply(self, position: Position, step: i32) -> Position {
        match self {
            Self::Up => position.offset(0, -step),
            Self::Down => position.offset(0, step),
            Self::Left => position.offset(-step, 0),
            Self::Right => position.offset(step, 0),
        }
    }
}

/// Position plus size of the overlay box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct OverlayGeometry {
    pub position: Position,
    pub size: Size,
}

/// Constraints applied while dragging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DragConstraints {
    pub viewport: Viewport,
    /// Size of the element being dragged.
    pub element: Size,
    /// Skip viewport clamping on both axes.
    pub allow_outside_viewport: bool,
    /// X is pinned to its start value.
    pub centered: bool,
}

/// Limits applied while resizing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResizeLimits {
    pub min_height: u32,
    pub min_scale: f64,
}

impl Default for ResizeLimits {
    fn default() -> Self {
        Self {
            min_height: MIN_OVERLAY_HEIGHT,
            min_scale: MIN_RESIZE_SCALE,
        }
    }
}

/// Screen and viewport metrics used to normalize pasted bitmaps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayMetrics {
    pub screen_width: u32,
    pub screen_height: u32,
    pub device_pixel_ratio: f64,
    pub viewport: Viewport,
}

impl DisplayMetrics {
    /// Device pixel ratio, falling back to 1 for non-finite or non-positive input.
    #[must_use]
    pub fn effective_dpr(&self) -> f64 {
        if self.device_pixel_ratio.is_finite() && self.device_pixel_ratio > 0.0 {
            self.device_pixel_ratio
        } else {
            1.0
        }
    }
}

#[inline]
fn max_offset(container: u32, element: u32) -> i32 {
    let diff = i64::from(container) - i64::from(element);
    diff.clamp(0, i64::from(i32::MAX)) as i32
}

#[inline]
fn round_px(value: f64) -> i32 {
    value.round() as i32
}

#[inline]
fn round_dim(value: f64) -> u32 {
    value.round().max(1.0) as u32
}

/// X offset that centres an element of `element_width` in the viewport.
#[must_use]
pub fn centered_x(viewport_width: u32, element_width: u32) -> i32 {
    round_px((f64::from(viewport_width) - f64::from(element_width)) / 2.0)
}

/// New overlay position for a drag from `drag_start` to `current`.
///
/// `new = start + (current - drag_start)`, clamped per axis to
/// `[0, viewport - element]` unless `allow_outside_viewport` is set. While
/// `centered`, X stays at `start.x` regardless of the pointer.
#[must_use]
pub fn compute_drag_position(
    start: Position,
    drag_start: PointerPosition,
    current: PointerPosition,
    constraints: &DragConstraints,
) -> Position {
    if !drag_start.is_finite() || !current.is_finite() {
        return start;
    }
    let (dx, dy) = current.delta_from(drag_start);
    let raw_x = round_px(f64::from(start.x) + dx);
    let raw_y = round_px(f64::from(start.y) + dy);

    let clamp = |value: i32, max: i32| {
        if constraints.allow_outside_viewport {
            value
        } else {
            value.clamp(0, max)
        }
    };

    let x = if constraints.centered {
        start.x
    } else {
        clamp(raw_x, constraints.viewport.max_x(constraints.element))
    };
    let y = clamp(raw_y, constraints.viewport.max_y(constraints.element));
    Position::new(x, y)
}

/// Aspect-preserving resize from one corner with default [`ResizeLimits`].
#[must_use]
pub fn compute_resize(
    corner: Corner,
    start_size: Size,
    start_position: Position,
    pointer_delta: (f64, f64),
    natural_aspect_ratio: f64,
) -> OverlayGeometry {
    compute_resize_with_limits(
        corner,
        start_size,
        start_position,
        pointer_delta,
        natural_aspect_ratio,
        ResizeLimits::default(),
    )
}

/// Aspect-preserving resize from one corner.
///
/// Scale factors are derived independently from the width and height deltas
/// implied by `corner`; the smaller one wins. Height is floored at
/// `limits.min_height`, width follows from `natural_aspect_ratio`. The corner
/// opposite to `corner` stays fixed.
#[must_use]
pub fn compute_resize_with_limits(
    corner: Corner,
    start_size: Size,
    start_position: Position,
    pointer_delta: (f64, f64),
    natural_aspect_ratio: f64,
    limits: ResizeLimits,
) -> OverlayGeometry {
    let unchanged = OverlayGeometry {
        position: start_position,
        size: start_size,
    };
    let (dx, dy) = pointer_delta;
    if start_size.is_empty() || !dx.is_finite() || !dy.is_finite() {
        return unchanged;
    }

    let aspect = if natural_aspect_ratio.is_finite() && natural_aspect_ratio > 0.0 {
        natural_aspect_ratio
    } else {
        match start_size.aspect_ratio() {
            Some(ratio) => ratio,
            None => return unchanged,
        }
    };

    let start_w = f64::from(start_size.width);
    let start_h = f64::from(start_size.height);
    let (sign_x, sign_y) = corner.growth_signs();

    let scale_from_height = (start_h + sign_y * dy) / start_h;
    let scale_from_width = (start_w + sign_x * dx) / start_w;
    let scale = scale_from_height.min(scale_from_width).max(limits.min_scale);

    let height = round_dim((start_h * scale).max(f64::from(limits.min_height)));
    let width = round_dim(f64::from(height) * aspect);

    let x = if corner.anchors_right() {
        let right = i64::from(start_position.x) + i64::from(start_size.width);
        clamp_i32(right - i64::from(width))
    } else {
        start_position.x
    };
    let y = if corner.anchors_bottom() {
        let bottom = i64::from(start_position.y) + i64::from(start_size.height);
        clamp_i32(bottom - i64::from(height))
    } else {
        start_position.y
    };

    OverlayGeometry {
        position: Position::new(x, y),
        size: Size::new(width, height),
    }
}

#[inline]
fn clamp_i32(value: i64) -> i32 {
    value.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

/// Pull `position` back inside the viewport after it shrank.
///
/// Only coordinates beyond the far edge are corrected (an overlay dragged to
/// a negative offset with `allow_outside_viewport` stays there). With
/// `skip_x`, X is left alone. Returns `None` when nothing needs to change.
#[must_use]
pub fn clamp_into_viewport(
    position: Position,
    element: Size,
    viewport: Viewport,
    skip_x: bool,
) -> Option<Position> {
    let mut corrected = position;
    if !skip_x {
        corrected.x = corrected.x.min(viewport.max_x(element));
    }
    corrected.y = corrected.y.min(viewport.max_y(element));
    (corrected != position).then_some(corrected)
}

/// Shrink `size` to fit inside `bounds`, preserving aspect ratio.
///
/// Width is constrained first, then height; sizes already inside `bounds`
/// are returned unchanged.
#[must_use]
pub fn fit_within(size: Size, bounds: Size) -> Size {
    let Some(aspect) = size.aspect_ratio() else {
        return size;
    };
    let mut width = f64::from(size.width);
    let mut height = f64::from(size.height);

    if bounds.width > 0 && width > f64::from(bounds.width) {
        width = f64::from(bounds.width);
        height = width / aspect;
    }
    if bounds.height > 0 && height > f64::from(bounds.height) {
        height = f64::from(bounds.height);
        width = height * aspect;
    }
    Size::new(round_dim(width), round_dim(height))
}

/// How a bitmap was classified by [`normalize_image_dimensions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitmapClass {
    /// Device-pixel screenshot of the whole screen.
    FullScreenHighDpi,
    /// Device-pixel screenshot of part of the screen.
    PartialHighDpi,
    /// Anything else; fitted to the viewport.
    Regular,
}

/// Classify a bitmap of `natural` device pixels against the display.
#[must_use]
pub fn classify_bitmap(natural: Size, metrics: &DisplayMetrics) -> BitmapClass {
    let dpr = metrics.effective_dpr();
    let width = f64::from(natural.width);
    let height = f64::from(natural.height);
    let physical_w = f64::from(metrics.screen_width) * dpr;
    let physical_h = f64::from(metrics.screen_height) * dpr;

    let near_screen = (width - physical_w).abs() < FULL_SCREEN_TOLERANCE
        && (height - physical_h).abs() < FULL_SCREEN_TOLERANCE;
    let exact_edge = dpr > 1.0
        && ((width == physical_w && height == physical_h)
            || (width == physical_w && (height - physical_h).abs() < FULL_SCREEN_EDGE_TOLERANCE)
            || (height == physical_h && (width - physical_w).abs() < FULL_SCREEN_EDGE_TOLERANCE));
    let full_screen = near_screen || exact_edge;

    if full_screen && dpr > 1.0 {
        return BitmapClass::FullScreenHighDpi;
    }

    let partial = dpr > 1.0
        && !full_screen
        && width % dpr == 0.0
        && height % dpr == 0.0
        && (width > PARTIAL_SCREENSHOT_MIN_WIDTH * dpr
            || height > PARTIAL_SCREENSHOT_MIN_HEIGHT * dpr);
    if partial {
        BitmapClass::PartialHighDpi
    } else {
        BitmapClass::Regular
    }
}

/// Convert a bitmap's natural dimensions to a sensible CSS-pixel display size.
///
/// High-DPI screenshots (full or partial) are divided by the device pixel
/// ratio. Everything else is scaled to fit within 80% of the viewport (but
/// never below `min(800, vw) x min(600, vh)`) and then capped at 1200x900.
/// Aspect ratio is preserved throughout.
#[must_use]
pub fn normalize_image_dimensions(natural: Size, metrics: &DisplayMetrics) -> Size {
    if natural.is_empty() {
        return natural;
    }
    let dpr = metrics.effective_dpr();
    let mut width = f64::from(natural.width);
    let mut height = f64::from(natural.height);

    match classify_bitmap(natural, metrics) {
        BitmapClass::FullScreenHighDpi | BitmapClass::PartialHighDpi => {
            width = (width / dpr).round();
            height = (height / dpr).round();
        }
        BitmapClass::Regular => {
            let vw = f64::from(metrics.viewport.width);
            let vh = f64::from(metrics.viewport.height);
            let max_w = (vw * VIEWPORT_FIT_RATIO).max(VIEWPORT_FLOOR_WIDTH.min(vw));
            let max_h = (vh * VIEWPORT_FIT_RATIO).max(VIEWPORT_FLOOR_HEIGHT.min(vh));
            if max_w > 0.0 && max_h > 0.0 && (width > max_w || height > max_h) {
                let scale = (max_w / width).min(max_h / height);
                width = (width * scale).round();
                height = (height * scale).round();
            }
            if width > ABSOLUTE_MAX_WIDTH || height > ABSOLUTE_MAX_HEIGHT {
                let scale = (ABSOLUTE_MAX_WIDTH / width).min(ABSOLUTE_MAX_HEIGHT / height);
                width = (width * scale).round();
                height = (height * scale).round();
            }
        }
    }

    Size::new(round_dim(width), round_dim(height))
}

/// Lenient pixel deserializers: stored values written by older builds may be
/// fractional, so any JSON number is accepted and rounded.
#[cfg(feature = "serde")]
mod px {
    use serde::{Deserialize, Deserializer};

    pub(super) fn signed<'de, D: Deserializer<'de>>(de: D) -> Result<i32, D::Error> {
        let value = f64::deserialize(de)?;
        if !value.is_finite() {
            return Err(serde::de::Error::custom("non-finite pixel value"));
        }
        Ok(value.round().clamp(f64::from(i32::MIN), f64::from(i32::MAX)) as i32)
    }

    pub(super) fn unsigned<'de, D: Deserializer<'de>>(de: D) -> Result<u32, D::Error> {
        let value = f64::deserialize(de)?;
        if !value.is_finite() {
            return Err(serde::de::Error::custom("non-finite pixel value"));
        }
        Ok(value.round().clamp(0.0, f64::from(u32::MAX)) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn constraints(viewport: (u32, u32), element: (u32, u32)) -> DragConstraints {
        DragConstraints {
            viewport: Viewport::new(viewport.0, viewport.1),
            element: Size::new(element.0, element.1),
            allow_outside_viewport: false,
            centered: false,
        }
    }

    fn metrics(screen: (u32, u32), dpr: f64, viewport: (u32, u32)) -> DisplayMetrics {
        DisplayMetrics {
            screen_width: screen.0,
            screen_height: screen.1,
            device_pixel_ratio: dpr,
            viewport: Viewport::new(viewport.0, viewport.1),
        }
    }

    #[test]
    fn drag_applies_pointer_delta() {
        let pos = compute_drag_position(
            Position::new(10, 20),
            PointerPosition::new(100.0, 100.0),
            PointerPosition::new(130.0, 90.0),
            &constraints((1000, 800), (200, 100)),
        );
        assert_eq!(pos, Position::new(40, 10));
    }

    #[test]
    fn drag_clamps_to_viewport() {
        let c = constraints((500, 400), (200, 100));
        let far = compute_drag_position(
            Position::ORIGIN,
            PointerPosition::new(0.0, 0.0),
            PointerPosition::new(900.0, 900.0),
            &c,
        );
        assert_eq!(far, Position::new(300, 300));

        let negative = compute_drag_position(
            Position::new(5, 5),
            PointerPosition::new(50.0, 50.0),
            PointerPosition::new(0.0, 0.0),
            &c,
        );
        assert_eq!(negative, Position::ORIGIN);
    }

    #[test]
    fn drag_element_wider_than_viewport_pins_to_zero() {
        let pos = compute_drag_position(
            Position::ORIGIN,
            PointerPosition::new(0.0, 0.0),
            PointerPosition::new(40.0, 0.0),
            &constraints((300, 300), (600, 100)),
        );
        assert_eq!(pos.x, 0);
    }

    #[test]
    fn drag_outside_viewport_when_allowed() {
        let mut c = constraints((500, 400), (200, 100));
        c.allow_outside_viewport = true;
        let pos = compute_drag_position(
            Position::ORIGIN,
            PointerPosition::new(10.0, 10.0),
            PointerPosition::new(-40.0, 900.0),
            &c,
        );
        assert_eq!(pos, Position::new(-50, 890));
    }

    #[test]
    fn drag_centered_pins_x() {
        let mut c = constraints((1000, 800), (200, 100));
        c.centered = true;
        let pos = compute_drag_position(
            Position::new(400, 10),
            PointerPosition::new(0.0, 0.0),
            PointerPosition::new(250.0, 30.0),
            &c,
        );
        assert_eq!(pos, Position::new(400, 40));
    }

    #[test]
    fn drag_ignores_non_finite_pointer() {
        let start = Position::new(3, 4);
        let pos = compute_drag_position(
            start,
            PointerPosition::new(0.0, 0.0),
            PointerPosition::new(f64::NAN, 1.0),
            &constraints((100, 100), (10, 10)),
        );
        assert_eq!(pos, start);
    }

    #[test]
    fn resize_bottom_right_grows_from_origin() {
        let out = compute_resize(
            Corner::BottomRight,
            Size::new(200, 100),
            Position::new(10, 10),
            (100.0, 100.0),
            2.0,
        );
        // width scale 1.5, height scale 2.0 -> min wins.
        assert_eq!(out.size, Size::new(300, 150));
        assert_eq!(out.position, Position::new(10, 10));
    }

    #[test]
    fn resize_top_left_anchors_bottom_right() {
        let start_pos = Position::new(100, 100);
        let start_size = Size::new(200, 100);
        let out = compute_resize(Corner::TopLeft, start_size, start_pos, (-50.0, -50.0), 2.0);
        assert_eq!(out.size, Size::new(250, 125));
        assert_eq!(out.position.x + out.size.width as i32, 300);
        assert_eq!(out.position.y + out.size.height as i32, 200);
    }

    #[test]
    fn resize_top_right_anchors_left_and_bottom() {
        let out = compute_resize(
            Corner::TopRight,
            Size::new(200, 100),
            Position::new(50, 50),
            (40.0, -20.0),
            2.0,
        );
        assert_eq!(out.size, Size::new(240, 120));
        assert_eq!(out.position.x, 50);
        assert_eq!(out.position.y + out.size.height as i32, 150);
    }

    #[test]
    fn resize_bottom_left_anchors_right_and_top() {
        let out = compute_resize(
            Corner::BottomLeft,
            Size::new(200, 100),
            Position::new(50, 50),
            (20.0, 10.0),
            2.0,
        );
        // width shrinks to 180 (0.9), height grows to 110 (1.1) -> 0.9 wins.
        assert_eq!(out.size, Size::new(180, 90));
        assert_eq!(out.position.y, 50);
        assert_eq!(out.position.x + out.size.width as i32, 250);
    }

    #[test]
    fn resize_floors_height() {
        let out = compute_resize(
            Corner::BottomRight,
            Size::new(200, 100),
            Position::ORIGIN,
            (-190.0, -95.0),
            2.0,
        );
        assert_eq!(out.size.height, MIN_OVERLAY_HEIGHT);
        assert_eq!(out.size.width, 100);
    }

    #[test]
    fn resize_snaps_to_natural_aspect() {
        // Start size drifted from the natural 4:3 ratio.
        let out = compute_resize(
            Corner::BottomRight,
            Size::new(400, 250),
            Position::ORIGIN,
            (0.0, 0.0),
            4.0 / 3.0,
        );
        assert_eq!(out.size, Size::new(333, 250));
    }

    #[test]
    fn resize_falls_back_to_start_aspect() {
        let out = compute_resize(
            Corner::BottomRight,
            Size::new(300, 100),
            Position::ORIGIN,
            (300.0, 300.0),
            f64::NAN,
        );
        assert_eq!(out.size, Size::new(600, 200));
    }

    #[test]
    fn normalize_full_screen_retina() {
        let size = normalize_image_dimensions(
            Size::new(3840, 2160),
            &metrics((1920, 1080), 2.0, (1920, 1000)),
        );
        assert_eq!(size, Size::new(1920, 1080));
    }

    #[test]
    fn normalize_partial_retina() {
        let m = metrics((1440, 900), 2.0, (1440, 800));
        assert_eq!(
            classify_bitmap(Size::new(1600, 1000), &m),
            BitmapClass::PartialHighDpi
        );
        assert_eq!(
            normalize_image_dimensions(Size::new(1600, 1000), &m),
            Size::new(800, 500)
        );
    }

    #[test]
    fn normalize_small_retina_crop_is_regular() {
        let m = metrics((1440, 900), 2.0, (1440, 800));
        assert_eq!(
            classify_bitmap(Size::new(400, 300), &m),
            BitmapClass::Regular
        );
        assert_eq!(
            normalize_image_dimensions(Size::new(400, 300), &m),
            Size::new(400, 300)
        );
    }

    #[test]
    fn normalize_large_photo_fits_viewport_then_caps() {
        let m = metrics((2560, 1440), 1.0, (2000, 1200));
        // 80% of viewport is 1600x960; 4000x3000 -> 1280x960, then capped to 1200x900.
        assert_eq!(
            normalize_image_dimensions(Size::new(4000, 3000), &m),
            Size::new(1200, 900)
        );
    }

    #[test]
    fn normalize_uses_viewport_floor_on_small_windows() {
        let m = metrics((1280, 800), 1.0, (900, 700));
        // max_w = max(720, 800) = 800, max_h = max(560, 600) = 600.
        assert_eq!(
            normalize_image_dimensions(Size::new(1600, 900), &m),
            Size::new(800, 450)
        );
    }

    #[test]
    fn normalize_invalid_dpr_treated_as_one() {
        let m = metrics((1920, 1080), 0.0, (1920, 1080));
        assert_eq!(
            normalize_image_dimensions(Size::new(640, 480), &m),
            Size::new(640, 480)
        );
    }

    #[test]
    fn fit_within_preserves_aspect() {
        assert_eq!(
            fit_within(Size::new(2000, 1000), Size::new(1000, 1000)),
            Size::new(1000, 500)
        );
        assert_eq!(
            fit_within(Size::new(500, 2000), Size::new(1000, 1000)),
            Size::new(250, 1000)
        );
        assert_eq!(
            fit_within(Size::new(300, 200), Size::new(1000, 1000)),
            Size::new(300, 200)
        );
    }

    #[test]
    fn clamp_into_viewport_only_pulls_back() {
        let element = Size::new(200, 100);
        let viewport = Viewport::new(500, 300);
        assert_eq!(
            clamp_into_viewport(Position::new(400, 250), element, viewport, false),
            Some(Position::new(300, 200))
        );
        assert_eq!(
            clamp_into_viewport(Position::new(400, 250), element, viewport, true),
            Some(Position::new(400, 200))
        );
        assert_eq!(
            clamp_into_viewport(Position::new(-10, 0), element, viewport, false),
            None
        );
    }

    #[test]
    fn centered_x_rounds() {
        assert_eq!(centered_x(1000, 300), 350);
        assert_eq!(centered_x(1001, 300), 351);
        assert_eq!(centered_x(300, 500), -100);
    }

    #[test]
    fn direction_steps() {
        let p = Position::new(10, 10);
        assert_eq!(Direction::Up.apply(p, 1), Position::new(10, 9));
        assert_eq!(Direction::Down.apply(p, 1), Position::new(10, 11));
        assert_eq!(Direction::Left.apply(p, 1), Position::new(9, 10));
        assert_eq!(Direction::Right.apply(p, 1), Position::new(11, 10));
        assert!(Direction::Left.is_horizontal());
        assert!(!Direction::Up.is_horizontal());
    }

    fn corner_strategy() -> impl Strategy<Value = Corner> {
        prop_oneof![
            Just(Corner::TopLeft),
            Just(Corner::TopRight),
            Just(Corner::BottomRight),
            Just(Corner::BottomLeft),
        ]
    }

    proptest! {
        #[test]
        fn resize_keeps_opposite_corner_fixed(
            corner in corner_strategy(),
            w in 60u32..2000,
            h in 60u32..2000,
            x in -500i32..2000,
            y in -500i32..2000,
            dx in -3000.0f64..3000.0,
            dy in -3000.0f64..3000.0,
        ) {
            let start_size = Size::new(w, h);
            let start = Position::new(x, y);
            let aspect = f64::from(w) / f64::from(h);
            let out = compute_resize(corner, start_size, start, (dx, dy), aspect);

            let right = |p: Position, s: Size| p.x + s.width as i32;
            let bottom = |p: Position, s: Size| p.y + s.height as i32;
            match corner {
                Corner::TopLeft => {
                    prop_assert_eq!(right(out.position, out.size), right(start, start_size));
                    prop_assert_eq!(bottom(out.position, out.size), bottom(start, start_size));
                }
                Corner::TopRight => {
                    prop_assert_eq!(out.position.x, start.x);
                    prop_assert_eq!(bottom(out.position, out.size), bottom(start, start_size));
                }
                Corner::BottomRight => {
                    prop_assert_eq!(out.position, start);
                }
                Corner::BottomLeft => {
                    prop_assert_eq!(right(out.position, out.size), right(start, start_size));
                    prop_assert_eq!(out.position.y, start.y);
                }
            }
        }

        #[test]
        fn resize_preserves_natural_aspect(
            corner in corner_strategy(),
            nat_w in 1u32..4000,
            nat_h in 1u32..4000,
            h in 50u32..1500,
            dx in -2000.0f64..2000.0,
            dy in -2000.0f64..2000.0,
        ) {
            let aspect = f64::from(nat_w) / f64::from(nat_h);
            let start_size = Size::new(((f64::from(h) * aspect).round() as u32).max(1), h);
            let out = compute_resize(corner, start_size, Position::ORIGIN, (dx, dy), aspect);
            let expected_w = f64::from(out.size.height) * aspect;
            prop_assert!((f64::from(out.size.width) - expected_w).abs() <= 1.0);
            prop_assert!(out.size.height >= MIN_OVERLAY_HEIGHT);
        }

        #[test]
        fn drag_stays_inside_viewport(
            sx in 0i32..1000,
            sy in 0i32..1000,
            px in -5000.0f64..5000.0,
            py in -5000.0f64..5000.0,
            vw in 1u32..3000,
            vh in 1u32..3000,
            ew in 1u32..3000,
            eh in 1u32..3000,
        ) {
            let c = DragConstraints {
                viewport: Viewport::new(vw, vh),
                element: Size::new(ew, eh),
                allow_outside_viewport: false,
                centered: false,
            };
            let pos = compute_drag_position(
                Position::new(sx, sy),
                PointerPosition::new(0.0, 0.0),
                PointerPosition::new(px, py),
                &c,
            );
            prop_assert!(pos.x >= 0 && pos.x <= c.viewport.max_x(c.element));
            prop_assert!(pos.y >= 0 && pos.y <= c.viewport.max_y(c.element));
        }
    }
}
