#![forbid(unsafe_code)]

//! Normalized pointer input.
//!
//! Mouse and touch events from the page are reduced to one [`PointerEvent`]
//! shape before they reach the gesture controllers. Touch events use the
//! first touch point; a touch event with no touch points carries no
//! position and is ignored by consumers.

use crate::geometry::{Corner, PointerPosition};

/// Input device that produced a pointer event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum PointerKind {
    Mouse,
    Touch,
}

/// Lifecycle phase of a pointer event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum PointerPhase {
    Down,
    Move,
    Up,
    /// `touchcancel` or a lost capture; ends the gesture without reverting.
    Cancel,
}

/// A single normalized pointer event in client coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PointerEvent {
    pub kind: PointerKind,
    pub phase: PointerPhase,
    /// `None` for touch events with an empty touch list.
    pub position: Option<PointerPosition>,
}

impl PointerEvent {
    #[must_use]
    pub const fn mouse(phase: PointerPhase, x: f64, y: f64) -> Self {
        Self {
            kind: PointerKind::Mouse,
            phase,
            position: Some(PointerPosition::new(x, y)),
        }
    }

    /// Touch event built from the first touch point, if any.
    #[must_use]
    pub const fn touch(phase: PointerPhase, first_touch: Option<PointerPosition>) -> Self {
        Self {
            kind: PointerKind::Touch,
            phase,
            position: first_touch,
        }
    }

    /// Position if present and finite.
    #[must_use]
    pub fn usable_position(&self) -> Option<PointerPosition> {
        self.position.filter(PointerPosition::is_finite)
    }

    /// True for phases that terminate a gesture.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self.phase, PointerPhase::Up | PointerPhase::Cancel)
    }
}

/// Region of the overlay that received a pointer-down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HitTarget {
    /// The image body; starts a drag.
    Body,
    /// One of the four corner handles; starts a resize.
    Handle(Corner),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn touch_without_points_has_no_position() {
        let ev = PointerEvent::touch(PointerPhase::Move, None);
        assert_eq!(ev.usable_position(), None);
        assert_eq!(ev.kind, PointerKind::Touch);
    }

    #[test]
    fn non_finite_position_is_unusable() {
        let ev = PointerEvent::mouse(PointerPhase::Move, f64::INFINITY, 0.0);
        assert!(ev.position.is_some());
        assert_eq!(ev.usable_position(), None);
    }

    #[test]
    fn terminal_phases() {
        assert!(PointerEvent::mouse(PointerPhase::Up, 0.0, 0.0).is_terminal());
        assert!(PointerEvent::touch(PointerPhase::Cancel, None).is_terminal());
        assert!(!PointerEvent::mouse(PointerPhase::Move, 0.0, 0.0).is_terminal());
    }
}
