//! Plain data types shared across the workspace.

use std::fmt;

/// Machine position reported by the controller, in millimetres.
///
/// Any axis may be NaN when the controller reports `nan` (for example before
/// homing).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Position { x, y, z }
    }

    /// `true` when every axis holds a real number.
    pub fn is_known(&self) -> bool {
        !(self.x.is_nan() || self.y.is_nan() || self.z.is_nan())
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "X: {:.3}, Y: {:.3}, Z: {:.3}", self.x, self.y, self.z)
    }
}
