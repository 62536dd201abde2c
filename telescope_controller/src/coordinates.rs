use serde::{Deserialize, Serialize};
use std::time::SystemTime;

use crate::models::Axis;

/// Source of target positions.
///
/// Must return the same angle for the same instant; it is called about once
/// a second from each tracker.
pub trait CoordinateProvider: Send + Sync {
    /// Axis angle in radians the target will have at `at`.
    fn position_at(&self, axis: Axis, at: SystemTime) -> f64;
}

/// A target that does not move, used for stow positions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FixedPosition {
    pub ns: f64,
    pub md: f64,
}

impl CoordinateProvider for FixedPosition {
    fn position_at(&self, axis: Axis, _at: SystemTime) -> f64 {
        match axis {
            Axis::Ns => self.ns,
            Axis::Md => self.md,
        }
    }
}
