//! Hit-test cone
//!
//! A shot connects when the target lies within `MAX_RANGE` of the shooter and
//! the angle between the shooter's view direction and the direction to the
//! target is below `HIT_CONE`. No occlusion is considered.

use crate::game::constants::combat::{HIT_CONE, MAX_RANGE};
use crate::util::vec3::{Rotation, Vec3};

/// Geometry of one shooter/target pair
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShotGeometry {
    /// Distance from shooter to target
    pub distance: f32,
    /// Angle between view direction and target bearing (radians)
    pub angle: f32,
}

impl ShotGeometry {
    /// Measure the shot. Returns None when shooter and target coincide.
    pub fn measure(origin: Vec3, rotation: Rotation, target: Vec3) -> Option<Self> {
        let (to_target, distance) = (target - origin).normalize_with_length();
        if distance <= 0.0 {
            return None;
        }
        let cos = rotation.forward().dot(to_target).clamp(-1.0, 1.0);
        Some(Self {
            distance,
            angle: cos.acos(),
        })
    }

    pub fn is_hit(&self) -> bool {
        self.distance <= MAX_RANGE && self.angle < HIT_CONE
    }
}

/// Whether a shot from `origin` looking along `rotation` hits `target`
pub fn hit_test(origin: Vec3, rotation: Rotation, target: Vec3) -> bool {
    if !origin.is_finite() || !target.is_finite() || !rotation.is_finite() {
        return false;
    }
    ShotGeometry::measure(origin, rotation, target).is_some_and(|g| g.is_hit())
}
