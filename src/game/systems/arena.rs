//! Arena bounds, spawn points and player colors

use rand::Rng;

use crate::game::constants::arena::{HALF_EXTENT, SPAWN_HEIGHT, SPAWN_SIDE};
use crate::game::constants::player::PALETTE;
use crate::util::vec3::Vec3;

/// Uniformly random point in the spawn square, at eye height
pub fn random_spawn_position() -> Vec3 {
    let mut rng = rand::thread_rng();
    let half = SPAWN_SIDE / 2.0;
    Vec3::new(
        rng.gen_range(-half..=half),
        SPAWN_HEIGHT,
        rng.gen_range(-half..=half),
    )
}

/// Check that a point lies inside the spawn square at spawn height
pub fn in_spawn_bounds(position: Vec3) -> bool {
    let half = SPAWN_SIDE / 2.0;
    position.x.abs() <= half && position.z.abs() <= half && position.y == SPAWN_HEIGHT
}

/// Clamp horizontal coordinates to the arena; height is left to the client
pub fn clamp_to_arena(position: Vec3) -> Vec3 {
    Vec3::new(
        position.x.clamp(-HALF_EXTENT, HALF_EXTENT),
        position.y,
        position.z.clamp(-HALF_EXTENT, HALF_EXTENT),
    )
}

/// Random color from the fixed palette
pub fn random_color() -> u32 {
    PALETTE[rand::thread_rng().gen_range(0..PALETTE.len())]
}
