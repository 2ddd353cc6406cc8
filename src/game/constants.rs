/// Weapon and damage rules
pub mod combat {
    use std::time::Duration;

    /// Damage dealt by one qualifying hit
    pub const DAMAGE: i32 = 34;
    /// Minimum time between two resolved shots from the same player
    pub const SHOT_COOLDOWN: Duration = Duration::from_millis(300);
    /// Maximum distance at which a shot can connect
    pub const MAX_RANGE: f32 = 50.0;
    /// Half-angle of the hit cone in radians (~5 degrees)
    pub const HIT_CONE: f32 = 0.087;
    /// Delay between death and respawn
    pub const RESPAWN_DELAY: Duration = Duration::from_millis(3000);
}

/// Health limits
pub mod health {
    pub const MAX: i32 = 100;
    pub const MIN: i32 = 0;
}

/// Arena geometry
pub mod arena {
    /// Full side length of the playable square (x and z)
    pub const MAP_SIZE: f32 = 80.0;
    /// Player x/z coordinates are clamped to +/- this value
    pub const HALF_EXTENT: f32 = MAP_SIZE / 2.0;
    /// Side length of the square spawn region centred on the origin
    pub const SPAWN_SIDE: f32 = 40.0;
    /// Eye height used for spawn points
    pub const SPAWN_HEIGHT: f32 = 1.7;
}

/// Player identity and presentation
pub mod player {
    /// Maximum display name length in characters
    pub const MAX_NAME_LEN: usize = 20;
    /// Characters of the identity suffix used in generated names
    pub const GENERATED_NAME_CHARS: usize = 4;
    /// Display color palette (0xRRGGBB)
    pub const PALETTE: [u32; 8] = [
        0xff0000, // red
        0x00ff00, // green
        0x0000ff, // blue
        0xffff00, // yellow
        0xff00ff, // magenta
        0x00ffff, // cyan
        0xff8800, // orange
        0x8800ff, // purple
    ];
}

/// Chat limits
pub mod chat {
    /// Maximum chat message length in characters
    pub const MAX_MESSAGE_LEN: usize = 100;
}
