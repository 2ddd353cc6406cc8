//! Player state table
//!
//! Holds the authoritative per-session record for every connected player.
//! The table is owned by the game session and only mutated while its lock
//! is held, so nothing in here is synchronized on its own.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::constants::{combat, health, player};
use crate::game::systems::arena;
use crate::util::vec3::{Rotation, Vec3};

/// Opaque, unique player identity (`player_<uuid>`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(String);

impl PlayerId {
    /// Generate a fresh identity; the v4 uuid makes collisions practically impossible
    pub fn generate() -> Self {
        Self(format!("player_{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Random suffix after the `player_` prefix
    fn suffix(&self) -> &str {
        self.0.strip_prefix("player_").unwrap_or(&self.0)
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PlayerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Authoritative record for one connected participant
#[derive(Debug, Clone)]
pub struct Player {
    pub position: Vec3,
    pub rotation: Rotation,
    /// Always within [0, 100]
    pub health: i32,
    pub alive: bool,
    pub kills: u32,
    pub deaths: u32,
    /// Instant of the last shot that passed the cooldown
    pub last_shot: Option<Instant>,
    /// Earliest instant a dead player may respawn
    pub respawn_at: Option<Instant>,
    pub last_activity: Instant,
    /// Display color (0xRRGGBB)
    pub color: u32,
    pub id: PlayerId,
    pub name: String,
}

impl Player {
    /// Create a fresh, alive player at a random spawn point
    pub fn new(id: PlayerId, now: Instant) -> Self {
        let name = Self::generated_name(&id);
        Self {
            position: arena::random_spawn_position(),
            rotation: Rotation::ZERO,
            health: health::MAX,
            alive: true,
            kills: 0,
            deaths: 0,
            last_shot: None,
            respawn_at: None,
            last_activity: now,
            color: arena::random_color(),
            id,
            name,
        }
    }

    /// Default display name derived from the identity
    pub fn generated_name(id: &PlayerId) -> String {
        let tag: String = id
            .suffix()
            .chars()
            .take(player::GENERATED_NAME_CHARS)
            .collect();
        format!("Player_{}", tag)
    }

    /// Replace the display name with a sanitized client-supplied one.
    ///
    /// Returns false (and keeps the current name) if nothing usable remains
    /// after trimming and stripping control characters.
    pub fn set_name(&mut self, raw: &str) -> bool {
        match sanitize_name(raw) {
            Some(name) => {
                self.name = name;
                true
            }
            None => false,
        }
    }

    /// Apply client-reported state; absent fields stay untouched.
    ///
    /// Position is clamped to the arena and non-finite values are dropped.
    /// Health is ignored while dead and cannot reach zero while alive, so
    /// only the combat resolver moves a player between alive and dead.
    pub fn apply_update(
        &mut self,
        position: Option<Vec3>,
        rotation: Option<Rotation>,
        health: Option<f64>,
    ) {
        if let Some(position) = position.filter(Vec3::is_finite) {
            self.position = arena::clamp_to_arena(position);
        }
        if let Some(rotation) = rotation.filter(Rotation::is_finite) {
            self.rotation = rotation;
        }
        if let Some(value) = health.filter(|h| h.is_finite()) {
            if self.alive {
                self.health = clamp_health(value.round() as i64).max(health::MIN + 1);
            }
        }
    }

    /// Update last activity timestamp
    pub fn touch(&mut self, now: Instant) {
        self.last_activity = now;
    }

    /// Check whether the player has been silent longer than `timeout`
    pub fn is_idle(&self, timeout: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.last_activity) > timeout
    }

    /// Whether a shot at `now` would pass the cooldown
    pub fn can_fire(&self, now: Instant) -> bool {
        match self.last_shot {
            Some(last) => now.saturating_duration_since(last) >= combat::SHOT_COOLDOWN,
            None => true,
        }
    }

    /// Apply damage. Returns true if this hit was lethal.
    ///
    /// Death forces health to 0 and clears `alive` in the same step.
    pub fn take_damage(&mut self, amount: i32) -> bool {
        if !self.alive {
            return false;
        }
        self.health = clamp_health(self.health as i64 - amount as i64);
        if self.health <= health::MIN {
            self.health = health::MIN;
            self.alive = false;
            self.deaths += 1;
            true
        } else {
            false
        }
    }

    /// Whether a dead player's respawn delay has elapsed at `now`
    pub fn respawn_due(&self, now: Instant) -> bool {
        !self.alive && self.respawn_at.map_or(true, |at| now >= at)
    }

    /// Bring the player back at a fresh spawn point with full health
    pub fn respawn(&mut self) {
        self.health = health::MAX;
        self.alive = true;
        self.position = arena::random_spawn_position();
        self.rotation = Rotation::ZERO;
        self.respawn_at = None;
    }
}

/// Clamp any integer health value into the valid range
pub fn clamp_health(value: i64) -> i32 {
    value.clamp(health::MIN as i64, health::MAX as i64) as i32
}

/// Trim, strip control characters and cap to the maximum name length
pub fn sanitize_name(raw: &str) -> Option<String> {
    let name: String = raw
        .trim()
        .chars()
        .filter(|c| !c.is_control())
        .take(player::MAX_NAME_LEN)
        .collect();
    let name = name.trim_end().to_string();
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

/// Shared table of all connected players
#[derive(Debug, Default)]
pub struct GameState {
    pub players: HashMap<PlayerId, Player>,
}

impl GameState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_player(&self, id: &PlayerId) -> Option<&Player> {
        self.players.get(id)
    }

    pub fn get_player_mut(&mut self, id: &PlayerId) -> Option<&mut Player> {
        self.players.get_mut(id)
    }

    pub fn add_player(&mut self, player: Player) {
        self.players.insert(player.id.clone(), player);
    }

    pub fn remove_player(&mut self, id: &PlayerId) -> Option<Player> {
        self.players.remove(id)
    }

    pub fn contains(&self, id: &PlayerId) -> bool {
        self.players.contains_key(id)
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn alive_count(&self) -> usize {
        self.players.values().filter(|p| p.alive).count()
    }

    /// Ids of players silent for longer than `timeout`
    pub fn idle_players(&self, timeout: Duration, now: Instant) -> Vec<PlayerId> {
        self.players
            .values()
            .filter(|p| p.is_idle(timeout, now))
            .map(|p| p.id.clone())
            .collect()
    }
}
