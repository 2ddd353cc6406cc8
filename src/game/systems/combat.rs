//! Combat resolver
//!
//! Per-target state machine: Alive -> (lethal hit) -> Dead -> (respawn delay)
//! -> Alive. Callers hold the game session lock for the whole call, so two
//! lethal hits on one target can never interleave: the second sees a dead
//! target and skips it.

use std::time::Instant;

use tracing::debug;

use crate::game::constants::combat::{DAMAGE, RESPAWN_DELAY};
use crate::game::state::{GameState, Player, PlayerId};
use crate::game::systems::hitscan::hit_test;

/// One target damaged by a shot
#[derive(Debug, Clone, PartialEq)]
pub struct HitEvent {
    pub target_id: PlayerId,
    pub target_name: String,
    pub damage: i32,
    /// Target health after the hit
    pub health: i32,
    pub killed: bool,
    /// When the target may respawn (set only for lethal hits)
    pub respawn_at: Option<Instant>,
}

/// Result of resolving one shoot request
#[derive(Debug, Clone, PartialEq)]
pub enum ShotOutcome {
    /// Shooter is no longer registered
    ShooterMissing,
    /// Dead players cannot deal damage
    ShooterDead,
    /// Fired again before the cooldown elapsed; no hit test was run
    CoolingDown,
    /// Hit test evaluated against every other alive player (empty = miss)
    Resolved {
        shooter_name: String,
        hits: Vec<HitEvent>,
    },
}

impl ShotOutcome {
    /// Whether the hit test ran for this shot
    pub fn evaluated(&self) -> bool {
        matches!(self, ShotOutcome::Resolved { .. })
    }
}

/// Resolve a shot fired by `shooter_id` at `now`.
///
/// Every alive player inside the hit cone takes damage; there is no
/// closest-target tie-break.
pub fn resolve_shot(state: &mut GameState, shooter_id: &PlayerId, now: Instant) -> ShotOutcome {
    let (origin, rotation, shooter_name) = {
        let Some(shooter) = state.get_player_mut(shooter_id) else {
            return ShotOutcome::ShooterMissing;
        };
        if !shooter.alive {
            return ShotOutcome::ShooterDead;
        }
        if !shooter.can_fire(now) {
            return ShotOutcome::CoolingDown;
        }
        shooter.last_shot = Some(now);
        (shooter.position, shooter.rotation, shooter.name.clone())
    };

    let mut hits = Vec::new();
    for target in state.players.values_mut() {
        if &target.id == shooter_id || !target.alive {
            continue;
        }
        if !hit_test(origin, rotation, target.position) {
            continue;
        }
        hits.push(apply_hit(target, now));
    }

    let kills = hits.iter().filter(|h| h.killed).count() as u32;
    if kills > 0 {
        if let Some(shooter) = state.get_player_mut(shooter_id) {
            shooter.kills += kills;
        }
    }

    debug!(
        "Shot by {} resolved: {} hit(s), {} kill(s)",
        shooter_id,
        hits.len(),
        kills
    );

    ShotOutcome::Resolved { shooter_name, hits }
}

fn apply_hit(target: &mut Player, now: Instant) -> HitEvent {
    let killed = target.take_damage(DAMAGE);
    if killed {
        target.respawn_at = Some(now + RESPAWN_DELAY);
    }
    HitEvent {
        target_id: target.id.clone(),
        target_name: target.name.clone(),
        damage: DAMAGE,
        health: target.health,
        killed,
        respawn_at: target.respawn_at,
    }
}

/// Respawn a dead player once its delay has elapsed.
///
/// Looks the player up again by id, so a player who disconnected during the
/// delay (or was already respawned) is left alone.
pub fn respawn_player<'a>(
    state: &'a mut GameState,
    player_id: &PlayerId,
    now: Instant,
) -> Option<&'a Player> {
    let player = state.get_player_mut(player_id)?;
    if !player.respawn_due(now) {
        return None;
    }
    player.respawn();
    Some(player)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::systems::arena::in_spawn_bounds;
    use crate::util::vec3::{Rotation, Vec3};
    use std::time::Duration;

    fn place(state: &mut GameState, position: Vec3, rotation: Rotation) -> PlayerId {
        let mut player = Player::new(PlayerId::generate(), Instant::now());
        player.position = position;
        player.rotation = rotation;
        let id = player.id.clone();
        state.add_player(player);
        id
    }

    /// Shooter at the origin looking down -z, target 10 units ahead
    fn duel() -> (GameState, PlayerId, PlayerId) {
        let mut state = GameState::new();
        let shooter = place(&mut state, Vec3::new(0.0, 1.7, 0.0), Rotation::ZERO);
        let target = place(&mut state, Vec3::new(0.0, 1.7, -10.0), Rotation::ZERO);
        (state, shooter, target)
    }

    fn after(start: Instant, shots: u32) -> Instant {
        start + Duration::from_millis(400 * shots as u64)
    }

    #[test]
    fn test_single_hit() {
        let (mut state, shooter, target) = duel();
        let now = Instant::now();

        let outcome = resolve_shot(&mut state, &shooter, now);
        let ShotOutcome::Resolved { hits, .. } = outcome else {
            panic!("expected resolved shot");
        };
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].target_id, target);
        assert_eq!(hits[0].damage, 34);
        assert_eq!(hits[0].health, 66);
        assert!(!hits[0].killed);
        assert_eq!(state.get_player(&target).unwrap().health, 66);
    }

    #[test]
    fn test_three_hits_kill_once() {
        let (mut state, shooter, target) = duel();
        let start = Instant::now();

        let mut kills = 0;
        for i in 0..3 {
            if let ShotOutcome::Resolved { hits, .. } = resolve_shot(&mut state, &shooter, after(start, i)) {
                kills += hits.iter().filter(|h| h.killed).count();
            }
        }

        let victim = state.get_player(&target).unwrap();
        assert!(!victim.alive);
        assert_eq!(victim.health, 0);
        assert_eq!(victim.deaths, 1);
        assert_eq!(state.get_player(&shooter).unwrap().kills, 1);
        assert_eq!(kills, 1);

        // Shooting the corpse changes nothing
        let outcome = resolve_shot(&mut state, &shooter, after(start, 3));
        assert!(matches!(outcome, ShotOutcome::Resolved { ref hits, .. } if hits.is_empty()));
        assert_eq!(state.get_player(&target).unwrap().deaths, 1);
        assert_eq!(state.get_player(&shooter).unwrap().kills, 1);
    }

    #[test]
    fn test_cooldown_suppresses_second_shot() {
        let (mut state, shooter, target) = duel();
        let now = Instant::now();

        assert!(resolve_shot(&mut state, &shooter, now).evaluated());
        let second = resolve_shot(&mut state, &shooter, now + Duration::from_millis(100));
        assert_eq!(second, ShotOutcome::CoolingDown);
        assert_eq!(state.get_player(&target).unwrap().health, 66);

        // Cooldown measured from the last resolved shot, not the suppressed one
        assert!(resolve_shot(&mut state, &shooter, now + Duration::from_millis(300)).evaluated());
    }

    #[test]
    fn test_miss() {
        let (mut state, shooter, target) = duel();
        state.get_player_mut(&shooter).unwrap().rotation = Rotation::new(0.5, 0.0);

        let outcome = resolve_shot(&mut state, &shooter, Instant::now());
        assert!(matches!(outcome, ShotOutcome::Resolved { ref hits, .. } if hits.is_empty()));
        assert_eq!(state.get_player(&target).unwrap().health, 100);
    }

    #[test]
    fn test_multiple_aligned_targets_all_hit() {
        let (mut state, shooter, near) = duel();
        let far = place(&mut state, Vec3::new(0.0, 1.7, -30.0), Rotation::ZERO);

        let outcome = resolve_shot(&mut state, &shooter, Instant::now());
        let ShotOutcome::Resolved { hits, .. } = outcome else {
            panic!("expected resolved shot");
        };
        assert_eq!(hits.len(), 2);
        assert_eq!(state.get_player(&near).unwrap().health, 66);
        assert_eq!(state.get_player(&far).unwrap().health, 66);
    }

    #[test]
    fn test_dead_shooter_cannot_fire() {
        let (mut state, shooter, target) = duel();
        state.get_player_mut(&shooter).unwrap().take_damage(100);

        let outcome = resolve_shot(&mut state, &shooter, Instant::now());
        assert_eq!(outcome, ShotOutcome::ShooterDead);
        assert_eq!(state.get_player(&target).unwrap().health, 100);
    }

    #[test]
    fn test_missing_shooter() {
        let mut state = GameState::new();
        let outcome = resolve_shot(&mut state, &PlayerId::generate(), Instant::now());
        assert_eq!(outcome, ShotOutcome::ShooterMissing);
    }

    #[test]
    fn test_respawn_after_delay() {
        let (mut state, shooter, target) = duel();
        let start = Instant::now();
        for i in 0..3 {
            resolve_shot(&mut state, &shooter, after(start, i));
        }
        let killed_at = after(start, 2);

        // Too early
        assert!(respawn_player(&mut state, &target, killed_at + Duration::from_millis(2999)).is_none());
        assert!(!state.get_player(&target).unwrap().alive);

        let player = respawn_player(&mut state, &target, killed_at + RESPAWN_DELAY).unwrap();
        assert!(player.alive);
        assert_eq!(player.health, 100);
        assert_eq!(player.rotation, Rotation::ZERO);
        assert!(in_spawn_bounds(player.position));

        // Already alive: second ticket is a no-op
        assert!(respawn_player(&mut state, &target, killed_at + RESPAWN_DELAY).is_none());
    }

    #[test]
    fn test_respawn_missing_player_is_noop() {
        let (mut state, shooter, target) = duel();
        let start = Instant::now();
        for i in 0..3 {
            resolve_shot(&mut state, &shooter, after(start, i));
        }
        state.remove_player(&target);

        assert!(respawn_player(&mut state, &target, start + Duration::from_secs(10)).is_none());
        assert_eq!(state.player_count(), 1);
    }
}
