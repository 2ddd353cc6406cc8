//! Wire protocol
//!
//! Every frame is a UTF-8 JSON object with a `type` field naming the kind and
//! camelCase payload fields. Inbound records decode into the closed
//! `ClientMessage` enum; unknown kinds are told apart from malformed records
//! so they can be ignored without being reported as decode failures.

use serde::{Deserialize, Serialize};

use crate::game::state::{Player, PlayerId};
use crate::util::vec3::{Rotation, Vec3};

/// Messages from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Declare a display name
    Join {
        #[serde(default)]
        name: Option<String>,
    },
    /// Client-reported state; absent fields are left untouched
    Update {
        #[serde(default)]
        position: Option<Vec3>,
        #[serde(default)]
        rotation: Option<Rotation>,
        #[serde(default)]
        health: Option<f64>,
    },
    /// Fire the weapon, optionally reporting aim at fire time
    Shoot {
        #[serde(default)]
        position: Option<Vec3>,
        #[serde(default)]
        rotation: Option<Rotation>,
    },
    Chat { message: String },
    Jump,
    /// Latency probe; `time` is echoed back
    Ping {
        #[serde(default)]
        time: Option<f64>,
    },
}

impl ClientMessage {
    /// Kinds accepted from clients
    pub const KINDS: [&'static str; 6] = ["join", "update", "shoot", "chat", "jump", "ping"];
}

/// Messages from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Sent once to a new session
    Welcome {
        id: PlayerId,
        name: String,
        position: Vec3,
        rotation: Rotation,
        health: i32,
        color: u32,
        /// Every other connected player
        players: Vec<PlayerSnapshot>,
    },
    PlayerJoin { player: PlayerSnapshot },
    PlayerLeave { id: PlayerId },
    PlayerUpdate {
        id: PlayerId,
        position: Vec3,
        rotation: Rotation,
        health: i32,
        is_alive: bool,
    },
    /// Muzzle flash for other clients; says nothing about hits
    PlayerShoot {
        id: PlayerId,
        position: Vec3,
        rotation: Rotation,
    },
    PlayerJump { id: PlayerId },
    PlayerHit {
        target: PlayerId,
        shooter: PlayerId,
        damage: i32,
        health: i32,
        is_alive: bool,
    },
    /// To the shooter: you killed `target`
    Kill { target: PlayerId, target_name: String },
    /// To the victim: you were killed by `killer`
    Death { killer: PlayerId, killer_name: String },
    KillFeed { killer: String, victim: String },
    /// To the respawned player
    Respawn {
        position: Vec3,
        rotation: Rotation,
        health: i32,
    },
    /// To everyone else when a player respawns
    PlayerRespawn {
        id: PlayerId,
        position: Vec3,
        rotation: Rotation,
        health: i32,
    },
    Chat { player: String, message: String, time: u64 },
    Pong {
        /// Server time, ms since the unix epoch
        time: u64,
        /// Live session count
        players: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_time: Option<f64>,
    },
    ShotMissed,
    HitConfirm {
        target: PlayerId,
        damage: i32,
        target_health: i32,
    },
    /// Connection refused (e.g. server full); the socket is closed afterwards
    Error { message: String },
    ServerShutdown { message: String },
}

/// Public view of a player, as shared with other clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSnapshot {
    pub id: PlayerId,
    pub name: String,
    pub position: Vec3,
    pub rotation: Rotation,
    pub health: i32,
    pub color: u32,
    pub kills: u32,
    pub deaths: u32,
    pub is_alive: bool,
}

impl PlayerSnapshot {
    pub fn from_player(player: &Player) -> Self {
        Self {
            id: player.id.clone(),
            name: player.name.clone(),
            position: player.position,
            rotation: player.rotation,
            health: player.health,
            color: player.color,
            kills: player.kills,
            deaths: player.deaths,
            is_alive: player.alive,
        }
    }
}

/// Encode a server message as a JSON text frame
pub fn encode(message: &ServerMessage) -> Result<String, ProtocolError> {
    serde_json::to_string(message).map_err(ProtocolError::Encode)
}

/// Decode an inbound frame.
///
/// Returns `Ok(None)` for well-formed records of a kind the server does not
/// handle, and `Err` for anything that is not a valid record.
pub fn decode(text: &str) -> Result<Option<ClientMessage>, ProtocolError> {
    let value: serde_json::Value = serde_json::from_str(text).map_err(ProtocolError::Malformed)?;

    let kind = value
        .as_object()
        .ok_or(ProtocolError::NotAnObject)?
        .get("type")
        .and_then(serde_json::Value::as_str)
        .ok_or(ProtocolError::MissingKind)?;

    if !ClientMessage::KINDS.contains(&kind) {
        return Ok(None);
    }

    serde_json::from_value(value)
        .map(Some)
        .map_err(ProtocolError::Malformed)
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Malformed record: {0}")]
    Malformed(serde_json::Error),
    #[error("Record is not a JSON object")]
    NotAnObject,
    #[error("Record has no string `type` field")]
    MissingKind,
    #[error("Encode error: {0}")]
    Encode(serde_json::Error),
}
