//! Game session - connection registry, message dispatch and fan-out
//!
//! One `GameSession` owns the player table and every connection's outbound
//! queue. It lives behind a single `tokio::sync::RwLock`; all handlers are
//! synchronous and run with the write guard held. Sends are non-blocking
//! pushes into bounded per-connection queues drained by writer tasks, so
//! nothing here awaits on the network. A frame that finds its queue full is
//! dropped (at-most-once delivery).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde_json::json;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, trace, warn};

use crate::config::ServerConfig;
use crate::game::constants::chat;
use crate::game::state::{GameState, Player, PlayerId};
use crate::game::systems::combat::{resolve_shot, respawn_player, HitEvent, ShotOutcome};
use crate::metrics::Metrics;
use crate::net::protocol::{encode, ClientMessage, PlayerSnapshot, ServerMessage};
use crate::net::transport::ServerError;

/// Session behind the lock shared by every connection task
pub type SharedSession = Arc<RwLock<GameSession>>;

/// Frames a connection may have queued before new ones are dropped
pub const OUTBOUND_QUEUE_LEN: usize = 256;

/// Outbound half of a connected player's socket
pub struct PlayerConnection {
    pub sender: mpsc::Sender<Message>,
}

/// Request to respawn a player once `due` has passed
#[derive(Debug, Clone, PartialEq)]
pub struct RespawnTicket {
    pub player_id: PlayerId,
    pub due: Instant,
}

pub struct GameSession {
    pub state: GameState,
    pub connections: HashMap<PlayerId, PlayerConnection>,
    metrics: Arc<Metrics>,
    respawn_tx: mpsc::UnboundedSender<RespawnTicket>,
    max_players: usize,
}

impl GameSession {
    /// Create an empty session. The returned receiver feeds the respawn scheduler.
    pub fn new(
        config: ServerConfig,
        metrics: Arc<Metrics>,
    ) -> (Self, mpsc::UnboundedReceiver<RespawnTicket>) {
        let (respawn_tx, respawn_rx) = mpsc::unbounded_channel();
        metrics
            .max_players
            .store(config.max_players as u64, std::sync::atomic::Ordering::Relaxed);

        let session = Self {
            state: GameState::new(),
            connections: HashMap::new(),
            metrics,
            respawn_tx,
            max_players: config.max_players,
        };
        (session, respawn_rx)
    }

    pub fn into_shared(self) -> SharedSession {
        Arc::new(RwLock::new(self))
    }

    pub fn player_count(&self) -> usize {
        self.state.player_count()
    }

    pub fn is_full(&self) -> bool {
        self.player_count() >= self.max_players
    }

    fn sync_player_gauge(&self) {
        self.metrics
            .current_players
            .store(self.player_count() as u64, std::sync::atomic::Ordering::Relaxed);
    }

    // ------------------------------------------------------------------
    // Registry
    // ------------------------------------------------------------------

    /// Register a new connection.
    ///
    /// At capacity the connection gets an `error` record followed by a close
    /// frame and is not registered.
    pub fn on_connect(
        &mut self,
        sender: mpsc::Sender<Message>,
        now: Instant,
    ) -> Result<PlayerId, ServerError> {
        if self.is_full() {
            Metrics::incr(&self.metrics.rejected_connections);
            warn!(
                "Rejecting connection: server full ({}/{})",
                self.player_count(),
                self.max_players
            );
            let refusal = ServerMessage::Error {
                message: "Server is full".to_string(),
            };
            if let Ok(text) = encode(&refusal) {
                let _ = sender.try_send(Message::Text(text));
            }
            let _ = sender.try_send(Message::Close(None));
            return Err(ServerError::Full {
                max_players: self.max_players,
            });
        }

        let player = Player::new(PlayerId::generate(), now);
        let id = player.id.clone();

        let welcome = ServerMessage::Welcome {
            id: id.clone(),
            name: player.name.clone(),
            position: player.position,
            rotation: player.rotation,
            health: player.health,
            color: player.color,
            players: self
                .state
                .players
                .values()
                .map(PlayerSnapshot::from_player)
                .collect(),
        };
        let join = ServerMessage::PlayerJoin {
            player: PlayerSnapshot::from_player(&player),
        };

        info!("Player {} connected as {}", id, player.name);

        self.state.add_player(player);
        self.connections
            .insert(id.clone(), PlayerConnection { sender });
        Metrics::incr(&self.metrics.total_connections);
        self.sync_player_gauge();

        self.send_to(&id, &welcome);
        self.broadcast(&join, Some(&id));

        Ok(id)
    }

    /// Remove a player. Returns false if it was already gone.
    pub fn on_disconnect(&mut self, id: &PlayerId) -> bool {
        self.connections.remove(id);
        let Some(player) = self.state.remove_player(id) else {
            return false;
        };
        self.sync_player_gauge();

        info!(
            "Player {} ({}) left, {} remaining",
            id,
            player.name,
            self.player_count()
        );
        self.broadcast(&ServerMessage::PlayerLeave { id: id.clone() }, None);
        true
    }

    // ------------------------------------------------------------------
    // Fan-out
    // ------------------------------------------------------------------

    fn push(&self, id: &PlayerId, connection: &PlayerConnection, frame: Message) {
        match connection.sender.try_send(frame) {
            Ok(()) => Metrics::incr(&self.metrics.messages_sent),
            Err(TrySendError::Full(_)) => {
                Metrics::incr(&self.metrics.send_failures);
                debug!("Send to {} dropped: outbound queue full", id);
            }
            Err(TrySendError::Closed(_)) => {
                Metrics::incr(&self.metrics.send_failures);
                debug!("Send to {} failed: outbound queue closed", id);
            }
        }
    }

    /// Send `message` to every connected player except `exclude`
    pub fn broadcast(&self, message: &ServerMessage, exclude: Option<&PlayerId>) {
        let text = match encode(message) {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to encode message for broadcast: {}", e);
                return;
            }
        };

        for (id, connection) in &self.connections {
            if exclude == Some(id) {
                continue;
            }
            self.push(id, connection, Message::Text(text.clone()));
        }
    }

    /// Send `message` to a single player; unknown ids are ignored
    pub fn send_to(&self, id: &PlayerId, message: &ServerMessage) {
        let Some(connection) = self.connections.get(id) else {
            trace!("Dropping message for unknown player {}", id);
            return;
        };
        match encode(message) {
            Ok(text) => self.push(id, connection, Message::Text(text)),
            Err(e) => warn!("Failed to encode message for {}: {}", id, e),
        }
    }

    /// Tell every client the server is going away
    pub fn shutdown(&self, message: &str) {
        info!("Notifying {} player(s) of shutdown", self.connections.len());
        self.broadcast(
            &ServerMessage::ServerShutdown {
                message: message.to_string(),
            },
            None,
        );
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    /// Apply one decoded message from `id`
    pub fn handle_message(&mut self, id: &PlayerId, message: ClientMessage, now: Instant) {
        let Some(player) = self.state.get_player_mut(id) else {
            trace!("Message from unregistered player {} ignored", id);
            return;
        };
        player.touch(now);

        match message {
            ClientMessage::Join { name } => {
                if let Some(name) = name {
                    if player.set_name(&name) {
                        info!("Player {} is now known as {}", id, player.name);
                    }
                }
            }

            ClientMessage::Update {
                position,
                rotation,
                health,
            } => {
                player.apply_update(position, rotation, health);
                let update = ServerMessage::PlayerUpdate {
                    id: id.clone(),
                    position: player.position,
                    rotation: player.rotation,
                    health: player.health,
                    is_alive: player.alive,
                };
                self.broadcast(&update, Some(id));
            }

            ClientMessage::Shoot { position, rotation } => {
                player.apply_update(position, rotation, None);
                let shot = ServerMessage::PlayerShoot {
                    id: id.clone(),
                    position: player.position,
                    rotation: player.rotation,
                };
                self.broadcast(&shot, Some(id));
                self.fire(id, now);
            }

            ClientMessage::Chat { message } => {
                let text: String = message.trim().chars().take(chat::MAX_MESSAGE_LEN).collect();
                if text.is_empty() {
                    return;
                }
                let chat = ServerMessage::Chat {
                    player: player.name.clone(),
                    message: text,
                    time: unix_millis(),
                };
                self.broadcast(&chat, None);
            }

            ClientMessage::Jump => {
                self.broadcast(&ServerMessage::PlayerJump { id: id.clone() }, Some(id));
            }

            ClientMessage::Ping { time } => {
                let pong = ServerMessage::Pong {
                    time: unix_millis(),
                    players: self.player_count(),
                    client_time: time,
                };
                self.send_to(id, &pong);
            }
        }
    }

    /// Run the combat resolver for a shot and announce the results
    fn fire(&mut self, shooter: &PlayerId, now: Instant) {
        let (shooter_name, hits) = match resolve_shot(&mut self.state, shooter, now) {
            ShotOutcome::Resolved { shooter_name, hits } => (shooter_name, hits),
            ShotOutcome::CoolingDown => {
                trace!("Shot by {} suppressed by cooldown", shooter);
                return;
            }
            ShotOutcome::ShooterDead | ShotOutcome::ShooterMissing => return,
        };

        Metrics::incr(&self.metrics.total_shots);

        if hits.is_empty() {
            self.send_to(shooter, &ServerMessage::ShotMissed);
            return;
        }

        for hit in hits {
            Metrics::incr(&self.metrics.total_hits);
            self.broadcast(
                &ServerMessage::PlayerHit {
                    target: hit.target_id.clone(),
                    shooter: shooter.clone(),
                    damage: hit.damage,
                    health: hit.health,
                    is_alive: !hit.killed,
                },
                None,
            );

            if hit.killed {
                self.announce_kill(shooter, &shooter_name, &hit);
            } else {
                self.send_to(
                    shooter,
                    &ServerMessage::HitConfirm {
                        target: hit.target_id,
                        damage: hit.damage,
                        target_health: hit.health,
                    },
                );
            }
        }
    }

    fn announce_kill(&self, shooter: &PlayerId, shooter_name: &str, hit: &HitEvent) {
        Metrics::incr(&self.metrics.total_kills);
        info!("{} killed {}", shooter_name, hit.target_name);

        self.send_to(
            shooter,
            &ServerMessage::Kill {
                target: hit.target_id.clone(),
                target_name: hit.target_name.clone(),
            },
        );
        self.send_to(
            &hit.target_id,
            &ServerMessage::Death {
                killer: shooter.clone(),
                killer_name: shooter_name.to_string(),
            },
        );
        self.broadcast(
            &ServerMessage::KillFeed {
                killer: shooter_name.to_string(),
                victim: hit.target_name.clone(),
            },
            None,
        );

        if let Some(due) = hit.respawn_at {
            let ticket = RespawnTicket {
                player_id: hit.target_id.clone(),
                due,
            };
            if self.respawn_tx.send(ticket).is_err() {
                warn!("Respawn scheduler is gone; {} will stay dead", hit.target_id);
            }
        }
    }

    /// Respawn a dead player whose delay has elapsed. Returns false if the
    /// player is gone, already alive, or not yet due.
    pub fn respawn(&mut self, id: &PlayerId, now: Instant) -> bool {
        let Some(player) = respawn_player(&mut self.state, id, now) else {
            return false;
        };
        let (position, rotation, health) = (player.position, player.rotation, player.health);
        debug!("Respawned player {}", id);

        self.send_to(
            id,
            &ServerMessage::Respawn {
                position,
                rotation,
                health,
            },
        );
        self.broadcast(
            &ServerMessage::PlayerRespawn {
                id: id.clone(),
                position,
                rotation,
                health,
            },
            Some(id),
        );
        true
    }

    // ------------------------------------------------------------------
    // Liveness
    // ------------------------------------------------------------------

    /// Evict players silent for longer than `timeout`. Returns how many were evicted.
    pub fn sweep_idle(&mut self, timeout: Duration, now: Instant) -> usize {
        let idle = self.state.idle_players(timeout, now);
        for id in &idle {
            if let Some(connection) = self.connections.get(id) {
                self.push(id, connection, Message::Close(None));
            }
            self.on_disconnect(id);
            Metrics::incr(&self.metrics.evicted_players);
        }
        idle.len()
    }

    /// Body of `GET /players`
    pub fn roster_json(&self) -> serde_json::Value {
        let players: Vec<_> = self
            .state
            .players
            .values()
            .map(|p| {
                json!({
                    "id": p.id,
                    "name": p.name,
                    "kills": p.kills,
                    "deaths": p.deaths,
                    "health": p.health,
                    "isAlive": p.alive,
                })
            })
            .collect();
        json!({ "total": players.len(), "players": players })
    }
}

/// Milliseconds since the unix epoch
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Start the respawn scheduler: one sleeping task per ticket, each of which
/// re-checks the player by id when it wakes.
pub fn start_respawn_scheduler(
    session: SharedSession,
    mut tickets: mpsc::UnboundedReceiver<RespawnTicket>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(ticket) = tickets.recv().await {
            let session = session.clone();
            tokio::spawn(async move {
                tokio::time::sleep_until(tokio::time::Instant::from_std(ticket.due)).await;
                let now = Instant::now().max(ticket.due);
                session.write().await.respawn(&ticket.player_id, now);
            });
        }
        debug!("Respawn scheduler stopped");
    })
}

/// Start the liveness sweeper background task
pub fn start_liveness_sweeper(
    session: SharedSession,
    interval: Duration,
    timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // First tick completes immediately
        ticker.tick().await;

        info!(
            "Liveness sweeper running every {}s (timeout {}s)",
            interval.as_secs(),
            timeout.as_secs()
        );

        loop {
            ticker.tick().await;
            let evicted = session.write().await.sweep_idle(timeout, Instant::now());
            if evicted > 0 {
                info!("Evicted {} inactive player(s)", evicted);
            }
        }
    })
}
