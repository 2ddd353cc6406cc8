//! WebSocket server implementation
//!
//! Accepts TCP connections, upgrades them with tokio-tungstenite and wires
//! each one into the shared `GameSession`: a writer task drains the
//! connection's outbound queue, and the reader loop decodes inbound frames
//! in order and hands them to the dispatcher. When the writer ends (eviction,
//! shutdown or a dead peer) the reader stops too and the socket is dropped.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info, trace, warn};

use crate::config::ServerConfig;
use crate::metrics::Metrics;
use crate::net::game_session::{
    start_liveness_sweeper, start_respawn_scheduler, GameSession, RespawnTicket, SharedSession,
    OUTBOUND_QUEUE_LEN,
};
use crate::net::protocol::decode;

/// How long a server-closed connection waits for the peer's close reply
const CLOSE_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("WebSocket handshake failed: {0}")]
    Handshake(#[from] tungstenite::Error),
    #[error("WebSocket handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),
    #[error("Server full ({max_players} players)")]
    Full { max_players: usize },
}

/// WebSocket game server
pub struct WebSocketServer {
    config: ServerConfig,
    listener: TcpListener,
    session: SharedSession,
    respawn_rx: mpsc::UnboundedReceiver<RespawnTicket>,
    metrics: Arc<Metrics>,
}

impl WebSocketServer {
    /// Bind the game port and create an empty session
    pub async fn bind(config: ServerConfig, metrics: Arc<Metrics>) -> Result<Self, ServerError> {
        let addr = config.game_addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;

        let (session, respawn_rx) = GameSession::new(config.clone(), metrics.clone());

        Ok(Self {
            config,
            listener,
            session: session.into_shared(),
            respawn_rx,
            metrics,
        })
    }

    /// Address actually bound (useful when the configured port is 0)
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Handle to the shared session, for shutdown and the status surface
    pub fn session(&self) -> SharedSession {
        self.session.clone()
    }

    /// Run the server
    pub async fn run(self) -> anyhow::Result<()> {
        let Self {
            config,
            listener,
            session,
            respawn_rx,
            metrics,
        } = self;

        info!("WebSocket server listening on ws://{}", listener.local_addr()?);

        start_respawn_scheduler(session.clone(), respawn_rx);
        start_liveness_sweeper(
            session.clone(),
            config.sweep_interval,
            config.inactivity_timeout,
        );

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    continue;
                }
            };

            let session = session.clone();
            let metrics = metrics.clone();
            let handshake_timeout = config.handshake_timeout;

            tokio::spawn(async move {
                match handle_connection(stream, peer, session, metrics, handshake_timeout).await {
                    Ok(()) => {}
                    Err(ServerError::Full { .. }) => {
                        debug!("Turned away {}: server full", peer);
                    }
                    Err(ServerError::HandshakeTimeout(_)) => {
                        debug!("Dropped {}: no WebSocket upgrade in time", peer);
                    }
                    Err(e) => warn!("Connection error from {}: {}", peer, e),
                }
            });
        }
    }
}

/// Handle a single WebSocket connection from upgrade to cleanup
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    session: SharedSession,
    metrics: Arc<Metrics>,
    handshake_timeout: Duration,
) -> Result<(), ServerError> {
    let ws_stream = tokio::time::timeout(handshake_timeout, accept_async(stream))
        .await
        .map_err(|_| ServerError::HandshakeTimeout(handshake_timeout))??;
    debug!("WebSocket connection established with {}", peer);

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE_LEN);

    // Drain the outbound queue; a close frame is the last thing written
    let mut writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let closing = matches!(frame, Message::Close(_));
            if let Err(e) = ws_sender.send(frame).await {
                trace!("Write to {} failed: {}", peer, e);
                break;
            }
            if closing {
                break;
            }
        }
    });

    let connected = session.write().await.on_connect(tx, Instant::now());
    let player_id = match connected {
        Ok(id) => id,
        Err(e) => {
            // Let the refusal and close frame go out before dropping the socket
            let _ = writer.await;
            return Err(e);
        }
    };

    loop {
        let frame = tokio::select! {
            frame = ws_receiver.next() => frame,
            _ = &mut writer => {
                // Closed from our side; wait briefly for the peer's close reply
                let _ = tokio::time::timeout(CLOSE_GRACE, async {
                    while let Some(Ok(frame)) = ws_receiver.next().await {
                        if matches!(frame, Message::Close(_)) {
                            break;
                        }
                    }
                })
                .await;
                debug!("Server closed connection to {}", player_id);
                break;
            }
        };
        let Some(frame) = frame else { break };

        match frame {
            Ok(Message::Text(text)) => {
                Metrics::incr(&metrics.messages_received);
                match decode(&text) {
                    Ok(Some(message)) => {
                        let started = Instant::now();
                        session
                            .write()
                            .await
                            .handle_message(&player_id, message, started);
                        metrics.record_handle_time(started.elapsed());
                    }
                    Ok(None) => {
                        trace!("Ignoring unknown message kind from {}", player_id);
                    }
                    Err(e) => {
                        Metrics::incr(&metrics.decode_failures);
                        warn!("Failed to decode message from {}: {}", player_id, e);
                    }
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(Message::Binary(_)) => {
                trace!("Ignoring binary frame from {}", player_id);
            }
            // Ping/pong are answered by tungstenite
            Ok(_) => {}
            Err(e) => {
                debug!("WebSocket error for {}: {}", player_id, e);
                break;
            }
        }
    }

    session.write().await.on_disconnect(&player_id);
    writer.abort();

    debug!("Connection closed ({})", peer);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::atomic::Ordering;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    fn local_config(max_players: usize) -> ServerConfig {
        ServerConfig {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            max_players,
            ..ServerConfig::default()
        }
    }

    async fn start(
        max_players: usize,
    ) -> (SocketAddr, SharedSession, Arc<Metrics>, tokio::task::JoinHandle<()>) {
        start_with(local_config(max_players)).await
    }

    async fn start_with(
        config: ServerConfig,
    ) -> (SocketAddr, SharedSession, Arc<Metrics>, tokio::task::JoinHandle<()>) {
        let metrics = Arc::new(Metrics::new());
        let server = WebSocketServer::bind(config, metrics.clone()).await.unwrap();
        let addr = server.local_addr().unwrap();
        let session = server.session();
        let handle = tokio::spawn(async move {
            let _ = server.run().await;
        });
        (addr, session, metrics, handle)
    }

    async fn connect(addr: SocketAddr) -> Client {
        let (ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
        ws
    }

    /// Next text frame as JSON; None once the socket closes
    async fn next_json(ws: &mut Client) -> Option<serde_json::Value> {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
                .await
                .expect("timed out waiting for a frame");
            match frame {
                Some(Ok(Message::Text(text))) => return Some(serde_json::from_str(&text).unwrap()),
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return None,
                Some(Ok(_)) => continue,
            }
        }
    }

    /// Skip frames until one of `kind` arrives
    async fn until(ws: &mut Client, kind: &str) -> serde_json::Value {
        loop {
            let frame = next_json(ws).await.expect("socket closed");
            if frame["type"] == kind {
                return frame;
            }
        }
    }

    async fn send(ws: &mut Client, value: serde_json::Value) {
        ws.send(Message::Text(value.to_string())).await.unwrap();
    }

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let server = WebSocketServer::bind(local_config(50), Arc::new(Metrics::new()))
            .await
            .unwrap();
        assert_ne!(server.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn test_shot_end_to_end() {
        let (addr, session, metrics, handle) = start(50).await;

        let mut a = connect(addr).await;
        let a_id = until(&mut a, "welcome").await["id"].as_str().unwrap().to_string();

        let mut b = connect(addr).await;
        let b_id = until(&mut b, "welcome").await["id"].as_str().unwrap().to_string();
        assert_eq!(until(&mut a, "player_join").await["player"]["id"], b_id);

        send(&mut a, json!({
            "type": "update",
            "position": {"x": 0, "y": 1.7, "z": 0},
            "rotation": {"yaw": 0, "pitch": 0}
        }))
        .await;
        send(&mut b, json!({
            "type": "update",
            "position": {"x": 0, "y": 1.7, "z": -10}
        }))
        .await;

        // Both updates applied once each side has seen the other's
        assert_eq!(until(&mut a, "player_update").await["id"], b_id);
        assert_eq!(until(&mut b, "player_update").await["id"], a_id);

        send(&mut a, json!({"type": "shoot"})).await;

        let confirm = until(&mut a, "hit_confirm").await;
        assert_eq!(confirm["target"], b_id);
        assert_eq!(confirm["damage"], 34);
        assert_eq!(confirm["targetHealth"], 66);

        let hit = until(&mut b, "player_hit").await;
        assert_eq!(hit["shooter"], a_id);
        assert_eq!(hit["health"], 66);

        assert_eq!(metrics.total_hits.load(Ordering::Relaxed), 1);

        // Disconnect cleanup
        b.close(None).await.unwrap();
        assert_eq!(until(&mut a, "player_leave").await["id"], b_id);
        assert_eq!(session.read().await.player_count(), 1);

        handle.abort();
    }

    #[tokio::test]
    async fn test_malformed_frames_do_not_end_session() {
        let (addr, _session, metrics, handle) = start(50).await;
        let mut a = connect(addr).await;
        until(&mut a, "welcome").await;

        a.send(Message::Text("{not json".to_string())).await.unwrap();
        send(&mut a, json!({"type": "teleport", "x": 5})).await;
        send(&mut a, json!({"type": "ping", "time": 42})).await;

        let pong = until(&mut a, "pong").await;
        assert_eq!(pong["clientTime"], 42.0);
        assert_eq!(pong["players"], 1);
        assert_eq!(metrics.decode_failures.load(Ordering::Relaxed), 1);

        handle.abort();
    }

    #[tokio::test]
    async fn test_rejected_when_full() {
        let (addr, session, _metrics, handle) = start(1).await;
        let mut a = connect(addr).await;
        until(&mut a, "welcome").await;

        let mut b = connect(addr).await;
        let refusal = next_json(&mut b).await.expect("error record");
        assert_eq!(refusal["type"], "error");
        assert!(next_json(&mut b).await.is_none());
        assert_eq!(session.read().await.player_count(), 1);

        handle.abort();
    }

    /// Wait for the server to close the TCP connection
    async fn read_until_eof(tcp: &mut TcpStream) -> Vec<u8> {
        let mut received = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), tcp.read_to_end(&mut received))
            .await
            .expect("server kept the connection open")
            .unwrap();
        received
    }

    #[tokio::test]
    async fn test_evicted_connection_is_closed() {
        let (addr, session, metrics, handle) = start_with(ServerConfig {
            sweep_interval: Duration::from_millis(200),
            inactivity_timeout: Duration::from_millis(300),
            ..local_config(50)
        })
        .await;

        // Upgrade, then never send another byte or answer the close frame
        let mut tcp = TcpStream::connect(addr).await.unwrap();
        tcp.write_all(
            b"GET / HTTP/1.1\r\n\
              Host: localhost\r\n\
              Upgrade: websocket\r\n\
              Connection: Upgrade\r\n\
              Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
              Sec-WebSocket-Version: 13\r\n\r\n",
        )
        .await
        .unwrap();

        let received = read_until_eof(&mut tcp).await;
        assert!(received.starts_with(b"HTTP/1.1 101"));
        assert_eq!(session.read().await.player_count(), 0);
        assert_eq!(metrics.evicted_players.load(Ordering::Relaxed), 1);

        handle.abort();
    }

    #[tokio::test]
    async fn test_stalled_handshake_is_dropped() {
        let (addr, session, metrics, handle) = start_with(ServerConfig {
            handshake_timeout: Duration::from_millis(200),
            ..local_config(50)
        })
        .await;

        // Connect but never send the upgrade request
        let mut tcp = TcpStream::connect(addr).await.unwrap();
        assert!(read_until_eof(&mut tcp).await.is_empty());
        assert_eq!(session.read().await.player_count(), 0);
        assert_eq!(metrics.total_connections.load(Ordering::Relaxed), 0);

        handle.abort();
    }
}
