//! Server counters and the HTTP status surface
//!
//! Exposes aggregate counters as JSON (`/health`, `/info`, `/players`) and in
//! Prometheus format (`/metrics`). Read-only; nothing here has game
//! authority.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::game::constants::arena::MAP_SIZE;
use crate::net::game_session::SharedSession;

/// Number of handler timings kept for percentile calculation
const HANDLE_HISTORY_LEN: usize = 1000;

/// Metrics registry for the game server
#[derive(Debug)]
pub struct Metrics {
    // Sessions
    pub total_connections: AtomicU64,
    pub current_players: AtomicU64,
    pub rejected_connections: AtomicU64,
    pub evicted_players: AtomicU64,

    // Combat
    pub total_shots: AtomicU64,
    pub total_hits: AtomicU64,
    pub total_kills: AtomicU64,

    // Traffic
    pub messages_received: AtomicU64,
    pub messages_sent: AtomicU64,
    pub decode_failures: AtomicU64,
    pub send_failures: AtomicU64,

    // Message handling time (microseconds)
    pub handle_time_us: AtomicU64,
    pub handle_time_p95_us: AtomicU64,
    pub handle_time_p99_us: AtomicU64,

    /// Configured player cap, reported by /info
    pub max_players: AtomicU64,

    start_time: Instant,

    handle_history: RwLock<VecDeque<u64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            total_connections: AtomicU64::new(0),
            current_players: AtomicU64::new(0),
            rejected_connections: AtomicU64::new(0),
            evicted_players: AtomicU64::new(0),
            total_shots: AtomicU64::new(0),
            total_hits: AtomicU64::new(0),
            total_kills: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            send_failures: AtomicU64::new(0),
            handle_time_us: AtomicU64::new(0),
            handle_time_p95_us: AtomicU64::new(0),
            handle_time_p99_us: AtomicU64::new(0),
            max_players: AtomicU64::new(0),
            start_time: Instant::now(),
            handle_history: RwLock::new(VecDeque::with_capacity(HANDLE_HISTORY_LEN)),
        }
    }

    /// Increment a counter by one
    #[inline]
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record how long one inbound message took to handle and update percentiles
    pub fn record_handle_time(&self, duration: Duration) {
        let us = duration.as_micros() as u64;
        self.handle_time_us.store(us, Ordering::Relaxed);

        let mut history = self.handle_history.write();
        history.push_back(us);
        while history.len() > HANDLE_HISTORY_LEN {
            history.pop_front();
        }

        if history.len() >= 10 {
            let mut sorted: Vec<u64> = history.iter().copied().collect();
            sorted.sort_unstable();

            let p95_idx = (sorted.len() as f32 * 0.95) as usize;
            let p99_idx = (sorted.len() as f32 * 0.99) as usize;

            self.handle_time_p95_us
                .store(sorted[p95_idx.min(sorted.len() - 1)], Ordering::Relaxed);
            self.handle_time_p99_us
                .store(sorted[p99_idx.min(sorted.len() - 1)], Ordering::Relaxed);
        }
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-format metrics output
    pub fn to_prometheus(&self) -> String {
        let mut output = String::with_capacity(2048);

        macro_rules! metric {
            ($name:expr, $help:expr, $type:expr, $value:expr) => {
                output.push_str(&format!(
                    "# HELP {} {}\n# TYPE {} {}\n{} {}\n",
                    $name, $help, $name, $type, $name, $value
                ));
            };
        }

        metric!(
            "arena_fps_players",
            "Connected players",
            "gauge",
            self.current_players.load(Ordering::Relaxed)
        );
        metric!(
            "arena_fps_connections_total",
            "Connections accepted since start",
            "counter",
            self.total_connections.load(Ordering::Relaxed)
        );
        metric!(
            "arena_fps_connections_rejected_total",
            "Connections refused at capacity",
            "counter",
            self.rejected_connections.load(Ordering::Relaxed)
        );
        metric!(
            "arena_fps_evictions_total",
            "Players evicted for inactivity",
            "counter",
            self.evicted_players.load(Ordering::Relaxed)
        );

        metric!(
            "arena_fps_shots_total",
            "Shots that passed the cooldown",
            "counter",
            self.total_shots.load(Ordering::Relaxed)
        );
        metric!(
            "arena_fps_hits_total",
            "Hits landed",
            "counter",
            self.total_hits.load(Ordering::Relaxed)
        );
        metric!(
            "arena_fps_kills_total",
            "Kills",
            "counter",
            self.total_kills.load(Ordering::Relaxed)
        );

        metric!(
            "arena_fps_messages_received_total",
            "Inbound frames",
            "counter",
            self.messages_received.load(Ordering::Relaxed)
        );
        metric!(
            "arena_fps_messages_sent_total",
            "Outbound frames queued",
            "counter",
            self.messages_sent.load(Ordering::Relaxed)
        );
        metric!(
            "arena_fps_decode_failures_total",
            "Inbound frames dropped as malformed",
            "counter",
            self.decode_failures.load(Ordering::Relaxed)
        );
        metric!(
            "arena_fps_send_failures_total",
            "Outbound frames dropped on closed or full queues",
            "counter",
            self.send_failures.load(Ordering::Relaxed)
        );

        metric!(
            "arena_fps_handle_time_microseconds",
            "Last message handling time",
            "gauge",
            self.handle_time_us.load(Ordering::Relaxed)
        );
        metric!(
            "arena_fps_handle_time_p95_microseconds",
            "95th percentile handling time",
            "gauge",
            self.handle_time_p95_us.load(Ordering::Relaxed)
        );
        metric!(
            "arena_fps_handle_time_p99_microseconds",
            "99th percentile handling time",
            "gauge",
            self.handle_time_p99_us.load(Ordering::Relaxed)
        );

        metric!(
            "arena_fps_uptime_seconds",
            "Server uptime in seconds",
            "counter",
            self.uptime_seconds()
        );

        output
    }

    /// Body of `GET /health`
    pub fn health_json(&self) -> serde_json::Value {
        json!({
            "status": "ok",
            "players": self.current_players.load(Ordering::Relaxed),
            "uptime": self.uptime_seconds(),
            "timestamp": crate::net::game_session::unix_millis(),
        })
    }

    /// Body of `GET /info`
    pub fn info_json(&self) -> serde_json::Value {
        json!({
            "players": self.current_players.load(Ordering::Relaxed),
            "maxPlayers": self.max_players.load(Ordering::Relaxed),
            "uptime": self.uptime_seconds(),
            "mapSize": MAP_SIZE,
            "totalConnections": self.total_connections.load(Ordering::Relaxed),
            "totalKills": self.total_kills.load(Ordering::Relaxed),
            "totalShots": self.total_shots.load(Ordering::Relaxed),
            "totalHits": self.total_hits.load(Ordering::Relaxed),
        })
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

const INDEX_BODY: &str = "Arena FPS server\n\nEndpoints:\n/health - liveness\n/info - server counters\n/players - connected players\n/metrics - prometheus\n";

fn http_response(content_type: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nAccess-Control-Allow-Origin: *\r\nConnection: close\r\n\r\n{}",
        content_type,
        body.len(),
        body
    )
}

/// Route one request line to a response
async fn respond(request: &str, metrics: &Metrics, session: &SharedSession) -> String {
    let path = request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("/");

    match path {
        "/health" => http_response("application/json", &metrics.health_json().to_string()),
        "/info" => http_response("application/json", &metrics.info_json().to_string()),
        "/players" => {
            let body = session.read().await.roster_json();
            http_response("application/json", &body.to_string())
        }
        "/metrics" => http_response("text/plain; version=0.0.4", &metrics.to_prometheus()),
        _ => http_response("text/plain; charset=utf-8", INDEX_BODY),
    }
}

/// Start the status HTTP server
pub async fn start_status_server(
    metrics: Arc<Metrics>,
    session: SharedSession,
    listener: TcpListener,
) -> anyhow::Result<()> {
    info!("Status server listening on http://{}", listener.local_addr()?);

    loop {
        let (mut socket, peer) = listener.accept().await?;
        let metrics = metrics.clone();
        let session = session.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 1024];

            match socket.read(&mut buffer).await {
                Ok(n) if n > 0 => {
                    let request = String::from_utf8_lossy(&buffer[..n]);
                    let response = respond(&request, &metrics, &session).await;

                    if let Err(e) = socket.write_all(response.as_bytes()).await {
                        debug!("Failed to write status response to {}: {}", peer, e);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("Failed to read from status socket {}: {}", peer, e);
                }
            }
        });
    }
}
