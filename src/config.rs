use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to
    pub bind_address: IpAddr,
    /// WebSocket port
    pub port: u16,
    /// HTTP status port
    pub status_port: u16,
    /// Maximum concurrently connected players
    pub max_players: usize,
    /// Silence after which a player is evicted
    pub inactivity_timeout: Duration,
    /// How often the liveness sweeper runs
    pub sweep_interval: Duration,
    /// Time allowed for a new connection to complete the WebSocket upgrade
    pub handshake_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            port: 8080,
            status_port: 8081,
            max_players: 50,
            inactivity_timeout: Duration::from_secs(30 * 60),
            sweep_interval: Duration::from_secs(60),
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

/// Read and parse an environment variable, warning (and returning None) on bad input
fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Invalid {} '{}', using default", key, raw);
            None
        }
    }
}

impl ServerConfig {
    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        let mut config = Self::default();

        if let Some(addr) = env_parse("BIND_ADDRESS") {
            config.bind_address = addr;
        }

        if let Some(port) = env_parse::<u16>("PORT") {
            if port > 0 {
                config.port = port;
            } else {
                tracing::warn!("PORT must be > 0, using default");
            }
        }

        if let Some(port) = env_parse::<u16>("STATUS_PORT") {
            if port > 0 {
                config.status_port = port;
            } else {
                tracing::warn!("STATUS_PORT must be > 0, using default");
            }
        }

        if let Some(max_players) = env_parse::<usize>("MAX_PLAYERS") {
            if (1..=1000).contains(&max_players) {
                config.max_players = max_players;
            } else {
                tracing::warn!("MAX_PLAYERS must be 1-1000, using default");
            }
        }

        if let Some(secs) = env_parse::<u64>("INACTIVITY_TIMEOUT_SECS") {
            if secs > 0 {
                config.inactivity_timeout = Duration::from_secs(secs);
            } else {
                tracing::warn!("INACTIVITY_TIMEOUT_SECS must be > 0, using default");
            }
        }

        if let Some(secs) = env_parse::<u64>("SWEEP_INTERVAL_SECS") {
            if secs > 0 {
                config.sweep_interval = Duration::from_secs(secs);
            } else {
                tracing::warn!("SWEEP_INTERVAL_SECS must be > 0, using default");
            }
        }

        if let Some(secs) = env_parse::<u64>("HANDSHAKE_TIMEOUT_SECS") {
            if secs > 0 {
                config.handshake_timeout = Duration::from_secs(secs);
            } else {
                tracing::warn!("HANDSHAKE_TIMEOUT_SECS must be > 0, using default");
            }
        }

        config
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        if self.port == 0 {
            return Err("Port cannot be 0".to_string());
        }
        if self.status_port == 0 {
            return Err("Status port cannot be 0".to_string());
        }
        if self.status_port == self.port {
            return Err("Status port must differ from the game port".to_string());
        }
        if self.max_players == 0 {
            return Err("max_players must be at least 1".to_string());
        }
        if self.sweep_interval.is_zero() {
            return Err("sweep_interval must be non-zero".to_string());
        }
        if self.inactivity_timeout.is_zero() {
            return Err("inactivity_timeout must be non-zero".to_string());
        }
        if self.handshake_timeout.is_zero() {
            return Err("handshake_timeout must be non-zero".to_string());
        }
        Ok(())
    }

    pub fn game_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    pub fn status_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.status_port)
    }
}
