use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use arena_fps_server::config::ServerConfig;
use arena_fps_server::metrics::Metrics;
use arena_fps_server::net::transport::WebSocketServer;
use arena_fps_server::shutdown::ShutdownListener;

/// Grace period for outbound queues to drain after the shutdown notice
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize logging (RUST_LOG overrides the default level)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("Arena FPS Server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = ServerConfig::load_or_default();
    config.validate().map_err(anyhow::Error::msg)?;
    info!(
        "Configuration loaded: {}, status port {}, max_players={}",
        config.game_addr(),
        config.status_port,
        config.max_players
    );

    // Capture shutdown signals before binding
    let mut signals = ShutdownListener::install()?;

    let metrics = Arc::new(Metrics::new());

    let server = WebSocketServer::bind(config.clone(), metrics.clone()).await?;
    let session = server.session();

    #[cfg(feature = "status_server")]
    {
        let listener = tokio::net::TcpListener::bind(config.status_addr()).await?;
        let metrics = metrics.clone();
        let session = session.clone();
        tokio::spawn(async move {
            if let Err(e) = arena_fps_server::metrics::start_status_server(metrics, session, listener).await {
                error!("Status server error: {}", e);
            }
        });
    }

    info!("Server ready on ws://{}", server.local_addr()?);

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server error: {}", e);
            }
        }
        signal = signals.recv() => {
            info!("Received {:?}, shutting down...", signal);
        }
    }

    session.read().await.shutdown("Server is shutting down");
    tokio::time::sleep(SHUTDOWN_GRACE).await;

    info!("Server stopped");
    Ok(())
}
