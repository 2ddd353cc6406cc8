//! Process shutdown signals
//!
//! Ctrl-C everywhere, plus SIGTERM on unix so process managers and container
//! runtimes get the same orderly shutdown as an interactive interrupt.

use tokio::signal;
use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// Ctrl-C / SIGINT
    Interrupt,
    /// SIGTERM
    Terminate,
}

/// Listens for the signals that stop the server
pub struct ShutdownListener {
    #[cfg(unix)]
    terminate: signal::unix::Signal,
}

impl ShutdownListener {
    /// Register the handlers. SIGTERM is captured from this point on, even
    /// before `recv` is first awaited.
    pub fn install() -> std::io::Result<Self> {
        Ok(Self {
            #[cfg(unix)]
            terminate: signal::unix::signal(signal::unix::SignalKind::terminate())?,
        })
    }

    /// Wait for the first shutdown signal
    pub async fn recv(&mut self) -> ShutdownSignal {
        let interrupt = async {
            if let Err(e) = signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            if self.terminate.recv().await.is_none() {
                std::future::pending::<()>().await;
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = interrupt => ShutdownSignal::Interrupt,
            _ = terminate => ShutdownSignal::Terminate,
        }
    }
}
