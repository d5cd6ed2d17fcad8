//! TCP server: accept loop, admission, graceful shutdown.

mod config;
mod connection;
mod session;

pub use config::Config;
pub use connection::Connection;
pub use session::Session;

use crate::commands::Engine;
use crate::error::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

/// How long shutdown waits for in-flight connections to drain.
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// The TCP server: owns the engine and the accept loop.
pub struct Server {
    config: Arc<Config>,
    engine: Arc<Engine>,
    shutdown_tx: watch::Sender<bool>,
}

impl Server {
    /// Build the server and its engine. Must be called from within a
    /// tokio runtime.
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);
        let engine = Arc::new(Engine::new(Arc::clone(&config)));
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            engine,
            shutdown_tx,
        }
    }

    /// The command engine.
    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Run the accept loop until shutdown is signalled.
    pub async fn run(&self) -> Result<()> {
        std::fs::create_dir_all(self.config.temp_dir())?;

        let address = format!("{}:{}", self.config.bind, self.config.port);
        let listener = TcpListener::bind(&address).await?;
        info!(%address, "listening");

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        loop {
            let (stream, peer_addr) = tokio::select! {
                accepted = listener.accept() => accepted?,
                _ = shutdown_rx.changed() => break,
            };

            let count = self.engine.register_client();
            let admitted = self.config.max_clients == 0 || count <= self.config.max_clients;
            let session = Arc::new(Session::new(peer_addr, admitted));

            let engine = Arc::clone(&self.engine);
            let shutdown = self.shutdown_tx.subscribe();
            tokio::spawn(async move {
                let mut connection =
                    Connection::new(stream, peer_addr, session, Arc::clone(&engine), shutdown);
                if let Err(e) = connection.run().await {
                    error!(%peer_addr, error = %e, "connection failed");
                }
                engine.unregister_client();
            });
        }

        // Stop accepting, let in-flight writes drain (bounded), then
        // stop background work.
        drop(listener);
        info!("shutting down");
        self.drain_connections().await;
        self.engine.shutdown();
        Ok(())
    }

    /// Signal the accept loop and every connection to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    async fn drain_connections(&self) {
        let deadline = Instant::now() + SHUTDOWN_DRAIN_TIMEOUT;
        while self.engine.client_count() > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        let remaining = self.engine.client_count();
        if remaining > 0 {
            info!(remaining, "drain timeout reached with connections open");
        }
    }
}
