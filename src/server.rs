//! Server Listener
//!
//! Accepts control connections and runs one session task per client. The
//! listener only ever accepts and spawns; nothing a client does can stall or
//! stop it.
//!
//! ## Shutdown
//!
//! ```text
//! shutdown future resolves
//!        │  stop accepting (listener dropped)
//!        ▼
//! watch::send(true) ──> idle sessions send the notice and close
//!        │              busy sessions finish their command first
//!        ▼
//! wait up to shutdown_grace, then abort whatever is left
//! ```

use crate::config::ServerConfig;
use crate::session::{handle_session, ClientRegistry, SessionContext, SessionStats};
use crate::storage::Storage;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Pause after a failed accept (e.g. out of file descriptors)
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// A bound server, ready to run.
pub struct Server<S> {
    listener: TcpListener,
    storage: Arc<S>,
    registry: Arc<ClientRegistry>,
    stats: Arc<SessionStats>,
    config: ServerConfig,
}

impl<S: Storage> Server<S> {
    /// Binds the control listener described by `config`.
    pub async fn bind(config: ServerConfig, storage: S) -> io::Result<Self> {
        let listener = TcpListener::bind(config.bind_addr).await?;

        Ok(Self {
            listener,
            storage: Arc::new(storage),
            registry: Arc::new(ClientRegistry::new()),
            stats: Arc::new(SessionStats::new()),
            config,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> Arc<ClientRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn stats(&self) -> Arc<SessionStats> {
        Arc::clone(&self.stats)
    }

    pub fn storage(&self) -> Arc<S> {
        Arc::clone(&self.storage)
    }

    /// Accepts clients until `shutdown` resolves, then shuts sessions down.
    pub async fn run_until<F>(self, shutdown: F) -> io::Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server {
            listener,
            storage,
            registry,
            stats,
            config,
        } = self;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let ctx = SessionContext {
            storage,
            registry,
            stats: Arc::clone(&stats),
            data_channel: config.data_channel,
            shutdown: shutdown_rx,
        };

        let mut sessions = JoinSet::new();
        tokio::pin!(shutdown);

        info!(addr = %listener.local_addr()?, "Accepting connections");

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!(peer = %addr, error = %e, "Failed to set TCP_NODELAY");
                        }
                        sessions.spawn(handle_session(stream, addr, ctx.clone()));
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                Some(finished) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = finished {
                        if e.is_panic() {
                            error!(error = %e, "Session task panicked");
                        }
                    }
                }
            }
        }

        drop(listener);
        info!(sessions = sessions.len(), "Shutting down, no longer accepting");
        // every receiver may already be gone; that's fine
        let _ = shutdown_tx.send(true);

        let drained = tokio::time::timeout(config.shutdown_grace, async {
            while sessions.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(
                remaining = sessions.len(),
                "Sessions still running after grace period, aborting"
            );
            sessions.abort_all();
            while sessions.join_next().await.is_some() {}
        }

        info!(
            sessions_accepted = stats.sessions_accepted.load(Ordering::Relaxed),
            commands = stats.commands_processed.load(Ordering::Relaxed),
            bytes_uploaded = stats.bytes_uploaded.load(Ordering::Relaxed),
            bytes_downloaded = stats.bytes_downloaded.load(Ordering::Relaxed),
            failed_transfers = stats.failed_transfers.load(Ordering::Relaxed),
            "Server shutdown complete"
        );
        Ok(())
    }

    /// Runs until Ctrl+C.
    pub async fn run_until_ctrl_c(self) -> io::Result<()> {
        self.run_until(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Shutdown signal received, stopping server..."),
                Err(e) => {
                    warn!(error = %e, "Failed to install Ctrl+C handler");
                    std::future::pending::<()>().await;
                }
            }
        })
        .await
    }
}
