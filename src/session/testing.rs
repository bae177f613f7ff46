//! In-process server for session tests.

use crate::config::ServerConfig;
use crate::server::Server;
use crate::session::{ClientRegistry, DataChannelConfig, SessionStats};
use crate::storage::MemoryStorage;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;

pub(crate) struct TestServer {
    pub addr: SocketAddr,
    pub registry: Arc<ClientRegistry>,
    pub stats: Arc<SessionStats>,
    pub storage: MemoryStorage,
    _stop: oneshot::Sender<()>,
}

/// Starts a loopback server over empty in-memory storage.
pub(crate) async fn spawn_test_server() -> TestServer {
    let config = ServerConfig::local();
    spawn_test_server_with(MemoryStorage::new(), config.data_channel).await
}

pub(crate) async fn spawn_test_server_with(
    storage: MemoryStorage,
    data_channel: DataChannelConfig,
) -> TestServer {
    let mut config = ServerConfig::local();
    config.data_channel = data_channel;

    let server = Server::bind(config, storage.clone()).await.unwrap();
    let addr = server.local_addr().unwrap();
    let registry = server.registry();
    let stats = server.stats();

    let (stop, stopped) = oneshot::channel::<()>();
    tokio::spawn(server.run_until(async {
        let _ = stopped.await;
    }));

    TestServer {
        addr,
        registry,
        stats,
        storage,
        _stop: stop,
    }
}
