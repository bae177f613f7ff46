//! Server configuration.

use crate::session::DataChannelConfig;
use crate::{DEFAULT_HOST, DEFAULT_PORT};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Default directory shared files are kept in
pub const DEFAULT_STORAGE_DIR: &str = "./shared_files";

/// Default time sessions get to finish after shutdown is requested
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Everything the server needs to know before it starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Control listener address
    pub bind_addr: SocketAddr,
    /// Directory backing [`DirectoryStorage`](crate::storage::DirectoryStorage)
    pub storage_dir: PathBuf,
    /// Data listener host and accept timeout
    pub data_channel: DataChannelConfig,
    /// How long to wait for sessions after shutdown before aborting them
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let host = DEFAULT_HOST
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

        Self {
            bind_addr: SocketAddr::new(host, DEFAULT_PORT),
            storage_dir: PathBuf::from(DEFAULT_STORAGE_DIR),
            data_channel: DataChannelConfig::default(),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

impl ServerConfig {
    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    pub fn with_storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage_dir = dir.into();
        self
    }

    pub fn with_data_host(mut self, host: IpAddr) -> Self {
        self.data_channel.host = host;
        self
    }

    pub fn with_accept_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.data_channel.accept_timeout = timeout;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Loopback-only config on OS-assigned ports, for tests and benches.
    pub fn local() -> Self {
        let localhost = IpAddr::V4(Ipv4Addr::LOCALHOST);
        Self::default()
            .with_bind_addr(SocketAddr::new(localhost, 0))
            .with_data_host(localhost)
    }
}
