//! Dropline - Chat Server with FTP-Style File Exchange
//!
//! This is the main entry point for the Dropline server.
//! It parses arguments, prepares the storage directory and runs the server
//! until Ctrl+C.

use anyhow::Context;
use clap::Parser;
use dropline::storage::DirectoryStorage;
use dropline::{Server, ServerConfig};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Chat server with FTP-style file exchange
#[derive(Parser, Debug)]
#[command(name = "dropline", author, version, about, long_about = None)]
struct Cli {
    /// Host to bind the control listener to
    #[arg(long, env = "DROPLINE_HOST", default_value = dropline::DEFAULT_HOST)]
    host: IpAddr,

    /// Port to listen on
    #[arg(short, long, env = "DROPLINE_PORT", default_value_t = dropline::DEFAULT_PORT)]
    port: u16,

    /// Host data listeners bind to
    #[arg(long, env = "DROPLINE_DATA_HOST", default_value = "0.0.0.0")]
    data_host: IpAddr,

    /// Directory holding the shared files
    #[arg(
        long,
        env = "DROPLINE_STORAGE_DIR",
        default_value = dropline::config::DEFAULT_STORAGE_DIR
    )]
    storage_dir: PathBuf,

    /// Seconds sessions get to finish after Ctrl+C
    #[arg(long, env = "DROPLINE_SHUTDOWN_GRACE_SECS", default_value_t = 5)]
    shutdown_grace_secs: u64,

    /// Give up on a data connection after this many seconds (default: wait forever)
    #[arg(long, env = "DROPLINE_ACCEPT_TIMEOUT_SECS")]
    accept_timeout_secs: Option<u64>,

    /// Log filter, e.g. "info" or "dropline=debug" (RUST_LOG wins if set)
    #[arg(long, env = "DROPLINE_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Cli {
    fn into_config(self) -> ServerConfig {
        ServerConfig::default()
            .with_bind_addr(SocketAddr::new(self.host, self.port))
            .with_data_host(self.data_host)
            .with_storage_dir(self.storage_dir)
            .with_shutdown_grace(Duration::from_secs(self.shutdown_grace_secs))
            .with_accept_timeout(self.accept_timeout_secs.map(Duration::from_secs))
    }
}

fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .try_init();
}

fn print_banner(config: &ServerConfig, addr: SocketAddr) {
    println!(
        r#"
Dropline v{} - Chat Server with FTP-Style File Exchange
──────────────────────────────────────────────────────────────
Control listener on {}
Data listeners on   {} (ephemeral ports)
Shared files in     {}
Ready to accept connections.

Use Ctrl+C to shutdown gracefully.
"#,
        dropline::VERSION,
        addr,
        config.data_channel.host,
        config.storage_dir.display()
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);
    let config = cli.into_config();

    let storage = DirectoryStorage::new(&config.storage_dir)
        .await
        .with_context(|| {
            format!(
                "failed to prepare storage directory {}",
                config.storage_dir.display()
            )
        })?;
    info!(dir = %storage.root().display(), "Storage directory ready");

    let server = Server::bind(config.clone(), storage)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    let addr = server.local_addr()?;

    print_banner(&config, addr);
    info!(addr = %addr, "Listening");

    server.run_until_ctrl_c().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let config = Cli::parse_from(["dropline"]).into_config();
        assert_eq!(config, ServerConfig::default());
    }

    #[test]
    fn test_cli_overrides() {
        let config = Cli::parse_from([
            "dropline",
            "--host",
            "127.0.0.1",
            "-p",
            "9000",
            "--storage-dir",
            "/srv/files",
            "--accept-timeout-secs",
            "30",
        ])
        .into_config();

        assert_eq!(config.bind_addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.storage_dir, PathBuf::from("/srv/files"));
        assert_eq!(
            config.data_channel.accept_timeout,
            Some(Duration::from_secs(30))
        );
    }
}
