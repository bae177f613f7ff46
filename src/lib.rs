//! # Dropline - Chat Server with FTP-Style File Exchange
//!
//! Dropline is a small-group chat server where every client can also list,
//! download and upload files in one shared directory. Chat and commands share
//! a long-lived control connection; each file operation opens its own
//! short-lived data connection on a port the server announces.
//!
//! ## Features
//!
//! - **Chat**: `MSG` lines are broadcast to every other connected client
//! - **File Exchange**: `LS`, `GET` and `PUT` over per-command data connections
//! - **Isolation**: One task per client; a failed transfer never ends a session
//! - **Async I/O**: Built on Tokio for many concurrent clients
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                               Dropline                               │
//! │                                                                      │
//! │  ┌─────────────┐    ┌──────────────────┐    ┌──────────────────┐    │
//! │  │   Server    │───>│  SessionHandler  │───>│    Transfers     │    │
//! │  │ (Listener)  │    │  (per client)    │    │  LS / GET / PUT  │    │
//! │  └─────────────┘    └────────┬─────────┘    └────────┬─────────┘    │
//! │                              │                       │              │
//! │           ┌──────────────────┼──────────┐            ▼              │
//! │           ▼                  ▼          │   ┌──────────────────┐    │
//! │  ┌──────────────┐   ┌────────────────┐  │   │   DataChannel    │    │
//! │  │ Line Codec & │   │ ClientRegistry │  │   │ (ephemeral port) │    │
//! │  │   Parsers    │   │  (broadcast)   │  │   └──────────────────┘    │
//! │  └──────────────┘   └────────────────┘  │                           │
//! │                                         ▼                           │
//! │                              ┌────────────────────┐                 │
//! │                              │  Storage backend   │                 │
//! │                              │ Directory / Memory │                 │
//! │                              └────────────────────┘                 │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use dropline::{Server, ServerConfig};
//! use dropline::storage::DirectoryStorage;
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let config = ServerConfig::default();
//!     let storage = DirectoryStorage::new(&config.storage_dir).await?;
//!
//!     let server = Server::bind(config, storage).await?;
//!     server.run_until_ctrl_c().await
//! }
//! ```
//!
//! ## Supported Commands
//!
//! - `LS` - list shared files
//! - `GET <filename>` - download a file
//! - `PUT <filename>` - upload a file
//! - `MSG <text>` - chat with everyone else
//! - `EXIT` - leave

pub mod client;
pub mod config;
pub mod protocol;
pub mod server;
pub mod session;
pub mod storage;

pub use client::{Client, ServerError};
pub use config::ServerConfig;
pub use protocol::{Command, ErrorReply, Reply};
pub use server::Server;
pub use session::{ClientRegistry, SessionStats};
pub use storage::{DirectoryStorage, MemoryStorage, Storage};

/// Default port for the control listener
pub const DEFAULT_PORT: u16 = 8080;

/// Default host to bind to
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Version of Dropline
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
