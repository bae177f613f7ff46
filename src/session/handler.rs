//! Session Handler Module
//!
//! This module drives one client's control connection from accept to close.
//! Each client gets its own handler task that reads command lines, runs the
//! matching sub-protocol and queues replies.
//!
//! ## Session Lifecycle
//!
//! ```text
//! 1. CONNECTING
//!        │  queue welcome block, register in ClientRegistry
//!        ▼
//! 2. WELCOMED
//!        │
//!        ▼
//! 3. ┌──────────────────────────────────────────┐
//!    │             COMMAND_WAIT                 │
//!    │                                          │
//!    │  read line ──> parse ──> dispatch        │
//!    │                   │                      │
//!    │        ┌──────────┼───────────┐          │
//!    │        ▼          ▼           ▼          │
//!    │   LS_SERVING  GET_SERVING  PUT_RECEIVING │
//!    │        │          │           │          │
//!    │        └──────────┴───────────┘          │
//!    │                   │                      │
//!    │              [Loop back]                 │
//!    └──────────────────────────────────────────┘
//!        │  EXIT, peer disconnect, or server shutdown
//!        ▼
//! 4. CLOSED: deregister, close, broadcast departure
//! ```
//!
//! ## Outbound Traffic
//!
//! The control connection is split. Its write half belongs to a writer task
//! that drains the session's [`Outbox`]; the same outbox is registered in the
//! [`ClientRegistry`], so command replies and chat broadcasts from other
//! sessions are interleaved line by line on one stream.

use crate::protocol::{parse_command, CodecError, Command, LineReader, Reply};
use crate::session::data_channel::DataChannelConfig;
use crate::session::registry::{ClientRegistry, Outbox, SessionId};
use crate::storage::Storage;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Last line of the welcome block
pub const WELCOME_TRAILER: &str = "Type 'exit' to leave the chat.";

/// Line sent to idle sessions when the server shuts down
pub const SHUTDOWN_NOTICE: &str = "*** Server is shutting down. ***";

/// How long a closing session waits for its queued lines to reach the socket
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Statistics for session handling
#[derive(Debug, Default)]
pub struct SessionStats {
    /// Total number of sessions accepted
    pub sessions_accepted: AtomicU64,
    /// Currently open sessions
    pub active_sessions: AtomicU64,
    /// Total commands processed
    pub commands_processed: AtomicU64,
    /// Payload bytes received through PUT
    pub bytes_uploaded: AtomicU64,
    /// Payload bytes sent through GET
    pub bytes_downloaded: AtomicU64,
    /// Commands that ended in a transfer error
    pub failed_transfers: AtomicU64,
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_opened(&self) {
        self.sessions_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_closed(&self) {
        self.active_sessions.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_uploaded(&self, count: u64) {
        self.bytes_uploaded.fetch_add(count, Ordering::Relaxed);
    }

    pub fn bytes_downloaded(&self, count: u64) {
        self.bytes_downloaded.fetch_add(count, Ordering::Relaxed);
    }

    pub fn transfer_failed(&self) {
        self.failed_transfers.fetch_add(1, Ordering::Relaxed);
    }
}

/// Everything a session shares with the server and its sibling sessions.
pub struct SessionContext<S> {
    pub storage: Arc<S>,
    pub registry: Arc<ClientRegistry>,
    pub stats: Arc<SessionStats>,
    pub data_channel: DataChannelConfig,
    /// Flips to `true` when the server starts shutting down
    pub shutdown: watch::Receiver<bool>,
}

impl<S> Clone for SessionContext<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            registry: Arc::clone(&self.registry),
            stats: Arc::clone(&self.stats),
            data_channel: self.data_channel,
            shutdown: self.shutdown.clone(),
        }
    }
}

/// How a session ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The client sent `EXIT`
    Exit,
    /// The server is shutting down
    Shutdown,
}

/// Errors that end a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The client closed the control connection
    #[error("client disconnected")]
    ClientDisconnected,

    /// The client sent a control line over the length limit
    #[error("control line too long")]
    LineTooLong,

    /// I/O error on the control connection
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CodecError> for SessionError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::ConnectionClosed => SessionError::ClientDisconnected,
            CodecError::LineTooLong => SessionError::LineTooLong,
            CodecError::Io(e) | CodecError::Sink(e) => SessionError::Io(e),
        }
    }
}

/// Deregisters the session and closes its stats entry when dropped, including
/// when the session task is aborted mid-command.
struct SessionGuard {
    id: SessionId,
    registry: Arc<ClientRegistry>,
    stats: Arc<SessionStats>,
}

impl SessionGuard {
    fn open(id: SessionId, registry: Arc<ClientRegistry>, stats: Arc<SessionStats>) -> Self {
        stats.session_opened();
        Self {
            id,
            registry,
            stats,
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.remove(self.id);
        self.stats.session_closed();
    }
}

/// Handles a single client session.
pub struct SessionHandler<S> {
    pub(super) id: SessionId,
    /// Display name, `User_<peer port>`
    pub(super) name: String,
    pub(super) addr: SocketAddr,
    reader: LineReader<BufReader<OwnedReadHalf>>,
    pub(super) outbox: Outbox,
    writer: JoinHandle<()>,
    pub(super) ctx: SessionContext<S>,
    guard: SessionGuard,
}

impl<S: Storage> SessionHandler<S> {
    /// Creates a handler for an accepted control connection and starts its
    /// writer task.
    pub fn new(stream: TcpStream, addr: SocketAddr, ctx: SessionContext<S>) -> Self {
        let id = ctx.registry.next_id();
        let registry = Arc::clone(&ctx.registry);
        let guard = SessionGuard::open(id, registry, Arc::clone(&ctx.stats));
        let name = format!("User_{}", addr.port());
        let (read_half, write_half) = stream.into_split();
        let (outbox, rx) = Outbox::channel();
        let writer = tokio::spawn(write_outbound(write_half, rx, name.clone()));

        Self {
            id,
            name,
            addr,
            reader: LineReader::new(read_half),
            outbox,
            writer,
            ctx,
            guard,
        }
    }

    /// The session's display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs the session until EXIT, disconnect or shutdown, then tears it down.
    pub async fn run(mut self) -> Result<SessionEnd, SessionError> {
        info!(session = %self.name, peer = %self.addr, "Client connected");

        let registry = Arc::clone(&self.ctx.registry);
        let online = registry.names();
        self.outbox.send_line(&welcome_block(&self.name, &online));
        registry.add(self.id, self.name.clone(), self.outbox.clone());

        let result = self.command_loop().await;

        match &result {
            Ok(SessionEnd::Exit) => info!(session = %self.name, "Client exited"),
            Ok(SessionEnd::Shutdown) => info!(session = %self.name, "Session closed for shutdown"),
            Err(SessionError::ClientDisconnected) => {
                info!(session = %self.name, "Client disconnected")
            }
            Err(SessionError::Io(io_err))
                if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
            {
                info!(session = %self.name, "Connection reset by client")
            }
            Err(e) => warn!(session = %self.name, error = %e, "Session error"),
        }

        self.close().await;
        result
    }

    /// The COMMAND_WAIT loop.
    async fn command_loop(&mut self) -> Result<SessionEnd, SessionError> {
        loop {
            let line = tokio::select! {
                line = self.reader.read_line() => Some(line),
                _ = shutdown_requested(&mut self.ctx.shutdown) => None,
            };

            let Some(line) = line else {
                self.outbox.send_line(SHUTDOWN_NOTICE);
                return Ok(SessionEnd::Shutdown);
            };
            let line = line?;
            trace!(session = %self.name, line = %line, "Read control line");

            let command = match parse_command(&line) {
                Ok(command) => command,
                Err(e) => {
                    if let Some(reply) = e.reply() {
                        debug!(session = %self.name, error = %e, "Rejected command");
                        self.reply(reply.into());
                    }
                    continue;
                }
            };

            self.ctx.stats.command_processed();
            debug!(session = %self.name, command = command.name(), "Dispatching command");

            let outcome = match command {
                Command::Exit => return Ok(SessionEnd::Exit),
                Command::Msg(text) => {
                    self.chat(&text);
                    continue;
                }
                Command::List => self.serve_list().await,
                Command::Get(name) => self.serve_get(&name).await,
                Command::Put(name) => self.receive_put(&name).await,
            };

            if let Err(e) = outcome {
                self.ctx.stats.transfer_failed();
                warn!(session = %self.name, error = %e, "Command failed");
            }
        }
    }

    /// Queues a reply line on the control connection.
    pub(super) fn reply(&self, reply: Reply) {
        self.outbox.send(reply.serialize());
    }

    fn chat(&self, text: &str) {
        let delivered = self
            .ctx
            .registry
            .broadcast(&format!("{}: {}", self.name, text), Some(self.id));
        debug!(session = %self.name, delivered, "Chat message broadcast");
    }

    /// CLOSED: deregister, close the connection, announce the departure.
    async fn close(self) {
        let SessionHandler {
            id,
            name,
            reader,
            outbox,
            writer,
            ctx,
            guard,
            ..
        } = self;

        ctx.registry.remove(id);

        drop(reader);
        drop(outbox);
        let abort = writer.abort_handle();
        if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await.is_err() {
            debug!(session = %name, "Writer did not drain in time");
            abort.abort();
        }

        ctx.registry.broadcast(&format!("*** {} has left the chat. ***", name), None);
        drop(guard);
    }
}

/// Builds the welcome/help block sent once on connect. `online` names the
/// sessions already connected.
pub fn welcome_block(name: &str, online: &[String]) -> String {
    let roster = if online.is_empty() {
        String::from("No one else is online.")
    } else {
        format!("Online: {}", online.join(", "))
    };

    format!(
        "Welcome to the chat! You are {name}.\n\
         {roster}\n\
         Commands:\n\
         \x20 LS              list shared files\n\
         \x20 GET <filename>  download a file\n\
         \x20 PUT <filename>  upload a file\n\
         \x20 MSG <text>      send a chat message\n\
         \x20 EXIT            leave the chat\n\
         {WELCOME_TRAILER}"
    )
}

/// Resolves once shutdown is requested. Never resolves if the server is gone
/// without requesting it.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Drains a session's outbox onto its control connection.
async fn write_outbound(
    write_half: OwnedWriteHalf,
    mut rx: mpsc::Receiver<Bytes>,
    session: String,
) {
    let mut writer = BufWriter::new(write_half);

    let result: std::io::Result<()> = async {
        while let Some(bytes) = rx.recv().await {
            writer.write_all(&bytes).await?;
            while let Ok(bytes) = rx.try_recv() {
                writer.write_all(&bytes).await?;
            }
            writer.flush().await?;
        }
        writer.shutdown().await
    }
    .await;

    if let Err(e) = result {
        debug!(session = %session, error = %e, "Control connection writer stopped");
    }
}

/// Handles a client session.
///
/// This is a convenience function that creates a SessionHandler and runs it
/// to completion.
pub async fn handle_session<S: Storage>(
    stream: TcpStream,
    addr: SocketAddr,
    ctx: SessionContext<S>,
) {
    let handler = SessionHandler::new(stream, addr, ctx);
    if let Err(e) = handler.run().await {
        debug!(client = %addr, error = %e, "Session ended with error");
    }
}
