//! Session Module
//!
//! Everything that happens on behalf of one connected client:
//!
//! - `handler`: the control-connection state machine and its writer task
//! - `transfer`: the `LS`/`GET`/`PUT` data-channel sub-protocols
//! - `data_channel`: single-use ephemeral listeners
//! - `registry`: the set of sessions that receive broadcasts
//!
//! ## Example
//!
//! ```ignore
//! use dropline::session::{handle_session, SessionContext};
//!
//! let (stream, addr) = listener.accept().await?;
//! tokio::spawn(handle_session(stream, addr, ctx.clone()));
//! ```

pub mod data_channel;
pub mod handler;
pub mod registry;
pub mod transfer;

#[cfg(test)]
pub(crate) mod testing;

pub use data_channel::{DataChannel, DataChannelConfig};
pub use handler::{
    handle_session, welcome_block, SessionContext, SessionEnd, SessionError, SessionHandler,
    SessionStats, SHUTDOWN_NOTICE, WELCOME_TRAILER,
};
pub use registry::{ClientRegistry, Outbox, SessionId};
pub use transfer::TransferError;
