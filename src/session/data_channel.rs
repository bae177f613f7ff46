//! Data Channel Allocator
//!
//! Every `LS`, `GET` and `PUT` gets its own short-lived data connection. The
//! server binds a listener on an OS-assigned port, announces the port with
//! `DATAPORT <port>`, accepts exactly one connection and retires the listener.
//!
//! [`DataChannel::accept_once`] consumes the channel, so the listener is closed
//! on every path out of a command: after the accept, on an accept error, on
//! timeout, or when a command bails out before accepting and the channel is
//! simply dropped.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

/// Where data listeners bind and how long they wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataChannelConfig {
    /// Address data listeners bind to (default: all interfaces)
    pub host: IpAddr,
    /// How long to wait for the client to connect (default: forever)
    pub accept_timeout: Option<Duration>,
}

impl Default for DataChannelConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            accept_timeout: None,
        }
    }
}

/// A single-use listening endpoint on an ephemeral port.
#[derive(Debug)]
pub struct DataChannel {
    listener: TcpListener,
    port: u16,
}

impl DataChannel {
    /// Binds a listener on `host` with an OS-assigned port.
    pub async fn open(host: IpAddr) -> io::Result<Self> {
        let listener = TcpListener::bind(SocketAddr::new(host, 0)).await?;
        let port = listener.local_addr()?.port();
        debug!(port, "Data channel opened");
        Ok(Self { listener, port })
    }

    /// The port to announce in `DATAPORT`.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Waits for one inbound connection, then closes the listener.
    ///
    /// With a `timeout`, gives up with [`io::ErrorKind::TimedOut`].
    pub async fn accept_once(self, timeout: Option<Duration>) -> io::Result<TcpStream> {
        let DataChannel { listener, port } = self;

        let accepted = match timeout {
            Some(limit) => match tokio::time::timeout(limit, listener.accept()).await {
                Ok(result) => result,
                Err(_) => Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("no data connection on port {} within {:?}", port, limit),
                )),
            },
            None => listener.accept().await,
        };
        drop(listener);

        let (stream, peer) = accepted?;
        debug!(port, peer = %peer, "Data connection accepted, listener retired");
        Ok(stream)
    }
}
