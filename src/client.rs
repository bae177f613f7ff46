//! Programmatic protocol client.
//!
//! Speaks the control protocol and opens data connections the way an
//! interactive client would, without the terminal. Chat and notice lines that
//! arrive while a command is waiting for its reply are queued and handed out
//! by [`Client::next_line`].

use crate::protocol::{
    keyword, parse_dataport, parse_filesize, write_line, LineReader, NO_FILES_MARKER,
};
use crate::session::WELCOME_TRAILER;
use anyhow::{bail, Context, Result};
use std::collections::VecDeque;
use std::net::{IpAddr, SocketAddr};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::debug;

/// An `ERROR...` line sent back by the server.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("server replied: {0}")]
pub struct ServerError(pub String);

/// A connected client session.
#[derive(Debug)]
pub struct Client {
    name: String,
    welcome: Vec<String>,
    server_ip: IpAddr,
    reader: LineReader<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
    pending: VecDeque<String>,
}

impl Client {
    /// Connects and reads the welcome block.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .context("failed to connect to server")?;
        let server_ip = stream.peer_addr()?.ip();
        let (read_half, writer) = stream.into_split();

        let mut client = Self {
            name: String::new(),
            welcome: Vec::new(),
            server_ip,
            reader: LineReader::new(read_half),
            writer,
            pending: VecDeque::new(),
        };

        loop {
            let line = client.read_line().await.context("reading welcome")?;
            let done = line == WELCOME_TRAILER;
            client.welcome.push(line);
            if done {
                break;
            }
        }

        client.name = client
            .welcome
            .first()
            .and_then(|line| line.strip_prefix("Welcome to the chat! You are "))
            .and_then(|rest| rest.strip_suffix('.'))
            .unwrap_or_default()
            .to_string();

        debug!(name = %client.name, "Connected");
        Ok(client)
    }

    /// The name the server assigned to this session.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The welcome block, one entry per line.
    pub fn welcome(&self) -> &[String] {
        &self.welcome
    }

    /// Sends one raw control line.
    pub async fn send_line(&mut self, line: &str) -> Result<()> {
        write_line(&mut self.writer, line)
            .await
            .context("failed to send control line")
    }

    /// Next unsolicited line: queued broadcasts first, then the socket.
    pub async fn next_line(&mut self) -> Result<String> {
        match self.pending.pop_front() {
            Some(line) => Ok(line),
            None => self.read_line().await,
        }
    }

    /// Lists the shared files.
    pub async fn ls(&mut self) -> Result<Vec<String>> {
        self.send_line(keyword::LS).await?;
        self.expect_ok().await?;
        let mut data = self.connect_data().await?;

        let mut listing = Vec::new();
        data.read_to_end(&mut listing)
            .await
            .context("reading listing")?;
        let listing = String::from_utf8_lossy(&listing);

        if listing == NO_FILES_MARKER {
            return Ok(Vec::new());
        }
        Ok(listing
            .lines()
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Downloads `name`.
    pub async fn get(&mut self, name: &str) -> Result<Vec<u8>> {
        self.send_line(&format!("{} {}", keyword::GET, name)).await?;
        self.expect_ok().await?;

        let size_line = self.next_reply().await?;
        let size = parse_filesize(&size_line)?;
        let data = self.connect_data().await?;

        let mut contents = Vec::new();
        data.take(size)
            .read_to_end(&mut contents)
            .await
            .context("reading file data")?;
        if contents.len() as u64 != size {
            bail!(
                "incomplete download of {}: expected {} bytes, got {}",
                name,
                size,
                contents.len()
            );
        }
        Ok(contents)
    }

    /// Uploads `contents` as `name`.
    pub async fn put(&mut self, name: &str, contents: &[u8]) -> Result<()> {
        self.put_declared(name, contents.len() as u64, contents).await
    }

    /// Uploads `contents` after declaring `declared` bytes.
    pub async fn put_declared(
        &mut self,
        name: &str,
        declared: u64,
        contents: &[u8],
    ) -> Result<()> {
        let header = format!("{} {}", keyword::FILESIZE, declared);
        self.put_raw(name, &header, contents).await
    }

    /// Uploads with an arbitrary header line on the data connection.
    pub async fn put_raw(&mut self, name: &str, header: &str, contents: &[u8]) -> Result<()> {
        self.send_line(&format!("{} {}", keyword::PUT, name)).await?;
        self.expect_ok().await?;
        let mut data = self.connect_data().await?;

        // the server may hang up early on a bad header; its verdict comes on
        // the control connection either way
        if let Err(e) = send_upload(&mut data, header, contents).await {
            debug!(error = %e, "Data connection closed during upload");
        }
        drop(data);

        self.expect_ok().await
    }

    /// Broadcasts a chat message.
    pub async fn msg(&mut self, text: &str) -> Result<()> {
        self.send_line(&format!("{} {}", keyword::MSG, text)).await
    }

    /// Leaves the chat and closes the connection.
    pub async fn exit(mut self) -> Result<()> {
        self.send_line(keyword::EXIT).await?;
        self.writer.shutdown().await.ok();
        Ok(())
    }

    async fn read_line(&mut self) -> Result<String> {
        self.reader
            .read_line()
            .await
            .context("control connection closed")
    }

    /// Next line that answers a command; broadcasts are set aside.
    async fn next_reply(&mut self) -> Result<String> {
        loop {
            let line = self.read_line().await?;
            if is_broadcast(&line) {
                self.pending.push_back(line);
                continue;
            }
            return Ok(line);
        }
    }

    async fn expect_ok(&mut self) -> Result<()> {
        let line = self.next_reply().await?;
        if line == keyword::OK {
            Ok(())
        } else if line.starts_with("ERROR") {
            Err(ServerError(line).into())
        } else {
            bail!("unexpected reply: {:?}", line)
        }
    }

    async fn connect_data(&mut self) -> Result<TcpStream> {
        let line = self.next_reply().await?;
        let port = match parse_dataport(&line) {
            Ok(port) => port,
            Err(_) if line.starts_with("ERROR") => return Err(ServerError(line).into()),
            Err(e) => return Err(e.into()),
        };

        TcpStream::connect(SocketAddr::new(self.server_ip, port))
            .await
            .with_context(|| format!("failed to connect to data port {}", port))
    }
}

async fn send_upload(data: &mut TcpStream, header: &str, contents: &[u8]) -> std::io::Result<()> {
    write_line(data, header).await?;
    data.write_all(contents).await?;
    data.shutdown().await
}

/// Chat lines and `*** ... ***` notices.
fn is_broadcast(line: &str) -> bool {
    if line.starts_with("*** ") {
        return true;
    }
    match line.split_once(": ") {
        Some((sender, _)) => sender
            .strip_prefix("User_")
            .is_some_and(|port| !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit())),
        None => false,
    }
}
