//! Data-channel sub-protocols for `LS`, `GET` and `PUT`.
//!
//! Each command opens its own [`DataChannel`], announces the port on the
//! control connection and services exactly one data connection. The control
//! connection is not read while this happens.
//!
//! Replies: failures before `DATAPORT` is sent are always answered with an
//! error line. After `DATAPORT`, `LS` and `GET` have nothing left to say on
//! the control connection (the client is reading the data connection), while
//! `PUT` always finishes with `OK` or an error line.

use crate::protocol::{
    parse_filesize, CodecError, ErrorReply, LineReader, ParseError, Reply, NO_FILES_MARKER,
};
use crate::session::data_channel::DataChannel;
use crate::session::handler::SessionHandler;
use crate::storage::{FileName, FileNameError, Storage, StoredFile};
use std::io;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};

/// Errors that abort a single command. The session always survives them.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("invalid file name {name:?}: {source}")]
    InvalidFileName {
        name: String,
        #[source]
        source: FileNameError,
    },

    /// Could not bind an ephemeral data listener
    #[error("could not open data channel: {0}")]
    AllocatorFailure(#[source] io::Error),

    /// The client never connected to the announced port
    #[error("data connection not established: {0}")]
    AcceptFailed(#[source] io::Error),

    /// I/O failure on an established data connection
    #[error("data connection failed: {0}")]
    DataConnection(#[source] io::Error),

    /// Malformed `FILESIZE` line from the data-connection peer
    #[error("protocol violation on data connection: {0}")]
    ProtocolViolation(#[from] ParseError),

    #[error("incomplete transfer: expected {expected} bytes, got {received}")]
    IncompleteTransfer { expected: u64, received: u64 },

    #[error("storage error: {0}")]
    Storage(#[source] io::Error),
}

impl TransferError {
    /// The error line reported on the control connection for this failure.
    pub fn reply(&self) -> ErrorReply {
        match self {
            TransferError::FileNotFound(_) => ErrorReply::FileNotFound,
            TransferError::InvalidFileName { .. } => ErrorReply::InvalidFileName,
            TransferError::AllocatorFailure(_) | TransferError::AcceptFailed(_) => {
                ErrorReply::DataChannelUnavailable
            }
            TransferError::DataConnection(_) | TransferError::IncompleteTransfer { .. } => {
                ErrorReply::IncompleteFile
            }
            TransferError::ProtocolViolation(e) => {
                e.reply().unwrap_or(ErrorReply::ExpectedFileSize)
            }
            TransferError::Storage(_) => ErrorReply::StorageUnavailable,
        }
    }
}

impl<S: Storage> SessionHandler<S> {
    /// LS_SERVING. Returns the number of listing bytes sent.
    pub(super) async fn serve_list(&mut self) -> Result<u64, TransferError> {
        let names = match self.ctx.storage.list().await {
            Ok(names) => names,
            Err(e) => return self.fail(TransferError::Storage(e)),
        };

        let channel = self.open_data_channel().await?;
        self.reply(Reply::Ok);
        self.reply(Reply::DataPort(channel.port()));

        let mut stream = self.accept_data(channel).await?;
        let listing = if names.is_empty() {
            NO_FILES_MARKER.to_string()
        } else {
            names.join("\n")
        };

        send_and_close(&mut stream, listing.as_bytes())
            .await
            .map_err(TransferError::DataConnection)?;

        debug!(session = %self.name, files = names.len(), "Listing sent");
        Ok(listing.len() as u64)
    }

    /// GET_SERVING. Returns the number of file bytes sent.
    pub(super) async fn serve_get(&mut self, requested: &str) -> Result<u64, TransferError> {
        // a name that can't be stored can't be found either
        let opened = match FileName::parse(requested) {
            Ok(name) => self.ctx.storage.open(&name).await,
            Err(_) => Ok(None),
        };
        let StoredFile { size, reader } = match opened {
            Ok(Some(file)) => file,
            Ok(None) => return self.fail(TransferError::FileNotFound(requested.to_string())),
            Err(e) => return self.fail(TransferError::Storage(e)),
        };

        let channel = self.open_data_channel().await?;
        self.reply(Reply::Ok);
        self.reply(Reply::FileSize(size));
        self.reply(Reply::DataPort(channel.port()));

        let mut stream = self.accept_data(channel).await?;
        let sent = tokio::io::copy(&mut reader.take(size), &mut stream)
            .await
            .map_err(TransferError::DataConnection)?;
        stream
            .shutdown()
            .await
            .map_err(TransferError::DataConnection)?;

        if sent != size {
            return Err(TransferError::IncompleteTransfer {
                expected: size,
                received: sent,
            });
        }

        self.ctx.stats.bytes_downloaded(sent);
        info!(session = %self.name, file = %requested, bytes = sent, "File sent");
        Ok(sent)
    }

    /// PUT_RECEIVING. Returns the number of file bytes stored.
    pub(super) async fn receive_put(&mut self, requested: &str) -> Result<u64, TransferError> {
        let name = match FileName::parse(requested) {
            Ok(name) => name,
            Err(source) => {
                return self.fail(TransferError::InvalidFileName {
                    name: requested.to_string(),
                    source,
                })
            }
        };

        let channel = self.open_data_channel().await?;
        self.reply(Reply::Ok);
        self.reply(Reply::DataPort(channel.port()));

        let result = self.receive_upload(&name, channel).await;
        match &result {
            Ok(received) => {
                self.ctx.stats.bytes_uploaded(*received);
                info!(session = %self.name, file = %name, bytes = *received, "File received");
                self.reply(Reply::Ok);
            }
            Err(e) => self.reply(e.reply().into()),
        }
        result
    }

    async fn receive_upload(
        &self,
        name: &FileName,
        channel: DataChannel,
    ) -> Result<u64, TransferError> {
        let stream = self.accept_data(channel).await?;
        let mut data = LineReader::new(stream);

        let header = match data.read_line().await {
            Ok(line) => line,
            Err(CodecError::ConnectionClosed) | Err(CodecError::LineTooLong) => {
                return Err(ParseError::ExpectedFileSize(String::new()).into())
            }
            Err(CodecError::Io(e)) | Err(CodecError::Sink(e)) => {
                return Err(TransferError::DataConnection(e))
            }
        };
        let expected = parse_filesize(&header)?;
        debug!(session = %self.name, file = %name, expected, "Receiving upload");

        let mut upload = self
            .ctx
            .storage
            .create(name)
            .await
            .map_err(TransferError::Storage)?;

        let received = match data.stream_to(expected, &mut upload).await {
            Ok(received) => received,
            Err(e) => {
                self.ctx.storage.discard(upload).await;
                return Err(match e {
                    CodecError::Sink(e) => TransferError::Storage(e),
                    CodecError::Io(e) => TransferError::DataConnection(e),
                    CodecError::ConnectionClosed | CodecError::LineTooLong => {
                        TransferError::IncompleteTransfer {
                            expected,
                            received: 0,
                        }
                    }
                });
            }
        };

        if received != expected {
            self.ctx.storage.discard(upload).await;
            return Err(TransferError::IncompleteTransfer { expected, received });
        }

        self.ctx
            .storage
            .commit(upload)
            .await
            .map_err(TransferError::Storage)?;
        Ok(received)
    }

    /// Replies with the error line for `err` and returns it.
    fn fail<T>(&self, err: TransferError) -> Result<T, TransferError> {
        self.reply(err.reply().into());
        Err(err)
    }

    async fn open_data_channel(&self) -> Result<DataChannel, TransferError> {
        match DataChannel::open(self.ctx.data_channel.host).await {
            Ok(channel) => Ok(channel),
            Err(e) => self.fail(TransferError::AllocatorFailure(e)),
        }
    }

    async fn accept_data(&self, channel: DataChannel) -> Result<TcpStream, TransferError> {
        channel
            .accept_once(self.ctx.data_channel.accept_timeout)
            .await
            .map_err(TransferError::AcceptFailed)
    }
}

async fn send_and_close(stream: &mut TcpStream, payload: &[u8]) -> io::Result<()> {
    stream.write_all(payload).await?;
    stream.shutdown().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Client, ServerError};
    use crate::session::testing::{spawn_test_server, spawn_test_server_with};
    use crate::session::DataChannelConfig;
    use crate::storage::MemoryStorage;
    use bytes::Bytes;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, BufReader};

    fn server_error(err: anyhow::Error) -> String {
        err.downcast_ref::<ServerError>()
            .map(|e| e.0.clone())
            .unwrap_or_else(|| panic!("expected a server error, got {err:#}"))
    }

    #[test]
    fn test_reply_mapping() {
        assert_eq!(
            TransferError::FileNotFound("x".into()).reply(),
            ErrorReply::FileNotFound
        );
        assert_eq!(
            TransferError::IncompleteTransfer {
                expected: 10,
                received: 3
            }
            .reply(),
            ErrorReply::IncompleteFile
        );
        assert_eq!(
            TransferError::ProtocolViolation(ParseError::InvalidFileSize("FILESIZE x".into()))
                .reply(),
            ErrorReply::InvalidFileSize
        );
        assert_eq!(
            TransferError::AllocatorFailure(io::Error::other("no ports")).reply(),
            ErrorReply::DataChannelUnavailable
        );
    }

    #[tokio::test]
    async fn test_ls_empty_storage_sends_marker() {
        let server = spawn_test_server().await;

        let stream = TcpStream::connect(server.addr).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();
        while lines.next_line().await.unwrap().unwrap() != crate::session::WELCOME_TRAILER {}

        write_half.write_all(b"LS\n").await.unwrap();
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "OK");
        let port_line = lines.next_line().await.unwrap().unwrap();
        let port = crate::protocol::parse_dataport(&port_line).unwrap();

        let mut data = TcpStream::connect((Ipv4Addr::LOCALHOST, port)).await.unwrap();
        let mut listing = String::new();
        data.read_to_string(&mut listing).await.unwrap();
        assert_eq!(listing, NO_FILES_MARKER);
    }

    #[tokio::test]
    async fn test_ls_lists_every_file() {
        let server = spawn_test_server().await;
        server.storage.insert("b.txt", "bee");
        server.storage.insert("a.txt", "ay");
        server.storage.insert("c.bin", vec![0u8; 16]);

        let mut client = Client::connect(server.addr).await.unwrap();
        let mut names = client.ls().await.unwrap();
        names.sort();
        assert_eq!(names, vec!["a.txt", "b.txt", "c.bin"]);
    }

    #[tokio::test]
    async fn test_get_transfers_exact_bytes() {
        let server = spawn_test_server().await;
        let contents: Vec<u8> = (0..=255u8).cycle().take(100_000).collect();
        server.storage.insert("blob.bin", contents.clone());

        let mut client = Client::connect(server.addr).await.unwrap();
        let received = client.get("blob.bin").await.unwrap();
        assert_eq!(received.len(), contents.len());
        assert_eq!(received, contents);
        assert_eq!(
            server
                .stats
                .bytes_downloaded
                .load(std::sync::atomic::Ordering::Relaxed),
            100_000
        );
    }

    #[tokio::test]
    async fn test_get_empty_file() {
        let server = spawn_test_server().await;
        server.storage.insert("empty", Bytes::new());

        let mut client = Client::connect(server.addr).await.unwrap();
        assert!(client.get("empty").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_missing_file() {
        let server = spawn_test_server().await;
        let mut client = Client::connect(server.addr).await.unwrap();

        let err = client.get("ghost.txt").await.unwrap_err();
        assert_eq!(server_error(err), "ERROR: File Not Found");

        // invalid names are simply not found
        let err = client.get("../secret").await.unwrap_err();
        assert_eq!(server_error(err), "ERROR: File Not Found");

        // session still usable
        assert!(client.ls().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let server = spawn_test_server().await;
        let mut client = Client::connect(server.addr).await.unwrap();

        let notes = b"line one\nline two\n";
        client.put("notes.txt", notes).await.unwrap();
        assert_eq!(
            server.storage.get("notes.txt"),
            Some(Bytes::from_static(b"line one\nline two\n"))
        );
        assert_eq!(
            client.get("notes.txt").await.unwrap(),
            b"line one\nline two\n"
        );
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let server = spawn_test_server().await;
        server.storage.insert("v.txt", "old contents");
        let mut client = Client::connect(server.addr).await.unwrap();

        client.put("v.txt", b"new").await.unwrap();
        assert_eq!(client.get("v.txt").await.unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_put_incomplete_is_discarded() {
        let server = spawn_test_server().await;
        let mut client = Client::connect(server.addr).await.unwrap();

        let err = client
            .put_declared("partial.bin", 1000, &[7u8; 10])
            .await
            .unwrap_err();
        assert_eq!(server_error(err), "ERROR Incomplete file received");
        assert!(server.storage.get("partial.bin").is_none());

        let err = client.get("partial.bin").await.unwrap_err();
        assert_eq!(server_error(err), "ERROR: File Not Found");
    }

    #[tokio::test]
    async fn test_put_bad_filesize_header() {
        let server = spawn_test_server().await;
        let mut client = Client::connect(server.addr).await.unwrap();

        let err = client.put_raw("x.txt", "SIZE 3", b"abc").await.unwrap_err();
        assert_eq!(server_error(err), "ERROR: Expected FILESIZE <bytes>");

        let err = client
            .put_raw("x.txt", "FILESIZE three", b"abc")
            .await
            .unwrap_err();
        assert_eq!(server_error(err), "ERROR: Invalid FILESIZE value");

        assert!(server.storage.is_empty());
        // the session survived both
        client.put("x.txt", b"abc").await.unwrap();
    }

    #[tokio::test]
    async fn test_put_invalid_name() {
        let server = spawn_test_server().await;
        let mut client = Client::connect(server.addr).await.unwrap();

        let err = client.put("../escape", b"data").await.unwrap_err();
        assert_eq!(server_error(err), "ERROR: Invalid filename");
    }

    #[tokio::test]
    async fn test_accept_timeout_reports_unavailable() {
        let config = DataChannelConfig {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            accept_timeout: Some(Duration::from_millis(100)),
        };
        let server = spawn_test_server_with(MemoryStorage::new(), config).await;

        let stream = TcpStream::connect(server.addr).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();
        while lines.next_line().await.unwrap().unwrap() != crate::session::WELCOME_TRAILER {}

        write_half.write_all(b"PUT never.txt\n").await.unwrap();
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "OK");
        assert!(lines.next_line().await.unwrap().unwrap().starts_with("DATAPORT "));
        // never connect to the data port
        assert_eq!(
            lines.next_line().await.unwrap().unwrap(),
            "ERROR: Data channel unavailable"
        );
    }
}
