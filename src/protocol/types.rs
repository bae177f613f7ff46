//! Control Protocol Data Types
//!
//! This module defines the messages carried on the control connection.
//! Every message is a single line of UTF-8 text terminated by `\n`.
//!
//! ## Protocol Format
//!
//! Client to server, one command per line (keyword is case-insensitive):
//! - `LS`
//! - `GET <filename>`
//! - `PUT <filename>`
//! - `MSG <text>`
//! - `EXIT`
//!
//! Server to client replies:
//! - `OK`
//! - `FILESIZE <bytes>`
//! - `DATAPORT <port>`
//! - `ERROR: <reason>`
//!
//! ## Examples
//!
//! Download: `GET notes.txt\n` → `OK\n` `FILESIZE 42\n` `DATAPORT 53122\n`
//! Missing file: `GET nope\n` → `ERROR: File Not Found\n`

use bytes::Bytes;
use std::fmt;

/// Line terminator for every control and status line
pub const LF: u8 = b'\n';

/// Payload written to an `LS` data connection when storage holds no files
pub const NO_FILES_MARKER: &str = "No Files Available";

/// Protocol keywords
pub mod keyword {
    pub const LS: &str = "LS";
    pub const GET: &str = "GET";
    pub const PUT: &str = "PUT";
    pub const MSG: &str = "MSG";
    pub const EXIT: &str = "EXIT";
    pub const OK: &str = "OK";
    pub const FILESIZE: &str = "FILESIZE";
    pub const DATAPORT: &str = "DATAPORT";
}

/// A command read from a client's control connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `LS`: list stored files over a data connection
    List,
    /// `GET <filename>`: download a file over a data connection
    Get(String),
    /// `PUT <filename>`: upload a file over a data connection
    Put(String),
    /// `MSG <text>`: broadcast a chat line to every other session
    Msg(String),
    /// `EXIT`: end the session without a reply
    Exit,
}

impl Command {
    /// The keyword this command was sent with, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Command::List => keyword::LS,
            Command::Get(_) => keyword::GET,
            Command::Put(_) => keyword::PUT,
            Command::Msg(_) => keyword::MSG,
            Command::Exit => keyword::EXIT,
        }
    }
}

/// Error lines the server can send on the control connection.
///
/// The exact wording is part of the wire protocol; clients match on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorReply {
    UnknownCommand,
    FileNotFound,
    GetUsage,
    PutUsage,
    MsgUsage,
    InvalidFileName,
    ExpectedFileSize,
    InvalidFileSize,
    IncompleteFile,
    DataChannelUnavailable,
    StorageUnavailable,
}

impl ErrorReply {
    /// Returns the reply line without its terminator.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorReply::UnknownCommand => "ERROR: Command is Unknown",
            ErrorReply::FileNotFound => "ERROR: File Not Found",
            ErrorReply::GetUsage => "ERROR: GET <filename>",
            ErrorReply::PutUsage => "ERROR: PUT <filename>",
            ErrorReply::MsgUsage => "ERROR: MSG <message>",
            ErrorReply::InvalidFileName => "ERROR: Invalid filename",
            ErrorReply::ExpectedFileSize => "ERROR: Expected FILESIZE <bytes>",
            ErrorReply::InvalidFileSize => "ERROR: Invalid FILESIZE value",
            // no colon here, clients of the original protocol match this verbatim
            ErrorReply::IncompleteFile => "ERROR Incomplete file received",
            ErrorReply::DataChannelUnavailable => "ERROR: Data channel unavailable",
            ErrorReply::StorageUnavailable => "ERROR: Storage unavailable",
        }
    }
}

impl fmt::Display for ErrorReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reply line sent by the server on the control connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `OK`
    Ok,
    /// `FILESIZE <bytes>`: size of the file about to be sent
    FileSize(u64),
    /// `DATAPORT <port>`: ephemeral port the client must connect to
    DataPort(u16),
    /// One of the fixed error lines
    Error(ErrorReply),
}

impl Reply {
    /// Serializes the reply into a newline-terminated line.
    pub fn serialize(&self) -> Bytes {
        let mut buf = Vec::with_capacity(32);
        self.serialize_into(&mut buf);
        Bytes::from(buf)
    }

    /// Serializes the reply into an existing buffer.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        match self {
            Reply::Ok => buf.extend_from_slice(keyword::OK.as_bytes()),
            Reply::FileSize(size) => {
                buf.extend_from_slice(keyword::FILESIZE.as_bytes());
                buf.push(b' ');
                buf.extend_from_slice(size.to_string().as_bytes());
            }
            Reply::DataPort(port) => {
                buf.extend_from_slice(keyword::DATAPORT.as_bytes());
                buf.push(b' ');
                buf.extend_from_slice(port.to_string().as_bytes());
            }
            Reply::Error(err) => buf.extend_from_slice(err.as_str().as_bytes()),
        }
        buf.push(LF);
    }

    /// Returns true if this is an error reply.
    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }
}

impl From<ErrorReply> for Reply {
    fn from(err: ErrorReply) -> Self {
        Reply::Error(err)
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Ok => f.write_str(keyword::OK),
            Reply::FileSize(size) => write!(f, "{} {}", keyword::FILESIZE, size),
            Reply::DataPort(port) => write!(f, "{} {}", keyword::DATAPORT, port),
            Reply::Error(err) => write!(f, "{}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_serialize() {
        assert_eq!(&Reply::Ok.serialize()[..], b"OK\n");
    }

    #[test]
    fn test_filesize_serialize() {
        assert_eq!(&Reply::FileSize(1024).serialize()[..], b"FILESIZE 1024\n");
        assert_eq!(&Reply::FileSize(0).serialize()[..], b"FILESIZE 0\n");
    }

    #[test]
    fn test_dataport_serialize() {
        assert_eq!(&Reply::DataPort(53122).serialize()[..], b"DATAPORT 53122\n");
    }

    #[test]
    fn test_error_lines_are_verbatim() {
        assert_eq!(
            &Reply::Error(ErrorReply::UnknownCommand).serialize()[..],
            b"ERROR: Command is Unknown\n"
        );
        assert_eq!(
            &Reply::Error(ErrorReply::FileNotFound).serialize()[..],
            b"ERROR: File Not Found\n"
        );
        assert_eq!(
            &Reply::Error(ErrorReply::IncompleteFile).serialize()[..],
            b"ERROR Incomplete file received\n"
        );
        assert_eq!(
            &Reply::Error(ErrorReply::ExpectedFileSize).serialize()[..],
            b"ERROR: Expected FILESIZE <bytes>\n"
        );
    }

    #[test]
    fn test_display_matches_wire_without_terminator() {
        let reply = Reply::DataPort(4000);
        let wire = reply.serialize();
        assert_eq!(format!("{}\n", reply).as_bytes(), &wire[..]);
        assert!(Reply::from(ErrorReply::PutUsage).is_error());
        assert!(!Reply::Ok.is_error());
    }

    #[test]
    fn test_command_names() {
        assert_eq!(Command::List.name(), "LS");
        assert_eq!(Command::Get("a".into()).name(), "GET");
        assert_eq!(Command::Exit.name(), "EXIT");
    }
}
