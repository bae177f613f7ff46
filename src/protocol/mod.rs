//! Control Protocol Implementation
//!
//! This module implements the line protocol spoken on control and data
//! connections.
//!
//! ## Overview
//!
//! Every control message is one line of UTF-8 text ending in `\n`. Binary
//! payloads (file contents) only ever travel on a data connection, and their
//! length is always announced first by a `FILESIZE <bytes>` line.
//!
//! ## Modules
//!
//! - `types`: `Command`, `Reply` and the fixed error lines
//! - `parser`: one parser per message type, no I/O
//! - `codec`: buffered line and payload reading over any async stream
//!
//! ## Example
//!
//! ```
//! use dropline::protocol::{parse_command, Command, Reply};
//!
//! let command = parse_command("get notes.txt").unwrap();
//! assert_eq!(command, Command::Get("notes.txt".to_string()));
//!
//! let reply = Reply::FileSize(42);
//! assert_eq!(&reply.serialize()[..], b"FILESIZE 42\n");
//! ```

pub mod codec;
pub mod parser;
pub mod types;

// Re-export commonly used types for convenience
pub use codec::{write_line, CodecError, LineReader, MAX_LINE_LENGTH};
pub use parser::{parse_command, parse_dataport, parse_filesize, ParseError, ParseResult};
pub use types::{keyword, Command, ErrorReply, Reply, NO_FILES_MARKER};
