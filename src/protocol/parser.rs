//! Control Line Parsers
//!
//! One parser per message type. Each takes a single line with its terminator
//! already stripped (see [`LineReader`](crate::protocol::LineReader)) and
//! returns either the typed message or a [`ParseError`] naming what was wrong.
//!
//! ## Design Philosophy
//!
//! 1. **No I/O**: Parsers never touch a socket, so every failure kind is testable
//!    with plain strings.
//! 2. **Named failures**: Each error maps to at most one protocol reply line via
//!    [`ParseError::reply`].

use crate::protocol::types::{keyword, Command, ErrorReply};
use thiserror::Error;

/// Errors that can occur while parsing a control line.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The line was empty or only whitespace
    #[error("empty line")]
    Empty,

    /// The keyword is not one of the supported commands
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// A known command was sent with the wrong number of arguments
    #[error("wrong number of arguments for {0}")]
    WrongArity(&'static str),

    /// A `FILESIZE <bytes>` line was expected but something else arrived
    #[error("expected FILESIZE line, got {0:?}")]
    ExpectedFileSize(String),

    /// The `FILESIZE` value is not a non-negative integer
    #[error("invalid FILESIZE value in {0:?}")]
    InvalidFileSize(String),

    /// A `DATAPORT <port>` line was expected but something else arrived
    #[error("expected DATAPORT line, got {0:?}")]
    ExpectedDataPort(String),

    /// The `DATAPORT` value is not a valid port
    #[error("invalid DATAPORT value in {0:?}")]
    InvalidDataPort(String),
}

impl ParseError {
    /// The error line to send back for this failure, if the server replies to it.
    ///
    /// Empty lines are silently ignored, so they have no reply.
    pub fn reply(&self) -> Option<ErrorReply> {
        match self {
            ParseError::Empty => None,
            ParseError::UnknownCommand(_) => Some(ErrorReply::UnknownCommand),
            ParseError::WrongArity(keyword::GET) => Some(ErrorReply::GetUsage),
            ParseError::WrongArity(keyword::PUT) => Some(ErrorReply::PutUsage),
            ParseError::WrongArity(keyword::MSG) => Some(ErrorReply::MsgUsage),
            ParseError::WrongArity(_) => Some(ErrorReply::UnknownCommand),
            ParseError::ExpectedFileSize(_) => Some(ErrorReply::ExpectedFileSize),
            ParseError::InvalidFileSize(_) => Some(ErrorReply::InvalidFileSize),
            ParseError::ExpectedDataPort(_) | ParseError::InvalidDataPort(_) => None,
        }
    }
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Parses a command line from the control connection.
///
/// The keyword is matched case-insensitively. `GET` and `PUT` take exactly one
/// filename argument; `MSG` takes the rest of the line verbatim; `LS` and
/// `EXIT` ignore anything after the keyword.
pub fn parse_command(line: &str) -> ParseResult<Command> {
    let line = line.trim();
    if line.is_empty() {
        return Err(ParseError::Empty);
    }

    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    match word.to_ascii_uppercase().as_str() {
        keyword::LS => Ok(Command::List),
        keyword::EXIT => Ok(Command::Exit),
        keyword::GET => single_argument(keyword::GET, rest).map(Command::Get),
        keyword::PUT => single_argument(keyword::PUT, rest).map(Command::Put),
        keyword::MSG => {
            if rest.is_empty() {
                Err(ParseError::WrongArity(keyword::MSG))
            } else {
                Ok(Command::Msg(rest.to_string()))
            }
        }
        _ => Err(ParseError::UnknownCommand(word.to_string())),
    }
}

fn single_argument(command: &'static str, rest: &str) -> ParseResult<String> {
    let mut args = rest.split_whitespace();
    match (args.next(), args.next()) {
        (Some(arg), None) => Ok(arg.to_string()),
        _ => Err(ParseError::WrongArity(command)),
    }
}

/// Parses a `FILESIZE <bytes>` line.
pub fn parse_filesize(line: &str) -> ParseResult<u64> {
    parse_keyword_value(line, keyword::FILESIZE).map_err(|kind| match kind {
        ValueError::Keyword => ParseError::ExpectedFileSize(line.to_string()),
        ValueError::Value => ParseError::InvalidFileSize(line.to_string()),
    })
}

/// Parses a `DATAPORT <port>` line.
pub fn parse_dataport(line: &str) -> ParseResult<u16> {
    parse_keyword_value(line, keyword::DATAPORT)
        .map_err(|kind| match kind {
            ValueError::Keyword => ParseError::ExpectedDataPort(line.to_string()),
            ValueError::Value => ParseError::InvalidDataPort(line.to_string()),
        })
        .and_then(|port| {
            if port == 0 {
                Err(ParseError::InvalidDataPort(line.to_string()))
            } else {
                Ok(port)
            }
        })
}

enum ValueError {
    Keyword,
    Value,
}

fn parse_keyword_value<T: std::str::FromStr>(line: &str, expected: &str) -> Result<T, ValueError> {
    let mut parts = line.split_whitespace();
    match parts.next() {
        Some(word) if word.eq_ignore_ascii_case(expected) => {}
        _ => return Err(ValueError::Keyword),
    }

    match (parts.next(), parts.next()) {
        (Some(value), None) => value.parse().map_err(|_| ValueError::Value),
        _ => Err(ValueError::Value),
    }
}
