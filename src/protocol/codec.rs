//! Line Protocol Codec
//!
//! Reads newline-terminated text lines and exact-length binary payloads from a
//! byte stream. TCP is a stream protocol: a line may arrive split across many
//! reads, and a single read may carry a line followed by payload bytes. The
//! [`LineReader`] keeps whatever was buffered past a line so the payload that
//! follows a `FILESIZE` line is never lost.
//!
//! Payload length is always declared by a preceding control line and never
//! inferred from the stream.

use crate::protocol::types::LF;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};

/// Maximum length of a single text line, terminator excluded (64 KB)
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Errors that can occur while reading from a connection.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The peer closed the stream before a complete line or payload arrived
    #[error("connection closed")]
    ConnectionClosed,

    /// A line exceeded [`MAX_LINE_LENGTH`] without a terminator
    #[error("line exceeds {MAX_LINE_LENGTH} bytes")]
    LineTooLong,

    /// I/O error on the stream being read
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// I/O error on the sink a payload was being streamed into
    #[error("sink write failed: {0}")]
    Sink(std::io::Error),
}

/// Buffered reader for newline-delimited control text and raw payloads.
#[derive(Debug)]
pub struct LineReader<R> {
    inner: R,
    line: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LineReader<BufReader<R>> {
    /// Wraps an unbuffered stream.
    pub fn new(reader: R) -> Self {
        Self::from_buffered(BufReader::new(reader))
    }
}

impl<R: AsyncBufRead + Unpin> LineReader<R> {
    /// Wraps a stream that already buffers.
    pub fn from_buffered(inner: R) -> Self {
        Self {
            inner,
            line: Vec::with_capacity(256),
        }
    }

    /// Reads one line and returns it with the `\n` (and any `\r` before it) stripped.
    ///
    /// Invalid UTF-8 is replaced rather than rejected; the command parser then
    /// reports whatever it cannot make sense of.
    pub async fn read_line(&mut self) -> Result<String, CodecError> {
        self.line.clear();

        let limit = MAX_LINE_LENGTH as u64 + 1;
        let n = (&mut self.inner)
            .take(limit)
            .read_until(LF, &mut self.line)
            .await?;

        if n == 0 {
            return Err(CodecError::ConnectionClosed);
        }

        if self.line.last() != Some(&LF) {
            if self.line.len() as u64 >= limit {
                return Err(CodecError::LineTooLong);
            }
            return Err(CodecError::ConnectionClosed);
        }

        self.line.pop();
        if self.line.last() == Some(&b'\r') {
            self.line.pop();
        }

        Ok(String::from_utf8_lossy(&self.line).into_owned())
    }

    /// Reads exactly `len` payload bytes into memory.
    pub async fn read_exact(&mut self, len: usize) -> Result<Vec<u8>, CodecError> {
        let mut payload = vec![0u8; len];
        match self.inner.read_exact(&mut payload).await {
            Ok(_) => Ok(payload),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Err(CodecError::ConnectionClosed)
            }
            Err(e) => Err(CodecError::Io(e)),
        }
    }

    /// Streams up to `len` payload bytes into `sink` and returns how many arrived.
    ///
    /// A return value below `len` means the peer closed or reset the stream
    /// early; deciding whether that is an error is up to the caller.
    pub async fn stream_to<W>(&mut self, len: u64, sink: &mut W) -> Result<u64, CodecError>
    where
        W: AsyncWrite + Unpin,
    {
        let mut remaining = len;

        while remaining > 0 {
            let chunk = match self.inner.fill_buf().await {
                Ok(chunk) => chunk,
                Err(e) if is_disconnect(&e) => break,
                Err(e) => return Err(CodecError::Io(e)),
            };
            if chunk.is_empty() {
                break;
            }

            let available = usize::try_from(remaining).unwrap_or(usize::MAX);
            let take = chunk.len().min(available);
            sink.write_all(&chunk[..take]).await.map_err(CodecError::Sink)?;
            self.inner.consume(take);
            remaining -= take as u64;
        }

        Ok(len - remaining)
    }

    /// Returns the wrapped stream.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

fn is_disconnect(err: &std::io::Error) -> bool {
    use std::io::ErrorKind::*;
    matches!(
        err.kind(),
        ConnectionReset | ConnectionAborted | BrokenPipe | UnexpectedEof
    )
}

/// Writes `line` followed by `\n` and flushes.
pub async fn write_line<W>(writer: &mut W, line: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = Vec::with_capacity(line.len() + 1);
    buf.extend_from_slice(line.as_bytes());
    buf.push(LF);
    writer.write_all(&buf).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_read_line_strips_terminators() {
        let mock = Builder::new().read(b"LS\r\nGET a.txt\n").build();
        let mut reader = LineReader::new(mock);

        assert_eq!(reader.read_line().await.unwrap(), "LS");
        assert_eq!(reader.read_line().await.unwrap(), "GET a.txt");
        assert!(matches!(
            reader.read_line().await,
            Err(CodecError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_read_line_across_reads() {
        let mock = Builder::new()
            .read(b"PU")
            .read(b"T rep")
            .read(b"ort.pdf\n")
            .build();
        let mut reader = LineReader::new(mock);

        assert_eq!(reader.read_line().await.unwrap(), "PUT report.pdf");
    }

    #[tokio::test]
    async fn test_read_line_empty_line() {
        let mock = Builder::new().read(b"\nLS\n").build();
        let mut reader = LineReader::new(mock);

        assert_eq!(reader.read_line().await.unwrap(), "");
        assert_eq!(reader.read_line().await.unwrap(), "LS");
    }

    #[tokio::test]
    async fn test_read_line_eof_mid_line() {
        let mock = Builder::new().read(b"GET half").build();
        let mut reader = LineReader::new(mock);

        assert!(matches!(
            reader.read_line().await,
            Err(CodecError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_read_line_too_long() {
        let long = vec![b'a'; MAX_LINE_LENGTH + 1];
        let mock = Builder::new().read(&long).build();
        let mut reader = LineReader::new(mock);

        assert!(matches!(
            reader.read_line().await,
            Err(CodecError::LineTooLong)
        ));
    }

    #[tokio::test]
    async fn test_read_line_at_limit() {
        let mut line = vec![b'z'; MAX_LINE_LENGTH];
        line.push(b'\n');
        let mock = Builder::new().read(&line).build();
        let mut reader = LineReader::new(mock);

        assert_eq!(reader.read_line().await.unwrap().len(), MAX_LINE_LENGTH);
    }

    #[tokio::test]
    async fn test_read_line_lossy_utf8() {
        let mock = Builder::new().read(b"MSG caf\xff\n").build();
        let mut reader = LineReader::new(mock);

        assert_eq!(reader.read_line().await.unwrap(), "MSG caf\u{fffd}");
    }

    #[tokio::test]
    async fn test_header_then_payload_in_one_read() {
        let mock = Builder::new().read(b"FILESIZE 5\nhello").build();
        let mut reader = LineReader::new(mock);

        assert_eq!(reader.read_line().await.unwrap(), "FILESIZE 5");

        let mut sink = Vec::new();
        let received = reader.stream_to(5, &mut sink).await.unwrap();
        assert_eq!(received, 5);
        assert_eq!(sink, b"hello");
    }

    #[tokio::test]
    async fn test_stream_to_short_payload() {
        let mock = Builder::new().read(b"abc").build();
        let mut reader = LineReader::new(mock);

        let mut sink = Vec::new();
        let received = reader.stream_to(10, &mut sink).await.unwrap();
        assert_eq!(received, 3);
        assert_eq!(sink, b"abc");
    }

    #[tokio::test]
    async fn test_stream_to_stops_at_declared_length() {
        let mock = Builder::new().read(b"12345").read(b"6789\n").build();
        let mut reader = LineReader::new(mock);

        let mut sink = Vec::new();
        assert_eq!(reader.stream_to(7, &mut sink).await.unwrap(), 7);
        assert_eq!(sink, b"1234567");
        assert_eq!(reader.read_line().await.unwrap(), "89");
    }

    #[tokio::test]
    async fn test_stream_to_reset_counts_as_short() {
        let reset = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let mock = Builder::new().read(b"abcd").read_error(reset).build();
        let mut reader = LineReader::new(mock);

        let mut sink = Vec::new();
        assert_eq!(reader.stream_to(10, &mut sink).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_read_exact() {
        let mock = Builder::new().read(b"\x00\x01").read(b"\x02\x03").build();
        let mut reader = LineReader::new(mock);

        assert_eq!(reader.read_exact(4).await.unwrap(), vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_read_exact_early_eof() {
        let mock = Builder::new().read(b"ab").build();
        let mut reader = LineReader::new(mock);

        assert!(matches!(
            reader.read_exact(4).await,
            Err(CodecError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_write_line() {
        let mut mock = Builder::new().write(b"PUT notes.txt\n").build();
        write_line(&mut mock, "PUT notes.txt").await.unwrap();
    }
}
