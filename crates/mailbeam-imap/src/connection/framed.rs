//! Buffered logical-line reading for the IMAP protocol.
//!
//! IMAP responses are CRLF-terminated lines that may embed byte-counted
//! literals (`{n}\r\n<n bytes>`) anywhere. A logical line is the physical
//! line plus every literal body and continuation line that follows it,
//! ending only when the final CRLF occurs outside a literal.

#![allow(clippy::missing_errors_doc)]

use std::io;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};

use crate::{Error, Result};

/// Default buffer size for reading.
const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Maximum physical line length to prevent memory exhaustion.
const MAX_LINE_LENGTH: usize = 1024 * 1024; // 1 MiB

/// Maximum literal size to prevent memory exhaustion.
const MAX_LITERAL_SIZE: usize = 100 * 1024 * 1024; // 100 MiB

/// Buffered reader producing logical IMAP lines.
pub struct LineReader<R> {
    reader: BufReader<R>,
}

impl<R> LineReader<R>
where
    R: AsyncRead + Unpin,
{
    /// Creates a new line reader over the given stream.
    pub fn new(stream: R) -> Self {
        Self {
            reader: BufReader::with_capacity(DEFAULT_BUFFER_SIZE, stream),
        }
    }

    /// Reads one logical line, absorbing chained literals.
    pub async fn read_logical_line(&mut self) -> Result<Vec<u8>> {
        let mut line = self.read_line().await?;

        while let Some(len) = literal_tail(&line) {
            if len > MAX_LITERAL_SIZE {
                return Err(Error::Protocol(format!(
                    "literal too large: {len} bytes (max {MAX_LITERAL_SIZE})"
                )));
            }

            let mut literal = vec![0u8; len];
            self.reader.read_exact(&mut literal).await?;
            line.extend_from_slice(&literal);

            // The physical line continues after the literal body.
            let continuation = self.read_line().await?;
            line.extend_from_slice(&continuation);
        }

        Ok(line)
    }

    /// Reads a single CRLF-terminated physical line (CRLF included).
    async fn read_line(&mut self) -> Result<Vec<u8>> {
        let mut line = Vec::new();

        loop {
            let buf = self.reader.fill_buf().await?;
            if buf.is_empty() {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed",
                )));
            }

            if let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                line.extend_from_slice(&buf[..=pos]);
                self.reader.consume(pos + 1);
                break;
            }

            let len = buf.len();
            line.extend_from_slice(buf);
            self.reader.consume(len);

            if line.len() > MAX_LINE_LENGTH {
                return Err(Error::Protocol("line too long".to_string()));
            }
        }

        Ok(line)
    }
}

/// Returns the byte count of a literal declared at the end of a line
/// (`…{123}\r\n`), if any.
fn literal_tail(line: &[u8]) -> Option<usize> {
    let mut tail = line;
    if let Some(stripped) = tail.strip_suffix(b"\n") {
        tail = stripped;
    }
    if let Some(stripped) = tail.strip_suffix(b"\r") {
        tail = stripped;
    }

    let tail = tail.strip_suffix(b"}")?;
    let open = tail.iter().rposition(|&b| b == b'{')?;
    let digits = &tail[open + 1..];
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }

    std::str::from_utf8(digits).ok()?.parse().ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_tail() {
        assert_eq!(literal_tail(b"BODY {123}\r\n"), Some(123));
        assert_eq!(literal_tail(b"{0}\r\n"), Some(0));
        assert_eq!(literal_tail(b"{999999}\r\n"), Some(999_999));
        assert_eq!(literal_tail(b"no literal\r\n"), None);
        assert_eq!(literal_tail(b"incomplete {123\r\n"), None);
        assert_eq!(literal_tail(b"wrong {abc}\r\n"), None);
        assert_eq!(literal_tail(b"empty {}\r\n"), None);
    }

    #[tokio::test]
    async fn test_read_simple_line() {
        use tokio_test::io::Builder;

        let mock = Builder::new().read(b"* OK ready\r\n").build();
        let mut reader = LineReader::new(mock);

        let line = reader.read_logical_line().await.unwrap();
        assert_eq!(line, b"* OK ready\r\n");
    }

    #[tokio::test]
    async fn test_read_line_with_literal() {
        use tokio_test::io::Builder;

        let mock = Builder::new()
            .read(b"* 1 FETCH (BODY {5}\r\n")
            .read(b"hello)\r\n")
            .build();
        let mut reader = LineReader::new(mock);

        let line = reader.read_logical_line().await.unwrap();
        assert_eq!(line, b"* 1 FETCH (BODY {5}\r\nhello)\r\n");
    }

    #[tokio::test]
    async fn test_read_line_with_chained_literals() {
        use tokio_test::io::Builder;

        let mock = Builder::new()
            .read(b"* 1 FETCH (BODY {3}\r\n")
            .read(b"abc FROM {2}\r\n")
            .read(b"hi)\r\n")
            .build();
        let mut reader = LineReader::new(mock);

        let line = reader.read_logical_line().await.unwrap();
        assert_eq!(line, b"* 1 FETCH (BODY {3}\r\nabc FROM {2}\r\nhi)\r\n");
    }

    #[tokio::test]
    async fn test_literal_size_cap() {
        use tokio_test::io::Builder;

        let header = format!("* 1 FETCH (BODY {{{}}}\r\n", MAX_LITERAL_SIZE + 1);
        let mock = Builder::new().read(header.as_bytes()).build();
        let mut reader = LineReader::new(mock);

        let err = reader.read_logical_line().await.unwrap_err();
        assert!(err.to_string().contains("literal too large"));
    }

    #[tokio::test]
    async fn test_eof_is_an_error() {
        use tokio_test::io::Builder;

        let mock = Builder::new().build();
        let mut reader = LineReader::new(mock);

        assert!(reader.read_logical_line().await.is_err());
    }
}
