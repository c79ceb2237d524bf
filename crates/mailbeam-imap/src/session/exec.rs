//! The wire engine: send one tagged command, read one reply.
//!
//! A command exchange writes `<tag> <command>\r\n`, then reads logical lines
//! (literals absorbed) until the line carrying the same tag arrives. The tag
//! is fixed-width, so the terminator check is a byte prefix compare. The
//! retry wrapper closes the stream and reconnects between attempts; only
//! recoverable failures (I/O, timeout, framing) consume the retry budget,
//! while a tagged `NO`/`BAD` always surfaces immediately.

use bytes::BytesMut;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, warn};

use super::Core;
use crate::{Error, Result};

/// Callback invoked for every untagged logical line of a reply, after full
/// literal absorption. Returning an error aborts the command.
pub type LineCallback<'a> = dyn FnMut(&[u8]) -> Result<()> + Send + 'a;

impl Core {
    /// Executes a command with retry-on-reconnect semantics.
    pub(crate) async fn exec(
        &self,
        command: &str,
        build_response: bool,
        retry_budget: u32,
        mut on_line: Option<&mut LineCallback<'_>>,
    ) -> Result<Vec<u8>> {
        let mut attempt: u32 = 0;
        loop {
            let reborrowed = on_line.as_mut().map(|callback| &mut **callback);
            match self.run_command(command, build_response, reborrowed).await {
                Ok(response) => return Ok(response),
                Err(err) => {
                    if self.config.verbose {
                        warn!(
                            conn = self.conn_num(),
                            mailbox = %self.folder(),
                            error = %err,
                            "command failed, closing connection"
                        );
                    }
                    self.teardown().await;

                    if !err.is_recoverable() || attempt >= retry_budget {
                        if retry_budget > 0 {
                            error!(
                                conn = self.conn_num(),
                                mailbox = %self.folder(),
                                error = %err,
                                "command retries exhausted"
                            );
                        }
                        return Err(err);
                    }

                    attempt += 1;
                    self.reconnect().await?;
                }
            }
        }
    }

    /// Runs a single command attempt, bounded by the command timeout.
    pub(crate) async fn run_command(
        &self,
        command: &str,
        build_response: bool,
        on_line: Option<&mut LineCallback<'_>>,
    ) -> Result<Vec<u8>> {
        let work = self.run_command_inner(command, build_response, on_line);
        match self.config.command_timeout {
            Some(limit) if !limit.is_zero() => tokio::time::timeout(limit, work)
                .await
                .map_err(|_| Error::Timeout(limit))?,
            _ => work.await,
        }
    }

    async fn run_command_inner(
        &self,
        command: &str,
        build_response: bool,
        mut on_line: Option<&mut LineCallback<'_>>,
    ) -> Result<Vec<u8>> {
        let tag = self.next_tag();
        let frame = format!("{tag} {command}\r\n");

        if self.config.verbose {
            debug!(
                conn = self.conn_num(),
                mailbox = %self.folder(),
                command = %self.mask_secret(frame.trim_end()),
                "sending command"
            );
        }

        {
            let mut writer = self.writer.lock().await;
            let write_half = writer.as_mut().ok_or(Error::ConnectionClosed)?;
            write_half.write_all(frame.as_bytes()).await?;
            write_half.flush().await?;
        }

        let shutdown = self.shutdown_token();
        let mut reader_guard = self.reader.lock().await;
        let reader = reader_guard.as_mut().ok_or(Error::ConnectionClosed)?;

        let mut response = BytesMut::new();
        loop {
            let line = tokio::select! {
                () = shutdown.cancelled() => return Err(Error::ConnectionClosed),
                line = reader.read_logical_line() => line?,
            };

            if self.config.verbose && !self.config.skip_responses {
                debug!(
                    conn = self.conn_num(),
                    mailbox = %self.folder(),
                    response = %String::from_utf8_lossy(trim_line_end(&line)),
                    "server response"
                );
            }

            if let Some(rest) = line.strip_prefix(tag.as_bytes())
                && rest.first() == Some(&b' ')
            {
                check_tagged_status(&rest[1..])?;
                return Ok(response.to_vec());
            }

            if let Some(callback) = on_line.as_mut() {
                callback(&line)?;
            }
            if build_response {
                response.extend_from_slice(&line);
            }
        }
    }

    /// Replaces the quoted secret with `"****"` for verbose logging.
    fn mask_secret(&self, line: &str) -> String {
        if self.secret.is_empty() {
            return line.to_string();
        }
        line.replace(&format!("\"{}\"", self.secret), "\"****\"")
    }
}

/// Checks the status word after the tag: `OK` succeeds, anything else is a
/// failure carrying the human-readable remainder.
fn check_tagged_status(rest: &[u8]) -> Result<()> {
    let word_end = rest
        .iter()
        .position(|&b| b == b' ' || b == b'\r' || b == b'\n')
        .unwrap_or(rest.len());
    let status = &rest[..word_end];
    let text = String::from_utf8_lossy(trim_line_end(
        rest.get(word_end + 1..).unwrap_or_default(),
    ))
    .into_owned();

    match status {
        b"OK" => Ok(()),
        b"NO" => Err(Error::No(text)),
        b"BAD" => Err(Error::Bad(text)),
        b"BYE" => Err(Error::Bye(text)),
        other => Err(Error::Protocol(format!(
            "unexpected tagged status {:?}",
            String::from_utf8_lossy(other)
        ))),
    }
}

fn trim_line_end(line: &[u8]) -> &[u8] {
    let mut line = line;
    while let [rest @ .., last] = line {
        if *last == b'\r' || *last == b'\n' {
            line = rest;
        } else {
            break;
        }
    }
    line
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_tagged_status_ok() {
        assert!(check_tagged_status(b"OK LOGIN completed\r\n").is_ok());
        assert!(check_tagged_status(b"OK\r\n").is_ok());
    }

    #[test]
    fn test_tagged_status_failures() {
        let err = check_tagged_status(b"NO [AUTHENTICATIONFAILED] bad credentials\r\n").unwrap_err();
        assert!(matches!(err, Error::No(ref text) if text.contains("AUTHENTICATIONFAILED")));

        let err = check_tagged_status(b"BAD parse error\r\n").unwrap_err();
        assert!(matches!(err, Error::Bad(_)));

        let err = check_tagged_status(b"BYE logging out\r\n").unwrap_err();
        assert!(matches!(err, Error::Bye(_)));
    }

    #[test]
    fn test_tagged_status_unknown() {
        let err = check_tagged_status(b"WAT huh\r\n").unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_trim_line_end() {
        assert_eq!(trim_line_end(b"abc\r\n"), b"abc");
        assert_eq!(trim_line_end(b"abc\n"), b"abc");
        assert_eq!(trim_line_end(b"abc"), b"abc");
    }
}
