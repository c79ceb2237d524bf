//! Error types for the IMAP library.
//!
//! Every error surfaced to callers preserves its underlying cause and, where
//! useful, a short context phrase describing the operation that failed.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during IMAP operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error during network operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS handshake or encryption error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Invalid DNS name for TLS.
    #[error("Invalid DNS name: {0}")]
    InvalidDnsName(#[from] rustls::pki_types::InvalidDnsNameError),

    /// Operation timed out.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Server returned NO to a tagged command.
    #[error("Server returned NO: {0}")]
    No(String),

    /// Server returned BAD to a tagged command.
    #[error("Server returned BAD: {0}")]
    Bad(String),

    /// Server sent BYE (disconnecting).
    #[error("Server sent BYE: {0}")]
    Bye(String),

    /// Response tokenizer error.
    #[error("Parse error at position {position}: {message}")]
    Parse {
        /// Byte position where the error occurred.
        position: usize,
        /// Description of what went wrong.
        message: String,
    },

    /// Protocol violation or unexpected data on the wire.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Invalid session state for the requested operation.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The connection was closed while an operation was in flight.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Command failed with context.
    #[error("{command} failed: {source}")]
    Command {
        /// The operation that was being executed.
        command: CommandContext,
        /// The underlying error.
        #[source]
        source: Box<Self>,
    },
}

impl Error {
    /// Wraps this error with command context.
    #[must_use]
    pub fn with_command(self, command: impl Into<CommandContext>) -> Self {
        Self::Command {
            command: command.into(),
            source: Box::new(self),
        }
    }

    /// Returns true if the wire engine's retry loop may recover from this
    /// error by reconnecting. Tagged `NO`/`BAD`/`BYE` responses and tokenizer
    /// errors are deliberately excluded.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Io(_) | Self::Timeout(_) | Self::Protocol(_) | Self::ConnectionClosed => true,
            Self::Command { source, .. } => source.is_recoverable(),
            _ => false,
        }
    }

    /// Returns true if this error means the connection is no longer usable.
    #[must_use]
    pub fn is_connection_dead(&self) -> bool {
        match self {
            Self::Io(_) | Self::Tls(_) | Self::Bye(_) | Self::ConnectionClosed => true,
            Self::Command { source, .. } => source.is_connection_dead(),
            _ => false,
        }
    }
}

/// Context about which operation failed.
#[derive(Debug, Clone)]
pub struct CommandContext {
    /// The operation name (e.g. "select folder", "fetch body").
    pub name: String,
    /// Optional argument (e.g. mailbox name).
    pub arg: Option<String>,
}

impl CommandContext {
    /// Creates a new command context.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arg: None,
        }
    }

    /// Adds an argument to the context.
    #[must_use]
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.arg = Some(arg.into());
        self
    }
}

impl std::fmt::Display for CommandContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(ref arg) = self.arg {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

impl From<&str> for CommandContext {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for CommandContext {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Wraps the error with command context.
    ///
    /// # Errors
    ///
    /// Returns the original error wrapped with command context.
    fn with_command(self, command: impl Into<CommandContext>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn with_command(self, command: impl Into<CommandContext>) -> Self {
        self.map_err(|e| e.with_command(command))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(Error::ConnectionClosed.is_recoverable());
        assert!(Error::Protocol("bad framing".into()).is_recoverable());
        assert!(!Error::No("LOGIN failed".into()).is_recoverable());
        assert!(!Error::Bad("syntax".into()).is_recoverable());
        assert!(
            !Error::Parse {
                position: 3,
                message: "unmatched ')'".into()
            }
            .is_recoverable()
        );
    }

    #[test]
    fn test_recoverable_through_context() {
        let err = Error::ConnectionClosed.with_command("fetch body");
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("fetch body"));
    }

    #[test]
    fn test_command_context_display() {
        let ctx = CommandContext::new("select folder").with_arg("INBOX");
        assert_eq!(ctx.to_string(), "select folder INBOX");
    }
}
