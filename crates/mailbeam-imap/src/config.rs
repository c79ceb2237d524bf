//! Session configuration.
//!
//! Configuration is an immutable value handed to [`Session::open`] rather
//! than process-wide mutable state: set it up once at startup, share it
//! between sessions by cloning.
//!
//! [`Session::open`]: crate::Session::open

use std::sync::Arc;
use std::time::Duration;

use crate::tag::TagSource;

/// Connection security mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Security {
    /// No encryption. Only intended for test harnesses talking to an
    /// in-process mock server.
    None,
    /// TLS from the start (port 993). **Recommended.**
    #[default]
    Implicit,
}

impl Security {
    /// Returns the default port for this security mode.
    #[must_use]
    pub const fn default_port(self) -> u16 {
        match self {
            Self::None => 143,
            Self::Implicit => 993,
        }
    }
}

/// IMAP session configuration.
#[derive(Clone)]
pub struct Config {
    /// Server hostname.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Security mode.
    pub security: Security,
    /// Log every command and its response.
    pub verbose: bool,
    /// When verbose, omit server response bodies.
    pub skip_responses: bool,
    /// Maximum retry attempts for retryable operations.
    pub retry_count: u32,
    /// TCP + TLS handshake deadline. `None` uses the OS default.
    pub dial_timeout: Option<Duration>,
    /// Per-command read/write deadline. `None` disables the deadline.
    pub command_timeout: Option<Duration>,
    /// Disable certificate validation.
    ///
    /// **Unsafe for production**: skipping verification exposes the
    /// connection to man-in-the-middle attacks.
    pub tls_skip_verify: bool,
    /// Override tag generation (for tests). `None` uses the default
    /// random base32hex tagger.
    pub tagger: Option<Arc<dyn TagSource>>,
}

impl Config {
    /// Creates a configuration with implicit TLS and default timeouts.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            security: Security::Implicit,
            verbose: false,
            skip_responses: false,
            retry_count: 10,
            dial_timeout: None,
            command_timeout: None,
            tls_skip_verify: false,
            tagger: None,
        }
    }

    /// Creates a configuration builder.
    #[must_use]
    pub fn builder(host: impl Into<String>, port: u16) -> ConfigBuilder {
        ConfigBuilder::new(host, port)
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("security", &self.security)
            .field("verbose", &self.verbose)
            .field("skip_responses", &self.skip_responses)
            .field("retry_count", &self.retry_count)
            .field("dial_timeout", &self.dial_timeout)
            .field("command_timeout", &self.command_timeout)
            .field("tls_skip_verify", &self.tls_skip_verify)
            .finish_non_exhaustive()
    }
}

/// Builder for session configuration.
#[derive(Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Creates a new builder with the given host and port.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            config: Config::new(host, port),
        }
    }

    /// Sets the security mode.
    #[must_use]
    pub fn security(mut self, security: Security) -> Self {
        self.config.security = security;
        self
    }

    /// Enables verbose command/response logging.
    #[must_use]
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.config.verbose = verbose;
        self
    }

    /// Omits server response bodies in verbose mode.
    #[must_use]
    pub fn skip_responses(mut self, skip: bool) -> Self {
        self.config.skip_responses = skip;
        self
    }

    /// Sets the maximum retry attempts for retryable operations.
    #[must_use]
    pub fn retry_count(mut self, count: u32) -> Self {
        self.config.retry_count = count;
        self
    }

    /// Sets the TCP + TLS handshake deadline.
    #[must_use]
    pub fn dial_timeout(mut self, timeout: Duration) -> Self {
        self.config.dial_timeout = Some(timeout);
        self
    }

    /// Sets the per-command read/write deadline.
    #[must_use]
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.config.command_timeout = Some(timeout);
        self
    }

    /// Disables certificate validation. **Unsafe for production.**
    #[must_use]
    pub fn tls_skip_verify(mut self, skip: bool) -> Self {
        self.config.tls_skip_verify = skip;
        self
    }

    /// Overrides the command tag generator.
    #[must_use]
    pub fn tagger(mut self, tagger: Arc<dyn TagSource>) -> Self {
        self.config.tagger = Some(tagger);
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> Config {
        self.config
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::new("imap.example.com", 993);
        assert_eq!(config.host, "imap.example.com");
        assert_eq!(config.port, 993);
        assert_eq!(config.security, Security::Implicit);
        assert!(!config.verbose);
        assert!(!config.skip_responses);
        assert_eq!(config.retry_count, 10);
        assert!(config.dial_timeout.is_none());
        assert!(config.command_timeout.is_none());
        assert!(!config.tls_skip_verify);
        assert!(config.tagger.is_none());
    }

    #[test]
    fn test_builder() {
        let config = Config::builder("localhost", 1143)
            .security(Security::None)
            .verbose(true)
            .retry_count(3)
            .command_timeout(Duration::from_secs(30))
            .build();

        assert_eq!(config.port, 1143);
        assert_eq!(config.security, Security::None);
        assert!(config.verbose);
        assert_eq!(config.retry_count, 3);
        assert_eq!(config.command_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_default_ports() {
        assert_eq!(Security::None.default_port(), 143);
        assert_eq!(Security::Implicit.default_port(), 993);
    }
}
