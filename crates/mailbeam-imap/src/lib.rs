//! # mailbeam-imap
//!
//! An IMAP4rev1 (RFC 3501) client library for retrieving and manipulating
//! messages on a remote mail store, with IDLE push notifications
//! (RFC 2177), `UID MOVE` (RFC 6851), XOAUTH2 bearer-token authentication
//! and automatic reconnection.
//!
//! ## Features
//!
//! - **Tagged wire engine**: one command, one reply, with transparent
//!   handling of `{n}\r\n` literal framing, per-command deadlines and a
//!   close-reconnect-retry loop for transient I/O failures
//! - **Typed FETCH parsing**: server responses become token trees (quoted
//!   strings, numbers, `NIL`, byte-counted literals, nested groups)
//! - **Stable session handle**: reconnection re-authenticates and restores
//!   the selected mailbox in place; the handle never changes
//! - **IDLE monitoring**: callback-based delivery of EXISTS / EXPUNGE /
//!   FETCH events with automatic periodic refresh
//! - **TLS via rustls**: no OpenSSL dependency
//!
//! ## Quick Start
//!
//! ```ignore
//! use mailbeam_imap::{Config, FlagUpdate, Session};
//!
//! #[tokio::main]
//! async fn main() -> mailbeam_imap::Result<()> {
//!     let config = Config::new("imap.example.com", 993);
//!     let session = Session::open(&config, "user@example.com", "password").await?;
//!
//!     session.examine("INBOX").await?;
//!     let uids = session.last_n_uids(10).await?;
//!     let overviews = session.overviews(&uids).await?;
//!     for (uid, email) in &overviews {
//!         println!("{uid}: {}", email.subject);
//!     }
//!
//!     session.mark_seen(uids[0]).await?;
//!     session.close().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`command`]: quoting and literal helpers for command text
//! - [`config`]: per-session configuration
//! - [`connection`]: stream types, TLS dialing, logical-line framing
//! - [`parser`]: FETCH tokenizer and response slicing
//! - [`session`]: session lifecycle, wire engine, IDLE, operations
//! - [`types`]: messages, addresses, flags, folder statistics

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod command;
pub mod config;
pub mod connection;
mod error;
pub mod mime;
pub mod parser;
pub mod session;
pub mod tag;
pub mod types;

pub use command::{escape_quotes, make_literal, quote, unescape_quotes};
pub use config::{Config, ConfigBuilder, Security};
pub use error::{CommandContext, Error, Result, ResultExt};
pub use parser::{
    Token, parse_fetch_response, parse_tokens, parse_uid_search_response, unwrap_record,
};
pub use session::{
    ExistsEvent, ExpungeEvent, FetchEvent, IdleHandler, LineCallback, Session, SessionState,
};
pub use tag::{RandomTagger, TagSource};
pub use types::{Attachment, Email, EmailAddresses, FlagAction, FlagUpdate, FolderStats};
