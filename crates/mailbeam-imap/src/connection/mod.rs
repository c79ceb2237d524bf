//! Connection plumbing: stream types, TLS dialing and logical-line framing.

mod framed;
mod stream;

pub use framed::LineReader;
pub use stream::{ImapStream, connect, create_tls_connector};
