//! Core data types: messages, addresses, flags and folder statistics.

mod email;
mod flags;

pub use email::{Attachment, Email, EmailAddresses, FolderStats};
pub use flags::{FlagAction, FlagUpdate};
