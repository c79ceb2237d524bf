//! Message, attachment and folder statistic records.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Deref, DerefMut};

use chrono::{DateTime, Utc};

use crate::Error;
use crate::command::escape_quotes;

/// Map of lowercased `mailbox@host` addresses to display names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmailAddresses(pub BTreeMap<String, String>);

impl EmailAddresses {
    /// Creates an empty address map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Deref for EmailAddresses {
    type Target = BTreeMap<String, String>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for EmailAddresses {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl fmt::Display for EmailAddresses {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (address, name)) in self.0.iter().enumerate() {
            if i != 0 {
                write!(f, ", ")?;
            }
            if name.is_empty() {
                write!(f, "{address}")?;
            } else if name.contains(',') {
                write!(f, "\"{}\" <{address}>", escape_quotes(name))?;
            } else {
                write!(f, "{name} <{address}>")?;
            }
        }
        Ok(())
    }
}

/// An email attachment (regular or inline).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Attachment filename.
    pub name: String,
    /// MIME content type.
    pub mime_type: String,
    /// Raw decoded content.
    pub content: Vec<u8>,
}

impl fmt::Display for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} {} bytes)",
            self.name,
            self.mime_type,
            self.content.len()
        )
    }
}

/// An IMAP email message: overview fields plus, when fetched in full,
/// decoded bodies and attachments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Email {
    /// Message flags as reported by the server (`\Seen`, keywords, …).
    pub flags: Vec<String>,
    /// Server `INTERNALDATE` normalized to UTC.
    pub received: Option<DateTime<Utc>>,
    /// Envelope date normalized to UTC.
    pub sent: Option<DateTime<Utc>>,
    /// `RFC822.SIZE` in bytes.
    pub size: u64,
    /// Decoded subject.
    pub subject: String,
    /// Message UID in the selected mailbox.
    pub uid: u32,
    /// `Message-ID` header value.
    pub message_id: String,
    /// From addresses.
    pub from: EmailAddresses,
    /// To addresses.
    pub to: EmailAddresses,
    /// Reply-To addresses.
    pub reply_to: EmailAddresses,
    /// CC addresses.
    pub cc: EmailAddresses,
    /// BCC addresses.
    pub bcc: EmailAddresses,
    /// Decoded plain-text body.
    pub text: String,
    /// Decoded HTML body.
    pub html: String,
    /// Attachments, inline parts included.
    pub attachments: Vec<Attachment>,
}

impl fmt::Display for Email {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Subject: {}", self.subject)?;
        for (label, addresses) in [
            ("To", &self.to),
            ("From", &self.from),
            ("CC", &self.cc),
            ("BCC", &self.bcc),
            ("ReplyTo", &self.reply_to),
        ] {
            if !addresses.is_empty() {
                writeln!(f, "{label}: {addresses}")?;
            }
        }
        if !self.text.is_empty() {
            writeln!(f, "Text: {} bytes", self.text.len())?;
        }
        if !self.html.is_empty() {
            writeln!(f, "HTML: {} bytes", self.html.len())?;
        }
        if !self.attachments.is_empty() {
            write!(f, "{} attachment(s):", self.attachments.len())?;
            for attachment in &self.attachments {
                write!(f, " {attachment}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Per-folder statistics gathered by `folder_stats`.
#[derive(Debug, Default)]
pub struct FolderStats {
    /// Folder name.
    pub name: String,
    /// Message count from `* <n> EXISTS`.
    pub count: u32,
    /// Highest UID in the folder, zero when empty.
    pub max_uid: u32,
    /// Error opening or inspecting this folder, if any. Recorded here so one
    /// inaccessible mailbox does not fail the aggregation.
    pub error: Option<Error>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_address_display() {
        let mut addresses = EmailAddresses::new();
        addresses.insert("a@example.com".into(), String::new());
        addresses.insert("b@example.com".into(), "Bob".into());
        addresses.insert("c@example.com".into(), "Last, First".into());

        assert_eq!(
            addresses.to_string(),
            "a@example.com, Bob <b@example.com>, \"Last, First\" <c@example.com>"
        );
    }

    #[test]
    fn test_attachment_display() {
        let attachment = Attachment {
            name: "report.pdf".into(),
            mime_type: "application/pdf".into(),
            content: vec![0u8; 42],
        };
        assert_eq!(attachment.to_string(), "report.pdf (application/pdf 42 bytes)");
    }
}
