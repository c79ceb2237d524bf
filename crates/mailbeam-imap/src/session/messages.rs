//! Message operations: search, fetch, move, flags, delete and expunge.
//!
//! Mutating operations require a read-write selection. When the session is
//! in `EXAMINE` mode they transparently re-`SELECT` the folder, perform the
//! mutation, then re-`EXAMINE` to restore the observed access mode. The
//! switch is not atomic: a failure between steps can leave the session
//! read-write.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use mail_parser::{MessageParser, MimeHeaders};
use tracing::warn;

use super::Session;
use crate::command::quote;
use crate::mime;
use crate::parser::{Token, parse_fetch_response, parse_uid_search_response, unwrap_record};
use crate::types::{Attachment, Email, EmailAddresses, FlagUpdate};
use crate::{Error, Result, ResultExt};

/// RFC 3501 §7.4.2 envelope slot order: date, subject, from, sender,
/// reply-to, to, cc, bcc, in-reply-to, message-id.
const ENV_DATE: usize = 0;
const ENV_SUBJECT: usize = 1;
const ENV_FROM: usize = 2;
const ENV_REPLY_TO: usize = 4;
const ENV_TO: usize = 5;
const ENV_CC: usize = 6;
const ENV_BCC: usize = 7;
const ENV_MESSAGE_ID: usize = 9;
const ENV_SLOTS: usize = 10;

/// Address group slot order: display name, source route (unused), mailbox,
/// host.
const ADDR_NAME: usize = 0;
const ADDR_MAILBOX: usize = 2;
const ADDR_HOST: usize = 3;
const ADDR_SLOTS: usize = 4;

/// `INTERNALDATE` format, e.g. `17-Jul-1996 02:44:25 -0700`.
const INTERNAL_DATE_FORMAT: &str = "%d-%b-%Y %H:%M:%S %z";

impl Session {
    /// Searches for message UIDs matching raw RFC 3501 criteria.
    ///
    /// The criteria string is passed to `UID SEARCH` verbatim, so anything
    /// the server understands works, including
    /// `CHARSET UTF-8 SUBJECT {n}\r\n…` literal syntax built with
    /// [`make_literal`](crate::command::make_literal). No matches yield an
    /// empty vector.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails or the reply is malformed.
    pub async fn search_uids(&self, criteria: &str) -> Result<Vec<u32>> {
        let response = self
            .core()
            .exec(
                &format!("UID SEARCH {criteria}"),
                true,
                self.core().config.retry_count,
                None,
            )
            .await
            .with_command("uid search")?;
        parse_uid_search_response(&response)
    }

    /// Returns up to the `n` highest UIDs in the selected folder.
    ///
    /// `n == 0` yields an empty vector; `n` at or above the folder size
    /// yields every UID.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying search fails.
    pub async fn last_n_uids(&self, n: usize) -> Result<Vec<u32>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let all = self.search_uids("ALL").await?;
        if all.len() <= n {
            return Ok(all);
        }
        Ok(all[all.len() - n..].to_vec())
    }

    /// Fetches overview data for the given UIDs (all messages when empty):
    /// flags, internal date, size, envelope and message id.
    ///
    /// # Errors
    ///
    /// Returns an error if the fetch fails or a record is malformed.
    pub async fn overviews(&self, uids: &[u32]) -> Result<HashMap<u32, Email>> {
        let set = uid_set(uids);
        let response = self
            .core()
            .exec(
                &format!("UID FETCH {set} ALL"),
                true,
                self.core().config.retry_count,
                None,
            )
            .await
            .with_command("fetch overviews")?;

        let mut emails = HashMap::new();
        if response.is_empty() {
            return Ok(emails);
        }

        for record in parse_fetch_response(&response)? {
            let record = unwrap_record(record);
            let email = parse_overview_record(&record)?;
            if email.uid > 0 {
                emails.insert(email.uid, email);
            }
        }
        Ok(emails)
    }

    /// Fetches full messages: overview fields plus decoded text and HTML
    /// bodies and attachments.
    ///
    /// A message whose body cannot be parsed is dropped from the result
    /// rather than failing the call.
    ///
    /// # Errors
    ///
    /// Returns an error if a fetch fails or a record is malformed.
    pub async fn emails(&self, uids: &[u32]) -> Result<HashMap<u32, Email>> {
        let mut emails = self.overviews(uids).await?;
        if emails.is_empty() {
            return Ok(emails);
        }

        let set = if uids.is_empty() {
            "1:*".to_string()
        } else {
            let known: Vec<u32> = emails.keys().copied().collect();
            uid_set(&known)
        };

        let response = self
            .core()
            .exec(
                &format!("UID FETCH {set} BODY.PEEK[]"),
                true,
                self.core().config.retry_count,
                None,
            )
            .await
            .with_command("fetch bodies")?;

        for record in parse_fetch_response(&response)? {
            let record = unwrap_record(record);
            let (uid, body) = extract_body_record(&record)?;
            if uid == 0 {
                continue;
            }
            let Some(raw) = body else { continue };
            let parsed_ok = match emails.get_mut(&uid) {
                Some(email) => apply_parsed_body(email, raw),
                None => continue,
            };
            if !parsed_ok {
                warn!(
                    conn = self.conn_num(),
                    mailbox = %self.core().folder(),
                    uid,
                    "email body could not be parsed, dropping message"
                );
                emails.remove(&uid);
            }
        }
        Ok(emails)
    }

    /// Moves a message to another folder with `UID MOVE` (RFC 6851),
    /// switching to read-write mode if needed. The session's current folder
    /// is updated to the destination afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if the move or the access-mode switch fails.
    pub async fn move_message(&self, uid: u32, folder: &str) -> Result<()> {
        let (current, was_read_only) = self.core().selection();
        if was_read_only {
            self.select(&current)
                .await
                .with_command("switch to read-write")?;
        }

        let result = self
            .core()
            .exec(
                &format!("UID MOVE {uid} {}", quote(folder)),
                true,
                self.core().config.retry_count,
                None,
            )
            .await
            .with_command("uid move");

        if was_read_only {
            let restore = self
                .examine(&current)
                .await
                .with_command("restore read-only mode");
            if result.is_ok() {
                restore?;
            }
        }
        result?;

        self.core().set_folder(folder);
        Ok(())
    }

    /// Applies a flag update to a message within a single `UID STORE`
    /// command, switching to read-write mode if needed. An empty update is
    /// a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the store or the access-mode switch fails.
    pub async fn set_flags(&self, uid: u32, update: &FlagUpdate) -> Result<()> {
        let (add, remove) = update.render();
        if add.is_empty() && remove.is_empty() {
            return Ok(());
        }

        let mut command = format!("UID STORE {uid}");
        if !add.is_empty() {
            command.push_str(&format!(" +FLAGS ({})", add.join(" ")));
        }
        if !remove.is_empty() {
            command.push_str(&format!(" -FLAGS ({})", remove.join(" ")));
        }

        let (current, was_read_only) = self.core().selection();
        if was_read_only {
            self.select(&current)
                .await
                .with_command("switch to read-write")?;
        }

        let result = self
            .core()
            .exec(&command, true, self.core().config.retry_count, None)
            .await
            .with_command("uid store");

        if was_read_only {
            let restore = self
                .examine(&current)
                .await
                .with_command("restore read-only mode");
            if result.is_ok() {
                restore?;
            }
        }
        result?;
        Ok(())
    }

    /// Marks a message as read.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn mark_seen(&self, uid: u32) -> Result<()> {
        self.set_flags(uid, &FlagUpdate::add_seen()).await
    }

    /// Marks a message `\Deleted`. The message is removed once
    /// [`Session::expunge`] runs.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn delete_email(&self, uid: u32) -> Result<()> {
        self.set_flags(uid, &FlagUpdate::add_deleted()).await
    }

    /// Permanently removes every message marked `\Deleted` in the current
    /// folder, switching to read-write mode if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the expunge or the access-mode switch fails.
    pub async fn expunge(&self) -> Result<()> {
        let (current, was_read_only) = self.core().selection();
        if was_read_only {
            self.select(&current)
                .await
                .with_command("switch to read-write")?;
        }

        let result = self
            .core()
            .exec("EXPUNGE", false, self.core().config.retry_count, None)
            .await
            .with_command("expunge");

        if was_read_only {
            let restore = self
                .examine(&current)
                .await
                .with_command("restore read-only mode");
            if result.is_ok() {
                restore?;
            }
        }
        result?;
        Ok(())
    }
}

/// Renders a UID set for a `UID FETCH`/`UID SEARCH` argument. Zero UIDs are
/// skipped; an empty input means every message.
fn uid_set(uids: &[u32]) -> String {
    let mut out = String::new();
    for uid in uids.iter().filter(|&&u| u != 0) {
        if !out.is_empty() {
            out.push(',');
        }
        out.push_str(&uid.to_string());
    }
    if out.is_empty() {
        out.push_str("1:*");
    }
    out
}

fn type_error(token: &Token, expected: &str, context: &str) -> Error {
    Error::Parse {
        position: 0,
        message: format!("expected {expected} token {context}, got {}", token.kind()),
    }
}

fn expect_value<'a>(tokens: &'a [Token], index: usize, what: &str) -> Result<&'a Token> {
    tokens.get(index).ok_or_else(|| Error::Parse {
        position: index,
        message: format!("missing value after {what}"),
    })
}

/// Walks one `UID FETCH … ALL` record into an [`Email`].
fn parse_overview_record(tokens: &[Token]) -> Result<Email> {
    let mut email = Email::default();
    let mut i = 0;

    while i < tokens.len() {
        let Token::Literal(key) = &tokens[i] else {
            return Err(type_error(&tokens[i], "Literal", "in record root"));
        };

        match key.as_str() {
            "FLAGS" => {
                let value = expect_value(tokens, i + 1, "FLAGS")?;
                let Token::Container(flags) = value else {
                    return Err(type_error(value, "Container", "after FLAGS"));
                };
                email.flags = flags
                    .iter()
                    .map(|token| match token {
                        Token::Literal(flag) => Ok(flag.clone()),
                        other => Err(type_error(other, "Literal", "in FLAGS list")),
                    })
                    .collect::<Result<Vec<_>>>()?;
            }
            "INTERNALDATE" => {
                let value = expect_value(tokens, i + 1, "INTERNALDATE")?;
                let Token::Quoted(date) = value else {
                    return Err(type_error(value, "Quoted", "after INTERNALDATE"));
                };
                let parsed = DateTime::parse_from_str(date.trim(), INTERNAL_DATE_FORMAT)
                    .map_err(|e| Error::Parse {
                        position: 0,
                        message: format!("invalid INTERNALDATE {date:?}: {e}"),
                    })?;
                email.received = Some(parsed.with_timezone(&Utc));
            }
            "RFC822.SIZE" => {
                let value = expect_value(tokens, i + 1, "RFC822.SIZE")?;
                let Token::Number(size) = value else {
                    return Err(type_error(value, "Number", "after RFC822.SIZE"));
                };
                email.size = *size;
            }
            "ENVELOPE" => {
                let value = expect_value(tokens, i + 1, "ENVELOPE")?;
                let Token::Container(slots) = value else {
                    return Err(type_error(value, "Container", "after ENVELOPE"));
                };
                parse_envelope(&mut email, slots)?;
            }
            "UID" => {
                let value = expect_value(tokens, i + 1, "UID")?;
                let Token::Number(uid) = value else {
                    return Err(type_error(value, "Number", "after UID"));
                };
                email.uid = u32::try_from(*uid).unwrap_or(0);
            }
            // Unknown attribute: skip it and its value.
            _ => {}
        }
        i += 2;
    }

    Ok(email)
}

/// Fills envelope-derived fields from the fixed 10-slot container.
fn parse_envelope(email: &mut Email, slots: &[Token]) -> Result<()> {
    if slots.len() < ENV_SLOTS {
        return Err(Error::Parse {
            position: 0,
            message: format!("envelope has {} fields, expected {ENV_SLOTS}", slots.len()),
        });
    }

    let date = &slots[ENV_DATE];
    if !matches!(date, Token::Quoted(_) | Token::Nil) {
        return Err(type_error(date, "Quoted|Nil", "for envelope date"));
    }
    let subject = &slots[ENV_SUBJECT];
    if !matches!(subject, Token::Quoted(_) | Token::Atom(_) | Token::Nil) {
        return Err(type_error(subject, "Quoted|Atom|Nil", "for envelope subject"));
    }

    email.sent = DateTime::parse_from_rfc2822(date.text().as_ref())
        .ok()
        .map(|d| d.with_timezone(&Utc));
    email.subject = mime::decode_header(subject.text().as_ref());

    email.from = parse_address_list(&slots[ENV_FROM], "FROM")?;
    email.reply_to = parse_address_list(&slots[ENV_REPLY_TO], "REPLYTO")?;
    email.to = parse_address_list(&slots[ENV_TO], "TO")?;
    email.cc = parse_address_list(&slots[ENV_CC], "CC")?;
    email.bcc = parse_address_list(&slots[ENV_BCC], "BCC")?;
    email.message_id = slots[ENV_MESSAGE_ID].text().into_owned();

    Ok(())
}

/// Parses one envelope address list: a container of 4-slot groups (display
/// name, source route, mailbox, host), keyed by lowercase `mailbox@host`.
fn parse_address_list(token: &Token, label: &str) -> Result<EmailAddresses> {
    let mut addresses = EmailAddresses::new();
    let groups = match token {
        Token::Nil => return Ok(addresses),
        Token::Container(groups) => groups,
        other => {
            return Err(type_error(
                other,
                "Container|Nil",
                &format!("for envelope {label}"),
            ));
        }
    };

    for group in groups {
        let Token::Container(slots) = group else {
            return Err(type_error(group, "Container", &format!("in {label} list")));
        };
        if slots.len() < ADDR_SLOTS {
            return Err(Error::Parse {
                position: 0,
                message: format!(
                    "{label} address group has {} fields, expected {ADDR_SLOTS}",
                    slots.len()
                ),
            });
        }
        for slot in [&slots[ADDR_NAME], &slots[ADDR_MAILBOX], &slots[ADDR_HOST]] {
            if !matches!(slot, Token::Quoted(_) | Token::Atom(_) | Token::Nil) {
                return Err(type_error(
                    slot,
                    "Quoted|Atom|Nil",
                    &format!("in {label} address group"),
                ));
            }
        }

        let name = mime::decode_header(slots[ADDR_NAME].text().as_ref());
        let mailbox = mime::decode_header(slots[ADDR_MAILBOX].text().as_ref());
        let host = mime::decode_header(slots[ADDR_HOST].text().as_ref());
        addresses.insert(format!("{mailbox}@{host}").to_lowercase(), name);
    }

    Ok(addresses)
}

/// Pulls the UID and raw `BODY[]` bytes out of a body fetch record.
fn extract_body_record(tokens: &[Token]) -> Result<(u32, Option<&[u8]>)> {
    let mut uid = 0u32;
    let mut body = None;
    let mut i = 0;

    while i < tokens.len() {
        let Token::Literal(key) = &tokens[i] else {
            return Err(type_error(&tokens[i], "Literal", "in record root"));
        };
        match key.as_str() {
            "UID" => {
                let value = expect_value(tokens, i + 1, "UID")?;
                let Token::Number(n) = value else {
                    return Err(type_error(value, "Number", "after UID"));
                };
                uid = u32::try_from(*n).unwrap_or(0);
            }
            "BODY[]" => {
                let value = expect_value(tokens, i + 1, "BODY[]")?;
                let Token::Atom(bytes) = value else {
                    return Err(type_error(value, "Atom", "after BODY[]"));
                };
                body = Some(bytes.as_slice());
            }
            _ => {}
        }
        i += 2;
    }

    Ok((uid, body))
}

/// Parses raw RFC 5322 bytes through the MIME collaborator and merges the
/// decoded content into the email. Returns false if the body is
/// unparsable.
fn apply_parsed_body(email: &mut Email, raw: &[u8]) -> bool {
    let Some(message) = MessageParser::default().parse(raw) else {
        return false;
    };

    email.subject = message.subject().unwrap_or_default().to_string();
    email.text = message
        .body_text(0)
        .map(std::borrow::Cow::into_owned)
        .unwrap_or_default();
    email.html = message
        .body_html(0)
        .map(std::borrow::Cow::into_owned)
        .unwrap_or_default();

    email.attachments = message
        .attachments()
        .map(|part| Attachment {
            name: part.attachment_name().unwrap_or("attachment").to_string(),
            mime_type: part.content_type().map_or_else(
                || "application/octet-stream".to_string(),
                |ct| {
                    format!(
                        "{}/{}",
                        ct.ctype(),
                        ct.subtype().unwrap_or("octet-stream")
                    )
                },
            ),
            content: part.contents().to_vec(),
        })
        .collect();

    email.from = address_map(message.from());
    email.reply_to = address_map(message.reply_to());
    email.to = address_map(message.to());
    email.cc = address_map(message.cc());
    email.bcc = address_map(message.bcc());

    true
}

/// Converts a parsed address header to the lowercase-address map form.
fn address_map(address: Option<&mail_parser::Address<'_>>) -> EmailAddresses {
    let mut map = EmailAddresses::new();
    if let Some(address) = address {
        for addr in address.iter() {
            let Some(email) = addr.address.as_deref() else {
                continue;
            };
            map.insert(
                email.to_lowercase(),
                addr.name.as_deref().unwrap_or_default().to_string(),
            );
        }
    }
    map
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_uid_set() {
        assert_eq!(uid_set(&[]), "1:*");
        assert_eq!(uid_set(&[7]), "7");
        assert_eq!(uid_set(&[7, 0, 9, 12]), "7,9,12");
        assert_eq!(uid_set(&[0]), "1:*");
    }

    #[test]
    fn test_parse_overview_record() {
        let body = concat!(
            "* 12 FETCH (FLAGS (\\Seen) INTERNALDATE \"17-Jul-1996 02:44:25 -0700\" ",
            "RFC822.SIZE 4286 ENVELOPE (\"Wed, 17 Jul 1996 02:23:25 -0700\" ",
            "\"IMAP4rev1 WG mtg summary and minutes\" ",
            "((\"Terry Gray\" NIL \"gray\" \"cac.washington.edu\")) ",
            "((\"Terry Gray\" NIL \"gray\" \"cac.washington.edu\")) ",
            "((\"Terry Gray\" NIL \"gray\" \"cac.washington.edu\")) ",
            "((NIL NIL \"imap\" \"cac.washington.edu\")) ",
            "((NIL NIL \"minutes\" \"CNRI.Reston.VA.US\") ",
            "(\"John Klensin\" NIL \"KLENSIN\" \"MIT.EDU\")) NIL NIL ",
            "\"<B27397-0100000@cac.washington.edu>\") UID 21)\r\n"
        );

        let records = parse_fetch_response(body.as_bytes()).unwrap();
        assert_eq!(records.len(), 1);
        let record = unwrap_record(records.into_iter().next().unwrap());
        let email = parse_overview_record(&record).unwrap();

        assert_eq!(email.uid, 21);
        assert_eq!(email.flags, vec!["\\Seen"]);
        assert_eq!(email.size, 4286);
        assert_eq!(email.subject, "IMAP4rev1 WG mtg summary and minutes");
        assert_eq!(email.message_id, "<B27397-0100000@cac.washington.edu>");

        let received = email.received.unwrap();
        assert_eq!(received, Utc.with_ymd_and_hms(1996, 7, 17, 9, 44, 25).unwrap());
        let sent = email.sent.unwrap();
        assert_eq!(sent, Utc.with_ymd_and_hms(1996, 7, 17, 9, 23, 25).unwrap());

        assert_eq!(
            email.from.get("gray@cac.washington.edu").map(String::as_str),
            Some("Terry Gray")
        );
        assert_eq!(
            email.to.get("imap@cac.washington.edu").map(String::as_str),
            Some("")
        );
        assert_eq!(
            email.cc.get("klensin@mit.edu").map(String::as_str),
            Some("John Klensin")
        );
        assert!(email.cc.contains_key("minutes@cnri.reston.va.us"));
        assert!(email.bcc.is_empty());
    }

    #[test]
    fn test_parse_overview_decodes_encoded_subject() {
        let body = "* 1 FETCH (ENVELOPE (NIL \"=?utf-8?B?SMOpbGxv?=\" \
                    NIL NIL NIL NIL NIL NIL NIL NIL) UID 3)\r\n";
        let records = parse_fetch_response(body.as_bytes()).unwrap();
        let record = unwrap_record(records.into_iter().next().unwrap());
        let email = parse_overview_record(&record).unwrap();
        assert_eq!(email.subject, "Héllo");
        assert_eq!(email.uid, 3);
    }

    #[test]
    fn test_overview_record_type_mismatch() {
        let body = "* 1 FETCH (UID \"nope\")\r\n";
        let records = parse_fetch_response(body.as_bytes()).unwrap();
        let record = unwrap_record(records.into_iter().next().unwrap());
        let err = parse_overview_record(&record).unwrap_err();
        assert!(err.to_string().contains("expected Number"));
    }

    #[test]
    fn test_extract_body_record() {
        let body = b"* 1 FETCH (UID 9 BODY[] {11}\r\nhello world)\r\n";
        let records = parse_fetch_response(body).unwrap();
        let record = unwrap_record(records.into_iter().next().unwrap());
        let (uid, raw) = extract_body_record(&record).unwrap();
        assert_eq!(uid, 9);
        assert_eq!(raw.unwrap(), b"hello world");
    }

    #[test]
    fn test_apply_parsed_body() {
        let raw = b"From: Alice <alice@example.com>\r\n\
                    To: Bob <bob@example.com>\r\n\
                    Subject: Greetings\r\n\
                    Content-Type: text/plain; charset=utf-8\r\n\
                    \r\n\
                    Hello Bob\r\n";

        let mut email = Email::default();
        assert!(apply_parsed_body(&mut email, raw));
        assert_eq!(email.subject, "Greetings");
        assert!(email.text.contains("Hello Bob"));
        assert_eq!(
            email.from.get("alice@example.com").map(String::as_str),
            Some("Alice")
        );
        assert_eq!(
            email.to.get("bob@example.com").map(String::as_str),
            Some("Bob")
        );
        assert!(email.attachments.is_empty());
    }

    #[test]
    fn test_apply_parsed_body_collects_attachments() {
        let raw = b"From: a@example.com\r\n\
                    Subject: With attachment\r\n\
                    Content-Type: multipart/mixed; boundary=\"B\"\r\n\
                    \r\n\
                    --B\r\n\
                    Content-Type: text/plain\r\n\
                    \r\n\
                    Body text\r\n\
                    --B\r\n\
                    Content-Type: application/pdf\r\n\
                    Content-Disposition: attachment; filename=\"doc.pdf\"\r\n\
                    Content-Transfer-Encoding: base64\r\n\
                    \r\n\
                    JVBERi0=\r\n\
                    --B--\r\n";

        let mut email = Email::default();
        assert!(apply_parsed_body(&mut email, raw));
        assert!(email.text.contains("Body text"));
        assert_eq!(email.attachments.len(), 1);
        assert_eq!(email.attachments[0].name, "doc.pdf");
        assert_eq!(email.attachments[0].mime_type, "application/pdf");
    }
}
