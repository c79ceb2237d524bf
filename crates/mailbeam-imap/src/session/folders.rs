//! Folder enumeration and per-folder statistics.

use std::sync::LazyLock;

use regex::bytes::Regex;
use tracing::warn;

use super::Session;
use crate::command::unescape_quotes;
use crate::parser::parse_uid_search_response;
use crate::types::FolderStats;
use crate::{Result, ResultExt};

static EXISTS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\* (\d+) EXISTS").expect("valid regex"));

impl Session {
    /// Lists all mailbox names (`LIST "" "*"`).
    ///
    /// Tolerates quoted and unquoted names, and names the server delivers
    /// as `{n}\r\n` literals (non-ASCII mailboxes).
    ///
    /// # Errors
    ///
    /// Returns an error if the LIST command fails.
    pub async fn list_folders(&self) -> Result<Vec<String>> {
        let mut folders = Vec::new();
        let mut on_line = |line: &[u8]| -> Result<()> {
            if let Some(name) = parse_list_line(line) {
                folders.push(name);
            }
            Ok(())
        };

        self.core()
            .exec(
                "LIST \"\" \"*\"",
                false,
                self.core().config.retry_count,
                Some(&mut on_line),
            )
            .await
            .with_command("list folders")?;

        Ok(folders)
    }

    /// Gathers `{name, message_count, max_uid}` for every folder.
    ///
    /// Each folder is opened with a single non-destructive `EXAMINE` whose
    /// response carries `* <n> EXISTS`; the highest UID comes from
    /// `UID SEARCH ALL` when the folder is non-empty. A failure on one
    /// folder is recorded in its slot and does not fail the aggregation.
    /// The originally selected mailbox and access mode are restored before
    /// returning.
    ///
    /// # Errors
    ///
    /// Returns an error only if the folder list itself cannot be obtained.
    pub async fn folder_stats(&self) -> Result<Vec<FolderStats>> {
        self.folder_stats_filtered(None, &[]).await
    }

    /// [`Session::folder_stats`] restricted to folders at or after
    /// `start_from` (in LIST order), skipping any listed in `exclude`.
    ///
    /// # Errors
    ///
    /// Returns an error only if the folder list itself cannot be obtained.
    pub async fn folder_stats_filtered(
        &self,
        start_from: Option<&str>,
        exclude: &[&str],
    ) -> Result<Vec<FolderStats>> {
        let folders = self.list_folders().await?;
        let (original_folder, original_read_only) = self.core().selection();

        let mut stats = Vec::new();
        let mut started = start_from.is_none();

        for folder in folders {
            if !started {
                if start_from == Some(folder.as_str()) {
                    started = true;
                } else {
                    continue;
                }
            }
            if exclude.contains(&folder.as_str()) {
                continue;
            }

            let mut stat = FolderStats {
                name: folder.clone(),
                ..FolderStats::default()
            };

            match self.core().select_with_retry(&folder, true).await {
                Ok(response) => {
                    stat.count = parse_exists(&response).unwrap_or(0);
                    if stat.count > 0 {
                        match self
                            .core()
                            .exec(
                                "UID SEARCH ALL",
                                true,
                                self.core().config.retry_count,
                                None,
                            )
                            .await
                        {
                            Ok(search_response) => {
                                if let Ok(uids) = parse_uid_search_response(&search_response)
                                    && let Some(max) = uids.last()
                                {
                                    stat.max_uid = *max;
                                }
                            }
                            Err(err) => stat.error = Some(err.with_command("uid search")),
                        }
                    }
                }
                Err(err) => stat.error = Some(err),
            }

            stats.push(stat);
        }

        self.restore_selection(&original_folder, original_read_only)
            .await;
        Ok(stats)
    }

    /// Sums message counts across all folders. Folders that fail to open
    /// are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error only if the folder list itself cannot be obtained.
    pub async fn total_email_count(&self) -> Result<u32> {
        self.total_email_count_filtered(None, &[]).await
    }

    /// [`Session::total_email_count`] with the same traversal filters as
    /// [`Session::folder_stats_filtered`].
    ///
    /// # Errors
    ///
    /// Returns an error only if the folder list itself cannot be obtained.
    pub async fn total_email_count_filtered(
        &self,
        start_from: Option<&str>,
        exclude: &[&str],
    ) -> Result<u32> {
        let stats = self.folder_stats_filtered(start_from, exclude).await?;
        Ok(stats
            .iter()
            .filter(|s| s.error.is_none())
            .map(|s| s.count)
            .sum())
    }

    /// Re-selects the original folder in its original mode, warning rather
    /// than failing if the restore itself fails.
    async fn restore_selection(&self, folder: &str, read_only: bool) {
        if folder.is_empty() {
            return;
        }
        let restore = if read_only {
            self.examine(folder).await
        } else {
            self.select(folder).await
        };
        if let Err(err) = restore {
            warn!(
                conn = self.conn_num(),
                mailbox = folder,
                error = %err,
                "failed to restore mailbox selection"
            );
        }
    }
}

/// Extracts `* <n> EXISTS` from a SELECT/EXAMINE response.
fn parse_exists(response: &[u8]) -> Option<u32> {
    let captures = EXISTS_RE.captures(response)?;
    std::str::from_utf8(captures.get(1)?.as_bytes())
        .ok()?
        .parse()
        .ok()
}

/// Extracts a mailbox name from one `* LIST …` reply line.
///
/// Three shapes occur in the wild: a name quoted with escaped inner quotes,
/// a bare atom, and a `{n}\r\n` literal whose body is the name (the line
/// callback receives the logical line, so the literal body sits after the
/// embedded CRLF).
fn parse_list_line(line: &[u8]) -> Option<String> {
    let line = trim_line_end(line);
    if !starts_with_list(line) {
        return None;
    }

    if let Some(pos) = line.iter().position(|&b| b == b'\n') {
        return Some(String::from_utf8_lossy(&line[pos + 1..]).into_owned());
    }

    let mut i = line.len().checked_sub(1)?;
    let quoted = line[i] == b'"';
    let delim = if quoted { b'"' } else { b' ' };
    if quoted {
        i = i.checked_sub(1)?;
    }
    let end = i;
    while i > 0 {
        if line[i] == delim && (!quoted || line[i - 1] != b'\\') {
            break;
        }
        i -= 1;
    }

    Some(unescape_quotes(&String::from_utf8_lossy(
        &line[i + 1..=end],
    )))
}

fn starts_with_list(line: &[u8]) -> bool {
    line.len() >= 7 && line[..7].eq_ignore_ascii_case(b"* LIST ")
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
    fn test_parse_exists() {
        let response = b"* FLAGS (\\Seen)\r\n* 42 EXISTS\r\n* 0 RECENT\r\n";
        assert_eq!(parse_exists(response), Some(42));
        assert_eq!(parse_exists(b"* OK nothing\r\n"), None);
    }

    #[test]
    fn test_parse_list_unquoted_name() {
        let line = b"* LIST (\\HasNoChildren) \"/\" INBOX\r\n";
        assert_eq!(parse_list_line(line).unwrap(), "INBOX");
    }

    #[test]
    fn test_parse_list_quoted_name() {
        let line = b"* LIST (\\HasNoChildren) \"/\" \"Sent Items\"\r\n";
        assert_eq!(parse_list_line(line).unwrap(), "Sent Items");
    }

    #[test]
    fn test_parse_list_quoted_name_with_escapes() {
        let line = b"* LIST () \"/\" \"My \\\"special\\\" one\"\r\n";
        assert_eq!(parse_list_line(line).unwrap(), "My \"special\" one");
    }

    #[test]
    fn test_parse_list_literal_name() {
        // Non-ASCII names arrive as literals; the logical line embeds the
        // CRLF that preceded the literal body.
        let line = "* LIST (\\HasNoChildren) \"/\" {10}\r\nПапка\r\n".as_bytes();
        assert_eq!(parse_list_line(line).unwrap(), "Папка");
    }

    #[test]
    fn test_parse_list_ignores_non_list_lines() {
        assert!(parse_list_line(b"* 5 EXISTS\r\n").is_none());
        assert!(parse_list_line(b"").is_none());
    }
}
