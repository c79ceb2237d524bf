//! Command text helpers: quoting and literal syntax.
//!
//! Every user-provided string substituted into a command goes through
//! [`quote`] so that embedded double quotes cannot break the command frame.

/// Escapes `"` as `\"` for use inside a quoted string.
#[must_use]
pub fn escape_quotes(s: &str) -> String {
    s.replace('"', "\\\"")
}

/// Reverses [`escape_quotes`].
#[must_use]
pub fn unescape_quotes(s: &str) -> String {
    s.replace("\\\"", "\"")
}

/// Wraps a string in double quotes, escaping embedded quotes.
#[must_use]
pub fn quote(s: &str) -> String {
    format!("\"{}\"", escape_quotes(s))
}

/// Returns the IMAP literal form `{n}\r\n<s>` of a string, where `n` is the
/// UTF-8 byte count (not the character count).
///
/// Useful for search criteria containing non-ASCII text, e.g.
/// `CHARSET UTF-8 SUBJECT {8}\r\nтест`. The wire engine's literal handling
/// makes the server's continuation response transparent to the caller.
#[must_use]
pub fn make_literal(s: &str) -> String {
    format!("{{{}}}\r\n{}", s.len(), s)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_round_trip() {
        let s = "folder \"with\" quotes";
        assert_eq!(escape_quotes(s), "folder \\\"with\\\" quotes");
        assert_eq!(unescape_quotes(&escape_quotes(s)), s);
    }

    #[test]
    fn test_quote() {
        assert_eq!(quote("INBOX"), "\"INBOX\"");
        assert_eq!(quote("a\"b"), "\"a\\\"b\"");
    }

    #[test]
    fn test_make_literal_ascii() {
        assert_eq!(make_literal("hello"), "{5}\r\nhello");
        assert_eq!(make_literal(""), "{0}\r\n");
    }

    #[test]
    fn test_make_literal_counts_bytes_not_chars() {
        // Four Cyrillic characters, eight UTF-8 bytes.
        assert_eq!(make_literal("тест"), "{8}\r\nтест");
    }
}
