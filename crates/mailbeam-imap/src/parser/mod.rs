//! Response parsing: FETCH record slicing and UID SEARCH replies.
//!
//! The wire engine hands the command layer one concatenated response. For
//! FETCH, each record starts with `* <seq> FETCH ` at the beginning of a
//! line; the body between successive record starts (which may span embedded
//! literals) is handed to the tokenizer.

mod token;

pub use token::{Token, is_literal_char, parse_tokens, unwrap_record};

use std::sync::LazyLock;

use regex::bytes::Regex;

use crate::{Error, Result};

static FETCH_LINE_START: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\* \d+ FETCH ").expect("valid regex"));

/// Parses a multi-record FETCH response body into token records.
///
/// Records are sliced on `* <seq> FETCH ` at line starts; each slice is
/// validated and its content tokenized. An empty response yields no records.
///
/// # Errors
///
/// Returns an error if a record prefix is malformed or its body fails to
/// tokenize.
pub fn parse_fetch_response(body: &[u8]) -> Result<Vec<Vec<Token>>> {
    let body = body.trim_ascii();
    if body.is_empty() {
        return Ok(Vec::new());
    }

    let starts: Vec<usize> = FETCH_LINE_START.find_iter(body).map(|m| m.start()).collect();

    if starts.is_empty() {
        // No FETCH record starts. A lone `* …` line is still expected to be
        // a FETCH record; anything else is simply not fetch data.
        if body.starts_with(b"* ") {
            return Ok(vec![parse_fetch_line(body)?]);
        }
        return Ok(Vec::new());
    }

    let mut records = Vec::with_capacity(starts.len());
    for (i, &start) in starts.iter().enumerate() {
        let end = starts.get(i + 1).copied().unwrap_or(body.len());
        let line = body[start..end].trim_ascii();
        if line.is_empty() {
            continue;
        }
        records.push(parse_fetch_line(line)?);
    }
    Ok(records)
}

/// Parses a single `* <seq> FETCH …` line into its token record.
fn parse_fetch_line(line: &[u8]) -> Result<Vec<Token>> {
    let parse_err = |message: String| Error::Parse {
        position: 0,
        message,
    };

    let rest = line.strip_prefix(b"* ").ok_or_else(|| {
        parse_err(format!(
            "unable to parse FETCH line (expected '* ' prefix): {:?}",
            String::from_utf8_lossy(line)
        ))
    })?;

    let space = rest.iter().position(|&b| b == b' ').ok_or_else(|| {
        parse_err(format!(
            "unable to parse FETCH line (no space after sequence number): {:?}",
            String::from_utf8_lossy(line)
        ))
    })?;

    let seq = &rest[..space];
    if seq.is_empty() || !seq.iter().all(u8::is_ascii_digit) {
        return Err(parse_err(format!(
            "unable to parse FETCH line (invalid sequence number {:?}): {:?}",
            String::from_utf8_lossy(seq),
            String::from_utf8_lossy(line)
        )));
    }

    let rest = rest[space + 1..].trim_ascii_start();
    let content = rest.strip_prefix(b"FETCH ").ok_or_else(|| {
        parse_err(format!(
            "unable to parse FETCH line (expected 'FETCH ' after sequence number): {:?}",
            String::from_utf8_lossy(line)
        ))
    })?;

    parse_tokens(content)
}

/// Parses a `UID SEARCH` reply into UIDs.
///
/// Scans the response line by line for `* SEARCH`, ignoring continuation
/// preambles and other untagged data. A bare `* SEARCH` line (no matches)
/// yields an empty vector.
///
/// # Errors
///
/// Returns an error if no `* SEARCH` line is present or a UID fails to
/// parse.
pub fn parse_uid_search_response(body: &[u8]) -> Result<Vec<u32>> {
    for line in body.split(|&b| b == b'\n') {
        let line = String::from_utf8_lossy(line.trim_ascii());
        let mut fields = line.split_ascii_whitespace();
        if fields.next() == Some("*") && fields.next() == Some("SEARCH") {
            return fields
                .map(|f| {
                    f.parse::<u32>()
                        .map_err(|e| Error::Protocol(format!("invalid UID {f:?} in SEARCH response: {e}")))
                })
                .collect();
        }
    }
    Err(Error::Protocol(format!(
        "missing SEARCH response in {:?}",
        String::from_utf8_lossy(body)
    )))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_single_record() {
        let records = parse_fetch_response(b"* 1 FETCH (UID 7 FLAGS (\\Seen))\r\n").unwrap();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.len(), 4);
        assert_eq!(record[0], Token::Literal("UID".into()));
        assert_eq!(record[1], Token::Number(7));
        assert_eq!(record[2], Token::Literal("FLAGS".into()));
        assert_eq!(
            record[3],
            Token::Container(vec![Token::Literal("\\Seen".into())])
        );
    }

    #[test]
    fn test_multiple_records() {
        let body = b"* 1 FETCH (UID 7)\r\n* 2 FETCH (UID 9)\r\n";
        let records = parse_fetch_response(body).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0][1], Token::Number(7));
        assert_eq!(records[1][1], Token::Number(9));
    }

    #[test]
    fn test_record_with_literal_spanning_lines() {
        let body = b"* 1 FETCH (BODY {12}\r\nline1\r\nline2)\r\n* 2 FETCH (UID 4)\r\n";
        let records = parse_fetch_response(body).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0][1], Token::Atom(b"line1\r\nline2".to_vec()));
        assert_eq!(records[1][1], Token::Number(4));
    }

    #[test]
    fn test_empty_response() {
        assert!(parse_fetch_response(b"").unwrap().is_empty());
        assert!(parse_fetch_response(b"  \r\n").unwrap().is_empty());
    }

    #[test]
    fn test_invalid_prefix_is_an_error() {
        let err = parse_fetch_response(b"* nope FETCH (UID 1)").unwrap_err();
        assert!(err.to_string().contains("FETCH line"));
    }

    #[test]
    fn test_uid_search_basic() {
        let body = b"* SEARCH 123 456\r\nA1 OK SEARCH completed\r\n";
        assert_eq!(parse_uid_search_response(body).unwrap(), vec![123, 456]);
    }

    #[test]
    fn test_uid_search_ignores_continuation_preamble() {
        let body = b"+ Ready for additional command text\r\n\
                     * SEARCH 15461 15469 15470 15485 15491 15497\r\n\
                     A144 OK UID SEARCH completed\r\n";
        assert_eq!(
            parse_uid_search_response(body).unwrap(),
            vec![15461, 15469, 15470, 15485, 15491, 15497]
        );
    }

    #[test]
    fn test_uid_search_no_matches() {
        let body = b"* SEARCH\r\nA2 OK UID SEARCH completed\r\n";
        assert!(parse_uid_search_response(body).unwrap().is_empty());
    }

    #[test]
    fn test_uid_search_missing_line() {
        let err = parse_uid_search_response(b"* OK nothing to see here\r\n").unwrap_err();
        assert!(err.to_string().contains("SEARCH"));
    }
}
