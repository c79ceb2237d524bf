//! MIME encoded-word decoding for message headers (RFC 2047).
//!
//! Envelope subjects and address display names arrive as
//! `=?charset?B|Q?payload?=` words. Decoding is lenient: a malformed word or
//! unknown charset is passed through verbatim rather than failing the whole
//! header, and whitespace between two adjacent encoded words is dropped as
//! the RFC requires.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use encoding_rs::Encoding;

/// Resolves a charset label to an encoding.
///
/// `windows-<n>` labels are normalized to `cp<n>` before lookup; both
/// spellings name the same code pages.
#[must_use]
pub fn resolve_charset(label: &str) -> Option<&'static Encoding> {
    let label = label.trim().to_ascii_lowercase();
    let normalized = label
        .strip_prefix("windows-")
        .map_or(label.clone(), |n| format!("cp{n}"));
    Encoding::for_label(normalized.as_bytes())
}

/// Decodes every RFC 2047 encoded word in a header value.
#[must_use]
pub fn decode_header(input: &str) -> String {
    let mut out = String::new();
    let mut rest = input;
    let mut last_was_encoded = false;

    while let Some(start) = rest.find("=?") {
        let (before, candidate) = rest.split_at(start);

        if let Some((decoded, consumed)) = decode_word(candidate) {
            // Whitespace between two encoded words is not significant.
            if !(last_was_encoded && before.chars().all(char::is_whitespace)) {
                out.push_str(before);
            }
            out.push_str(&decoded);
            rest = &candidate[consumed..];
            last_was_encoded = true;
        } else {
            out.push_str(before);
            out.push_str("=?");
            rest = &candidate[2..];
            last_was_encoded = false;
        }
    }

    out.push_str(rest);
    out
}

/// Attempts to decode a single encoded word at the start of `s` (which
/// begins with `=?`). Returns the decoded text and the bytes consumed.
fn decode_word(s: &str) -> Option<(String, usize)> {
    let body = &s[2..];
    let charset_end = body.find('?')?;
    let charset = &body[..charset_end];

    let after_charset = &body[charset_end + 1..];
    let encoding_end = after_charset.find('?')?;
    let encoding = &after_charset[..encoding_end];

    let payload_part = &after_charset[encoding_end + 1..];
    let payload_end = payload_part.find("?=")?;
    let payload = &payload_part[..payload_end];

    let consumed = 2 + charset_end + 1 + encoding_end + 1 + payload_end + 2;

    let bytes = match encoding.to_ascii_uppercase().as_str() {
        "B" => STANDARD.decode(payload).ok()?,
        "Q" => decode_q(payload)?,
        _ => return None,
    };

    let encoding = resolve_charset(charset)?;
    let (text, _, _) = encoding.decode(&bytes);
    Some((text.into_owned(), consumed))
}

/// Decodes the Q encoding: `_` is a space, `=XX` a hex-encoded byte.
fn decode_q(s: &str) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(s.len());
    let mut bytes = s.bytes();

    while let Some(b) = bytes.next() {
        match b {
            b'_' => out.push(b' '),
            b'=' => {
                let hi = bytes.next()?;
                let lo = bytes.next()?;
                let hex = [hi, lo];
                let hex = std::str::from_utf8(&hex).ok()?;
                out.push(u8::from_str_radix(hex, 16).ok()?);
            }
            _ => out.push(b),
        }
    }

    Some(out)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_passes_through() {
        assert_eq!(decode_header("Hello world"), "Hello world");
        assert_eq!(decode_header(""), "");
    }

    #[test]
    fn test_base64_word() {
        assert_eq!(decode_header("=?utf-8?B?SMOpbGxv?="), "Héllo");
    }

    #[test]
    fn test_q_encoded_word() {
        assert_eq!(decode_header("=?utf-8?Q?H=C3=A9llo_World?="), "Héllo World");
    }

    #[test]
    fn test_mixed_text_and_word() {
        assert_eq!(decode_header("Hi =?utf-8?B?dGhlcmU=?="), "Hi there");
    }

    #[test]
    fn test_whitespace_between_words_is_dropped() {
        assert_eq!(
            decode_header("=?utf-8?B?SGVsbG8=?= =?utf-8?B?IFdvcmxk?="),
            "Hello World"
        );
    }

    #[test]
    fn test_windows_charset_normalized() {
        // "Привет" in windows-1251.
        assert_eq!(decode_header("=?windows-1251?B?z/Do4uXy?="), "Привет");
    }

    #[test]
    fn test_malformed_word_passes_through() {
        assert_eq!(decode_header("=?utf-8?X?abc?="), "=?utf-8?X?abc?=");
        assert_eq!(decode_header("=?truncated"), "=?truncated");
    }

    #[test]
    fn test_resolve_charset() {
        assert!(resolve_charset("utf-8").is_some());
        assert!(resolve_charset("WINDOWS-1251").is_some());
        assert!(resolve_charset("cp1251").is_some());
        assert!(resolve_charset("no-such-charset").is_none());
    }
}
