//! IMAP command tag generation.
//!
//! Tags correlate a command with its tagged completion response. Tags are a
//! fixed 20 characters from the base32hex alphabet (`0-9`, `A-V`), so the
//! terminator check in the wire engine is a fixed-length byte prefix compare
//! rather than a tokenization.

use rand::Rng;

/// Tag length in characters.
pub const TAG_LEN: usize = 20;

/// Base32hex alphabet used for tags.
const TAG_ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHIJKLMNOPQRSTUV";

/// Source of command tags.
///
/// The default implementation is [`RandomTagger`]; tests can inject a
/// deterministic source through [`Config::tagger`].
///
/// [`Config::tagger`]: crate::Config
pub trait TagSource: Send + Sync {
    /// Returns the next tag. Must be unique within a session and match
    /// `[0-9A-V]{20}`.
    fn next_tag(&self) -> String;
}

/// Default tagger: 20 uniformly random base32hex characters.
///
/// 100 bits of randomness makes collisions within a session vanishingly
/// unlikely without any shared counter state.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomTagger;

impl TagSource for RandomTagger {
    fn next_tag(&self) -> String {
        let mut rng = rand::thread_rng();
        let mut tag = String::with_capacity(TAG_LEN);
        for _ in 0..TAG_LEN {
            let idx = rng.gen_range(0..TAG_ALPHABET.len());
            tag.push(TAG_ALPHABET[idx] as char);
        }
        tag
    }
}
