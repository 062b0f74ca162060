//! 8-bit ASCII text codec.
//!
//! CAT peers speak plain ASCII.  The relay never rejects a payload because
//! of its encoding: both directions are lossy and substitute `?` for
//! anything outside the 7-bit range, so a garbled byte can never stall a
//! receive loop or make a send fail.
//!
//! | Direction | Input                 | Output                       |
//! |-----------|-----------------------|------------------------------|
//! | decode    | byte `0x00..=0x7F`    | the same character           |
//! | decode    | byte `0x80..=0xFF`    | `?`                          |
//! | encode    | ASCII `char`          | the same byte                |
//! | encode    | any other `char`      | one `?` byte per `char`      |

use tracing::trace;

/// Byte substituted for anything that is not 7-bit ASCII.
pub const REPLACEMENT_BYTE: u8 = b'?';

/// Decodes one received chunk into text.
pub fn decode_ascii(bytes: &[u8]) -> String {
    let text: String = bytes
        .iter()
        .map(|&b| {
            if b.is_ascii() {
                b as char
            } else {
                REPLACEMENT_BYTE as char
            }
        })
        .collect();
    text
}

/// Encodes `text` into a freshly allocated send buffer.
pub fn encode_ascii(text: &str) -> Vec<u8> {
    let mut replaced = 0usize;
    let bytes: Vec<u8> = text
        .chars()
        .map(|c| {
            if c.is_ascii() {
                c as u8
            } else {
                replaced += 1;
                REPLACEMENT_BYTE
            }
        })
        .collect();
    if replaced > 0 {
        trace!("replaced {replaced} non-ASCII character(s) before sending");
    }
    bytes
}

// ── Tests ─────────────────────────────────────────────────────────────────────
