//! Wire-level text handling: the ASCII codec and `;` command framing.

pub mod codec;
pub mod framing;

pub use codec::{decode_ascii, encode_ascii, REPLACEMENT_BYTE};
pub use framing::{CommandAssembler, FramingError, DEFAULT_MAX_PENDING};
