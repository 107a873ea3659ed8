// Codec errors.
//
// Every decode failure is reported as a `CodecError`. `Message::decode` folds
// these into `Message::Unknown` so a bad packet never tears down a session;
// `Message::try_decode` keeps the precise error for logging.

use thiserror::Error;

/// Errors produced while encoding or decoding wire messages.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// A packet with no opcode byte at all.
    #[error("empty packet")]
    Empty,

    /// The opcode byte does not name any known packet type.
    #[error("unknown opcode {0:#04x}")]
    UnknownOpcode(u8),

    /// The payload ended before a field could be read.
    #[error("truncated payload: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    /// Names are length-prefixed with a single byte.
    #[error("name is {len} bytes, longer than the 255-byte limit")]
    NameTooLong { len: usize },

    /// Counted lists (roster, strategy history) carry a one-byte count.
    #[error("{what} holds {count} entries, more than 255")]
    TooManyEntries { what: &'static str, count: usize },

    #[error("invalid UTF-8 in {context}")]
    InvalidUtf8 { context: &'static str },

    #[error("unknown tyre compound {0:?}")]
    UnknownCompound([u8; 3]),

    /// Strategy timestamps occupy exactly eight bytes on the wire.
    #[error("strategy timestamp {0:?} does not fit in 8 bytes")]
    TimestampTooLong(String),

    /// NUL is the timestamp padding byte, so it cannot appear inside one.
    #[error("strategy timestamp {0:?} contains a NUL byte")]
    TimestampContainsNul(String),

    #[error("telemetry revision {0} is not supported")]
    UnsupportedRevision(u8),

    #[error("telemetry body of {0} bytes exceeds the u16 length field")]
    BodyTooLarge(usize),

    /// `Message::Unknown` is a decode-side sentinel and has no wire form.
    #[error("cannot encode an unknown message (opcode {0:#04x})")]
    EncodeUnknown(u8),
}
