//! Error type for wire format encoding and decoding.

/// Errors produced while encoding or decoding hub wire formats.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ProtoError {
    /// A notification arrived without a header byte.
    #[error("empty notification")]
    Empty,

    /// The notification header names an event kind this host does not know.
    #[error("unknown event kind 0x{0:02x}")]
    UnknownEvent(u8),

    /// A notification payload is shorter than its layout requires.
    #[error("truncated {what}: expected {expected} bytes, got {got}")]
    Truncated {
        /// What was being decoded.
        what: &'static str,
        /// Required payload length.
        expected: usize,
        /// Received payload length.
        got: usize,
    },

    /// The program does not fit the 4-byte length prefix.
    #[error("payload of {0} bytes exceeds the u32 length prefix")]
    PayloadTooLarge(usize),

    /// A transfer chunk size outside `1..=MAX_BLOCK`.
    #[error("invalid chunk size {0}")]
    InvalidChunkSize(usize),
}
