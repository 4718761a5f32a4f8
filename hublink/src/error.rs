//! Error types for hublink operations.

use crate::channel::TransportError;

/// Alias for `Result<T, hublink::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by hub sessions.
///
/// None of these are retried: a dropped or corrupted acknowledgment would
/// desynchronize the checksum sequence, so the run fails instead.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The byte channel failed or closed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// No acknowledgment arrived within the ack timeout.
    #[error("no checksum from hub within {0:?}")]
    AckTimeout(std::time::Duration),

    /// The hub acknowledged a block with the wrong checksum.
    #[error("expected checksum 0x{expected:02x} but received 0x{got:02x}")]
    ChecksumMismatch {
        /// XOR of the block that was sent.
        expected: u8,
        /// Byte the hub replied with.
        got: u8,
    },

    /// The hub misused a sentinel line; the stream is out of sync.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A block larger than the hub accepts per round trip.
    #[error("cannot send {0} bytes in one block")]
    OversizedBlock(usize),

    /// The compiler does not produce the requested MPY ABI.
    #[error("unsupported MPY ABI version {0}, expected 5")]
    UnsupportedAbi(u32),

    /// The compiler rejected the script.
    #[error("compile failed: {diagnostics}")]
    Compile {
        /// Diagnostics reported by the compiler.
        diagnostics: String,
    },

    /// A notification or transfer block could not be encoded or decoded.
    #[error(transparent)]
    Decode(#[from] hublink_proto::ProtoError),

    /// A local I/O error (terminal, log file, compiler process).
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
