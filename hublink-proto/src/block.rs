//! Checksum-gated program transfer framing.
//!
//! A program is sent as a sequence of blocks:
//!
//! ```text
//! block 1:      [u32 little-endian payload length]
//! block 2..n:   payload split into ≤ chunk-size slices
//! ```
//!
//! After every block the hub replies with one byte: the XOR of all bytes in
//! that block, folded from 0.

use crate::ProtoError;

/// Largest block the hub accepts in one acknowledgment round trip.
pub const MAX_BLOCK: usize = 100;

/// Largest single write on hubs with a 23-byte BLE MTU.
pub const CONSTRAINED_MTU_WRITE: usize = 20;

/// XOR-folds `data` starting from 0.
pub fn xor_checksum(data: &[u8]) -> u8 {
    data.iter().fold(0, |acc, b| acc ^ b)
}

/// Encodes the 4-byte little-endian length block for a payload.
pub fn length_block(len: usize) -> Result<[u8; 4], ProtoError> {
    let len = u32::try_from(len).map_err(|_| ProtoError::PayloadTooLarge(len))?;
    Ok(len.to_le_bytes())
}

/// One transfer block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Block<'a> {
    /// The payload length prefix.
    Length([u8; 4]),
    /// A slice of the payload.
    Chunk(&'a [u8]),
}

impl Block<'_> {
    /// The bytes put on the wire for this block.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Length(b) => b,
            Self::Chunk(c) => c,
        }
    }

    /// Number of payload bytes this block carries (0 for the length prefix).
    pub const fn payload_len(&self) -> usize {
        match self {
            Self::Length(_) => 0,
            Self::Chunk(c) => c.len(),
        }
    }
}

/// Iterator over the blocks of one program transfer.
#[derive(Debug, Clone)]
pub struct Blocks<'a> {
    /// Length prefix, taken on the first call to `next`.
    length: Option<[u8; 4]>,
    /// Remaining payload chunks.
    chunks: std::slice::Chunks<'a, u8>,
}

impl<'a> Iterator for Blocks<'a> {
    type Item = Block<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(len) = self.length.take() {
            return Some(Block::Length(len));
        }
        self.chunks.next().map(Block::Chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.chunks.len() + usize::from(self.length.is_some());
        (n, Some(n))
    }
}

impl ExactSizeIterator for Blocks<'_> {}

/// Splits `payload` into the length block followed by `chunk`-sized blocks.
pub fn blocks(payload: &[u8], chunk: usize) -> Result<Blocks<'_>, ProtoError> {
    if chunk == 0 || chunk > MAX_BLOCK {
        return Err(ProtoError::InvalidChunkSize(chunk));
    }
    Ok(Blocks {
        length: Some(length_block(payload.len())?),
        chunks: payload.chunks(chunk),
    })
}

/// Re-splits one block into transport writes of at most `max_write` bytes.
///
/// `None` means the transport takes the block in a single write.
pub fn fragments(block: &[u8], max_write: Option<usize>) -> std::slice::Chunks<'_, u8> {
    let size = max_write.filter(|&n| n > 0).unwrap_or(block.len()).max(1);
    block.chunks(size)
}
