//! Checksum-gated program transfer.
//!
//! Every block is acknowledged by a single byte on the stdio channel. That
//! byte must not reach the line buffer, so the framing hook hands it to the
//! [`ChecksumSlot`] while a block is in flight.

use hublink_proto::{MAX_BLOCK, blocks, fragments, xor_checksum};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::channel::{ByteChannel, TransportError};
use crate::hub::Hub;
use crate::{Error, Result};

/// Single-slot wait for a block acknowledgment.
#[derive(Debug, Default)]
pub struct ChecksumSlot {
    /// Checksum we expect and the waiter to wake, while armed.
    pending: Option<(u8, oneshot::Sender<u8>)>,
}

impl ChecksumSlot {
    /// Arms the slot for a block whose XOR is `expected`.
    ///
    /// The receiver resolves with the next byte seen on the stdio channel.
    pub fn arm(&mut self, expected: u8) -> oneshot::Receiver<u8> {
        if self.pending.is_some() {
            warn!("checksum slot re-armed while a block was pending");
        }
        let (tx, rx) = oneshot::channel();
        self.pending = Some((expected, tx));
        rx
    }

    /// Framing hook: consumes `byte` as the acknowledgment when armed,
    /// otherwise passes it through.
    pub fn intercept(&mut self, byte: u8) -> Option<u8> {
        match self.pending.take() {
            Some((expected, tx)) => {
                debug!(expected, got = byte, "checksum received");
                // The sender may have given up already; the byte is still
                // an acknowledgment and must not reach the console.
                let _ = tx.send(byte);
                None
            }
            None => Some(byte),
        }
    }

    /// Clears a pending wait. Returns `true` if one was armed.
    pub fn disarm(&mut self) -> bool {
        self.pending.take().is_some()
    }

    /// Returns `true` while a block is awaiting its acknowledgment.
    pub const fn is_armed(&self) -> bool {
        self.pending.is_some()
    }
}

/// Bytes of a program sent so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub struct Progress {
    /// Payload bytes acknowledged by the hub.
    pub sent: usize,
    /// Payload size.
    pub total: usize,
}

/// Disarms the checksum slot when a block send ends, however it ends.
struct Armed<'a, C> {
    /// Hub whose slot was armed.
    hub: &'a Hub<C>,
}

impl<C> Drop for Armed<'_, C> {
    fn drop(&mut self) {
        self.hub.state().checksum.disarm();
    }
}

impl<C: ByteChannel> Hub<C> {
    /// Sends one block and waits for its checksum.
    ///
    /// Writes are split by the channel's `max_write`; the acknowledgment is
    /// awaited once for the whole block. Blocks are serialized: a second
    /// caller waits until the first one is acknowledged or has failed.
    pub async fn send_block(&self, data: &[u8]) -> Result<()> {
        if data.len() > MAX_BLOCK {
            return Err(Error::OversizedBlock(data.len()));
        }
        let _serial = self.write_lock.lock().await;

        let expected = xor_checksum(data);
        let ack = self.state().checksum.arm(expected);
        let _armed = Armed { hub: self };

        for frag in fragments(data, self.channel.max_write()) {
            self.channel.write(frag, false).await?;
        }

        let timeout = self.config.ack_timeout;
        let got = match tokio::time::timeout(timeout, ack).await {
            Ok(Ok(byte)) => byte,
            Ok(Err(_)) => return Err(TransportError::Disconnected.into()),
            Err(_) => {
                warn!(len = data.len(), ?timeout, "block not acknowledged");
                return Err(Error::AckTimeout(timeout));
            }
        };
        if got != expected {
            return Err(Error::ChecksumMismatch { expected, got });
        }
        debug!(len = data.len(), checksum = got, "block acknowledged");
        Ok(())
    }

    /// Sends the length block followed by the payload chunks.
    ///
    /// Returns the number of payload bytes sent. Progress is reported after
    /// every acknowledged chunk.
    pub async fn send_program(&self, payload: &[u8]) -> Result<usize> {
        let total = payload.len();
        let mut sent = 0;
        for block in blocks(payload, self.config.chunk_size)? {
            self.send_block(block.as_bytes()).await?;
            if block.payload_len() > 0 {
                sent += block.payload_len();
                self.report(Progress { sent, total });
            }
        }
        debug!(total, "program sent");
        Ok(sent)
    }
}
