//! Wire formats for hublink host↔hub communication.
//!
//! Everything here is bit-exact and transport-agnostic: the checksum-gated
//! program transfer blocks, the status notification layout reported by the
//! hub, the sentinel lines a user program prints to redirect its output, and
//! the hub classes whose transport imposes a small write size.

mod block;
mod error;
mod event;
mod hub;
mod sentinel;

pub use block::{
    Block, Blocks, CONSTRAINED_MTU_WRITE, MAX_BLOCK, blocks, fragments, length_block,
    xor_checksum,
};
pub use error::ProtoError;
pub use event::{DeviceEvent, Event, Status, StatusFlags};
pub use hub::HubKind;
pub use sentinel::{LOG_CLOSE, LOG_OPEN, Sentinel};

/// MicroPython end-of-line marker on the hub's stdout.
pub const EOL: &[u8] = b"\r\n";
