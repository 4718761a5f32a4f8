//! Program download and interactive console engine for MicroPython hubs.
//!
//! `hublink` drives one hub over a byte channel supplied by a transport:
//! it downloads a compiled program in checksum-acknowledged blocks, tracks
//! whether the program is running, splits its console output between the
//! terminal and host-side log files, and forwards local input until the
//! program ends.
//!
//! # Quick start
//!
//! ```no_run
//! use hublink::{ChannelKind, Hub, RunOptions, StreamChannel, forward_events, subscription};
//!
//! # async fn demo(device: tokio::fs::File, mpy: Vec<u8>) -> hublink::Result<()> {
//! let (reader, writer) = tokio::io::split(device);
//! let (sink, mut events) = subscription();
//! tokio::spawn(async move { forward_events(reader, &sink).await });
//!
//! let hub = Hub::builder(StreamChannel::new(writer, ChannelKind::Usb)).build();
//! let opts = RunOptions::default().wait(false);
//! hub.run_program(&mut events, &mpy, ".".as_ref(), tokio::io::empty(), &opts)
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod channel;
mod compile;
mod error;
mod hub;
mod lifecycle;
mod line;
mod output;
mod session;
mod term;
mod transfer;

pub use channel::{
    ByteChannel, ChannelKind, Notification, NotificationSink, Source, StreamChannel,
    Subscription, TransportError, forward_events, subscription,
};
pub use compile::{BUILD_DIR, Compiler, MPY_ABI, MpyCross, save_script, script_source};
pub use error::{Error, Result};
pub use hub::{Hub, HubBuilder, HubConfig, RunOptions, RunReport};
pub use lifecycle::{Lifecycle, ProgramState, StopWaiter, Transition};
pub use line::LineBuffer;
pub use output::{OutputDemux, StdoutBuffer};
pub use session::{PumpExit, SessionPhase, SessionReport};
pub use term::{INTERRUPT_KEY, RawMode};
pub use transfer::{ChecksumSlot, Progress};
