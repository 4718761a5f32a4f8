//! Byte channel capability handed to the engine by a transport.
//!
//! The engine never connects or discovers anything. A transport (BLE GATT
//! characteristics, a USB endpoint, an SSH session) gives it two things:
//!
//! - a [`ByteChannel`] to write to the hub, and
//! - a [`Subscription`] on which the transport's notification handler
//!   ([`NotificationSink::deliver`]) queues incoming bytes in arrival order.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use hublink_proto::Event;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, mpsc};

/// Errors raised by a byte channel.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum TransportError {
    /// The hub went away or the notification stream closed.
    #[error("hub disconnected")]
    Disconnected,

    /// A write to the underlying transport failed.
    #[error("transport write failed: {0}")]
    Io(#[source] io::Error),
}

impl From<io::Error> for TransportError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof => Self::Disconnected,
            _ => Self::Io(e),
        }
    }
}

/// Transport family behind a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ChannelKind {
    /// BLE notify/write characteristics.
    Ble,
    /// Serial-like USB endpoint.
    Usb,
    /// SSH session stream.
    Ssh,
}

/// Write half of a hub connection.
#[async_trait]
pub trait ByteChannel: Send + Sync {
    /// Writes `data` to the hub, optionally waiting for a link-layer response.
    async fn write(&self, data: &[u8], with_response: bool) -> Result<(), TransportError>;

    /// Largest single write the transport accepts, if limited.
    fn max_write(&self) -> Option<usize> {
        None
    }

    /// Transport family.
    fn kind(&self) -> ChannelKind;
}

#[async_trait]
impl<C: ByteChannel + ?Sized> ByteChannel for Arc<C> {
    async fn write(&self, data: &[u8], with_response: bool) -> Result<(), TransportError> {
        (**self).write(data, with_response).await
    }

    fn max_write(&self) -> Option<usize> {
        (**self).max_write()
    }

    fn kind(&self) -> ChannelKind {
        (**self).kind()
    }
}

/// [`ByteChannel`] over any async byte writer.
#[derive(Debug)]
pub struct StreamChannel<W> {
    /// Underlying writer; the lock keeps writes from interleaving.
    writer: Mutex<W>,
    /// Transport family reported to the engine.
    kind: ChannelKind,
    /// Per-write size limit.
    max_write: Option<usize>,
}

impl<W> StreamChannel<W> {
    /// Wraps `writer` as a channel of the given kind with no write limit.
    pub fn new(writer: W, kind: ChannelKind) -> Self {
        Self {
            writer: Mutex::new(writer),
            kind,
            max_write: None,
        }
    }

    /// Limits every transport write to `max_write` bytes.
    #[must_use]
    pub const fn with_max_write(mut self, max_write: Option<usize>) -> Self {
        self.max_write = max_write;
        self
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> ByteChannel for StreamChannel<W> {
    async fn write(&self, data: &[u8], _with_response: bool) -> Result<(), TransportError> {
        let mut w = self.writer.lock().await;
        w.write_all(data).await?;
        w.flush().await?;
        Ok(())
    }

    fn max_write(&self) -> Option<usize> {
        self.max_write
    }

    fn kind(&self) -> ChannelKind {
        self.kind
    }
}

/// Which hub endpoint produced a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Source {
    /// Program stdio: console output and transfer acknowledgments.
    Stdio,
    /// Control events with an [`Event`] header byte.
    Control,
}

/// Bytes received from the hub.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct Notification {
    /// Endpoint the bytes arrived on.
    pub source: Source,
    /// Raw bytes as delivered by the transport.
    pub data: Vec<u8>,
}

impl Notification {
    /// Creates a notification.
    pub fn new(source: Source, data: impl Into<Vec<u8>>) -> Self {
        Self {
            source,
            data: data.into(),
        }
    }
}

/// Receiving end of the notification queue, consumed by the hub session.
pub type Subscription = mpsc::UnboundedReceiver<Notification>;

/// Transport-side handle that queues notifications for the session.
#[derive(Debug, Clone)]
pub struct NotificationSink(mpsc::UnboundedSender<Notification>);

impl NotificationSink {
    /// Queues `data` from `source`. Fails once the session is gone.
    pub fn deliver(&self, source: Source, data: impl Into<Vec<u8>>) -> Result<(), TransportError> {
        self.0
            .send(Notification::new(source, data))
            .map_err(|_| TransportError::Disconnected)
    }

    /// Returns `true` once the receiving session has been dropped.
    pub fn is_closed(&self) -> bool {
        self.0.is_closed()
    }
}

/// Creates a notification queue.
///
/// Dropping every [`NotificationSink`] closes the subscription, which the
/// session reports as [`TransportError::Disconnected`].
pub fn subscription() -> (NotificationSink, Subscription) {
    let (tx, rx) = mpsc::unbounded_channel();
    (NotificationSink(tx), rx)
}

/// Forwards a packet-oriented device stream into `sink`.
///
/// Each read is one device packet with an [`Event`] header: `WriteStdout`
/// payloads (console output and acknowledgments) go to [`Source::Stdio`],
/// anything else to [`Source::Control`]. Returns on end of stream.
pub async fn forward_events(
    mut reader: impl AsyncRead + Unpin,
    sink: &NotificationSink,
) -> Result<(), TransportError> {
    let mut buf = [0u8; 512];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        let packet = &buf[..n];
        match packet.first().map(|&b| Event::try_from(b)) {
            Some(Ok(Event::WriteStdout)) => sink.deliver(Source::Stdio, &packet[1..])?,
            Some(_) => sink.deliver(Source::Control, packet)?,
            None => {}
        }
    }
}
