//! Hub session: notification dispatch and the program run sequence.

use std::fmt;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use hublink_proto::{DeviceEvent, EOL, MAX_BLOCK, ProtoError, StatusFlags};
use tokio::io::AsyncRead;
use tracing::{debug, info, warn};

use crate::channel::{ByteChannel, Notification, Source, Subscription, TransportError};
use crate::compile::{Compiler, MPY_ABI};
use crate::lifecycle::{Lifecycle, ProgramState};
use crate::line::LineBuffer;
use crate::output::{OutputDemux, StdoutBuffer};
use crate::session::{SessionPhase, SessionReport};
use crate::term::RawMode;
use crate::transfer::{ChecksumSlot, Progress};
use crate::{Error, Result};

/// Callback receiving transfer progress.
type ProgressFn = Box<dyn Fn(Progress) + Send + Sync>;

/// Session timing and transfer parameters.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct HubConfig {
    /// Payload bytes per transfer block (1..=100).
    pub chunk_size: usize,
    /// How long to wait for a block acknowledgment.
    pub ack_timeout: Duration,
    /// Delay after a stop report before trusting it.
    pub settle_delay: Duration,
    /// How many times a stop followed by a restart is waited out.
    pub stop_rearms: u32,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            chunk_size: MAX_BLOCK,
            ack_timeout: Duration::from_millis(500),
            settle_delay: Duration::from_millis(300),
            stop_rearms: 1,
        }
    }
}

impl HubConfig {
    /// Sets the payload bytes per block (default: 100).
    #[must_use]
    pub const fn chunk_size(mut self, n: usize) -> Self {
        self.chunk_size = n;
        self
    }

    /// Sets the acknowledgment timeout (default: 500 ms).
    #[must_use]
    pub const fn ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Sets the settle delay after a stop report (default: 300 ms).
    #[must_use]
    pub const fn settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Sets how many restarts after a stop are waited out (default: 1).
    #[must_use]
    pub const fn stop_rearms(mut self, n: u32) -> Self {
        self.stop_rearms = n;
        self
    }
}

/// Per-run behavior of [`Hub::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub struct RunOptions {
    /// Stay attached and forward input until the program ends.
    pub wait: bool,
    /// Echo program output to the terminal.
    pub print_output: bool,
    /// Put the controlling terminal in raw mode while attached.
    pub raw_terminal: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            wait: true,
            print_output: true,
            raw_terminal: true,
        }
    }
}

impl RunOptions {
    /// Sets whether to wait for the program to end (default: true).
    #[must_use]
    pub const fn wait(mut self, wait: bool) -> Self {
        self.wait = wait;
        self
    }

    /// Sets whether output is echoed (default: true).
    #[must_use]
    pub const fn print_output(mut self, print: bool) -> Self {
        self.print_output = print;
        self
    }

    /// Sets whether raw terminal mode is used (default: true).
    #[must_use]
    pub const fn raw_terminal(mut self, raw: bool) -> Self {
        self.raw_terminal = raw;
        self
    }
}

/// Outcome of a program run.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct RunReport {
    /// Output lines that were neither sentinels nor logged.
    pub output: Vec<Vec<u8>>,
    /// Program bytes downloaded.
    pub bytes_sent: usize,
    /// Interactive session outcome; `None` when not waiting.
    pub session: Option<SessionReport>,
}

/// Mutable per-session state. Locked only for synchronous sections.
pub(crate) struct State {
    /// Stdio line framing.
    pub(crate) line: LineBuffer,
    /// Pending block acknowledgment.
    pub(crate) checksum: ChecksumSlot,
    /// Program running/loading state.
    pub(crate) lifecycle: Lifecycle,
    /// Terminal/log routing.
    pub(crate) output: OutputDemux,
    /// Terminal bytes held while loading.
    pub(crate) held: StdoutBuffer,
    /// Where program output is shown.
    pub(crate) terminal: Box<dyn Write + Send>,
    /// Interactive session phase.
    pub(crate) phase: SessionPhase,
}

/// Builder for a [`Hub`].
#[must_use = "a HubBuilder does nothing until .build() is called"]
pub struct HubBuilder<C> {
    /// Write half of the connection.
    channel: C,
    /// Session parameters.
    config: HubConfig,
    /// Output destination; stdout when unset.
    terminal: Option<Box<dyn Write + Send>>,
    /// Progress callback.
    progress: Option<ProgressFn>,
}

impl<C> fmt::Debug for HubBuilder<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HubBuilder")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<C> HubBuilder<C> {
    /// Replaces the session parameters.
    pub fn config(mut self, config: HubConfig) -> Self {
        self.config = config;
        self
    }

    /// Sends program output to `out` instead of stdout.
    pub fn terminal(mut self, out: impl Write + Send + 'static) -> Self {
        self.terminal = Some(Box::new(out));
        self
    }

    /// Calls `f` after every acknowledged program chunk.
    pub fn on_progress(mut self, f: impl Fn(Progress) + Send + Sync + 'static) -> Self {
        self.progress = Some(Box::new(f));
        self
    }

    /// Builds the hub.
    pub fn build(self) -> Hub<C> {
        let state = State {
            line: LineBuffer::new(Some(EOL)),
            checksum: ChecksumSlot::default(),
            lifecycle: Lifecycle::new(),
            output: OutputDemux::new("", true),
            held: StdoutBuffer::default(),
            terminal: self.terminal.unwrap_or_else(|| Box::new(io::stdout())),
            phase: SessionPhase::Idle,
        };
        Hub {
            channel: self.channel,
            config: self.config,
            state: Mutex::new(state),
            write_lock: tokio::sync::Mutex::new(()),
            progress: self.progress,
        }
    }
}

/// A session with one hub over a [`ByteChannel`].
///
/// Notifications are fed in with [`handle_notification`](Self::handle_notification),
/// or pumped from a [`Subscription`] by [`dispatch`](Self::dispatch) and
/// [`drive`](Self::drive).
///
/// # Example
///
/// ```no_run
/// use hublink::{ChannelKind, Hub, MpyCross, RunOptions, StreamChannel, subscription};
///
/// # async fn demo(writer: tokio::fs::File) -> hublink::Result<()> {
/// let (sink, mut events) = subscription();
/// // A transport task feeds `sink`.
/// # drop(sink);
/// let hub = Hub::builder(StreamChannel::new(writer, ChannelKind::Usb)).build();
/// let report = hub
///     .run(
///         &mut events,
///         "main.py".as_ref(),
///         &MpyCross::default(),
///         tokio::io::empty(),
///         &RunOptions::default(),
///     )
///     .await?;
/// println!("sent {} bytes", report.bytes_sent);
/// # Ok(())
/// # }
/// ```
pub struct Hub<C> {
    /// Write half of the connection.
    pub(crate) channel: C,
    /// Session parameters.
    pub(crate) config: HubConfig,
    /// Per-session state.
    state: Mutex<State>,
    /// Serializes blocks and stdin writes.
    pub(crate) write_lock: tokio::sync::Mutex<()>,
    /// Progress callback.
    progress: Option<ProgressFn>,
}

impl<C> fmt::Debug for Hub<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hub")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<C> Hub<C> {
    /// Starts building a hub over `channel`.
    pub fn builder(channel: C) -> HubBuilder<C> {
        HubBuilder {
            channel,
            config: HubConfig::default(),
            terminal: None,
            progress: None,
        }
    }

    /// Session parameters.
    pub const fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Write half of the connection.
    pub const fn channel(&self) -> &C {
        &self.channel
    }

    /// Current program state.
    pub fn program_state(&self) -> ProgramState {
        self.state().lifecycle.state()
    }

    /// Current interactive session phase.
    pub fn session_phase(&self) -> SessionPhase {
        self.state().phase
    }

    /// Path of the log file currently receiving output, if any.
    pub fn log_path(&self) -> Option<PathBuf> {
        self.state().output.log_path().map(Path::to_path_buf)
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_phase(&self, phase: SessionPhase) {
        self.state().phase = phase;
    }

    pub(crate) fn report(&self, progress: Progress) {
        if let Some(f) = &self.progress {
            f(progress);
        }
    }

    /// Handles one notification from the transport.
    pub fn handle_notification(&self, n: &Notification) -> Result<()> {
        match n.source {
            Source::Stdio => self.on_stdio(&n.data),
            Source::Control => match DeviceEvent::decode(&n.data) {
                Ok(DeviceEvent::StatusReport(flags)) => self.on_status(flags),
                Ok(DeviceEvent::WriteStdout(data)) => self.on_stdio(&data),
                Ok(other) => {
                    debug!(?other, "ignoring event");
                    Ok(())
                }
                Err(ProtoError::UnknownEvent(kind)) => {
                    debug!(kind, "ignoring unknown event");
                    Ok(())
                }
                Err(e) => Err(e.into()),
            },
        }
    }

    /// Feeds stdio bytes through the ack hook, line framing and output routing.
    fn on_stdio(&self, data: &[u8]) -> Result<()> {
        let mut guard = self.state();
        let State {
            line,
            checksum,
            lifecycle,
            output,
            held,
            terminal,
            ..
        } = &mut *guard;
        line.feed::<Error>(
            data,
            |b| checksum.intercept(b),
            |l| {
                if let Some(bytes) = output.on_line(l)? {
                    if lifecycle.is_loading() {
                        held.hold(&bytes);
                    } else {
                        terminal.write_all(&bytes)?;
                        terminal.flush()?;
                    }
                }
                Ok(())
            },
        )?;
        if !lifecycle.is_loading()
            && let Some(bytes) = output.on_partial(line.pending())
        {
            terminal.write_all(&bytes)?;
            terminal.flush()?;
        }
        Ok(())
    }

    /// Applies a status report, releasing held output on a state change.
    fn on_status(&self, flags: StatusFlags) -> Result<()> {
        let mut guard = self.state();
        let State {
            lifecycle,
            held,
            terminal,
            ..
        } = &mut *guard;
        if lifecycle.on_status(flags).changed {
            held.release(terminal.as_mut())?;
        }
        Ok(())
    }

    /// Defers status transitions until [`exit_loading`](Self::exit_loading).
    pub fn enter_loading(&self) {
        self.state().lifecycle.enter_loading();
    }

    /// Replays the last status report and releases held output.
    pub fn exit_loading(&self) -> Result<()> {
        let mut guard = self.state();
        let State {
            lifecycle,
            held,
            terminal,
            ..
        } = &mut *guard;
        lifecycle.exit_loading();
        held.release(terminal.as_mut())?;
        Ok(())
    }

    /// Processes notifications in delivery order.
    ///
    /// Only returns on failure: a handler error, or
    /// [`TransportError::Disconnected`] once every sink is dropped.
    pub async fn dispatch(&self, events: &mut Subscription) -> Error {
        while let Some(n) = events.recv().await {
            if let Err(e) = self.handle_notification(&n) {
                return e;
            }
        }
        TransportError::Disconnected.into()
    }

    /// Runs `fut` while dispatching notifications.
    ///
    /// Queued notifications are handled before `fut` is polled, so an
    /// acknowledgment already delivered is seen by the waiting block.
    pub async fn drive<F: Future>(&self, events: &mut Subscription, fut: F) -> Result<F::Output> {
        let dispatch = self.dispatch(events);
        tokio::pin!(dispatch, fut);
        tokio::select! {
            biased;
            e = &mut dispatch => Err(e),
            out = &mut fut => Ok(out),
        }
    }

    /// Starts a fresh run: closes a dangling log and drops partial input.
    fn reset(&self, script_dir: &Path, print: bool) -> Result<()> {
        let mut s = self.state();
        if let Some(path) = s.output.close_log()? {
            warn!(path = %path.display(), "closed log left open by a previous run");
        }
        s.output.reset(script_dir, print)?;
        s.line.clear();
        s.checksum.disarm();
        s.phase = SessionPhase::Idle;
        Ok(())
    }
}

/// Leaves loading mode when dropped without [`finish`](Self::finish).
struct Loading<'a, C> {
    /// Hub in loading mode.
    hub: &'a Hub<C>,
    /// Loading already ended.
    done: bool,
}

impl<'a, C> Loading<'a, C> {
    fn enter(hub: &'a Hub<C>) -> Self {
        hub.enter_loading();
        Self { hub, done: false }
    }

    fn finish(mut self) -> Result<()> {
        self.done = true;
        self.hub.exit_loading()
    }
}

impl<C> Drop for Loading<'_, C> {
    fn drop(&mut self) {
        if !self.done {
            if let Err(e) = self.hub.exit_loading() {
                warn!(error = %e, "failed to release output after aborted download");
            }
        }
    }
}

impl<C: ByteChannel> Hub<C> {
    /// Compiles `script`, downloads it and (optionally) attaches to it.
    ///
    /// Log names printed by the program resolve against the script's
    /// directory.
    pub async fn run<R>(
        &self,
        events: &mut Subscription,
        script: &Path,
        compiler: &dyn Compiler,
        input: R,
        opts: &RunOptions,
    ) -> Result<RunReport>
    where
        R: AsyncRead + Unpin,
    {
        let source = tokio::fs::read_to_string(script).await?;
        let mpy = compiler.compile(&source, MPY_ABI).await?;
        info!(script = %script.display(), size = mpy.len(), "compiled");
        let dir = script.parent().unwrap_or_else(|| Path::new(""));
        self.run_program(events, &mpy, dir, input, opts).await
    }

    /// Downloads a compiled program and (optionally) attaches to it.
    ///
    /// Any log opened by the program is closed when this returns, whether
    /// the run succeeded or not.
    pub async fn run_program<R>(
        &self,
        events: &mut Subscription,
        payload: &[u8],
        script_dir: &Path,
        input: R,
        opts: &RunOptions,
    ) -> Result<RunReport>
    where
        R: AsyncRead + Unpin,
    {
        self.reset(script_dir, opts.print_output)?;
        let res = self.run_attached(events, payload, input, opts).await;
        let closed = self.state().output.close_log();
        let report = res?;
        if let Some(path) = closed? {
            warn!(path = %path.display(), "program ended with its log still open");
        }
        Ok(report)
    }

    /// Download under the loading guard, then the interactive session.
    async fn run_attached<R>(
        &self,
        events: &mut Subscription,
        payload: &[u8],
        input: R,
        opts: &RunOptions,
    ) -> Result<RunReport>
    where
        R: AsyncRead + Unpin,
    {
        let loading = Loading::enter(self);
        let bytes_sent = self.drive(events, self.send_program(payload)).await??;
        loading.finish()?;

        let session = if opts.wait {
            let _raw = if opts.raw_terminal {
                RawMode::enter()?
            } else {
                None
            };
            Some(self.drive(events, self.interact(input)).await??)
        } else {
            None
        };

        Ok(RunReport {
            output: self.state().output.take_history(),
            bytes_sent,
            session,
        })
    }
}
