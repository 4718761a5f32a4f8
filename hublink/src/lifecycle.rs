//! Program lifecycle decoded from hub status reports.

use hublink_proto::StatusFlags;
use tokio::sync::watch;
use tracing::{info, trace};

use crate::channel::TransportError;

/// Observable program state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProgramState {
    /// No status report has been applied yet.
    Unknown,
    /// The hub reports no user program running.
    Idle,
    /// A program download is in progress; status changes are deferred.
    Loading,
    /// The hub reports a running user program.
    Running,
}

/// Effect of applying a status report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct Transition {
    /// The running flag changed.
    pub changed: bool,
    /// The report said "not running" and the stop signal fired.
    pub stopped: bool,
}

/// Tracks whether a user program is running.
///
/// While loading, reports are recorded but not applied: during a download
/// the stdio channel carries acknowledgment bytes, and a premature state
/// change would release buffered output around them. The last report is
/// replayed by [`exit_loading`](Self::exit_loading).
#[derive(Debug)]
pub struct Lifecycle {
    /// Last applied running flag; `None` until the first report.
    running: Option<bool>,
    /// Download in progress.
    loading: bool,
    /// Most recent report, applied or not.
    last: Option<StatusFlags>,
    /// Single-slot "program stopped" signal.
    stopped: watch::Sender<bool>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    /// Creates a lifecycle in [`ProgramState::Unknown`].
    pub fn new() -> Self {
        Self {
            running: None,
            loading: false,
            last: None,
            stopped: watch::Sender::new(false),
        }
    }

    /// Current observable state.
    pub const fn state(&self) -> ProgramState {
        match (self.loading, self.running) {
            (true, _) => ProgramState::Loading,
            (false, None) => ProgramState::Unknown,
            (false, Some(false)) => ProgramState::Idle,
            (false, Some(true)) => ProgramState::Running,
        }
    }

    /// Returns `true` if the last applied report said a program is running.
    pub fn program_running(&self) -> bool {
        self.running == Some(true)
    }

    /// Returns `true` while a download is in progress.
    pub const fn is_loading(&self) -> bool {
        self.loading
    }

    /// Applies a status report, or records it while loading.
    pub fn on_status(&mut self, flags: StatusFlags) -> Transition {
        self.last = Some(flags);
        if self.loading {
            trace!(flags = flags.0, "status deferred while loading");
            return Transition::default();
        }
        self.apply(flags)
    }

    /// Suppresses status transitions and clears any stale stop signal.
    pub fn enter_loading(&mut self) {
        self.loading = true;
        self.rearm();
    }

    /// Ends suppression and replays the last recorded report.
    pub fn exit_loading(&mut self) -> Transition {
        if !self.loading {
            return Transition::default();
        }
        self.loading = false;
        self.last.map_or_else(Transition::default, |f| self.apply(f))
    }

    /// Returns a waiter for the "program stopped" signal.
    pub fn stopped(&self) -> StopWaiter {
        StopWaiter(self.stopped.subscribe())
    }

    /// Clears the stop signal so the next wait needs a new stop report.
    pub fn rearm(&self) {
        self.stopped.send_replace(false);
    }

    /// Updates the running flag from a report.
    fn apply(&mut self, flags: StatusFlags) -> Transition {
        let running_now = flags.program_running();
        let changed = self.running != Some(running_now);
        if changed {
            info!(running = running_now, "program state changed");
            self.running = Some(running_now);
        }
        if !running_now {
            self.stopped.send_replace(true);
        }
        Transition {
            changed,
            stopped: !running_now,
        }
    }
}

/// Waits for the "program stopped" signal of a [`Lifecycle`].
#[derive(Debug, Clone)]
pub struct StopWaiter(watch::Receiver<bool>);

impl StopWaiter {
    /// Resolves once the signal is set. Returns immediately if it already is.
    pub async fn wait(&mut self) -> Result<(), TransportError> {
        self.0
            .wait_for(|&stopped| stopped)
            .await
            .map(drop)
            .map_err(|_| TransportError::Disconnected)
    }

    /// Returns `true` if the signal is currently set.
    pub fn is_set(&self) -> bool {
        *self.0.borrow()
    }
}
