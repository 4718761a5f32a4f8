//! Interactive session: stdin pump and program-end watcher.

use std::sync::atomic::{AtomicUsize, Ordering};

use hublink_proto::MAX_BLOCK;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, warn};

use crate::Result;
use crate::channel::ByteChannel;
use crate::hub::Hub;

/// Where an interactive session is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum SessionPhase {
    /// No session has started.
    #[default]
    Idle,
    /// Forwarding input while waiting for the program to end.
    Piping,
    /// The program ended; the pump is being torn down.
    Draining,
    /// The session is over.
    Done,
}

/// Why the stdin pump stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum PumpExit {
    /// Input reached end of file before the program ended.
    Eof,
    /// The program ended while the pump was still reading.
    Cancelled,
}

/// Outcome of [`Hub::interact`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub struct SessionReport {
    /// How the pump stopped.
    pub stdin: PumpExit,
    /// Input bytes forwarded to the hub.
    pub forwarded: usize,
}

impl<C: ByteChannel> Hub<C> {
    /// Forwards `input` to the hub until the user program ends.
    ///
    /// The pump and the end watcher run concurrently. When the program ends
    /// the pump is dropped, abandoning any pending read. End of input does
    /// not end the session; the watcher keeps waiting.
    pub async fn interact(&self, input: impl AsyncRead + Unpin) -> Result<SessionReport> {
        let forwarded = AtomicUsize::new(0);
        self.set_phase(SessionPhase::Piping);

        let mut pump = Box::pin(self.pump_stdin(input, &forwarded));
        let watcher = self.wait_for_program_end();
        tokio::pin!(watcher);

        let mut eof = false;
        let outcome = loop {
            tokio::select! {
                biased;
                res = &mut watcher => break res,
                res = &mut pump, if !eof => match res {
                    Ok(()) => {
                        debug!("input closed, still waiting for program end");
                        eof = true;
                    }
                    Err(e) => break Err(e),
                },
            }
        };

        self.set_phase(SessionPhase::Draining);
        drop(pump);
        self.set_phase(SessionPhase::Done);
        outcome?;

        let stdin = if eof { PumpExit::Eof } else { PumpExit::Cancelled };
        let forwarded = forwarded.load(Ordering::Relaxed);
        debug!(?stdin, forwarded, "session ended");
        Ok(SessionReport { stdin, forwarded })
    }

    /// Copies `input` to the channel until end of file.
    async fn pump_stdin(
        &self,
        mut input: impl AsyncRead + Unpin,
        forwarded: &AtomicUsize,
    ) -> Result<()> {
        let chunk = self.channel.max_write().map_or(MAX_BLOCK, |n| n.clamp(1, MAX_BLOCK));
        let mut buf = vec![0u8; chunk];
        loop {
            let n = input.read(&mut buf).await?;
            if n == 0 {
                return Ok(());
            }
            let _serial = self.write_lock.lock().await;
            self.channel.write(&buf[..n], false).await?;
            forwarded.fetch_add(n, Ordering::Relaxed);
        }
    }

    /// Resolves once the program has stopped and stayed stopped.
    ///
    /// After a stop report the watcher waits the settle delay; if the program
    /// is running again by then, it re-arms and waits for the next stop, up
    /// to `stop_rearms` times.
    pub async fn wait_for_program_end(&self) -> Result<()> {
        let mut stopped = self.state().lifecycle.stopped();
        let mut rearms = self.config.stop_rearms;
        loop {
            stopped.wait().await?;
            tokio::time::sleep(self.config.settle_delay).await;
            if !self.state().lifecycle.program_running() {
                return Ok(());
            }
            if rearms == 0 {
                warn!("program still running after its last stop report");
                return Ok(());
            }
            rearms -= 1;
            debug!("program restarted after stop, waiting again");
            self.state().lifecycle.rearm();
        }
    }
}
