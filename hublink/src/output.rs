//! Console output demultiplexing.
//!
//! Lines from the hub go to the terminal, except between `LOG-OPEN <name>`
//! and `LOG-CLOSE`, where they are written to `<name>` next to the script.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use hublink_proto::{LOG_CLOSE, LOG_OPEN, Sentinel};
use tracing::info;

use crate::{Error, Result};

/// An open log file.
#[derive(Debug)]
struct LogRedirect {
    /// Where the log is written.
    path: PathBuf,
    /// Buffered file handle.
    file: BufWriter<File>,
}

/// Routes complete lines to the terminal or a log file.
#[derive(Debug, Default)]
pub struct OutputDemux {
    /// Directory log names are resolved against.
    script_dir: PathBuf,
    /// Echo non-logged lines to the terminal.
    print: bool,
    /// Active redirection.
    log: Option<LogRedirect>,
    /// Lines that were neither sentinels nor logged, this run.
    history: Vec<Vec<u8>>,
    /// Bytes of the current partial line already shown.
    shown: usize,
}

impl OutputDemux {
    /// Creates a demux resolving log names against `script_dir`.
    pub fn new(script_dir: impl Into<PathBuf>, print: bool) -> Self {
        Self {
            script_dir: script_dir.into(),
            print,
            log: None,
            history: Vec::new(),
            shown: 0,
        }
    }

    /// Starts a new run: closes any open log and forgets the history.
    pub fn reset(&mut self, script_dir: impl Into<PathBuf>, print: bool) -> Result<()> {
        self.close_log()?;
        *self = Self::new(script_dir, print);
        Ok(())
    }

    /// Handles one line. Returns the bytes to show on the terminal, if any.
    ///
    /// Sentinels are recognized even while a log is open, so `LOG-CLOSE`
    /// itself is never written to the log.
    pub fn on_line(&mut self, line: &[u8]) -> Result<Option<Vec<u8>>> {
        let shown = std::mem::take(&mut self.shown);
        match Sentinel::parse(line) {
            Some(Sentinel::LogOpen(name)) => {
                self.open_log(&name)?;
                Ok(None)
            }
            Some(Sentinel::LogClose) => {
                if self.close_log()?.is_none() {
                    return Err(Error::Protocol("no log open".into()));
                }
                Ok(None)
            }
            _ => {
                if let Some(log) = &mut self.log {
                    log.file.write_all(line)?;
                    log.file.write_all(b"\n")?;
                    return Ok(None);
                }
                self.history.push(line.to_vec());
                Ok(self.print.then(|| {
                    let rest = line.get(shown..).unwrap_or_default();
                    let mut out = Vec::with_capacity(rest.len() + 1);
                    out.extend_from_slice(rest);
                    out.push(b'\n');
                    out
                }))
            }
        }
    }

    /// Returns the not yet shown bytes of an incomplete line, if they may
    /// be shown now.
    ///
    /// Prompts and keystroke echoes never end in a newline. A tail that
    /// could still become a sentinel is held back, as is everything while a
    /// log is open, and a trailing `\r` that may start the line ending.
    pub fn on_partial(&mut self, pending: &[u8]) -> Option<Vec<u8>> {
        if !self.print || self.log.is_some() || may_be_sentinel(pending) {
            return None;
        }
        let visible = pending.strip_suffix(b"\r").unwrap_or(pending);
        let fresh = visible.get(self.shown..).filter(|b| !b.is_empty())?;
        self.shown = visible.len();
        Some(fresh.to_vec())
    }

    /// Flushes and closes the open log. Returns its path, if one was open.
    pub fn close_log(&mut self) -> Result<Option<PathBuf>> {
        let Some(mut log) = self.log.take() else {
            return Ok(None);
        };
        log.file.flush()?;
        info!(path = %log.path.display(), "done saving log");
        Ok(Some(log.path))
    }

    /// Path of the open log, if any.
    pub fn log_path(&self) -> Option<&Path> {
        self.log.as_ref().map(|l| l.path.as_path())
    }

    /// Lines shown (or suppressed by `print = false`) so far this run.
    pub fn history(&self) -> &[Vec<u8>] {
        &self.history
    }

    /// Takes the history, leaving it empty.
    pub fn take_history(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.history)
    }

    fn open_log(&mut self, name: &str) -> Result<()> {
        if self.log.is_some() {
            return Err(Error::Protocol("log already open".into()));
        }
        let rel = Path::new(name);
        if name.is_empty() || rel.is_absolute() {
            return Err(Error::Protocol(format!("invalid log file name {name:?}")));
        }
        let path = self.script_dir.join(rel);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let file = File::create(&path)?;
        info!(path = %path.display(), "saving log");
        self.log = Some(LogRedirect {
            path,
            file: BufWriter::new(file),
        });
        Ok(())
    }
}

/// Returns `true` if `tail` is, or may grow into, a sentinel line.
fn may_be_sentinel(tail: &[u8]) -> bool {
    [LOG_OPEN, LOG_CLOSE]
        .iter()
        .any(|s| s.starts_with(tail) || tail.starts_with(s))
}

/// Terminal bytes held back while a program is loading.
#[derive(Debug, Default)]
pub struct StdoutBuffer {
    /// Bytes in arrival order.
    held: Vec<u8>,
}

impl StdoutBuffer {
    /// Appends bytes to release later.
    pub fn hold(&mut self, bytes: &[u8]) {
        self.held.extend_from_slice(bytes);
    }

    /// Returns `true` if nothing is held.
    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    /// Writes everything held to `out` and empties the buffer.
    pub fn release(&mut self, out: &mut dyn Write) -> io::Result<()> {
        if self.held.is_empty() {
            return Ok(());
        }
        out.write_all(&self.held)?;
        out.flush()?;
        self.held.clear();
        Ok(())
    }
}
