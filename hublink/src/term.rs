//! Raw terminal mode for interactive sessions.

use std::io;

/// Ctrl-X, which interrupts the host while Ctrl-C goes to the hub.
pub const INTERRUPT_KEY: u8 = 0x18;

/// Restores the saved terminal attributes on drop.
#[cfg(unix)]
#[derive(Debug)]
pub struct RawMode {
    /// Terminal the attributes belong to.
    fd: std::os::fd::OwnedFd,
    /// Attributes to restore.
    saved: nix::sys::termios::Termios,
}

#[cfg(unix)]
impl RawMode {
    /// Switches stdin to per-keystroke, unechoed input.
    ///
    /// Returns `None` when stdin is not a terminal.
    pub fn enter() -> io::Result<Option<Self>> {
        Self::enter_on(io::stdin())
    }

    /// Switches the terminal behind `fd` to raw mode.
    ///
    /// Returns `None` when `fd` is not a terminal. Input `\n` is translated
    /// to `\r` for the hub's line editor.
    pub fn enter_on(fd: impl std::os::fd::AsFd) -> io::Result<Option<Self>> {
        use std::io::IsTerminal;

        use nix::sys::termios::{self, InputFlags, LocalFlags, SetArg, SpecialCharacterIndices};

        let fd = fd.as_fd().try_clone_to_owned()?;
        if !fd.is_terminal() {
            return Ok(None);
        }
        let saved = termios::tcgetattr(&fd)?;

        let mut raw = saved.clone();
        raw.local_flags.remove(LocalFlags::ECHO | LocalFlags::ICANON);
        raw.input_flags.remove(InputFlags::ICRNL);
        raw.input_flags.insert(InputFlags::INLCR);
        raw.control_chars[SpecialCharacterIndices::VINTR as usize] = INTERRUPT_KEY;
        raw.control_chars[SpecialCharacterIndices::VMIN as usize] = 1;
        raw.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;
        termios::tcsetattr(&fd, SetArg::TCSANOW, &raw)?;

        tracing::debug!("terminal switched to raw mode");
        Ok(Some(Self { fd, saved }))
    }
}

#[cfg(unix)]
impl Drop for RawMode {
    fn drop(&mut self) {
        use nix::sys::termios::{SetArg, tcsetattr};

        if let Err(e) = tcsetattr(&self.fd, SetArg::TCSANOW, &self.saved) {
            tracing::warn!(error = %e, "failed to restore terminal mode");
        }
    }
}

/// Raw mode is unavailable here; entering it is a no-op.
#[cfg(not(unix))]
#[derive(Debug)]
pub struct RawMode;

#[cfg(not(unix))]
impl RawMode {
    /// Always returns `None`.
    pub fn enter() -> io::Result<Option<Self>> {
        Ok(None)
    }
}
