//! Sentinel lines that redirect program output to a host-side log file.
//!
//! ```text
//! LOG-OPEN <relative-path>    start writing subsequent lines to <path>
//! LOG-CLOSE                   stop writing and close the file
//! ```
//!
//! Matching is ASCII, case-sensitive and anchored at the start of the line.

use std::borrow::Cow;

/// Prefix of a log-open line, including the separating space.
pub const LOG_OPEN: &[u8] = b"LOG-OPEN ";

/// Prefix of a log-close line.
pub const LOG_CLOSE: &[u8] = b"LOG-CLOSE";

/// A protocol command carried on the stdout line stream.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Sentinel<'a> {
    /// Open a log file at the given path, relative to the script.
    LogOpen(Cow<'a, str>),
    /// Close the open log file.
    LogClose,
}

impl<'a> Sentinel<'a> {
    /// Recognizes a sentinel line. Returns `None` for ordinary output.
    pub fn parse(line: &'a [u8]) -> Option<Self> {
        if let Some(name) = line.strip_prefix(LOG_OPEN) {
            let name = match String::from_utf8_lossy(name) {
                Cow::Borrowed(s) => Cow::Borrowed(s.trim_end()),
                Cow::Owned(s) => Cow::Owned(s.trim_end().to_owned()),
            };
            return Some(Self::LogOpen(name));
        }
        line.starts_with(LOG_CLOSE).then_some(Self::LogClose)
    }
}
