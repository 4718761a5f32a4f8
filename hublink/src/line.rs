//! Line framing over a fragmentable byte stream.

/// Accumulates incoming bytes and splits them into end-of-line terminated
/// lines.
///
/// After every [`feed`](Self::feed) the buffer holds no complete line: each
/// one has been handed out exactly once, in arrival order.
#[derive(Debug, Clone, Default)]
pub struct LineBuffer {
    /// Bytes received since the last complete line.
    buf: Vec<u8>,
    /// End-of-line marker; `None` disables line extraction.
    eol: Option<Vec<u8>>,
}

impl LineBuffer {
    /// Creates a buffer splitting on `eol`, or a pure byte sink for `None`.
    pub fn new(eol: Option<&[u8]>) -> Self {
        Self {
            buf: Vec::new(),
            eol: eol.filter(|m| !m.is_empty()).map(<[u8]>::to_vec),
        }
    }

    /// Bytes of the current, incomplete line.
    pub fn pending(&self) -> &[u8] {
        &self.buf
    }

    /// Drops any partial line.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Appends `data` and hands every completed line to `on_line`.
    ///
    /// `hook` sees each byte first, in arrival order, and either consumes it
    /// (`None`) or passes it through to the line buffer. Lines exclude the
    /// marker. If `on_line` fails, the remaining lines of this call are
    /// dropped and the error is returned.
    pub fn feed<E>(
        &mut self,
        data: &[u8],
        mut hook: impl FnMut(u8) -> Option<u8>,
        mut on_line: impl FnMut(&[u8]) -> Result<(), E>,
    ) -> Result<(), E> {
        self.buf.extend(data.iter().filter_map(|&b| hook(b)));

        let Some(eol) = self.eol.as_deref() else {
            return Ok(());
        };

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(at) = find(&self.buf[start..], eol) {
            lines.push(start..start + at);
            start += at + eol.len();
        }
        let rest = self.buf.split_off(start);
        let done = std::mem::replace(&mut self.buf, rest);

        for range in lines {
            on_line(&done[range])?;
        }
        Ok(())
    }
}

/// Position of the first occurrence of `needle` in `hay`.
fn find(hay: &[u8], needle: &[u8]) -> Option<usize> {
    hay.windows(needle.len()).position(|w| w == needle)
}
