use std::io::Read;
use std::sync::Mutex;

use super::ReadAt;
use crate::error::{Error, Result};

/// Adapter that exposes a forward-only byte stream as a [`ReadAt`] source.
///
/// The underlying stream is consumed strictly front to back. Bytes from the
/// retained window start onward are kept in memory so a region (typically the
/// central directory at the archive tail) can be re-addressed after being
/// reached; a read request behind the window start is an ordering error.
///
/// Callers that have finished with a prefix of the stream should call
/// [`release_before`](ForwardReader::release_before) to bound memory use.
pub struct ForwardReader<R: Read + Send> {
    state: Mutex<State<R>>,
    size: u64,
}

struct State<R> {
    stream: R,
    /// Offset of the first retained byte.
    window_start: u64,
    /// Retained bytes `[window_start, window_start + window.len())`.
    window: Vec<u8>,
    /// Stream position: everything before this offset has been consumed.
    pos: u64,
    eof: bool,
}

impl<R: Read + Send> ForwardReader<R> {
    pub fn new(stream: R, size: u64) -> Self {
        Self {
            state: Mutex::new(State {
                stream,
                window_start: 0,
                window: Vec::new(),
                pos: 0,
                eof: false,
            }),
            size,
        }
    }

    /// Drop retained bytes before `offset`. Subsequent reads behind `offset`
    /// fail with an ordering error.
    pub fn release_before(&self, offset: u64) {
        let mut st = self.state.lock().expect("forward reader poisoned");
        if offset <= st.window_start {
            return;
        }
        let drop = (offset - st.window_start).min(st.window.len() as u64) as usize;
        st.window.drain(..drop);
        // Releasing past unread data leaves a gap; `fill_to` consumes and
        // discards stream bytes below the window start, so the gap is
        // never served.
        st.window_start = offset;
    }

    fn fill_to(&self, st: &mut State<R>, end: u64) -> Result<()> {
        let end = end.min(self.size);
        while st.pos < end && !st.eof {
            let want = (end - st.pos).min(64 * 1024) as usize;
            let mut chunk = vec![0u8; want];
            let n = st.stream.read(&mut chunk)?;
            if n == 0 {
                st.eof = true;
                break;
            }
            chunk.truncate(n);
            // Discard bytes that fall before the retained window (gap skipped
            // over by release_before).
            let chunk_start = st.pos;
            st.pos += n as u64;
            if st.pos <= st.window_start {
                continue;
            }
            let keep_from = st.window_start.saturating_sub(chunk_start) as usize;
            st.window.extend_from_slice(&chunk[keep_from..]);
        }
        Ok(())
    }
}

impl<R: Read + Send> ReadAt for ForwardReader<R> {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let mut st = self.state.lock().expect("forward reader poisoned");
        if offset < st.window_start {
            return Err(Error::ordering(format!(
                "read at offset {offset} behind forward stream position {}",
                st.window_start
            )));
        }
        let end = offset + buf.len() as u64;
        if end > st.window_start + st.window.len() as u64 {
            self.fill_to(&mut st, end)?;
        }
        let window_end = st.window_start + st.window.len() as u64;
        if offset >= window_end {
            return Ok(0);
        }
        let start = (offset - st.window_start) as usize;
        let n = buf.len().min(st.window.len() - start);
        buf[..n].copy_from_slice(&st.window[start..start + n]);
        Ok(n)
    }

    fn size(&self) -> u64 {
        self.size
    }
}
