//! Line reader for worker output.
//!
//! yt-dlp redraws its progress line with `\r` when attached to a terminal and
//! may still do so when piped, so records are split on either `\n` or `\r`.
//! Reads can end mid-line; partial data is kept until the delimiter arrives.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

/// Records longer than this are emitted in pieces.
const MAX_LINE_BYTES: usize = 64 * 1024;
const READ_CHUNK: usize = 4096;

/// Async reader yielding trimmed, non-empty text lines.
pub struct LineReader<R> {
    inner: R,
    pending: Vec<u8>,
    /// Bytes of `pending` already known to contain no delimiter.
    scanned: usize,
    eof: bool,
}

impl<R> LineReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            pending: Vec::with_capacity(READ_CHUNK),
            scanned: 0,
            eof: false,
        }
    }

    /// Next line, or `None` once the stream is exhausted.
    pub async fn next_line(&mut self) -> io::Result<Option<String>> {
        loop {
            if let Some(line) = self.take_line() {
                if line.is_empty() {
                    continue;
                }
                return Ok(Some(line));
            }

            if self.eof {
                return Ok(self.take_rest());
            }

            let mut chunk = [0u8; READ_CHUNK];
            let n = self.inner.read(&mut chunk).await?;
            if n == 0 {
                self.eof = true;
            } else {
                self.pending.extend_from_slice(&chunk[..n]);
            }
        }
    }

    fn take_line(&mut self) -> Option<String> {
        let found = self.pending[self.scanned..]
            .iter()
            .position(|b| matches!(b, b'\n' | b'\r'))
            .map(|offset| self.scanned + offset);

        match found {
            Some(end) => {
                let line = decode(&self.pending[..end]);
                self.pending.drain(..=end);
                self.scanned = 0;
                Some(line)
            }
            None if self.pending.len() >= MAX_LINE_BYTES => {
                let line = decode(&self.pending);
                self.pending.clear();
                self.scanned = 0;
                Some(line)
            }
            None => {
                self.scanned = self.pending.len();
                None
            }
        }
    }

    fn take_rest(&mut self) -> Option<String> {
        let line = decode(&self.pending);
        self.pending.clear();
        self.scanned = 0;
        (!line.is_empty()).then_some(line)
    }
}

fn decode(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim().to_string()
}
