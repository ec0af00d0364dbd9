//! Line framing for the streamed transport.
//!
//! The streamed join endpoint sends newline-delimited text. Network
//! chunks do not line up with lines, so [`LineFramer`] buffers bytes
//! until a `\n` arrives and then classifies the completed line:
//!
//! * lines starting with `data: ` carry one JSON queue message and are
//!   returned with the prefix stripped;
//! * every other line (blank separators, `: keep-alive` comments,
//!   `event:` lines) is handed back as [`LineState::LineComplete`] so
//!   the reader can discard it and keep going.

use sdq_core::protocol::DATA_PREFIX;

/// Result of asking the framer for its next line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineState {
    /// No terminated line is buffered yet; feed more bytes.
    Accumulating,
    /// A full line without the data prefix. Not a protocol message.
    LineComplete(Vec<u8>),
    /// A full `data: ` line; holds the payload after the prefix.
    PayloadExtracted(Vec<u8>),
}

/// Accumulates stream bytes and yields complete lines.
#[derive(Debug, Default)]
pub struct LineFramer {
    pending: Vec<u8>,
    /// Bytes of `pending` already searched for a newline.
    scanned: usize,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk read from the stream.
    pub fn push(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);
    }

    /// Number of buffered bytes not yet returned as a line.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    /// Take the next terminated line out of the buffer, if any.
    ///
    /// The trailing `\n` (and a `\r` before it) is stripped.
    pub fn next_line(&mut self) -> LineState {
        let Some(offset) = self.pending[self.scanned..]
            .iter()
            .position(|&b| b == b'\n')
        else {
            self.scanned = self.pending.len();
            return LineState::Accumulating;
        };

        let end = self.scanned + offset;
        let mut line: Vec<u8> = self.pending.drain(..=end).collect();
        self.scanned = 0;
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        classify(line)
    }

    /// Flush an unterminated trailing line at end of stream.
    ///
    /// Returns [`LineState::Accumulating`] when nothing is buffered.
    pub fn finish(&mut self) -> LineState {
        self.scanned = 0;
        if self.pending.is_empty() {
            return LineState::Accumulating;
        }
        let mut line = std::mem::take(&mut self.pending);
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        classify(line)
    }
}

/// Strip the `data: ` prefix from a line, if present.
pub fn extract_payload(line: &[u8]) -> Option<&[u8]> {
    line.strip_prefix(DATA_PREFIX)
}

fn classify(line: Vec<u8>) -> LineState {
    match extract_payload(&line) {
        Some(payload) => LineState::PayloadExtracted(payload.to_vec()),
        None => LineState::LineComplete(line),
    }
}
