//! Line buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management.
//! Implements a small state machine for newline-delimited records:
//! - `Collecting`: bytes belong to the current record
//! - `Discarding`: the current record grew past the limit and is dropped
//!   up to (and including) the next separator
//!
//! # Example
//!
//! ```
//! use can_bridge::protocol::{LineBuffer, Line};
//!
//! let mut buffer = LineBuffer::new();
//!
//! assert!(buffer.push(b"{\"ID\":1,").is_empty());
//! let lines = buffer.push(b"\"Data\":[]}\n");
//!
//! assert_eq!(lines.len(), 1);
//! assert!(matches!(&lines[0], Line::Record(r) if &r[..] == b"{\"ID\":1,\"Data\":[]}"));
//! ```

use bytes::{Bytes, BytesMut};

use super::wire_format::{trim_line, DEFAULT_MAX_RECORD_LEN, RECORD_SEPARATOR};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Collecting,
    /// Skipping an oversized record; `dropped` counts bytes thrown away.
    Discarding { dropped: usize },
}

/// Output of [`LineBuffer::push`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    /// A complete record without its terminator.
    Record(Bytes),
    /// A record exceeded the limit and was dropped; holds its length.
    Oversized(usize),
}

/// Buffer for accumulating incoming bytes and extracting complete records.
pub struct LineBuffer {
    buffer: BytesMut,
    state: State,
    max_record_len: usize,
}

impl LineBuffer {
    /// Create a new line buffer with the default record limit (4 KiB).
    pub fn new() -> Self {
        Self::with_max_record_len(DEFAULT_MAX_RECORD_LEN)
    }

    /// Create a new line buffer with a custom record limit.
    pub fn with_max_record_len(max_record_len: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(max_record_len.min(64 * 1024)),
            state: State::Collecting,
            max_record_len,
        }
    }

    /// Push data into the buffer and extract all complete records.
    ///
    /// Blank lines are skipped. Partial data is kept for the next push.
    pub fn push(&mut self, data: &[u8]) -> Vec<Line> {
        self.buffer.extend_from_slice(data);

        let mut lines = Vec::new();
        while let Some(line) = self.try_extract_one() {
            if let Line::Record(record) = &line {
                if record.is_empty() {
                    continue;
                }
            }
            lines.push(line);
        }
        lines
    }

    fn try_extract_one(&mut self) -> Option<Line> {
        let separator = self.buffer.iter().position(|&b| b == RECORD_SEPARATOR);

        match (self.state, separator) {
            (State::Collecting, Some(pos)) => {
                let raw = self.buffer.split_to(pos + 1).freeze();
                let len = trim_line(&raw).len();

                if len > self.max_record_len {
                    return Some(Line::Oversized(len));
                }
                Some(Line::Record(raw.slice(..len)))
            }
            (State::Collecting, None) => {
                if self.buffer.len() > self.max_record_len {
                    let dropped = self.buffer.len();
                    self.buffer.clear();
                    self.state = State::Discarding { dropped };
                }
                None
            }
            (State::Discarding { dropped }, Some(pos)) => {
                let _ = self.buffer.split_to(pos + 1);
                self.state = State::Collecting;
                Some(Line::Oversized(dropped + pos))
            }
            (State::Discarding { dropped }, None) => {
                let more = self.buffer.len();
                self.buffer.clear();
                self.state = State::Discarding {
                    dropped: dropped + more,
                };
                None
            }
        }
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::Collecting;
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match self.state {
            State::Collecting => "Collecting",
            State::Discarding { .. } => "Discarding",
        }
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}
