//! Bounded line extraction for socket sessions.
//!
//! Every session protocol in the system is newline-delimited, and every
//! session must survive hostile input: a peer that never sends `\n` must not
//! grow memory without bound. The accumulator keeps at most `limit` bytes of
//! the current partial line and silently discards the excess until the next
//! newline.

/// Accumulates raw socket bytes and yields complete lines.
pub struct LineAccumulator {
    buf: Vec<u8>,
    limit: usize,
}

impl LineAccumulator {
    /// `limit` caps the retained length of a partial line.
    pub fn new(limit: usize) -> Self {
        LineAccumulator {
            buf: Vec::new(),
            limit,
        }
    }

    /// Feed a chunk; returns every line completed by it, `\n` removed.
    ///
    /// Trailing `\r` is kept; protocol layers strip it where it matters
    /// (message sanitization, IRC parsing).
    pub fn extend(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        let mut lines = Vec::new();
        for &byte in bytes {
            if byte == b'\n' {
                lines.push(std::mem::take(&mut self.buf));
            } else if self.buf.len() < self.limit {
                self.buf.push(byte);
            }
        }
        lines
    }

    /// Bytes of the incomplete trailing line.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}
