//! Line framing for REPL communication.
//!
//! The REPL protocol is newline-delimited text. Incoming bytes arrive in
//! arbitrary chunks from the serial driver; the framer accumulates them,
//! strips carriage returns, and yields each `\n`-terminated line in arrival
//! order. The buffer is bounded: when a chatty or misbehaving device
//! outruns the host, the oldest bytes are discarded and the newest kept.

use bytes::{Buf, BytesMut};

/// Default cap on buffered, not-yet-framed bytes.
pub const DEFAULT_MAX_BUFFER: usize = 100_000;

/// Command terminator expected by the REPL.
pub const COMMAND_TERMINATOR: u8 = b'\r';

/// A framer that turns raw serial bytes into discrete text lines.
///
/// - Accumulates received bytes until a complete line is found
/// - Decodes lossily: invalid UTF-8 becomes replacement characters
/// - Strips all `\r` characters before framing
/// - Truncates from the front when the buffer exceeds its cap
#[derive(Debug)]
pub struct LineFramer {
    /// Buffer for accumulated, decoded text (valid UTF-8, no `\r`).
    buffer: BytesMut,
    /// Maximum number of buffered bytes.
    max_buffer: usize,
    /// Total bytes dropped by front truncation since creation.
    truncated: u64,
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl LineFramer {
    /// Create a framer with the default buffer cap.
    pub fn new() -> Self {
        Self::with_max_buffer(DEFAULT_MAX_BUFFER)
    }

    /// Create a framer with an explicit buffer cap.
    pub fn with_max_buffer(max_buffer: usize) -> Self {
        LineFramer {
            buffer: BytesMut::new(),
            max_buffer,
            truncated: 0,
        }
    }

    /// Add received raw bytes to the buffer.
    ///
    /// The chunk is decoded lossily, carriage returns are removed, and the
    /// buffer is re-bounded afterwards (newest bytes win).
    pub fn push(&mut self, data: &[u8]) {
        let decoded = String::from_utf8_lossy(data);
        for byte in decoded.as_bytes() {
            if *byte != b'\r' {
                self.buffer.extend_from_slice(&[*byte]);
            }
        }

        if self.buffer.len() > self.max_buffer {
            let excess = self.buffer.len() - self.max_buffer;
            self.buffer.advance(excess);
            self.truncated += excess as u64;
            log::debug!("framer buffer overflow, dropped {} oldest bytes", excess);
        }
    }

    /// Try to extract the next complete line from the buffer.
    ///
    /// Returns `Some(line)` without its `\n` terminator, or `None` if no
    /// complete line is buffered yet. The trailing partial line (if any)
    /// stays buffered.
    pub fn pop_line(&mut self) -> Option<String> {
        let end = self.buffer.iter().position(|&b| b == b'\n')?;
        let line_data = self.buffer.split_to(end);
        self.buffer.advance(1); // the newline itself
        Some(String::from_utf8_lossy(&line_data).to_string())
    }

    /// Extract every currently complete line, in arrival order.
    pub fn drain_lines(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(line) = self.pop_line() {
            lines.push(line);
        }
        lines
    }

    /// Take the trailing partial line, if any.
    ///
    /// Used on teardown to surface whatever the device emitted without a
    /// final newline. Leaves the buffer empty.
    pub fn flush_partial(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = self.buffer.split();
        Some(String::from_utf8_lossy(&rest).to_string())
    }

    /// Get the number of buffered (unframed) bytes.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Total bytes dropped to the overflow bound so far.
    pub fn truncated_bytes(&self) -> u64 {
        self.truncated
    }

    /// Clear the buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

/// Encode a command expression for transmission.
///
/// Appends the carriage-return terminator the REPL expects.
pub fn encode_command(expr: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(expr.len() + 1);
    buf.extend_from_slice(expr.as_bytes());
    buf.push(COMMAND_TERMINATOR);
    buf
}
