//! Per-connection receive buffer.
//!
//! Each connection slot owns one fixed-size buffer, allocated when the slot
//! is activated and released when it is dropped. Bytes accumulate across
//! reads until a complete NUL-terminated message can be framed, so a message
//! split across several TCP segments is reassembled before parsing.

use crate::protocol::{self, MAX_LINE};

/// Fixed-capacity byte buffer holding not-yet-framed input.
#[derive(Debug)]
pub struct ReceiveBuffer {
    /// Backing storage, never reallocated.
    data: Box<[u8]>,
    /// Number of valid bytes at the front of `data`.
    filled: usize,
}

impl ReceiveBuffer {
    /// Allocate a buffer sized for one wire message.
    pub fn new() -> Self {
        Self::with_capacity(MAX_LINE)
    }

    /// Allocate a buffer of the given capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            filled: 0,
        }
    }

    /// Unfilled tail of the buffer, the target for the next read.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.filled..]
    }

    /// Mark `n` bytes of the spare region as filled.
    pub fn advance(&mut self, n: usize) {
        debug_assert!(self.filled + n <= self.data.len(), "advance past capacity");
        self.filled = (self.filled + n).min(self.data.len());
    }

    /// Valid bytes awaiting framing.
    pub fn filled(&self) -> &[u8] {
        &self.data[..self.filled]
    }

    /// Remove and return the first complete message, terminator stripped.
    ///
    /// Bytes following the message are shifted to the front of the buffer.
    pub fn take_message(&mut self) -> Option<Vec<u8>> {
        let (message, consumed) = protocol::next_message(self.filled())?;
        let message = message.to_vec();

        self.data.copy_within(consumed..self.filled, 0);
        self.filled -= consumed;

        Some(message)
    }

    /// True when no more bytes can be read without framing a message first.
    pub fn is_full(&self) -> bool {
        self.filled == self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    pub fn len(&self) -> usize {
        self.filled
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }
}

impl Default for ReceiveBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(buf: &mut ReceiveBuffer, bytes: &[u8]) {
        buf.spare_mut()[..bytes.len()].copy_from_slice(bytes);
        buf.advance(bytes.len());
    }

    #[test]
    fn test_receive_buffer_basic() {
        let buf = ReceiveBuffer::new();
        assert_eq!(buf.capacity(), MAX_LINE);
        assert!(buf.is_empty());
        assert!(!buf.is_full());
    }

    #[test]
    fn test_split_message_reassembled() {
        let mut buf = ReceiveBuffer::new();

        fill(&mut buf, b"HELLO ");
        assert!(buf.take_message().is_none());
        assert_eq!(buf.len(), 6);

        fill(&mut buf, b"5\0");
        assert_eq!(buf.take_message().as_deref(), Some(&b"HELLO 5"[..]));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_pipelined_messages() {
        let mut buf = ReceiveBuffer::new();
        fill(&mut buf, b"HELLO 5\0HELLO 7\0");

        assert_eq!(buf.take_message().as_deref(), Some(&b"HELLO 5"[..]));
        assert_eq!(buf.filled(), b"HELLO 7\0");
        assert_eq!(buf.take_message().as_deref(), Some(&b"HELLO 7"[..]));
        assert!(buf.take_message().is_none());
    }

    #[test]
    fn test_full_without_terminator() {
        let mut buf = ReceiveBuffer::new();
        fill(&mut buf, &[b'9'; MAX_LINE]);

        assert!(buf.is_full());
        assert!(buf.spare_mut().is_empty());
        assert!(buf.take_message().is_none());
    }
}
