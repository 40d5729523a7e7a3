//! Message buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management.
//! Implements a state machine for handling fragmented parts:
//! - `WaitingForHeader`: Need at least 5 bytes
//! - `WaitingForPayload`: Header parsed, need N more payload bytes
//!
//! Completed parts are collected until one arrives without the `MORE`
//! flag, at which point the whole [`Multipart`] is emitted.
//!
//! # Example
//!
//! ```
//! use zrpc::protocol::{MessageBuffer, Multipart};
//! use bytes::Bytes;
//!
//! let msg = Multipart::from(vec![Bytes::from_static(b"ping")]);
//! let bytes = msg.encode();
//!
//! let mut buffer = MessageBuffer::new();
//! assert!(buffer.push(&bytes[..3]).unwrap().is_empty());
//! let messages = buffer.push(&bytes[3..]).unwrap();
//! assert_eq!(messages, vec![msg]);
//! ```

use bytes::{Bytes, BytesMut};

use super::message::Multipart;
use super::wire_format::{PartHeader, DEFAULT_MAX_PARTS, DEFAULT_MAX_PART_SIZE, HEADER_SIZE};
use crate::error::{Result, ZrpcError};

/// State machine for part parsing.
#[derive(Debug, Clone)]
enum State {
    /// Waiting for complete header (need 5 bytes).
    WaitingForHeader,
    /// Header parsed, waiting for payload bytes.
    WaitingForPayload { header: PartHeader },
}

/// Buffer for accumulating incoming bytes and extracting complete messages.
pub struct MessageBuffer {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Parts of the message currently being assembled.
    pending: Vec<Bytes>,
    /// Maximum allowed part size.
    max_part_size: u32,
    /// Maximum parts in one message.
    max_parts: usize,
}

impl MessageBuffer {
    /// Create a new message buffer with default settings.
    ///
    /// Default capacity: 64KB, max part: 256 MiB, max parts: 64.
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_PART_SIZE, DEFAULT_MAX_PARTS)
    }

    /// Create a new message buffer with custom max part size.
    pub fn with_max_part(max_part_size: u32) -> Self {
        Self::with_limits(max_part_size, DEFAULT_MAX_PARTS)
    }

    /// Create a new message buffer with custom part size and part count
    /// limits.
    pub fn with_limits(max_part_size: u32, max_parts: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            state: State::WaitingForHeader,
            pending: Vec::new(),
            max_part_size,
            max_parts: max_parts.max(1),
        }
    }

    /// Push data into the buffer and extract all complete messages.
    ///
    /// Partial data is kept for the next push.
    ///
    /// # Errors
    ///
    /// Returns a protocol error if a part header is invalid (oversized part,
    /// reserved flag bits set) or a message runs past the part limit. The
    /// buffer should be discarded afterwards.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Multipart>> {
        self.buffer.extend_from_slice(data);

        let mut messages = Vec::new();

        while let Some(part) = self.try_extract_part()? {
            let (header, payload) = part;
            if self.pending.len() == self.max_parts {
                self.pending.clear();
                return Err(ZrpcError::Protocol(format!(
                    "Message exceeds maximum of {} parts",
                    self.max_parts
                )));
            }
            self.pending.push(payload);
            if !header.has_more() {
                messages.push(Multipart::from(std::mem::take(&mut self.pending)));
            }
        }

        Ok(messages)
    }

    /// Try to extract a single part from the buffer.
    fn try_extract_part(&mut self) -> Result<Option<(PartHeader, Bytes)>> {
        match &self.state {
            State::WaitingForHeader => {
                let header = match PartHeader::decode(&self.buffer) {
                    Some(h) => h,
                    None => return Ok(None),
                };

                header.validate(self.max_part_size)?;

                let _ = self.buffer.split_to(HEADER_SIZE);

                if header.length == 0 {
                    return Ok(Some((header, Bytes::new())));
                }

                self.state = State::WaitingForPayload { header };

                self.try_extract_part()
            }

            State::WaitingForPayload { header } => {
                let remaining = header.length as usize;

                if self.buffer.len() < remaining {
                    return Ok(None);
                }

                let payload = self.buffer.split_to(remaining).freeze();
                let header = *header;

                self.state = State::WaitingForHeader;

                Ok(Some((header, payload)))
            }
        }
    }

    /// Get the number of buffered bytes not yet consumed.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Whether a message is partially assembled (some parts seen, last part not yet).
    pub fn has_partial_message(&self) -> bool {
        !self.pending.is_empty() || !self.buffer.is_empty()
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.pending.clear();
        self.state = State::WaitingForHeader;
    }
}

impl Default for MessageBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::flags;

    fn message(parts: &[&'static [u8]]) -> Multipart {
        Multipart::from(parts.iter().map(|p| Bytes::from_static(*p)).collect::<Vec<_>>())
    }

    #[test]
    fn test_single_part_message() {
        let msg = message(&[b"hello"]);
        let mut buffer = MessageBuffer::new();

        let out = buffer.push(&msg.encode()).unwrap();
        assert_eq!(out, vec![msg]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_three_part_call_shape() {
        let msg = message(&[b"echo", b"\x91\xa2hi", b"\x80"]);
        let mut buffer = MessageBuffer::new();

        let out = buffer.push(&msg.encode()).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].len(), 3);
        assert_eq!(out[0].parts()[0].as_ref(), b"echo");
    }

    #[test]
    fn test_multiple_messages_in_one_push() {
        let a = message(&[b"a", b"b"]);
        let b = message(&[b"c"]);
        let mut bytes = a.encode();
        bytes.extend(b.encode());

        let mut buffer = MessageBuffer::new();
        let out = buffer.push(&bytes).unwrap();
        assert_eq!(out, vec![a, b]);
    }

    #[test]
    fn test_byte_by_byte() {
        let msg = message(&[b"name", b"", b"kwargs"]);
        let bytes = msg.encode();
        let mut buffer = MessageBuffer::new();

        let mut out = Vec::new();
        for byte in &bytes {
            out.extend(buffer.push(std::slice::from_ref(byte)).unwrap());
        }

        assert_eq!(out, vec![msg]);
        assert!(!buffer.has_partial_message());
    }

    #[test]
    fn test_partial_message_waits_for_last_part() {
        let msg = message(&[b"first", b"second"]);
        let bytes = msg.encode();
        let split = HEADER_SIZE + 5;

        let mut buffer = MessageBuffer::new();
        assert!(buffer.push(&bytes[..split]).unwrap().is_empty());
        assert!(buffer.has_partial_message());

        let out = buffer.push(&bytes[split..]).unwrap();
        assert_eq!(out, vec![msg]);
    }

    #[test]
    fn test_empty_parts() {
        let msg = message(&[b"", b""]);
        let mut buffer = MessageBuffer::new();
        let out = buffer.push(&msg.encode()).unwrap();
        assert_eq!(out[0].len(), 2);
        assert_eq!(out[0].payload_len(), 0);
    }

    #[test]
    fn test_oversized_part_rejected() {
        let header = PartHeader::new(0, 1024);
        let mut buffer = MessageBuffer::with_max_part(16);

        let result = buffer.push(&header.encode());
        assert!(result.unwrap_err().to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_endless_message_rejected() {
        let more = PartHeader::new(flags::MORE, 0).encode();
        let mut buffer = MessageBuffer::with_limits(16, 8);

        let mut result = Ok(Vec::new());
        for _ in 0..1000 {
            result = buffer.push(&more);
            if result.is_err() {
                break;
            }
        }

        assert!(result.unwrap_err().to_string().contains("maximum of 8 parts"));
        assert!(buffer.pending.is_empty());
    }

    #[test]
    fn test_message_at_part_limit_accepted() {
        let msg = message(&[b"a", b"b", b"c"]);
        let mut buffer = MessageBuffer::with_limits(16, 3);
        assert_eq!(buffer.push(&msg.encode()).unwrap(), vec![msg]);

        let too_many = message(&[b"a", b"b", b"c", b"d"]);
        assert!(buffer.push(&too_many.encode()).is_err());
    }

    #[test]
    fn test_reserved_flags_rejected() {
        let header = PartHeader::new(flags::MORE | 0b0100_0000, 0);
        let mut buffer = MessageBuffer::new();
        assert!(buffer.push(&header.encode()).is_err());
    }

    #[test]
    fn test_clear_resets_state() {
        let msg = message(&[b"abc", b"def"]);
        let bytes = msg.encode();

        let mut buffer = MessageBuffer::new();
        buffer.push(&bytes[..HEADER_SIZE + 3 + 2]).unwrap();
        assert!(buffer.has_partial_message());

        buffer.clear();
        assert!(!buffer.has_partial_message());

        let out = buffer.push(&bytes).unwrap();
        assert_eq!(out, vec![msg]);
    }
}
