//! Wire format encoding and decoding.
//!
//! A message is a sequence of one or more parts. Every part is preceded by
//! a 5-byte header:
//! ```text
//! ┌───────┬──────────┐
//! │ Flags │ Length   │
//! │ 1 byte│ 4 bytes  │
//! │       │ uint32 BE│
//! └───────┴──────────┘
//! ```
//!
//! The `MORE` flag is set on every part except the last one of a message.

use crate::error::{Result, ZrpcError};

/// Part header size in bytes (fixed, exactly 5).
pub const HEADER_SIZE: usize = 5;

/// Default maximum size of a single part (256 MiB).
pub const DEFAULT_MAX_PART_SIZE: u32 = 256 * 1024 * 1024;

/// Default maximum number of parts in one message.
pub const DEFAULT_MAX_PARTS: usize = 64;

/// Flag constants for part headers.
pub mod flags {
    /// More parts of the same message follow.
    pub const MORE: u8 = 0b0000_0001;

    /// Reserved bits mask (bits 1-7).
    pub const RESERVED_MASK: u8 = 0b1111_1110;

    /// Check if a specific flag is set.
    #[inline]
    pub fn has_flag(flags: u8, flag: u8) -> bool {
        flags & flag != 0
    }
}

/// Decoded part header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartHeader {
    /// Flags byte (see `flags` module).
    pub flags: u8,
    /// Part payload length in bytes.
    pub length: u32,
}

impl PartHeader {
    /// Create a new header.
    pub fn new(flags: u8, length: u32) -> Self {
        Self { flags, length }
    }

    /// Header for part `index` of a message with `count` parts.
    pub fn for_part(index: usize, count: usize, length: u32) -> Self {
        let flags = if index + 1 < count { flags::MORE } else { 0 };
        Self { flags, length }
    }

    /// Encode header to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use zrpc::protocol::{PartHeader, flags};
    ///
    /// let header = PartHeader::new(flags::MORE, 100);
    /// assert_eq!(header.encode(), [0x01, 0, 0, 0, 100]);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0] = self.flags;
        buf[1..5].copy_from_slice(&self.length.to_be_bytes());
        buf
    }

    /// Decode header from bytes (Big Endian).
    ///
    /// Returns `None` if buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            flags: buf[0],
            length: u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]),
        })
    }

    /// Validate the header for protocol compliance.
    ///
    /// Checks:
    /// - Part length doesn't exceed max
    /// - Reserved flag bits are 0
    pub fn validate(&self, max_part_size: u32) -> Result<()> {
        if self.length > max_part_size {
            return Err(ZrpcError::Protocol(format!(
                "Part size {} exceeds maximum {}",
                self.length, max_part_size
            )));
        }

        if self.flags & flags::RESERVED_MASK != 0 {
            return Err(ZrpcError::Protocol(
                "Reserved flag bits must be 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Check if more parts follow.
    #[inline]
    pub fn has_more(&self) -> bool {
        flags::has_flag(self.flags, flags::MORE)
    }
}
