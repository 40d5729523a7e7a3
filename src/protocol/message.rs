//! Multipart message type.
//!
//! Parts are `bytes::Bytes` so payloads cut out of the read buffer are
//! shared, not copied.
//!
//! # Example
//!
//! ```
//! use zrpc::protocol::Multipart;
//! use bytes::Bytes;
//!
//! let msg = Multipart::from(vec![Bytes::from_static(b"echo"), Bytes::from_static(b"\x90")]);
//! assert_eq!(msg.len(), 2);
//! assert_eq!(msg.encode().len(), 5 + 4 + 5 + 1);
//! ```

use bytes::Bytes;

use super::wire_format::{PartHeader, HEADER_SIZE};
use crate::error::{Result, ZrpcError};

/// One complete message: an ordered list of parts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Multipart {
    parts: Vec<Bytes>,
}

impl Multipart {
    /// Create an empty message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a part.
    pub fn push(&mut self, part: impl Into<Bytes>) {
        self.parts.push(part.into());
    }

    /// Number of parts.
    #[inline]
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    /// Whether the message has no parts.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Borrow the parts.
    #[inline]
    pub fn parts(&self) -> &[Bytes] {
        &self.parts
    }

    /// Take the parts.
    pub fn into_parts(self) -> Vec<Bytes> {
        self.parts
    }

    /// Total payload bytes, headers excluded.
    pub fn payload_len(&self) -> usize {
        self.parts.iter().map(Bytes::len).sum()
    }

    /// Check the message can be framed within the given limits.
    ///
    /// A message needs at least one part, at most `max_parts` parts, and no
    /// part longer than `max_part_size` (itself below 4 GiB).
    pub fn check_limits(&self, max_part_size: u32, max_parts: usize) -> Result<()> {
        if self.parts.is_empty() {
            return Err(ZrpcError::Protocol("message has no parts".to_string()));
        }
        if self.parts.len() > max_parts {
            return Err(ZrpcError::Protocol(format!(
                "Message has {} parts, maximum is {}",
                self.parts.len(),
                max_parts
            )));
        }
        if let Some(part) = self.parts.iter().find(|p| p.len() > max_part_size as usize) {
            return Err(ZrpcError::Protocol(format!(
                "Part size {} exceeds maximum {}",
                part.len(),
                max_part_size
            )));
        }
        Ok(())
    }

    /// Encoded header for each part, `MORE` set on all but the last.
    ///
    /// Lengths saturate at `u32::MAX`; [`Multipart::check_limits`] rejects
    /// such parts before they reach a writer.
    pub fn headers(&self) -> Vec<[u8; HEADER_SIZE]> {
        let count = self.parts.len();
        self.parts
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let length = u32::try_from(p.len()).unwrap_or(u32::MAX);
                PartHeader::for_part(i, count, length).encode()
            })
            .collect()
    }

    /// Encode the whole message into one contiguous buffer.
    ///
    /// The writer task uses vectored writes instead; this is for tests and
    /// for callers that want the raw bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.parts.len() * HEADER_SIZE + self.payload_len());
        for (header, part) in self.headers().iter().zip(&self.parts) {
            buf.extend_from_slice(header);
            buf.extend_from_slice(part);
        }
        buf
    }
}

impl From<Vec<Bytes>> for Multipart {
    fn from(parts: Vec<Bytes>) -> Self {
        Self { parts }
    }
}
