//! Protocol module - wire format, framing, and message types.
//!
//! Two layers live here:
//! - transport framing: 5-byte part headers and [`MessageBuffer`] reassembly
//!   of multipart messages from a byte stream
//! - RPC messages on top of it: [`CallFrame`] (name + encoded args + encoded
//!   kwargs) and [`ResponseEnvelope`] (status + result)

mod call;
mod envelope;
mod message;
mod message_buffer;
mod wire_format;

pub use call::{CallFrame, CALL_FRAME_PARTS, KILL_SERVER, RESERVED_PREFIX, SUPPRESS_KEYWORD};
pub use envelope::{ErrorValue, Outcome, RemoteFailure, ResponseEnvelope};
pub use message::Multipart;
pub use message_buffer::MessageBuffer;
pub use wire_format::{flags, PartHeader, DEFAULT_MAX_PARTS, DEFAULT_MAX_PART_SIZE, HEADER_SIZE};
