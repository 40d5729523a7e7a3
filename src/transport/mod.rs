//! Transport module - framed message sockets.
//!
//! Provides:
//! - [`Address`] - `tcp://`, `ipc://` (unix) and `inproc://` addresses
//! - [`Endpoint`] - request/reply/push/pull socket over any of them
//!
//! Messages are [`Multipart`](crate::protocol::Multipart) values framed with
//! the part headers from [`protocol`](crate::protocol).

mod address;
mod endpoint;
mod socket;

pub use address::Address;
pub use endpoint::{Endpoint, PeerId};
