//! # zrpc
//!
//! Lightweight RPC over framed message sockets.
//!
//! A [`Server`] owns a registry of named functions and answers one call at a
//! time; a [`Client`] invokes any name and gets back the value, the remote
//! failure (kind, message and trace), or `MethodNotImplemented`. A
//! [`Master`]/[`Worker`] pair offers the same calls fire-and-forget.
//!
//! ## Architecture
//!
//! - **Transport**: request/reply and push/pull endpoints over `tcp://`,
//!   `ipc://` or `inproc://`, each message a sequence of length-prefixed parts
//! - **Protocol**: a call is three parts (raw method name, encoded positional
//!   args, encoded keyword args); a reply is one encoded `{status, result}` map
//! - **Codec**: MsgPack by default, JSON available
//!
//! ## Example
//!
//! ```no_run
//! use zrpc::{CallArgs, Client, HandlerError, Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::builder("tcp://127.0.0.1:4242")
//!         .function("fail", |_args: CallArgs| async move {
//!             Err(HandlerError::new("ValueError", "boom"))
//!         })
//!         .bind()
//!         .await?;
//!     server.spawn();
//!
//!     let mut client = Client::connect("tcp://127.0.0.1:4242").await?;
//!     assert_eq!(client.echo("hi").await?, "hi");
//!     assert!(client.call("fail", CallArgs::new()).await.is_err());
//!     client.kill_server().await?;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod transport;

mod client;
mod server;
mod worker;
mod writer;

pub use client::Client;
pub use codec::{Codec, JsonCodec, MsgPackCodec};
pub use config::{EndpointConfig, EndpointKind, Role, TransportConfig};
pub use error::{Result, ZrpcError};
pub use handler::{CallArgs, HandlerError, MethodDoc, MethodRegistry, RegistryHandle};
pub use protocol::RemoteFailure;
pub use server::{Runner, Server, ServerBuilder, TokioRunner};
pub use serde_json::Value;
pub use transport::{Address, Endpoint};
pub use worker::{Master, Worker, WorkerBuilder};
