//! Request-reply client: the call proxy.
//!
//! Each call is one round trip: encode the call frame, send it, wait for the
//! single reply envelope, then return the value, or raise the remote failure
//! / `MethodNotImplemented`. With suppression (`_suppress=true` keyword, or
//! [`Client::call_suppressed`]) both become a `null` return instead.
//!
//! Calls take `&mut self`: one client is one endpoint with strict
//! alternation, so concurrent callers each need their own client.
//!
//! # Example
//!
//! ```no_run
//! use zrpc::{CallArgs, Client};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = Client::connect("tcp://127.0.0.1:4242").await?;
//!
//!     let hi = client.echo("hi").await?;
//!     assert_eq!(hi, "hi");
//!
//!     // Unknown methods fail unless suppressed
//!     let nothing = client
//!         .call("nonexistent", CallArgs::new().kwarg("_suppress", true))
//!         .await?;
//!     assert!(nothing.is_null());
//!     Ok(())
//! }
//! ```

use std::marker::PhantomData;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::codec::{Codec, MsgPackCodec};
use crate::config::EndpointConfig;
use crate::error::{Result, ZrpcError};
use crate::handler::{CallArgs, DOCUMENTATION, ECHO, LIST_FUNCTIONS};
use crate::protocol::{
    CallFrame, Multipart, Outcome, ResponseEnvelope, KILL_SERVER, RESERVED_PREFIX,
    SUPPRESS_KEYWORD,
};
use crate::transport::{Address, Endpoint};

/// A connected request-reply client.
pub struct Client<C: Codec = MsgPackCodec> {
    endpoint: Endpoint,
    request_timeout: Option<Duration>,
    _codec: PhantomData<C>,
}

impl Client<MsgPackCodec> {
    /// Connect with default settings and the MsgPack codec.
    pub async fn connect(address: &str) -> Result<Self> {
        Self::with_config(address, EndpointConfig::request()).await
    }
}

impl<C: Codec> Client<C> {
    /// Connect (or bind) as described by `config`.
    pub async fn with_config(address: &str, config: EndpointConfig) -> Result<Self> {
        let address: Address = address.parse()?;
        let endpoint = Endpoint::open(&config, &address).await?;
        tracing::debug!(%address, codec = C::NAME, "client ready");
        Ok(Self {
            endpoint,
            request_timeout: None,
            _codec: PhantomData,
        })
    }

    /// Give up waiting for a reply after `timeout`.
    ///
    /// A timed-out call leaves the reply outstanding, so every later call on
    /// this client fails with a protocol error.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Call `method`.
    ///
    /// A truthy `_suppress` keyword is removed before sending and turns a
    /// remote failure or unknown method into `Value::Null`.
    pub async fn call(&mut self, method: &str, mut args: CallArgs) -> Result<Value> {
        let suppress = args.take_flag(SUPPRESS_KEYWORD);
        self.invoke(method, args, suppress).await
    }

    /// Call `method`, returning `Value::Null` on any remote failure.
    pub async fn call_suppressed(&mut self, method: &str, mut args: CallArgs) -> Result<Value> {
        args.take_flag(SUPPRESS_KEYWORD);
        self.invoke(method, args, true).await
    }

    /// Call `method` and deserialize the result.
    pub async fn call_as<R: DeserializeOwned>(&mut self, method: &str, args: CallArgs) -> Result<R> {
        let value = self.call(method, args).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Names of the functions the server offers.
    pub async fn list_functions(&mut self) -> Result<Vec<String>> {
        self.call_as(LIST_FUNCTIONS, CallArgs::new()).await
    }

    /// Rendered documentation of `func_name`.
    pub async fn documentation(&mut self, func_name: &str) -> Result<String> {
        self.call_as(DOCUMENTATION, CallArgs::new().arg(func_name)).await
    }

    /// Round-trip a value through the server.
    pub async fn echo(&mut self, value: impl Into<Value>) -> Result<Value> {
        self.call(ECHO, CallArgs::new().arg(value)).await
    }

    /// Ask the server to shut down. Do not call again on the same server.
    pub async fn kill_server(&mut self) -> Result<Value> {
        self.call(KILL_SERVER, CallArgs::new()).await
    }

    /// The underlying endpoint.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Close the connection.
    pub async fn close(&mut self) -> Result<()> {
        self.endpoint.close().await
    }

    async fn invoke(&mut self, method: &str, args: CallArgs, suppress: bool) -> Result<Value> {
        if method.starts_with(RESERVED_PREFIX) {
            return Err(ZrpcError::ReservedName(method.to_string()));
        }

        let frame = CallFrame::encode::<C>(method, &args.args, &args.kwargs)?;
        self.endpoint.send_multipart(frame.into_message()).await?;

        let reply = match self.request_timeout {
            Some(limit) => tokio::time::timeout(limit, self.endpoint.recv_multipart())
                .await
                .map_err(|_| ZrpcError::Timeout(limit))??,
            None => self.endpoint.recv_multipart().await?,
        };

        match decode_reply::<C>(reply)?.into_outcome()? {
            Outcome::Success(value) => Ok(value),
            Outcome::UnknownMethod => {
                tracing::warn!(%method, "command does not exist");
                if suppress {
                    Ok(Value::Null)
                } else {
                    Err(ZrpcError::MethodNotImplemented(method.to_string()))
                }
            }
            Outcome::Failed(failure) => {
                tracing::error!(%method, error = %failure, trace = %failure.trace, "remote call failed");
                if suppress {
                    Ok(Value::Null)
                } else {
                    Err(ZrpcError::Remote(failure))
                }
            }
        }
    }
}

fn decode_reply<C: Codec>(reply: Multipart) -> Result<ResponseEnvelope> {
    if reply.len() != 1 {
        return Err(ZrpcError::Protocol(format!(
            "reply must have 1 part, got {}",
            reply.len()
        )));
    }
    C::decode(&reply.parts()[0]).map_err(|e| ZrpcError::undecodable("response envelope", e))
}
