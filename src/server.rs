//! Request-reply server and its builder.
//!
//! The [`ServerBuilder`] collects the address, functions and options; the
//! [`Server`] runs the dispatch loop:
//!
//! 1. receive one call frame
//! 2. `kill_server`: acknowledge, close the endpoint, stop
//! 3. unknown method: reply `status = null`
//! 4. otherwise run the handler and reply `status = true` with the value
//!    or `status = false` with the marshalled failure
//!
//! Every request gets exactly one reply. A malformed frame stops the loop,
//! since the request-reply alternation cannot be recovered after it.
//!
//! # Example
//!
//! ```no_run
//! use zrpc::{CallArgs, HandlerError, Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = Server::builder("tcp://127.0.0.1:4242")
//!         .function("shout", |args: CallArgs| async move {
//!             let text: String = args.required(0, "text")?;
//!             Ok::<_, HandlerError>(text.to_uppercase().into())
//!         })
//!         .bind()
//!         .await?;
//!
//!     server.serve_forever().await?;
//!     Ok(())
//! }
//! ```

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::codec::{Codec, MsgPackCodec};
use crate::config::{EndpointConfig, Role, TransportConfig};
use crate::dispatch::{Dispatch, Dispatcher};
use crate::error::{Result, ZrpcError};
use crate::handler::{
    BoxFuture, CallArgs, Handler, HandlerError, HandlerResult, MethodDoc, MethodRegistry,
    RegistryHandle,
};
use crate::protocol::{Multipart, RemoteFailure, ResponseEnvelope};
use crate::transport::{Address, Endpoint};

/// Capability to run a serve loop somewhere other than the caller.
pub trait Runner: Send + Sync + 'static {
    /// Start `task` and return without waiting for it.
    fn run(&self, task: BoxFuture<'static, ()>);
}

/// Runs the loop as a tokio task.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioRunner;

impl Runner for TokioRunner {
    fn run(&self, task: BoxFuture<'static, ()>) {
        tokio::spawn(task);
    }
}

impl<F> Runner for F
where
    F: Fn(BoxFuture<'static, ()>) + Send + Sync + 'static,
{
    fn run(&self, task: BoxFuture<'static, ()>) {
        self(task)
    }
}

/// Builder for configuring and binding a [`Server`].
pub struct ServerBuilder<C: Codec = MsgPackCodec> {
    address: String,
    config: EndpointConfig,
    registry: MethodRegistry,
    runner: Option<Arc<dyn Runner>>,
    call_timeout: Option<Duration>,
    _codec: PhantomData<C>,
}

impl ServerBuilder<MsgPackCodec> {
    /// Start a builder for `address`, binding by default.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            config: EndpointConfig::reply(),
            registry: MethodRegistry::for_server(),
            runner: None,
            call_timeout: None,
            _codec: PhantomData,
        }
    }
}

impl<C: Codec> ServerBuilder<C> {
    /// Switch the payload codec. Clients must use the same one.
    pub fn codec<D: Codec>(self) -> ServerBuilder<D> {
        ServerBuilder {
            address: self.address,
            config: self.config,
            registry: self.registry,
            runner: self.runner,
            call_timeout: self.call_timeout,
            _codec: PhantomData,
        }
    }

    /// Bind (default) or connect.
    pub fn role(mut self, role: Role) -> Self {
        self.config.role = role;
        self
    }

    /// Transport tuning.
    pub fn transport(mut self, transport: TransportConfig) -> Self {
        self.config.transport = transport;
        self
    }

    /// Where [`Server::start`] runs the loop.
    pub fn runner(mut self, runner: impl Runner) -> Self {
        self.runner = Some(Arc::new(runner));
        self
    }

    /// Fail calls that run longer than `timeout` with kind `Timeout`.
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    /// Replace the seeded registry.
    pub fn registry(mut self, registry: MethodRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Register a closure over raw [`CallArgs`].
    pub fn function<F, Fut>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(CallArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.registry.register_fn(name, handler);
        self
    }

    /// Register a closure whose positional arguments deserialize into `T`.
    pub fn typed_function<F, T, R, Fut>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        Fut: Future<Output = std::result::Result<R, HandlerError>> + Send + 'static,
    {
        self.registry.register_typed(name, handler);
        self
    }

    /// Register a handler with documentation.
    pub fn documented(mut self, name: &str, doc: MethodDoc, handler: impl Handler) -> Self {
        self.registry.register_with_doc(name, doc, handler);
        self
    }

    /// Open the endpoint.
    pub async fn bind(self) -> Result<Server<C>> {
        let address: Address = self.address.parse()?;
        let endpoint = Endpoint::open(&self.config, &address).await?;
        tracing::info!(address = %endpoint.bound_address(), "server listening");

        let registry = RegistryHandle::new(self.registry);
        Ok(Server {
            endpoint,
            dispatcher: Dispatcher::new(registry, self.call_timeout),
            runner: self.runner,
        })
    }
}

/// A bound request-reply server.
pub struct Server<C: Codec = MsgPackCodec> {
    endpoint: Endpoint,
    dispatcher: Dispatcher<C>,
    runner: Option<Arc<dyn Runner>>,
}

impl Server<MsgPackCodec> {
    /// Create a new server builder.
    pub fn builder(address: impl Into<String>) -> ServerBuilder<MsgPackCodec> {
        ServerBuilder::new(address)
    }
}

impl<C: Codec> Server<C> {
    /// Shared registry; changes apply to the next call.
    pub fn registry(&self) -> RegistryHandle {
        self.dispatcher.registry().clone()
    }

    /// Register a closure while the server exists.
    pub fn add_function<F, Fut>(&self, name: &str, handler: F)
    where
        F: Fn(CallArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.dispatcher.registry().add_function(name, handler);
    }

    /// Remove a function; absent names are ignored.
    pub fn remove_function(&self, name: &str) {
        self.dispatcher.registry().remove_function(name);
    }

    /// Address in use (with the real port for `tcp://...:0`).
    pub fn bound_address(&self) -> &Address {
        self.endpoint.bound_address()
    }

    /// Serve until `kill_server` arrives or the endpoint fails.
    pub async fn serve_forever(&mut self) -> Result<()> {
        loop {
            let message = self.endpoint.recv_multipart().await?;

            let dispatch = match self.dispatcher.dispatch(message).await {
                Ok(dispatch) => dispatch,
                Err(e) => {
                    tracing::error!(error = %e, "malformed request, stopping server");
                    self.endpoint.close().await?;
                    return Err(e);
                }
            };

            let envelope = match dispatch {
                Dispatch::Shutdown => {
                    tracing::info!("kill_server received, shutting down");
                    self.reply(ResponseEnvelope::kill_ack()).await?;
                    self.endpoint.close().await?;
                    return Ok(());
                }
                Dispatch::Unknown(method) => {
                    tracing::debug!(%method, "unknown method");
                    ResponseEnvelope::unknown_method()
                }
                Dispatch::Returned { method, value } => {
                    tracing::debug!(%method, "call succeeded");
                    ResponseEnvelope::success(value)
                }
                Dispatch::Failed { method, failure } => {
                    tracing::error!(%method, error = %failure, trace = %failure.trace, "handler failed");
                    ResponseEnvelope::failure(&failure)
                }
            };

            self.reply(envelope).await?;
        }
    }

    /// Run the loop: handed to the runner if one is configured (returns
    /// immediately), otherwise right here until shutdown.
    pub async fn start(mut self) -> Result<()> {
        match self.runner.take() {
            Some(runner) => {
                runner.run(Box::pin(async move {
                    if let Err(e) = self.serve_forever().await {
                        tracing::error!(error = %e, "server loop ended with error");
                    }
                }));
                Ok(())
            }
            None => self.serve_forever().await,
        }
    }

    /// Run the loop on a tokio task and return its handle.
    pub fn spawn(mut self) -> JoinHandle<Result<()>> {
        tokio::spawn(async move { self.serve_forever().await })
    }

    /// Close the endpoint without waiting for `kill_server`.
    pub async fn close(&mut self) -> Result<()> {
        self.endpoint.close().await
    }

    async fn reply(&mut self, envelope: ResponseEnvelope) -> Result<()> {
        let bytes = match C::encode(&envelope) {
            Ok(bytes) => bytes,
            Err(e) => {
                // The reply is still owed; send the encoding problem instead.
                tracing::error!(error = %e, "response not encodable");
                let failure = RemoteFailure::new("SerializationError", e.to_string(), e.to_string());
                C::encode(&ResponseEnvelope::failure(&failure))?
            }
        };
        match self.endpoint.send_multipart(Multipart::from(vec![bytes.into()])).await {
            Err(ZrpcError::Protocol(reason)) => {
                // Too large for the transport; the client still gets a reply.
                tracing::error!(%reason, "response exceeds transport limits");
                let failure = RemoteFailure::new("SerializationError", reason.clone(), reason);
                let bytes = C::encode(&ResponseEnvelope::failure(&failure))?;
                self.endpoint.send_multipart(Multipart::from(vec![bytes.into()])).await
            }
            sent => sent,
        }
    }
}
