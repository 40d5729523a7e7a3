//! Fire-and-forget work queue: [`Master`] pushes calls, [`Worker`] pulls and
//! runs them.
//!
//! Nothing travels back. The master learns neither results nor failures; the
//! worker logs failures with their trace and drops calls to unknown
//! methods. `kill_server` stops the worker without acknowledgment.
//!
//! ```text
//! Master (push, connect) ──► call frames ──► Worker (pull, bind)
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
use crate::handler::{CallArgs, HandlerError, HandlerResult, MethodRegistry, RegistryHandle};
use crate::protocol::{CallFrame, KILL_SERVER, RESERVED_PREFIX};
use crate::server::Runner;
use crate::transport::{Address, Endpoint};

/// Builder for configuring and binding a [`Worker`].
pub struct WorkerBuilder<C: Codec = MsgPackCodec> {
    address: String,
    config: EndpointConfig,
    registry: MethodRegistry,
    runner: Option<Arc<dyn Runner>>,
    call_timeout: Option<Duration>,
    _codec: PhantomData<C>,
}

impl WorkerBuilder<MsgPackCodec> {
    /// Start a builder for `address`, binding by default.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            config: EndpointConfig::pull(),
            registry: MethodRegistry::new(),
            runner: None,
            call_timeout: None,
            _codec: PhantomData,
        }
    }
}

impl<C: Codec> WorkerBuilder<C> {
    /// Switch the payload codec. Masters must use the same one.
    pub fn codec<D: Codec>(self) -> WorkerBuilder<D> {
        WorkerBuilder {
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

    /// Where [`Worker::start`] runs the loop.
    pub fn runner(mut self, runner: impl Runner) -> Self {
        self.runner = Some(Arc::new(runner));
        self
    }

    /// Abandon calls that run longer than `timeout`.
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
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

    /// Open the endpoint.
    pub async fn bind(self) -> Result<Worker<C>> {
        let address: Address = self.address.parse()?;
        let endpoint = Endpoint::open(&self.config, &address).await?;
        tracing::info!(address = %endpoint.bound_address(), "worker listening");

        Ok(Worker {
            endpoint,
            dispatcher: Dispatcher::new(RegistryHandle::new(self.registry), self.call_timeout),
            runner: self.runner,
        })
    }
}

/// Pulls call frames and runs them, never replying.
pub struct Worker<C: Codec = MsgPackCodec> {
    endpoint: Endpoint,
    dispatcher: Dispatcher<C>,
    runner: Option<Arc<dyn Runner>>,
}

impl Worker<MsgPackCodec> {
    /// Create a new worker builder.
    pub fn builder(address: impl Into<String>) -> WorkerBuilder<MsgPackCodec> {
        WorkerBuilder::new(address)
    }
}

impl<C: Codec> Worker<C> {
    /// Shared registry; changes apply to the next call.
    pub fn registry(&self) -> RegistryHandle {
        self.dispatcher.registry().clone()
    }

    /// Address in use.
    pub fn bound_address(&self) -> &Address {
        self.endpoint.bound_address()
    }

    /// Run calls until `kill_server` arrives or the endpoint fails.
    ///
    /// Malformed frames are logged and skipped: with no reply owed there is
    /// no alternation to lose.
    pub async fn serve_forever(&mut self) -> Result<()> {
        loop {
            let message = self.endpoint.recv_multipart().await?;

            match self.dispatcher.dispatch(message).await {
                Err(e) => {
                    tracing::error!(error = %e, "discarding malformed call frame");
                }
                Ok(Dispatch::Shutdown) => {
                    tracing::info!("kill_server received, shutting down");
                    self.endpoint.close().await?;
                    return Ok(());
                }
                Ok(Dispatch::Unknown(method)) => {
                    tracing::debug!(%method, "discarding call to unknown method");
                }
                Ok(Dispatch::Returned { method, value }) => {
                    tracing::debug!(%method, result = %value, "call completed");
                }
                Ok(Dispatch::Failed { method, failure }) => {
                    tracing::error!(%method, error = %failure, trace = %failure.trace, "call failed");
                }
            }
        }
    }

    /// Run the loop: on the runner if configured, otherwise right here.
    pub async fn start(mut self) -> Result<()> {
        match self.runner.take() {
            Some(runner) => {
                runner.run(Box::pin(async move {
                    if let Err(e) = self.serve_forever().await {
                        tracing::error!(error = %e, "worker loop ended with error");
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
}

/// Pushes call frames to workers without waiting for anything back.
pub struct Master<C: Codec = MsgPackCodec> {
    endpoint: Endpoint,
    _codec: PhantomData<C>,
}

impl Master<MsgPackCodec> {
    /// Connect with default settings and the MsgPack codec.
    pub async fn connect(address: &str) -> Result<Self> {
        Self::with_config(address, EndpointConfig::push()).await
    }
}

impl<C: Codec> Master<C> {
    /// Connect (or bind) as described by `config`.
    pub async fn with_config(address: &str, config: EndpointConfig) -> Result<Self> {
        let address: Address = address.parse()?;
        let endpoint = Endpoint::open(&config, &address).await?;
        tracing::debug!(%address, codec = C::NAME, "master ready");
        Ok(Self {
            endpoint,
            _codec: PhantomData,
        })
    }

    /// Queue a call. Returns as soon as it is handed to the transport.
    pub async fn call(&mut self, method: &str, args: CallArgs) -> Result<()> {
        if method.starts_with(RESERVED_PREFIX) {
            return Err(ZrpcError::ReservedName(method.to_string()));
        }
        self.push(method, args).await
    }

    /// Tell the worker to stop.
    pub async fn kill_worker(&mut self) -> Result<()> {
        self.push(KILL_SERVER, CallArgs::new()).await
    }

    /// The underlying endpoint.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Flush queued calls and close.
    pub async fn close(&mut self) -> Result<()> {
        self.endpoint.close().await
    }

    async fn push(&mut self, method: &str, args: CallArgs) -> Result<()> {
        let frame = CallFrame::encode::<C>(method, &args.args, &args.kwargs)?;
        self.endpoint.send_multipart(frame.into_message()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_master_drives_worker() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let worker = Worker::builder("inproc://worker-drive")
            .function("record", move |args: CallArgs| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(args.args);
                    Ok(Value::Null)
                }
            })
            .bind()
            .await
            .unwrap();
        let task = worker.spawn();

        let mut master = Master::connect("inproc://worker-drive").await.unwrap();
        master.call("record", CallArgs::new().arg(1)).await.unwrap();
        master.call("record", CallArgs::new().arg(2)).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), vec![json!(1)]);
        assert_eq!(rx.recv().await.unwrap(), vec![json!(2)]);

        master.kill_worker().await.unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_failures_and_unknown_do_not_stop_worker() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let worker = Worker::builder("inproc://worker-resilient")
            .function("fail", |_| async { Err(HandlerError::new("ValueError", "boom")) })
            .function("done", move |_| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(());
                    Ok(Value::Null)
                }
            })
            .bind()
            .await
            .unwrap();
        let _task = worker.spawn();

        let mut master = Master::connect("inproc://worker-resilient").await.unwrap();
        master.call("fail", CallArgs::new()).await.unwrap();
        master.call("nonexistent", CallArgs::new()).await.unwrap();
        master.call("done", CallArgs::new()).await.unwrap();

        rx.recv().await.unwrap();
    }

    #[tokio::test]
    async fn test_master_rejects_reserved_names() {
        let _worker = Worker::builder("inproc://worker-reserved").bind().await.unwrap();
        let mut master = Master::connect("inproc://worker-reserved").await.unwrap();
        assert!(matches!(
            master.call("_hidden", CallArgs::new()).await,
            Err(ZrpcError::ReservedName(_))
        ));
    }

    #[tokio::test]
    async fn test_worker_registry_has_no_echo() {
        let worker = Worker::builder("inproc://worker-builtins").bind().await.unwrap();
        let names = worker.registry().list_functions();
        assert!(names.contains("list_functions"));
        assert!(names.contains("documentation"));
        assert!(!names.contains("echo"));
    }
}
