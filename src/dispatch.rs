//! The dispatch step shared by [`Server`](crate::Server) and
//! [`Worker`](crate::Worker).
//!
//! One received message goes through:
//!
//! 1. split into a [`CallFrame`] and decode both payloads (protocol error
//!    on failure)
//! 2. shutdown sentinel check
//! 3. registry lookup
//! 4. handler run in its own task, so a panic or an optional timeout
//!    becomes an ordinary failure instead of taking the loop down
//!
//! What to do with the [`Dispatch`] result (reply or log) is up to the
//! caller.

use std::any::Any;
use std::marker::PhantomData;
use std::time::Duration;

use serde_json::Value;

use crate::codec::{Codec, MsgPackCodec};
use crate::error::{Result, ZrpcError};
use crate::handler::{BoxFuture, CallArgs, HandlerError, HandlerResult, RegistryHandle};
use crate::protocol::{CallFrame, Multipart, RemoteFailure};

/// Failure kind for a handler that panicked.
pub const PANIC_KIND: &str = "Panic";

/// Failure kind for a handler that ran past the call timeout.
pub const TIMEOUT_KIND: &str = "Timeout";

/// Outcome of dispatching one message.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// The shutdown sentinel was received.
    Shutdown,
    /// No method registered under this name.
    Unknown(String),
    /// The handler returned a value.
    Returned {
        /// Invoked method.
        method: String,
        /// Return value.
        value: Value,
    },
    /// The handler failed.
    Failed {
        /// Invoked method.
        method: String,
        /// Marshalled failure with trace.
        failure: RemoteFailure,
    },
}

/// Decodes call frames and runs them against a registry.
pub struct Dispatcher<C: Codec = MsgPackCodec> {
    registry: RegistryHandle,
    call_timeout: Option<Duration>,
    _codec: PhantomData<C>,
}

impl<C: Codec> Dispatcher<C> {
    /// Create a dispatcher over a shared registry.
    pub fn new(registry: RegistryHandle, call_timeout: Option<Duration>) -> Self {
        Self {
            registry,
            call_timeout,
            _codec: PhantomData,
        }
    }

    /// The registry calls are looked up in.
    pub fn registry(&self) -> &RegistryHandle {
        &self.registry
    }

    /// Dispatch one received message.
    ///
    /// # Errors
    ///
    /// Only protocol errors (wrong part count, undecodable payloads).
    /// Handler failures are reported as [`Dispatch::Failed`].
    pub async fn dispatch(&self, message: Multipart) -> Result<Dispatch> {
        let frame = CallFrame::from_message(message)?;
        let (args, kwargs) = frame.decode::<C>()?;

        if frame.is_kill() {
            return Ok(Dispatch::Shutdown);
        }

        let method = frame.method;
        let call = match self
            .registry
            .prepare(&method, CallArgs::from_parts(args, kwargs))
        {
            Ok(call) => call,
            Err(ZrpcError::UnknownMethod(_)) => return Ok(Dispatch::Unknown(method)),
            Err(e) => return Err(e),
        };

        match run_isolated(call, self.call_timeout).await {
            Ok(value) => Ok(Dispatch::Returned { method, value }),
            Err(e) => {
                let failure = e.into_failure(&method);
                Ok(Dispatch::Failed { method, failure })
            }
        }
    }
}

/// Run a handler future on its own task.
async fn run_isolated(call: BoxFuture<'static, HandlerResult>, limit: Option<Duration>) -> HandlerResult {
    let mut task = tokio::spawn(call);

    let joined = match limit {
        Some(limit) => match tokio::time::timeout(limit, &mut task).await {
            Ok(joined) => joined,
            Err(_) => {
                task.abort();
                return Err(HandlerError::new(
                    TIMEOUT_KIND,
                    format!("call did not complete within {:?}", limit),
                ));
            }
        },
        None => task.await,
    };

    match joined {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err(HandlerError::new(PANIC_KIND, panic_message(e.into_panic()))),
        Err(e) => Err(HandlerError::new(PANIC_KIND, e.to_string())),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::MethodRegistry;
    use crate::protocol::KILL_SERVER;
    use bytes::Bytes;
    use serde_json::{json, Map};

    fn dispatcher(timeout: Option<Duration>) -> Dispatcher {
        let mut registry = MethodRegistry::for_server();
        registry.register_fn("fail", |_| async { Err(HandlerError::new("ValueError", "boom")) });
        registry.register_fn("explode", |_| async { panic!("kaboom") });
        registry.register_fn("slow", |_| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Value::Null)
        });
        Dispatcher::new(RegistryHandle::new(registry), timeout)
    }

    fn call(method: &str, args: &[Value]) -> Multipart {
        CallFrame::encode::<MsgPackCodec>(method, args, &Map::new())
            .unwrap()
            .into_message()
    }

    #[tokio::test]
    async fn test_returned() {
        let result = dispatcher(None).dispatch(call("echo", &[json!("hi")])).await.unwrap();
        assert_eq!(
            result,
            Dispatch::Returned {
                method: "echo".to_string(),
                value: json!("hi")
            }
        );
    }

    #[tokio::test]
    async fn test_unknown() {
        let result = dispatcher(None).dispatch(call("nonexistent", &[])).await.unwrap();
        assert_eq!(result, Dispatch::Unknown("nonexistent".to_string()));
    }

    #[tokio::test]
    async fn test_shutdown() {
        let result = dispatcher(None).dispatch(call(KILL_SERVER, &[])).await.unwrap();
        assert_eq!(result, Dispatch::Shutdown);
    }

    #[tokio::test]
    async fn test_handler_failure_carries_trace() {
        match dispatcher(None).dispatch(call("fail", &[])).await.unwrap() {
            Dispatch::Failed { method, failure } => {
                assert_eq!(method, "fail");
                assert_eq!(failure.kind(), "ValueError");
                assert_eq!(failure.message(), "boom");
                assert!(failure.trace.contains("fail"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_panic_is_isolated() {
        match dispatcher(None).dispatch(call("explode", &[])).await.unwrap() {
            Dispatch::Failed { failure, .. } => {
                assert_eq!(failure.kind(), PANIC_KIND);
                assert_eq!(failure.message(), "kaboom");
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout() {
        let d = dispatcher(Some(Duration::from_millis(100)));
        match d.dispatch(call("slow", &[])).await.unwrap() {
            Dispatch::Failed { failure, .. } => assert_eq!(failure.kind(), TIMEOUT_KIND),
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_wrong_part_count_is_protocol_error() {
        let message = Multipart::from(vec![Bytes::from_static(b"echo")]);
        assert!(matches!(
            dispatcher(None).dispatch(message).await,
            Err(ZrpcError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_undecodable_args_is_protocol_error() {
        let message = Multipart::from(vec![
            Bytes::from_static(b"echo"),
            Bytes::from_static(b"\xc1"),
            Bytes::from_static(&[0x80]),
        ]);
        assert!(matches!(
            dispatcher(None).dispatch(message).await,
            Err(ZrpcError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_registry_changes_are_seen() {
        let d = dispatcher(None);
        d.registry().add_function("late", |_| async { Ok(json!("here")) });
        assert!(matches!(
            d.dispatch(call("late", &[])).await.unwrap(),
            Dispatch::Returned { .. }
        ));

        d.registry().remove_function("late");
        assert_eq!(
            d.dispatch(call("late", &[])).await.unwrap(),
            Dispatch::Unknown("late".to_string())
        );
    }
}
