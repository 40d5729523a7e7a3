//! Handler module - method registration and invocation.
//!
//! Provides:
//! - [`MethodRegistry`] - maps method names to handlers, seeded with built-ins
//! - [`RegistryHandle`] - shared registry that can change while serving
//! - [`CallArgs`] / [`HandlerError`] - what handlers take and how they fail
//!
//! # Example
//!
//! ```
//! use zrpc::handler::{CallArgs, HandlerError, RegistryHandle, MethodRegistry};
//!
//! let registry = RegistryHandle::new(MethodRegistry::for_server());
//! registry.add_function("fail", |_args: CallArgs| async move {
//!     Err(HandlerError::new("ValueError", "boom"))
//! });
//! assert!(registry.list_functions().contains("fail"));
//! ```

mod args;
mod registry;

pub use args::{CallArgs, HandlerError, DEFAULT_ERROR_KIND, TYPE_ERROR_KIND};
pub use registry::{
    BoxFuture, FnHandler, Handler, HandlerResult, Method, MethodDoc, MethodRegistry,
    RegistryHandle, TypedHandler, DOCUMENTATION, ECHO, LIST_FUNCTIONS, NOT_IMPLEMENTED_KIND,
};
