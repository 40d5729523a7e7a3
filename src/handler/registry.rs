//! Method registry: name to handler, plus the built-in introspection methods.
//!
//! A registry is seeded at construction with `list_functions` and
//! `documentation` (and `echo` for request-reply servers). Built-ins are
//! ordinary entries: they can be shadowed or unregistered.
//!
//! # Example
//!
//! ```
//! use zrpc::handler::{CallArgs, HandlerError, MethodRegistry};
//!
//! let mut registry = MethodRegistry::for_server();
//! registry.register_fn("add", |args: CallArgs| async move {
//!     let (a, b): (i64, i64) = args.parse()?;
//!     Ok::<_, HandlerError>(serde_json::json!(a + b))
//! });
//!
//! assert!(registry.list_names().contains("add"));
//! ```

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, PoisonError};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::{CallArgs, HandlerError};
use crate::error::{Result, ZrpcError};

/// Result type for handler functions.
pub type HandlerResult = std::result::Result<Value, HandlerError>;

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Name of the built-in listing method.
pub const LIST_FUNCTIONS: &str = "list_functions";
/// Name of the built-in documentation method.
pub const DOCUMENTATION: &str = "documentation";
/// Name of the built-in echo method.
pub const ECHO: &str = "echo";

/// Error kind returned by `documentation` for an unknown name.
pub const NOT_IMPLEMENTED_KIND: &str = "NotImplementedError";

/// Trait for handler functions.
pub trait Handler: Send + Sync + 'static {
    /// Run the method with decoded arguments.
    fn call(&self, args: CallArgs) -> BoxFuture<'static, HandlerResult>;
}

/// Handler over raw [`CallArgs`].
pub struct FnHandler<F, Fut>
where
    F: Fn(CallArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    handler: F,
}

impl<F, Fut> FnHandler<F, Fut>
where
    F: Fn(CallArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    /// Wrap a closure.
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

impl<F, Fut> Handler for FnHandler<F, Fut>
where
    F: Fn(CallArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, args: CallArgs) -> BoxFuture<'static, HandlerResult> {
        Box::pin((self.handler)(args))
    }
}

/// Wrapper that deserializes positional arguments before calling the
/// handler and serializes its return value.
pub struct TypedHandler<F, T, R, Fut>
where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    Fut: Future<Output = std::result::Result<R, HandlerError>> + Send + 'static,
{
    handler: F,
    _phantom: PhantomData<fn(T) -> (R, Fut)>,
}

impl<F, T, R, Fut> TypedHandler<F, T, R, Fut>
where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    Fut: Future<Output = std::result::Result<R, HandlerError>> + Send + 'static,
{
    /// Create a new typed handler.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, T, R, Fut> Handler for TypedHandler<F, T, R, Fut>
where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    Fut: Future<Output = std::result::Result<R, HandlerError>> + Send + 'static,
{
    fn call(&self, args: CallArgs) -> BoxFuture<'static, HandlerResult> {
        let parsed: T = match args.parse() {
            Ok(v) => v,
            Err(e) => return Box::pin(async move { Err(e) }),
        };

        let fut = (self.handler)(parsed);
        Box::pin(async move {
            let value = fut.await?;
            Ok::<_, HandlerError>(serde_json::to_value(value)?)
        })
    }
}

/// Human-readable documentation of a method.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MethodDoc {
    /// Parameter list, e.g. `(a, b)`.
    pub signature: String,
    /// Free-form description.
    pub description: String,
}

impl MethodDoc {
    /// Create documentation.
    pub fn new(signature: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            signature: signature.into(),
            description: description.into(),
        }
    }
}

/// What a registry entry runs.
#[derive(Clone)]
pub enum Method {
    /// User handler.
    Handler(Arc<dyn Handler>),
    /// Built-in: names of all registered methods.
    ListFunctions,
    /// Built-in: documentation of one method.
    Documentation,
    /// Built-in: return the argument unchanged.
    Echo,
}

impl std::fmt::Debug for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Method::Handler(_) => f.write_str("Handler"),
            Method::ListFunctions => f.write_str("ListFunctions"),
            Method::Documentation => f.write_str("Documentation"),
            Method::Echo => f.write_str("Echo"),
        }
    }
}

struct MethodEntry {
    method: Method,
    doc: MethodDoc,
}

/// Registry mapping method names to handlers.
pub struct MethodRegistry {
    methods: HashMap<String, MethodEntry>,
}

impl MethodRegistry {
    /// Registry with `list_functions` and `documentation`.
    pub fn new() -> Self {
        let mut registry = Self {
            methods: HashMap::new(),
        };
        registry.insert(
            LIST_FUNCTIONS,
            Method::ListFunctions,
            MethodDoc::new("()", "Retrieve list of functions supported by the server."),
        );
        registry.insert(
            DOCUMENTATION,
            Method::Documentation,
            MethodDoc::new(
                "(func_name)",
                "Retrieve the documentation of the function registered as `func_name`.",
            ),
        );
        registry
    }

    /// Registry for a request-reply server: the built-ins plus `echo`.
    pub fn for_server() -> Self {
        let mut registry = Self::new();
        registry.insert(ECHO, Method::Echo, MethodDoc::new("(statement)", "Echo input."));
        registry
    }

    fn insert(&mut self, name: &str, method: Method, doc: MethodDoc) {
        self.methods.insert(name.to_string(), MethodEntry { method, doc });
    }

    /// Insert or overwrite a handler.
    pub fn register(&mut self, name: &str, handler: impl Handler) {
        self.insert(name, Method::Handler(Arc::new(handler)), MethodDoc::default());
    }

    /// Insert or overwrite a handler with documentation.
    pub fn register_with_doc(&mut self, name: &str, doc: MethodDoc, handler: impl Handler) {
        self.insert(name, Method::Handler(Arc::new(handler)), doc);
    }

    /// Register a closure over raw [`CallArgs`].
    pub fn register_fn<F, Fut>(&mut self, name: &str, handler: F)
    where
        F: Fn(CallArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.register(name, FnHandler::new(handler));
    }

    /// Register a closure whose positional arguments deserialize into `T`.
    pub fn register_typed<F, T, R, Fut>(&mut self, name: &str, handler: F)
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        Fut: Future<Output = std::result::Result<R, HandlerError>> + Send + 'static,
    {
        self.register(name, TypedHandler::new(handler));
    }

    /// Remove a method. Returns whether it was present.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.methods.remove(name).is_some()
    }

    /// Look up a method.
    pub fn lookup(&self, name: &str) -> Result<&Method> {
        self.methods
            .get(name)
            .map(|e| &e.method)
            .ok_or_else(|| ZrpcError::UnknownMethod(name.to_string()))
    }

    /// Whether `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// All registered names, built-ins included.
    pub fn list_names(&self) -> BTreeSet<String> {
        self.methods.keys().cloned().collect()
    }

    /// Render `"{name}{signature}\n\n{description}"`.
    pub fn describe(&self, name: &str) -> Result<String> {
        let entry = self
            .methods
            .get(name)
            .ok_or_else(|| ZrpcError::UnknownMethod(name.to_string()))?;

        let signature = if entry.doc.signature.is_empty() {
            "(*args, **kwargs)"
        } else {
            entry.doc.signature.as_str()
        };
        let description = if entry.doc.description.is_empty() {
            "No documentation available."
        } else {
            entry.doc.description.as_str()
        };
        Ok(format!("{}{}\n\n{}", name, signature, description))
    }

    /// Bind arguments to the method and return the future that runs it.
    ///
    /// Built-ins are evaluated here against the current registry contents;
    /// user handlers only start when the future is polled, so the caller
    /// may release any lock around the registry first.
    pub fn prepare(&self, name: &str, args: CallArgs) -> Result<BoxFuture<'static, HandlerResult>> {
        let ready = |result: HandlerResult| -> BoxFuture<'static, HandlerResult> {
            Box::pin(std::future::ready(result))
        };

        match self.lookup(name)? {
            Method::Handler(handler) => {
                let handler = handler.clone();
                Ok(Box::pin(async move { handler.call(args).await }))
            }
            Method::ListFunctions => Ok(ready(Ok(Value::from(
                self.list_names().into_iter().collect::<Vec<_>>(),
            )))),
            Method::Documentation => {
                let result = args.required::<String>(0, "func_name").and_then(|func_name| {
                    self.describe(&func_name)
                        .map(Value::String)
                        .map_err(|_| HandlerError::new(NOT_IMPLEMENTED_KIND, func_name))
                });
                Ok(ready(result))
            }
            Method::Echo => Ok(ready(args.required::<Value>(0, "statement"))),
        }
    }
}

impl Default for MethodRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared, lock-protected registry.
///
/// Lets functions be added or removed while a server loop runs. The loop
/// holds the lock only to look a method up, never while a handler runs.
#[derive(Clone)]
pub struct RegistryHandle {
    inner: Arc<RwLock<MethodRegistry>>,
}

impl RegistryHandle {
    /// Share a registry.
    pub fn new(registry: MethodRegistry) -> Self {
        Self {
            inner: Arc::new(RwLock::new(registry)),
        }
    }

    /// Read access.
    pub fn read(&self) -> RwLockReadGuard<'_, MethodRegistry> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write access.
    pub fn write(&self) -> RwLockWriteGuard<'_, MethodRegistry> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a closure over raw [`CallArgs`].
    pub fn add_function<F, Fut>(&self, name: &str, handler: F)
    where
        F: Fn(CallArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.write().register_fn(name, handler);
    }

    /// Register any [`Handler`].
    pub fn add_handler(&self, name: &str, handler: impl Handler) {
        self.write().register(name, handler);
    }

    /// Remove a method. Absent names are ignored.
    pub fn remove_function(&self, name: &str) -> bool {
        self.write().unregister(name)
    }

    /// All registered names.
    pub fn list_functions(&self) -> BTreeSet<String> {
        self.read().list_names()
    }

    /// See [`MethodRegistry::prepare`].
    pub fn prepare(&self, name: &str, args: CallArgs) -> Result<BoxFuture<'static, HandlerResult>> {
        self.read().prepare(name, args)
    }
}

impl Default for RegistryHandle {
    fn default() -> Self {
        Self::new(MethodRegistry::default())
    }
}

impl From<MethodRegistry> for RegistryHandle {
    fn from(registry: MethodRegistry) -> Self {
        Self::new(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn add(registry: &mut MethodRegistry) {
        registry.register_typed("add", |(a, b): (i64, i64)| async move {
            Ok::<_, HandlerError>(a + b)
        });
    }

    #[test]
    fn test_builtins_seeded() {
        let worker = MethodRegistry::new();
        let names = worker.list_names();
        assert!(names.contains(LIST_FUNCTIONS));
        assert!(names.contains(DOCUMENTATION));
        assert!(!names.contains(ECHO));

        assert!(MethodRegistry::for_server().contains(ECHO));
    }

    #[test]
    fn test_register_overwrites() {
        let mut registry = MethodRegistry::new();
        registry.register_fn("f", |_| async { Ok(json!(1)) });
        registry.register_fn("f", |_| async { Ok(json!(2)) });
        assert_eq!(
            registry.list_names().iter().filter(|n| n.as_str() == "f").count(),
            1
        );
    }

    #[test]
    fn test_unregister_absent_is_noop() {
        let mut registry = MethodRegistry::new();
        assert!(!registry.unregister("missing"));
        assert!(registry.unregister(LIST_FUNCTIONS));
        assert!(!registry.contains(LIST_FUNCTIONS));
    }

    #[test]
    fn test_lookup_unknown() {
        let registry = MethodRegistry::new();
        assert!(matches!(
            registry.lookup("nope"),
            Err(ZrpcError::UnknownMethod(name)) if name == "nope"
        ));
    }

    #[test]
    fn test_describe() {
        let mut registry = MethodRegistry::new();
        registry.register_with_doc(
            "add",
            MethodDoc::new("(a, b)", "Add two numbers."),
            FnHandler::new(|_| async { Ok(Value::Null) }),
        );
        assert_eq!(registry.describe("add").unwrap(), "add(a, b)\n\nAdd two numbers.");

        registry.register_fn("bare", |_| async { Ok(Value::Null) });
        let doc = registry.describe("bare").unwrap();
        assert!(doc.starts_with("bare(*args, **kwargs)"));

        assert!(registry.describe("missing").is_err());
    }

    #[tokio::test]
    async fn test_typed_handler() {
        let mut registry = MethodRegistry::new();
        add(&mut registry);

        let result = registry
            .prepare("add", CallArgs::new().arg(2).arg(3))
            .unwrap()
            .await
            .unwrap();
        assert_eq!(result, json!(5));

        let err = registry
            .prepare("add", CallArgs::new().arg("x"))
            .unwrap()
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "TypeError");
    }

    #[tokio::test]
    async fn test_builtin_list_functions() {
        let mut registry = MethodRegistry::for_server();
        add(&mut registry);

        let result = registry
            .prepare(LIST_FUNCTIONS, CallArgs::new())
            .unwrap()
            .await
            .unwrap();
        assert_eq!(result, json!(["add", "documentation", "echo", "list_functions"]));
    }

    #[tokio::test]
    async fn test_builtin_documentation() {
        let registry = MethodRegistry::for_server();

        let doc = registry
            .prepare(DOCUMENTATION, CallArgs::new().arg("echo"))
            .unwrap()
            .await
            .unwrap();
        assert_eq!(doc, json!("echo(statement)\n\nEcho input."));

        let err = registry
            .prepare(DOCUMENTATION, CallArgs::new().arg("missing"))
            .unwrap()
            .await
            .unwrap_err();
        assert_eq!(err.kind(), NOT_IMPLEMENTED_KIND);
        assert_eq!(err.message(), "missing");
    }

    #[tokio::test]
    async fn test_builtin_echo() {
        let registry = MethodRegistry::for_server();
        let value = json!({"nested": [1, 2, null]});
        let result = registry
            .prepare(ECHO, CallArgs::new().arg(value.clone()))
            .unwrap()
            .await
            .unwrap();
        assert_eq!(result, value);
    }

    #[tokio::test]
    async fn test_handle_add_and_remove() {
        let handle = RegistryHandle::new(MethodRegistry::new());
        handle.add_function("ping", |_| async { Ok(json!("pong")) });
        assert!(handle.list_functions().contains("ping"));

        let pong = handle.prepare("ping", CallArgs::new()).unwrap().await.unwrap();
        assert_eq!(pong, json!("pong"));

        assert!(handle.remove_function("ping"));
        assert!(!handle.remove_function("ping"));
        assert!(matches!(
            handle.prepare("ping", CallArgs::new()),
            Err(ZrpcError::UnknownMethod(_))
        ));
    }
}
