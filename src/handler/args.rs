//! Call arguments and handler errors.
//!
//! Handlers receive a [`CallArgs`] (decoded positional and keyword
//! arguments) and fail with a [`HandlerError`], which the dispatcher turns
//! into a [`RemoteFailure`] carrying a formatted trace.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::fmt;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::ZrpcError;
use crate::protocol::RemoteFailure;

/// Kind used when a handler error has no more specific category.
pub const DEFAULT_ERROR_KIND: &str = "Error";

/// Kind used for argument shape or type mismatches.
pub const TYPE_ERROR_KIND: &str = "TypeError";

/// Positional and keyword arguments of one call.
///
/// Also serves as the builder on the calling side:
///
/// ```
/// use zrpc::CallArgs;
///
/// let args = CallArgs::new().arg("hi").kwarg("times", 3);
/// assert_eq!(args.args.len(), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    /// Positional arguments, in order.
    pub args: Vec<Value>,
    /// Keyword arguments.
    pub kwargs: Map<String, Value>,
}

impl CallArgs {
    /// No arguments.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from decoded parts.
    pub fn from_parts(args: Vec<Value>, kwargs: Map<String, Value>) -> Self {
        Self { args, kwargs }
    }

    /// Append a positional argument.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Set a keyword argument.
    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(name.into(), value.into());
        self
    }

    /// Whether there are neither positional nor keyword arguments.
    pub fn is_empty(&self) -> bool {
        self.args.is_empty() && self.kwargs.is_empty()
    }

    /// Positional argument at `index`.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }

    /// Keyword argument by name.
    pub fn get_kwarg(&self, name: &str) -> Option<&Value> {
        self.kwargs.get(name)
    }

    /// Argument taken positionally at `index`, or else by keyword `name`.
    ///
    /// # Errors
    ///
    /// `TypeError` if missing or of the wrong type.
    pub fn required<T: DeserializeOwned>(&self, index: usize, name: &str) -> Result<T, HandlerError> {
        let value = self
            .args
            .get(index)
            .or_else(|| self.kwargs.get(name))
            .ok_or_else(|| {
                HandlerError::new(
                    TYPE_ERROR_KIND,
                    format!("missing required argument '{}'", name),
                )
            })?;
        serde_json::from_value(value.clone()).map_err(|e| {
            HandlerError::new(TYPE_ERROR_KIND, format!("argument '{}': {}", name, e))
        })
    }

    /// Deserialize all positional arguments as one value (a tuple, a
    /// sequence, or a struct in field order).
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, HandlerError> {
        Ok(serde_json::from_value(Value::Array(self.args.clone()))?)
    }

    /// Remove a keyword argument and report whether it was truthy.
    pub(crate) fn take_flag(&mut self, name: &str) -> bool {
        self.kwargs.remove(name).is_some_and(|v| truthy(&v))
    }
}

impl From<Vec<Value>> for CallArgs {
    fn from(args: Vec<Value>) -> Self {
        Self {
            args,
            kwargs: Map::new(),
        }
    }
}

/// Truthiness of a dynamic value: null, false, zero and empty are false.
pub(crate) fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Failure raised by a handler.
///
/// A backtrace is captured on construction (honouring `RUST_BACKTRACE`)
/// and ends up in the trace text sent to the caller.
pub struct HandlerError {
    kind: String,
    message: String,
    backtrace: Backtrace,
}

impl HandlerError {
    /// Failure with an explicit kind, e.g. `ValueError`.
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            backtrace: Backtrace::capture(),
        }
    }

    /// Failure of the default kind.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::new(DEFAULT_ERROR_KIND, message)
    }

    /// Error kind.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Marshal into the wire form, formatting the trace.
    pub fn into_failure(self, method: &str) -> RemoteFailure {
        let mut trace = format!("{}: {}\n  in method `{}`\n", self.kind, self.message, method);
        if self.backtrace.status() == BacktraceStatus::Captured {
            trace.push_str("stack backtrace:\n");
            trace.push_str(&self.backtrace.to_string());
        }
        RemoteFailure::new(self.kind, self.message, trace)
    }
}

impl fmt::Debug for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerError")
            .field("kind", &self.kind)
            .field("message", &self.message)
            .finish()
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for HandlerError {}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(TYPE_ERROR_KIND, err.to_string())
    }
}

impl From<ZrpcError> for HandlerError {
    fn from(err: ZrpcError) -> Self {
        match err {
            ZrpcError::Remote(failure) => Self::new(failure.error.kind, failure.error.message),
            other => Self::new("ZrpcError", other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder() {
        let args = CallArgs::new().arg(1).arg("two").kwarg("foo", true);
        assert_eq!(args.args, vec![json!(1), json!("two")]);
        assert_eq!(args.get_kwarg("foo"), Some(&json!(true)));
        assert!(!args.is_empty());
        assert!(CallArgs::new().is_empty());
    }

    #[test]
    fn test_required_positional_or_keyword() {
        let positional = CallArgs::new().arg("echo");
        let keyword = CallArgs::new().kwarg("func_name", "echo");

        let a: String = positional.required(0, "func_name").unwrap();
        let b: String = keyword.required(0, "func_name").unwrap();
        assert_eq!(a, "echo");
        assert_eq!(b, "echo");
    }

    #[test]
    fn test_required_missing_is_type_error() {
        let err = CallArgs::new().required::<String>(0, "func_name").unwrap_err();
        assert_eq!(err.kind(), TYPE_ERROR_KIND);
        assert!(err.message().contains("func_name"));
    }

    #[test]
    fn test_parse_tuple() {
        let args = CallArgs::new().arg(2).arg(3);
        let (a, b): (i64, i64) = args.parse().unwrap();
        assert_eq!(a + b, 5);

        let err = args.parse::<(String, String)>().unwrap_err();
        assert_eq!(err.kind(), TYPE_ERROR_KIND);
    }

    #[test]
    fn test_take_flag() {
        let mut args = CallArgs::new().kwarg("_suppress", true).kwarg("x", 1);
        assert!(args.take_flag("_suppress"));
        assert!(!args.kwargs.contains_key("_suppress"));
        assert!(!args.take_flag("_suppress"));

        let mut falsy = CallArgs::new().kwarg("_suppress", 0);
        assert!(!falsy.take_flag("_suppress"));
    }

    #[test]
    fn test_truthy() {
        assert!(!truthy(&Value::Null));
        assert!(!truthy(&json!("")));
        assert!(!truthy(&json!([])));
        assert!(truthy(&json!(1)));
        assert!(truthy(&json!({"a": 1})));
    }

    #[test]
    fn test_into_failure() {
        let failure = HandlerError::new("ValueError", "boom").into_failure("explode");
        assert_eq!(failure.kind(), "ValueError");
        assert_eq!(failure.message(), "boom");
        assert!(failure.trace.starts_with("ValueError: boom"));
        assert!(failure.trace.contains("explode"));
    }

    #[test]
    fn test_from_remote_keeps_kind() {
        let remote = ZrpcError::Remote(RemoteFailure::new("KeyError", "k", ""));
        let err = HandlerError::from(remote);
        assert_eq!(err.kind(), "KeyError");
        assert_eq!(err.to_string(), "KeyError: k");
    }
}
