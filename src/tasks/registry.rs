use std::{collections::HashMap, fmt, sync::Arc};

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

/// Error type a handler may fail with. The message never leaves the child;
/// the parent only sees a failing exit status.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Return values of a handler, in order.
pub type HandlerResult = Result<Vec<Value>, HandlerError>;

/// Signal handler installable in the child.
pub type SignalHandlerFn = extern "C" fn(libc::c_int);

type HandlerFn = dyn Fn(&TaskCall) -> HandlerResult + Send + Sync;

/// Whether the caller wants one value back or the whole sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReturnMode {
    /// `data()` returns the leading value.
    Scalar,
    /// `data()` returns every value as an array.
    #[default]
    List,
}

/// What a handler receives when it runs inside the child.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskCall {
    pub task_id: u64,
    pub args: Vec<Value>,
    pub mode: ReturnMode,
}

impl TaskCall {
    /// Decodes the argument at `index`.
    pub fn arg<T: DeserializeOwned>(&self, index: usize) -> Result<T, HandlerError> {
        let value = self
            .args
            .get(index)
            .ok_or_else(|| format!("missing argument {index}"))?;
        Ok(T::deserialize(value)?)
    }

    /// Decodes the whole argument list into `T`, usually a tuple.
    ///
    /// With no arguments, `T` is first tried against `null` so that
    /// `()` works as the argument type.
    pub fn args_as<T: DeserializeOwned>(&self) -> Result<T, HandlerError> {
        if self.args.is_empty() {
            if let Ok(unit) = T::deserialize(&Value::Null) {
                return Ok(unit);
            }
        }
        Ok(T::deserialize(&Value::Array(self.args.clone()))?)
    }

    pub fn is_scalar(&self) -> bool {
        self.mode == ReturnMode::Scalar
    }
}

/// Named work handlers and signal handlers, registered ahead of time.
///
/// The child process is a fixed entry point: it receives a handler name
/// and arguments, never a closure. The registry is immutable once handed to
/// a runner; forked children see the same snapshot.
///
/// # Examples
///
/// ```rust
/// use tcrm_isolate::tasks::registry::TaskRegistry;
/// use serde_json::json;
///
/// let registry = TaskRegistry::new()
///     .function("add", |(a, b): (i64, i64)| a + b)
///     .handler("pair", |call| Ok(vec![json!(call.task_id), json!("second")]));
///
/// assert!(registry.contains("add"));
/// assert!(registry.contains("pair"));
/// ```
#[derive(Clone, Default)]
pub struct TaskRegistry {
    handlers: HashMap<String, Arc<HandlerFn>>,
    signal_handlers: HashMap<String, SignalHandlerFn>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a multi-value handler.
    pub fn handler<F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&TaskCall) -> HandlerResult + Send + Sync + 'static,
    {
        self.handlers.insert(name.into(), Arc::new(handler));
        self
    }

    /// Registers a typed single-value function.
    ///
    /// The argument list is decoded into `A` (see [`TaskCall::args_as`]) and
    /// the return value becomes the single leading value of the result.
    pub fn function<A, R, F>(self, name: impl Into<String>, function: F) -> Self
    where
        A: DeserializeOwned,
        R: Serialize,
        F: Fn(A) -> R + Send + Sync + 'static,
    {
        self.handler(name, move |call: &TaskCall| {
            let args = call.args_as::<A>()?;
            let value = serde_json::to_value(function(args))?;
            Ok(vec![value])
        })
    }

    /// Registers a signal handler under `name` for use in
    /// [`SignalDisposition::Handler`](crate::tasks::signal::SignalDisposition::Handler).
    pub fn signal_handler(mut self, name: impl Into<String>, handler: SignalHandlerFn) -> Self {
        self.signal_handlers.insert(name.into(), handler);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn contains_signal_handler(&self, name: &str) -> bool {
        self.signal_handlers.contains_key(name)
    }

    pub(crate) fn lookup(&self, name: &str) -> Option<&HandlerFn> {
        self.handlers.get(name).map(|h| h.as_ref())
    }

    pub(crate) fn lookup_signal_handler(&self, name: &str) -> Option<SignalHandlerFn> {
        self.signal_handlers.get(name).copied()
    }

    pub fn handler_names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

impl fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut handlers: Vec<_> = self.handlers.keys().collect();
        handlers.sort();
        let mut signal_handlers: Vec<_> = self.signal_handlers.keys().collect();
        signal_handlers.sort();
        f.debug_struct("TaskRegistry")
            .field("handlers", &handlers)
            .field("signal_handlers", &signal_handlers)
            .finish()
    }
}
