//! Objects the client can call into, and the handlers behind their methods.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tether_core::{ApplicationError, NoSuchMethod, RequestId, Respond};

use crate::session::SessionHandle;

/// A resolved method, ready to invoke.
pub type Callable = Arc<dyn MethodHandler>;

/// Trait implemented by every exposed method.
#[async_trait]
pub trait MethodHandler: Send + Sync {
    /// Run the method. Errors are sent back to the caller, never propagated.
    async fn invoke(&self, args: CallArgs) -> Result<Reply, ApplicationError>;
}

/// Anything that can live in a session's local object table.
pub trait Addressable: Send + Sync {
    /// Find the handler for `name`.
    fn locate_method(&self, name: &str) -> Result<Callable, NoSuchMethod>;
}

/// Arguments of one incoming call.
#[derive(Debug, Default)]
pub struct CallArgs {
    /// Positional arguments.
    pub positional: Vec<Value>,
    /// Named arguments.
    pub named: Map<String, Value>,
    /// The session the call arrived on, while it is still running.
    pub session: Option<SessionHandle>,
}

impl CallArgs {
    /// Positional argument `index`, if present.
    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.positional.get(index)
    }

    /// Named argument `key`, if present.
    pub fn named(&self, key: &str) -> Option<&Value> {
        self.named.get(key)
    }

    /// Positional argument `index` as a string.
    pub fn require_str(&self, index: usize) -> Result<&str, ApplicationError> {
        self.arg(index)
            .and_then(Value::as_str)
            .ok_or_else(|| type_error(index, "a string"))
    }

    /// Positional argument `index` as a number.
    pub fn require_f64(&self, index: usize) -> Result<f64, ApplicationError> {
        self.arg(index)
            .and_then(Value::as_f64)
            .ok_or_else(|| type_error(index, "a number"))
    }
}

fn type_error(index: usize, expected: &str) -> ApplicationError {
    ApplicationError::new("TypeError", format!("argument {index} must be {expected}"))
}

/// What a handler returns on success.
#[derive(Clone, Debug, PartialEq)]
pub enum Reply {
    /// A plain JSON value.
    Value(Value),
    /// Tell the client to navigate elsewhere.
    Redirect(String),
}

impl From<Value> for Reply {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

/// Settled result of an incoming call, classified once at dispatch.
#[derive(Clone, Debug, PartialEq)]
pub enum CallOutcome {
    /// Success with a value.
    Value(Value),
    /// Success asking the client to navigate to a URL.
    Redirect(String),
    /// The handler failed, panicked, or did not exist.
    Failed(ApplicationError),
}

impl CallOutcome {
    /// Label used for the calls metric.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Value(_) => "value",
            Self::Redirect(_) => "redirect",
            Self::Failed(_) => "failed",
        }
    }

    /// The `respond` payload answering `request_id`.
    pub fn into_respond(self, request_id: RequestId) -> Respond {
        let (success, result) = match self {
            Self::Value(value) => (true, value),
            Self::Redirect(url) => (true, json!({ "redirect": url })),
            Self::Failed(err) => (false, err.to_wire()),
        };
        Respond {
            request_id,
            success,
            result,
        }
    }
}

impl From<Result<Reply, ApplicationError>> for CallOutcome {
    fn from(result: Result<Reply, ApplicationError>) -> Self {
        match result {
            Ok(Reply::Value(value)) => Self::Value(value),
            Ok(Reply::Redirect(url)) => Self::Redirect(url),
            Err(err) => Self::Failed(err),
        }
    }
}

/// Name-to-handler map; the usual way to build an [`Addressable`].
#[derive(Clone, Default)]
pub struct ExposedMethods {
    methods: HashMap<String, Callable>,
}

impl ExposedMethods {
    /// An object with no methods.
    pub fn new() -> Self {
        Self::default()
    }

    /// Expose `handler` as `name`, replacing any earlier handler.
    pub fn expose(&mut self, name: &str, handler: impl MethodHandler + 'static) -> &mut Self {
        let _ = self.methods.insert(name.to_owned(), Arc::new(handler));
        self
    }

    /// Expose an async closure as `name`.
    pub fn expose_fn<F, Fut>(&mut self, name: &str, f: F) -> &mut Self
    where
        F: Fn(CallArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply, ApplicationError>> + Send + 'static,
    {
        self.expose(name, FnHandler(f))
    }

    /// Exposed method names, sorted.
    pub fn methods(&self) -> Vec<String> {
        let mut names: Vec<String> = self.methods.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Addressable for ExposedMethods {
    fn locate_method(&self, name: &str) -> Result<Callable, NoSuchMethod> {
        self.methods
            .get(name)
            .cloned()
            .ok_or_else(|| NoSuchMethod::new(name))
    }
}

impl std::fmt::Debug for ExposedMethods {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExposedMethods")
            .field("methods", &self.methods())
            .finish()
    }
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> MethodHandler for FnHandler<F>
where
    F: Fn(CallArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Reply, ApplicationError>> + Send + 'static,
{
    async fn invoke(&self, args: CallArgs) -> Result<Reply, ApplicationError> {
        (self.0)(args).await
    }
}
