//! RPC handler trait and registry.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use rpc_core::SchemaKind;
use serde_json::Value;

/// Result type for RPC handlers. `Ok(None)` means the handler produced no reply.
pub type HandlerResult = Result<Option<Value>, String>;

/// Future type for async RPC handlers.
pub type HandlerFuture = BoxFuture<'static, HandlerResult>;

/// Arguments handed to a handler, shaped by the topic's schema kind.
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerArgs {
    /// The decoded message spread into positional arguments.
    Positional(Vec<Value>),
    /// The decoded message as one argument.
    Single(Value),
}

impl HandlerArgs {
    /// Shape a decoded message for a topic of the given schema kind.
    ///
    /// For positional topics an array is spread element by element and an
    /// object is spread by value in document order. Any other value becomes
    /// the only argument.
    pub fn shape(schema: SchemaKind, decoded: Value) -> Self {
        match schema {
            SchemaKind::Single => HandlerArgs::Single(decoded),
            SchemaKind::Positional => HandlerArgs::Positional(match decoded {
                Value::Array(items) => items,
                Value::Object(map) => map.into_iter().map(|(_, v)| v).collect(),
                other => vec![other],
            }),
        }
    }

    /// Positional argument at `index`.
    pub fn arg(&self, index: usize) -> Option<&Value> {
        match self {
            HandlerArgs::Positional(args) => args.get(index),
            HandlerArgs::Single(value) if index == 0 => Some(value),
            HandlerArgs::Single(_) => None,
        }
    }

    /// The single argument, or all positional arguments as an array.
    pub fn into_value(self) -> Value {
        match self {
            HandlerArgs::Positional(args) => Value::Array(args),
            HandlerArgs::Single(value) => value,
        }
    }
}

/// Trait for RPC handlers.
///
/// Implement this trait to answer requests on a topic.
pub trait RpcHandler: Send + Sync + 'static {
    /// Name the handler is registered under.
    fn name(&self) -> &str;

    /// Handle a request and return the reply value.
    fn handle(&self, args: HandlerArgs) -> HandlerFuture;
}

/// Registry for RPC handlers.
///
/// Maps handler names to handlers; topics refer to handlers by name.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn RpcHandler>>,
}

impl HandlerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler under its name.
    pub fn register<H: RpcHandler>(&mut self, handler: H) {
        let name = handler.name().to_string();
        self.handlers.insert(name, Arc::new(handler));
    }

    /// Get a handler by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn RpcHandler>> {
        self.handlers.get(name).cloned()
    }

    /// List all registered handler names.
    pub fn names(&self) -> Vec<&str> {
        self.handlers.keys().map(|s| s.as_str()).collect()
    }
}

/// A simple function-based RPC handler.
pub struct FnHandler<F>
where
    F: Fn(HandlerArgs) -> HandlerFuture + Send + Sync + 'static,
{
    name: String,
    handler: F,
}

impl<F> FnHandler<F>
where
    F: Fn(HandlerArgs) -> HandlerFuture + Send + Sync + 'static,
{
    /// Create a new function-based handler.
    pub fn new(name: impl Into<String>, handler: F) -> Self {
        Self {
            name: name.into(),
            handler,
        }
    }
}

impl<F> RpcHandler for FnHandler<F>
where
    F: Fn(HandlerArgs) -> HandlerFuture + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn handle(&self, args: HandlerArgs) -> HandlerFuture {
        (self.handler)(args)
    }
}

/// Helper macro for creating RPC handlers from async bodies.
#[macro_export]
macro_rules! rpc_handler {
    ($name:expr, |$args:ident| $body:expr) => {
        $crate::FnHandler::new($name, |$args: $crate::HandlerArgs| {
            ::std::boxed::Box::pin(async move {
                let result: $crate::HandlerResult = $body;
                result
            })
        })
    };
}
