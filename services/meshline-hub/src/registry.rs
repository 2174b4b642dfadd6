//! Declarative service registry (spec §4.4).
//!
//! Rather than reflecting over an arbitrary target object, a service is
//! built as an explicit [`ServiceDescriptor`]: a name plus a fixed table of
//! method descriptors, each a typed handler with a declared arity. Because
//! the only way to expose a method is to hand it to [`ServiceDescriptor::method`],
//! "reject non-public methods" and "reject methods with a non-representable
//! return type" fall out of the type system instead of needing a runtime
//! check — nothing can be registered that violates either rule.

use futures_util::future::BoxFuture;
use meshline_protocol::{RemoteError, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;

pub type MethodHandler =
    Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, Result<Value, RemoteError>> + Send + Sync>;

#[derive(Clone)]
pub struct MethodDescriptor {
    pub arity: usize,
    pub variadic: bool,
    handler: MethodHandler,
}

/// A named, invocable surface. Built once, then handed to
/// [`ServiceRegistry::register`].
#[derive(Clone)]
pub struct ServiceDescriptor {
    name: String,
    methods: HashMap<String, MethodDescriptor>,
}

impl ServiceDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registers a fixed-arity method.
    pub fn method<F, Fut>(self, name: &str, arity: usize, handler: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, RemoteError>> + Send + 'static,
    {
        self.insert(name, arity, false, handler)
    }

    /// Registers a method that accepts any number of arguments.
    pub fn variadic_method<F, Fut>(self, name: &str, handler: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, RemoteError>> + Send + 'static,
    {
        self.insert(name, 0, true, handler)
    }

    fn insert<F, Fut>(mut self, name: &str, arity: usize, variadic: bool, handler: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, RemoteError>> + Send + 'static,
    {
        let handler: MethodHandler = Arc::new(move |args| Box::pin(handler(args)));
        self.methods.insert(
            name.to_owned(),
            MethodDescriptor {
                arity,
                variadic,
                handler,
            },
        );
        self
    }
}

/// Name-addressed table of registered services, mutable at runtime so a
/// service can be added or withdrawn while the hub is up.
#[derive(Default)]
pub struct ServiceRegistry {
    services: RwLock<HashMap<String, Arc<ServiceDescriptor>>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or, passing `None`, withdraws) a service under `name`.
    pub async fn register(&self, name: impl Into<String>, descriptor: Option<ServiceDescriptor>) {
        let name = name.into();
        let mut services = self.services.write().await;
        match descriptor {
            Some(d) => {
                services.insert(name, Arc::new(d));
            }
            None => {
                services.remove(&name);
            }
        }
    }

    /// Resolves `service.method` and invokes it, or returns a [`RemoteError`]
    /// describing why it could not be found or called (spec §4.4).
    pub async fn invoke(&self, service: &str, method: &str, args: Vec<Value>) -> CallOutcome {
        let descriptor = {
            let services = self.services.read().await;
            services.get(service).cloned()
        };
        let descriptor = descriptor
            .ok_or_else(|| RemoteError::new(format!("Service not found: {service}")))?;
        let method_desc = descriptor
            .methods
            .get(method)
            .cloned()
            .ok_or_else(|| RemoteError::new(format!("Method not found: {service}.{method}")))?;
        if !method_desc.variadic && args.len() != method_desc.arity {
            return Err(RemoteError::new(format!(
                "arity mismatch calling {service}.{method}: expected {}, got {}",
                method_desc.arity,
                args.len()
            )));
        }
        (method_desc.handler)(args).await
    }

    pub async fn has_service(&self, service: &str) -> bool {
        self.services.read().await.contains_key(service)
    }

    pub async fn clear(&self) {
        self.services.write().await.clear();
    }
}

pub type CallOutcome = Result<Value, RemoteError>;
