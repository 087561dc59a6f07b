//! Method registry: `Namespace.Service.Method` -> handler.
//!
//! Services are described with [`ServiceDefinition`] and collected by a
//! [`ServiceRegistryBuilder`]. Building validates every key and fails on the
//! first duplicate; the resulting [`ServiceRegistry`] is immutable and can be
//! read from any number of tasks without locking.
//!
//! ```rust,ignore
//! let registry = ServiceRegistry::builder()
//!     .service(
//!         ServiceDefinition::<ExampleService>::new("Demo", "IExampleService")
//!             .handler(
//!                 "MultipleParameter",
//!                 CallShape::AwaitGeneric,
//!                 |_svc, (a, b): (String, String)| async move { anyhow::Ok(a + &b) },
//!             )
//!             .blocking("WaitAndReturn", CallShape::Sync, |svc, (secs,): (u64,)| {
//!                 svc.wait(secs)
//!             }),
//!     )
//!     .build()?;
//! ```

use super::locator::{short_type_name, ServiceInstance};
use crate::args::FromArgs;
use crate::contract::{method_key, CallShape};
use crate::error::{Result, RpcError};
use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use std::any::TypeId;
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

/// Future produced by an invoked handler.
pub type HandlerFuture = BoxFuture<'static, anyhow::Result<Value>>;

/// Type-erased handler: downcasts the instance, decodes the arguments and
/// starts the call.
pub type Handler = Arc<dyn Fn(ServiceInstance, Vec<Value>) -> Result<HandlerFuture> + Send + Sync>;

/// A registered method.
pub struct MethodDescriptor {
    key: String,
    name: String,
    service_type: TypeId,
    service_type_name: &'static str,
    param_types: Vec<&'static str>,
    shape: CallShape,
    handler: Handler,
}

impl MethodDescriptor {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Exposed method name (last segment of the key).
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn service_type(&self) -> TypeId {
        self.service_type
    }

    pub fn service_type_name(&self) -> &'static str {
        self.service_type_name
    }

    pub fn param_types(&self) -> &[&'static str] {
        &self.param_types
    }

    pub fn shape(&self) -> CallShape {
        self.shape
    }

    /// Start the handler on a located instance.
    pub fn invoke(&self, service: ServiceInstance, args: Vec<Value>) -> Result<HandlerFuture> {
        (self.handler)(service, args)
    }
}

impl std::fmt::Debug for MethodDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodDescriptor")
            .field("key", &self.key)
            .field("service_type", &self.service_type_name)
            .field("param_types", &self.param_types)
            .field("shape", &self.shape)
            .finish()
    }
}

/// The methods one service type exposes.
pub struct ServiceDefinition<S> {
    namespace: String,
    name: String,
    methods: Vec<MethodDescriptor>,
    _service: PhantomData<fn() -> S>,
}

impl<S: Send + Sync + 'static> ServiceDefinition<S> {
    /// Describe a service exposed as `namespace.name`. The namespace may be empty.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            methods: Vec::new(),
            _service: PhantomData,
        }
    }

    /// Register an async handler.
    pub fn handler<A, R, F, Fut>(mut self, method: &str, shape: CallShape, f: F) -> Self
    where
        A: FromArgs,
        R: Serialize + Send + 'static,
        F: Fn(Arc<S>, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        let service_type_name = short_type_name::<S>();
        let handler: Handler = Arc::new(
            move |service: ServiceInstance, values: Vec<Value>| -> Result<HandlerFuture> {
                let service = service.downcast::<S>().map_err(|_| RpcError::ServiceNotFound {
                    service_type: service_type_name.to_string(),
                })?;
                let args = A::from_values(values)?;
                let call = f(service, args);
                let future: HandlerFuture = Box::pin(async move {
                    let value = call.await?;
                    anyhow::Ok(serde_json::to_value(value)?)
                });
                Ok(future)
            },
        );

        self.methods.push(MethodDescriptor {
            key: method_key(&self.namespace, &self.name, method),
            name: method.to_string(),
            service_type: TypeId::of::<S>(),
            service_type_name,
            param_types: A::param_types(),
            shape,
            handler,
        });
        self
    }

    /// Register a blocking handler. Calls run on the blocking thread pool.
    pub fn blocking<A, R, F>(self, method: &str, shape: CallShape, f: F) -> Self
    where
        A: FromArgs,
        R: Serialize + Send + 'static,
        F: Fn(Arc<S>, A) -> anyhow::Result<R> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.handler(method, shape, move |service: Arc<S>, args: A| {
            let f = f.clone();
            async move {
                match tokio::task::spawn_blocking(move || f(service, args)).await {
                    Ok(result) => result,
                    // Surface the panic to the dispatcher like an async handler's.
                    Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                    Err(e) => Err(anyhow::Error::new(e)),
                }
            }
        })
    }
}

/// Immutable map from method key to descriptor.
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    methods: HashMap<String, MethodDescriptor>,
}

impl ServiceRegistry {
    pub fn builder() -> ServiceRegistryBuilder {
        ServiceRegistryBuilder::default()
    }

    /// Exact-match lookup.
    pub fn get(&self, key: &str) -> Option<&MethodDescriptor> {
        self.methods.get(key)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Registered keys, sorted.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }
}

/// Collects service definitions.
#[derive(Default)]
pub struct ServiceRegistryBuilder {
    methods: Vec<MethodDescriptor>,
}

impl ServiceRegistryBuilder {
    pub fn service<S: Send + Sync + 'static>(mut self, definition: ServiceDefinition<S>) -> Self {
        self.methods.extend(definition.methods);
        self
    }

    /// Build the registry. Fails on an empty method name or a duplicate key.
    pub fn build(self) -> Result<ServiceRegistry> {
        let mut methods = HashMap::with_capacity(self.methods.len());
        for method in self.methods {
            if method.name.trim().is_empty() {
                return Err(RpcError::config(format!(
                    "Empty method name on service type '{}'",
                    method.service_type_name
                )));
            }
            if methods.contains_key(&method.key) {
                return Err(RpcError::config(format!(
                    "Method '{}' is registered more than once",
                    method.key
                )));
            }
            debug!("Registered {} ({:?})", method.key, method.param_types);
            methods.insert(method.key.clone(), method);
        }
        Ok(ServiceRegistry { methods })
    }
}
