//! Client-side service contracts.
//!
//! A [`ServiceContract`] is the explicit form of an annotated interface: the
//! namespace and name the service is exposed under, and one
//! [`MethodContract`] per callable method. Contracts are validated when they
//! are built and never change afterwards.

use crate::error::{Result, RpcError};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// How a method's result is delivered to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallShape {
    /// The calling thread blocks until the value (or an error) arrives.
    Sync,
    /// Returns once the request is sent; no reply is awaited.
    FireAndForget,
    /// Awaitable without a value. Completes once the request is sent.
    AwaitValue,
    /// Awaitable of a decoded value.
    AwaitGeneric,
}

impl CallShape {
    /// Whether the caller waits for a reply frame.
    pub fn expects_reply(&self) -> bool {
        matches!(self, CallShape::Sync | CallShape::AwaitGeneric)
    }
}

impl fmt::Display for CallShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallShape::Sync => "sync",
            CallShape::FireAndForget => "fire-and-forget",
            CallShape::AwaitValue => "await-value",
            CallShape::AwaitGeneric => "await-generic",
        };
        f.write_str(name)
    }
}

/// Per-method binding record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodContract {
    name: String,
    remote_name: Option<String>,
    shape: CallShape,
    timeout: Option<Duration>,
    retries: u32,
}

impl MethodContract {
    pub fn new(name: impl Into<String>, shape: CallShape) -> Self {
        Self {
            name: name.into(),
            remote_name: None,
            shape,
            timeout: None,
            retries: 0,
        }
    }

    /// Expose the method under a different name than the local one.
    pub fn remote_name(mut self, name: impl Into<String>) -> Self {
        self.remote_name = Some(name.into());
        self
    }

    /// Override the client's default timeout for this method.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Replay the call up to `retries` extra times on timeout or transport failure.
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name the server registers the method under.
    pub fn exposed_name(&self) -> &str {
        self.remote_name.as_deref().unwrap_or(&self.name)
    }

    pub fn shape(&self) -> CallShape {
        self.shape
    }

    pub fn timeout_override(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn retry_count(&self) -> u32 {
        self.retries
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(RpcError::config("Method name cannot be empty"));
        }
        if matches!(&self.remote_name, Some(name) if name.trim().is_empty()) {
            return Err(RpcError::config(format!(
                "Remote name of method '{}' cannot be empty",
                self.name
            )));
        }
        if self.timeout == Some(Duration::ZERO) {
            return Err(RpcError::config(format!(
                "Timeout of method '{}' must be greater than zero",
                self.name
            )));
        }
        Ok(())
    }
}

/// Build the registry key `Namespace.Service.Method`, trimming a leading `.`
/// when the namespace is empty.
pub fn method_key(namespace: &str, service: &str, method: &str) -> String {
    format!("{}.{}.{}", namespace, service, method)
        .trim_start_matches('.')
        .to_string()
}

/// Immutable description of a remote service as seen by a client.
#[derive(Debug, Clone)]
pub struct ServiceContract {
    namespace: Option<String>,
    name: String,
    methods: HashMap<String, MethodContract>,
}

impl ServiceContract {
    pub fn builder(name: impl Into<String>) -> ServiceContractBuilder {
        ServiceContractBuilder {
            namespace: None,
            name: name.into(),
            methods: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Look up a declared method by its local name.
    pub fn method(&self, name: &str) -> Result<&MethodContract> {
        self.methods.get(name).ok_or_else(|| {
            RpcError::config(format!(
                "Method '{}' is not declared on service '{}'",
                name, self.name
            ))
        })
    }

    /// Fully qualified path of a method, as sent on the wire.
    ///
    /// Fails when the service has no namespace binding.
    pub fn method_path(&self, method: &MethodContract) -> Result<String> {
        let namespace = self.namespace.as_deref().ok_or_else(|| {
            RpcError::config(format!(
                "Service '{}' has no namespace binding",
                self.name
            ))
        })?;
        Ok(method_key(namespace, &self.name, method.exposed_name()))
    }

    pub fn methods(&self) -> impl Iterator<Item = &MethodContract> {
        self.methods.values()
    }
}

/// Builder for [`ServiceContract`].
#[derive(Debug)]
pub struct ServiceContractBuilder {
    namespace: Option<String>,
    name: String,
    methods: Vec<MethodContract>,
}

impl ServiceContractBuilder {
    /// Bind the service to a namespace. An empty namespace is allowed.
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn method(mut self, method: MethodContract) -> Self {
        self.methods.push(method);
        self
    }

    pub fn build(self) -> Result<ServiceContract> {
        if self.name.trim().is_empty() {
            return Err(RpcError::config("Service name cannot be empty"));
        }

        let mut methods = HashMap::with_capacity(self.methods.len());
        for method in self.methods {
            method.validate()?;
            if methods.contains_key(method.name()) {
                return Err(RpcError::config(format!(
                    "Method '{}' is declared twice on service '{}'",
                    method.name(),
                    self.name
                )));
            }
            methods.insert(method.name().to_string(), method);
        }

        Ok(ServiceContract {
            namespace: self.namespace,
            name: self.name,
            methods,
        })
    }
}
