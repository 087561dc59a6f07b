//! Service instance lookup.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

/// A live service instance, type-erased.
pub type ServiceInstance = Arc<dyn Any + Send + Sync>;

/// Resolves the instance that handles calls for a service type.
pub trait ServiceLocator: Send + Sync + 'static {
    /// Return the instance registered for `service_type`, if any.
    fn locate(&self, service_type: TypeId) -> Option<ServiceInstance>;
}

/// In-memory locator: at most one instance per type.
#[derive(Clone, Default)]
pub struct ServiceCollection {
    services: HashMap<TypeId, ServiceInstance>,
}

impl ServiceCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an instance, replacing any earlier one of the same type.
    pub fn add<S: Send + Sync + 'static>(self, service: S) -> Self {
        self.add_shared(Arc::new(service))
    }

    pub fn add_shared<S: Send + Sync + 'static>(mut self, service: Arc<S>) -> Self {
        self.services.insert(TypeId::of::<S>(), service);
        self
    }

    /// Typed lookup.
    pub fn get<S: Send + Sync + 'static>(&self) -> Option<Arc<S>> {
        self.services
            .get(&TypeId::of::<S>())
            .cloned()
            .and_then(|service| service.downcast::<S>().ok())
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl ServiceLocator for ServiceCollection {
    fn locate(&self, service_type: TypeId) -> Option<ServiceInstance> {
        self.services.get(&service_type).cloned()
    }
}

impl std::fmt::Debug for ServiceCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceCollection")
            .field("services", &self.services.len())
            .finish()
    }
}

/// Last path segment of a type name, without generic arguments.
pub fn short_type_name<S: ?Sized>() -> &'static str {
    let full = std::any::type_name::<S>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
