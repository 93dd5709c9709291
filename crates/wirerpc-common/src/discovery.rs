//! Discovery seams consumed by the client and the server.
//!
//! Neither trait is implemented here; `wirerpc-registry` provides the
//! in-process implementations and anything else (a coordination service, a
//! static list, a cached view) can be plugged in behind the same traits.

use crate::protocol::{Result, ServiceInstance};

/// Where servers publish instances and clients look them up.
///
/// Caching and refresh are the implementation's concern; the client calls
/// [`get_instances`](Self::get_instances) before every invocation.
pub trait ServiceRegistry: Send + Sync {
    fn register(&self, instance: ServiceInstance) -> Result<()>;

    /// Removing an instance that is not registered is not an error.
    fn deregister(&self, instance: &ServiceInstance) -> Result<()>;

    fn get_instances(&self, service_name: &str) -> Result<Vec<ServiceInstance>>;
}

/// Picks one instance for a call.
///
/// Returns `None` for an empty list. Given the same list and the same
/// internal state, an implementation must make the same choice.
pub trait InstanceSelector: Send + Sync {
    fn select(&self, instances: &[ServiceInstance]) -> Option<ServiceInstance>;
}

impl<T: ServiceRegistry + ?Sized> ServiceRegistry for std::sync::Arc<T> {
    fn register(&self, instance: ServiceInstance) -> Result<()> {
        (**self).register(instance)
    }

    fn deregister(&self, instance: &ServiceInstance) -> Result<()> {
        (**self).deregister(instance)
    }

    fn get_instances(&self, service_name: &str) -> Result<Vec<ServiceInstance>> {
        (**self).get_instances(service_name)
    }
}

impl<T: InstanceSelector + ?Sized> InstanceSelector for std::sync::Arc<T> {
    fn select(&self, instances: &[ServiceInstance]) -> Option<ServiceInstance> {
        (**self).select(instances)
    }
}
