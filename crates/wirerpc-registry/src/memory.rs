use std::collections::HashMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};

use wirerpc_common::discovery::ServiceRegistry;
use wirerpc_common::protocol::{Result, ServiceInstance};

/// Process-local [`ServiceRegistry`].
///
/// Instances are kept per service in registration order, so an ordered
/// selector sees the same list on every call. Registering an instance id
/// that is already present replaces the earlier entry in place.
///
/// # Example
///
/// ```
/// use wirerpc_common::{ServiceInstance, ServiceRegistry};
/// use wirerpc_registry::InMemoryRegistry;
///
/// let registry = InMemoryRegistry::new();
/// registry.register(ServiceInstance::new("a", "EchoService", "127.0.0.1", 7001)).unwrap();
/// registry.register(ServiceInstance::new("b", "EchoService", "127.0.0.1", 7002)).unwrap();
///
/// let instances = registry.get_instances("EchoService").unwrap();
/// assert_eq!(instances.len(), 2);
/// assert_eq!(instances[0].id(), "a");
/// ```
#[derive(Default)]
pub struct InMemoryRegistry {
    services: RwLock<HashMap<String, Vec<ServiceInstance>>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry pre-populated with `instances`.
    pub fn with_instances(instances: impl IntoIterator<Item = ServiceInstance>) -> Self {
        let registry = Self::new();
        for instance in instances {
            registry.insert(instance);
        }
        registry
    }

    fn insert(&self, instance: ServiceInstance) {
        let mut services = self.services.write().unwrap_or_else(PoisonError::into_inner);
        let instances = services
            .entry(instance.service_name().to_string())
            .or_default();
        match instances.iter_mut().find(|i| i.id() == instance.id()) {
            Some(existing) => *existing = instance,
            None => instances.push(instance),
        }
    }

    /// Names of services with at least one instance, sorted.
    pub fn service_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, instances)| !instances.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Every registered instance, grouped by sorted service name.
    pub fn all_instances(&self) -> Vec<ServiceInstance> {
        let services = self.services.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<&String> = services.keys().collect();
        names.sort();
        names
            .into_iter()
            .flat_map(|name| services[name].iter().cloned())
            .collect()
    }

    pub fn contains(&self, instance: &ServiceInstance) -> bool {
        self.services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(instance.service_name())
            .is_some_and(|instances| instances.iter().any(|i| i.id() == instance.id()))
    }

    pub fn len(&self) -> usize {
        self.services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(Vec::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ServiceRegistry for InMemoryRegistry {
    fn register(&self, instance: ServiceInstance) -> Result<()> {
        tracing::debug!(instance = %instance, "Instance registered");
        self.insert(instance);
        Ok(())
    }

    /// Removes the instance with the same service and id; absent is fine.
    fn deregister(&self, instance: &ServiceInstance) -> Result<()> {
        let mut services = self.services.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(instances) = services.get_mut(instance.service_name()) {
            let before = instances.len();
            instances.retain(|i| i.id() != instance.id());
            if instances.len() != before {
                tracing::debug!(instance = %instance, "Instance deregistered");
            }
            if instances.is_empty() {
                services.remove(instance.service_name());
            }
        }
        Ok(())
    }

    fn get_instances(&self, service_name: &str) -> Result<Vec<ServiceInstance>> {
        Ok(self
            .services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(service_name)
            .cloned()
            .unwrap_or_default())
    }
}

impl fmt::Debug for InMemoryRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryRegistry")
            .field("instances", &self.all_instances())
            .finish()
    }
}
