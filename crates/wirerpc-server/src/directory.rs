use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use crate::service::Service;

/// Maps a logical service name to the local implementation.
///
/// Read-mostly: lookups take a shared lock and clone the `Arc`, so a
/// service deregistered mid-dispatch finishes the calls already routed to it.
#[derive(Default)]
pub struct ServiceDirectory {
    services: RwLock<HashMap<String, Arc<dyn Service>>>,
}

impl ServiceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `service` under `name`, returning the one it replaced.
    pub fn register<S>(&self, name: impl Into<String>, service: S) -> Option<Arc<dyn Service>>
    where
        S: Service + 'static,
    {
        self.register_arc(name, Arc::new(service))
    }

    pub fn register_arc(
        &self,
        name: impl Into<String>,
        service: Arc<dyn Service>,
    ) -> Option<Arc<dyn Service>> {
        let name = name.into();
        tracing::debug!(service = %name, "Service registered");
        self.services
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, service)
    }

    pub fn deregister(&self, name: &str) -> Option<Arc<dyn Service>> {
        let removed = self
            .services
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
        if removed.is_some() {
            tracing::debug!(service = name, "Service deregistered");
        }
        removed
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<dyn Service>> {
        self.services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn service_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ServiceDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDirectory")
            .field("services", &self.service_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{Invocation, ServiceBuilder, ServiceResult};
    use serde_json::json;
    use std::thread;
    use wirerpc_common::protocol::Request;

    fn constant(value: i64) -> impl Fn(&Invocation) -> ServiceResult + Send + Sync {
        move |_: &Invocation| Ok(json!(value))
    }

    fn call(service: &Arc<dyn Service>) -> i64 {
        let inv = Invocation::new(Request::new("c-1", "S", "m"));
        service.invoke(&inv).unwrap().as_i64().unwrap()
    }

    #[test]
    fn test_register_and_lookup() {
        let directory = ServiceDirectory::new();
        assert!(directory.is_empty());
        assert!(directory.lookup("EchoService").is_none());

        directory.register("EchoService", ServiceBuilder::new("EchoService").build());
        assert!(directory.contains("EchoService"));
        assert!(directory.lookup("EchoService").is_some());
        assert_eq!(directory.len(), 1);
    }

    #[test]
    fn test_register_replaces_existing() {
        let directory = ServiceDirectory::new();
        assert!(directory.register("S", constant(1)).is_none());

        let previous = directory.register("S", constant(2)).unwrap();
        assert_eq!(call(&previous), 1);
        assert_eq!(call(&directory.lookup("S").unwrap()), 2);
    }

    #[test]
    fn test_deregister_keeps_outstanding_handles() {
        let directory = ServiceDirectory::new();
        directory.register("S", constant(7));

        let held = directory.lookup("S").unwrap();
        assert!(directory.deregister("S").is_some());
        assert!(directory.deregister("S").is_none());
        assert!(directory.lookup("S").is_none());

        assert_eq!(call(&held), 7);
    }

    #[test]
    fn test_service_names_sorted() {
        let directory = ServiceDirectory::new();
        directory.register("b", constant(0));
        directory.register("a", constant(0));
        directory.register("c", constant(0));
        assert_eq!(directory.service_names(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_concurrent_register_and_lookup() {
        let directory = Arc::new(ServiceDirectory::new());
        directory.register("stable", constant(42));

        let mut handles = Vec::new();
        for i in 0..8 {
            let directory = Arc::clone(&directory);
            handles.push(thread::spawn(move || {
                for j in 0..100 {
                    let name = format!("svc-{}-{}", i, j);
                    directory.register(name.clone(), constant(j));
                    assert_eq!(call(&directory.lookup("stable").unwrap()), 42);
                    directory.deregister(&name);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(directory.service_names(), vec!["stable"]);
    }
}
