use std::sync::atomic::{AtomicUsize, Ordering};

use wirerpc_common::discovery::InstanceSelector;
use wirerpc_common::protocol::ServiceInstance;

/// Always picks the first instance.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstSelector;

impl InstanceSelector for FirstSelector {
    fn select(&self, instances: &[ServiceInstance]) -> Option<ServiceInstance> {
        instances.first().cloned()
    }
}

/// Rotates through the instance list.
///
/// The position is a single counter shared by all services, so given the
/// same list and the same number of prior calls the choice is fixed.
#[derive(Debug, Default)]
pub struct RoundRobinSelector {
    next: AtomicUsize,
}

impl RoundRobinSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of selections made so far.
    pub fn position(&self) -> usize {
        self.next.load(Ordering::Relaxed)
    }
}

impl InstanceSelector for RoundRobinSelector {
    fn select(&self, instances: &[ServiceInstance]) -> Option<ServiceInstance> {
        if instances.is_empty() {
            return None;
        }
        let index = self.next.fetch_add(1, Ordering::Relaxed) % instances.len();
        instances.get(index).cloned()
    }
}
