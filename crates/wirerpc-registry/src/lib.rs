//! WireRPC Registry
//!
//! Implementations of the discovery traits from `wirerpc-common`:
//!
//! - [`InMemoryRegistry`]: process-local [`ServiceRegistry`](wirerpc_common::ServiceRegistry)
//! - [`FirstSelector`] and [`RoundRobinSelector`]: [`InstanceSelector`](wirerpc_common::InstanceSelector) policies
//! - [`HealthChecker`]: evicts instances that stop answering and restores them on recovery

pub mod health;
pub mod memory;
pub mod selector;

pub use health::{HealthCheckConfig, HealthChecker, PROBE_METHOD};
pub use memory::InMemoryRegistry;
pub use selector::{FirstSelector, RoundRobinSelector};
