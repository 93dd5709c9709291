//! WireRPC Metrics Collection
//!
//! This crate provides thread-safe call statistics for WireRPC servers and
//! clients: request counters, per-method latency percentiles, open sessions
//! and, on the client, the spread of calls over service instances.
//!
//! # Architecture
//!
//! - [`MetricsRegistry`]: storage with lock-free counters
//! - [`MetricsCollector`]: records calls and answers the built-in endpoints
//! - [`MetricsSnapshot`]: serializable copy of the current state
//!
//! # Built-in Monitoring Endpoints
//!
//! A server answers two method names itself, whatever service they are
//! addressed to:
//!
//! - **`_metrics`**: the complete [`MetricsSnapshot`]
//! - **`_info`**: a [`ServerInfo`] with role, version and uptime
//!
//! # Usage Example
//!
//! ```rust
//! use wirerpc_metrics::{MetricsCollector, ServerMetricsCollector};
//! use std::time::Instant;
//!
//! let collector = ServerMetricsCollector::new();
//!
//! let start = Instant::now();
//! // ... dispatch a call ...
//! collector.record_call("EchoService.echo", start, true);
//!
//! let snapshot = collector.snapshot();
//! assert_eq!(snapshot.total_requests, 1);
//! ```

mod collector;
mod registry;
mod snapshot;

pub use collector::{
    is_builtin_method, ClientMetricsCollector, MetricsCollector, ServerMetricsCollector,
    INFO_METHOD, METRICS_METHOD,
};
pub use registry::{MetricsConfig, MetricsRegistry};
pub use snapshot::{InstanceMetrics, MethodMetrics, MetricsSnapshot, Role, ServerInfo};
