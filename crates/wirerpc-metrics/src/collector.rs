// Copyright 2025 WireRPC Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::registry::{MetricsConfig, MetricsRegistry};
use crate::snapshot::{MetricsSnapshot, Role, ServerInfo};
use serde_json::json;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;
use wirerpc_common::protocol::{Response, Result, RpcError};

/// Built-in method returning a [`MetricsSnapshot`]
pub const METRICS_METHOD: &str = "_metrics";

/// Built-in method returning a [`ServerInfo`]
pub const INFO_METHOD: &str = "_info";

/// Whether `method` names a built-in endpoint.
pub fn is_builtin_method(method: &str) -> bool {
    method == METRICS_METHOD || method == INFO_METHOD
}

/// Collects call statistics and answers the built-in endpoints.
///
/// # Built-in Methods
///
/// - `_metrics`: the full [`MetricsSnapshot`] as JSON
/// - `_info`: a [`ServerInfo`] with role, version and uptime
///
/// The server dispatcher asks [`is_builtin`](Self::is_builtin) before looking
/// up the service, so these names work under any service name.
///
/// # Example
///
/// ```rust
/// use wirerpc_metrics::{MetricsCollector, ServerMetricsCollector};
/// use std::time::Instant;
///
/// let collector = ServerMetricsCollector::new();
///
/// if collector.is_builtin("_info") {
///     let response = collector.handle_builtin("_info", "c-1").unwrap();
///     assert!(response.is_success());
/// }
///
/// let start = Instant::now();
/// // ... execute method ...
/// collector.record_call("EchoService.echo", start, true);
/// ```
pub trait MetricsCollector: Send + Sync {
    fn is_builtin(&self, method: &str) -> bool {
        is_builtin_method(method)
    }

    /// Answers a built-in endpoint with a response for `correlation_id`.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::UnknownMethod`] for any other method name.
    fn handle_builtin(&self, method: &str, correlation_id: &str) -> Result<Response>;

    /// Records one finished call started at `start_time`.
    fn record_call(&self, method: &str, start_time: Instant, success: bool);

    fn snapshot(&self) -> MetricsSnapshot;
}

fn unknown_builtin(method: &str) -> RpcError {
    RpcError::UnknownMethod {
        service: "<builtin>".to_string(),
        method: method.to_string(),
    }
}

fn elapsed_us(start_time: Instant) -> u64 {
    start_time.elapsed().as_micros() as u64
}

/// Metrics for a WireRPC server.
///
/// Tracks per-method dispatch statistics and open sessions. The `_info`
/// answer carries the advertised instance id and the published service
/// names once the server has set them.
pub struct ServerMetricsCollector {
    registry: Arc<MetricsRegistry>,
    identity: RwLock<(Option<String>, Vec<String>)>,
}

impl ServerMetricsCollector {
    pub fn new() -> Self {
        Self::with_registry(Arc::new(MetricsRegistry::new()))
    }

    pub fn with_config(config: MetricsConfig) -> Self {
        Self::with_registry(Arc::new(MetricsRegistry::with_config(config)))
    }

    pub fn with_registry(registry: Arc<MetricsRegistry>) -> Self {
        Self {
            registry,
            identity: RwLock::new((None, Vec::new())),
        }
    }

    /// Sets what `_info` reports about this server.
    pub fn set_identity(&self, instance_id: impl Into<String>, services: Vec<String>) {
        *self.identity.write().unwrap_or_else(PoisonError::into_inner) =
            (Some(instance_id.into()), services);
    }

    pub fn connection_opened(&self) {
        self.registry.increment_active_connections();
    }

    pub fn connection_closed(&self) {
        self.registry.decrement_active_connections();
    }

    pub fn info(&self) -> ServerInfo {
        let mut info = ServerInfo::new(Role::Server, self.registry.uptime_ms());
        let identity = self.identity.read().unwrap_or_else(PoisonError::into_inner);
        info.instance_id = identity.0.clone();
        info.services = identity.1.clone();
        info
    }
}

impl Default for ServerMetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector for ServerMetricsCollector {
    fn handle_builtin(&self, method: &str, correlation_id: &str) -> Result<Response> {
        match method {
            METRICS_METHOD => Ok(Response::success(correlation_id, json!(self.snapshot()))),
            INFO_METHOD => Ok(Response::success(correlation_id, json!(self.info()))),
            other => Err(unknown_builtin(other)),
        }
    }

    fn record_call(&self, method: &str, start_time: Instant, success: bool) {
        self.registry
            .record_method_call(method, elapsed_us(start_time), success);
    }

    fn snapshot(&self) -> MetricsSnapshot {
        self.registry.snapshot(false)
    }
}

/// Metrics for a WireRPC client.
///
/// On top of per-method outcomes it records how calls were spread over
/// service instances, which shows what the selector is doing.
///
/// # Example
///
/// ```rust
/// use wirerpc_metrics::{ClientMetricsCollector, MetricsCollector};
///
/// let collector = ClientMetricsCollector::new();
/// collector.record_instance_request("127.0.0.1:9001", true);
/// collector.record_instance_request("127.0.0.1:9002", true);
///
/// let snapshot = collector.snapshot();
/// assert_eq!(snapshot.instances.unwrap().len(), 2);
/// ```
pub struct ClientMetricsCollector {
    registry: Arc<MetricsRegistry>,
}

impl ClientMetricsCollector {
    pub fn new() -> Self {
        Self::with_registry(Arc::new(MetricsRegistry::new()))
    }

    pub fn with_config(config: MetricsConfig) -> Self {
        Self::with_registry(Arc::new(MetricsRegistry::with_config(config)))
    }

    pub fn with_registry(registry: Arc<MetricsRegistry>) -> Self {
        Self { registry }
    }

    pub fn record_instance_request(&self, address: &str, success: bool) {
        self.registry.record_instance_request(address, success);
    }
}

impl Default for ClientMetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector for ClientMetricsCollector {
    fn handle_builtin(&self, method: &str, correlation_id: &str) -> Result<Response> {
        match method {
            METRICS_METHOD => Ok(Response::success(correlation_id, json!(self.snapshot()))),
            INFO_METHOD => {
                let info = ServerInfo::new(Role::Client, self.registry.uptime_ms());
                Ok(Response::success(correlation_id, json!(info)))
            }
            other => Err(unknown_builtin(other)),
        }
    }

    fn record_call(&self, method: &str, start_time: Instant, success: bool) {
        self.registry
            .record_method_call(method, elapsed_us(start_time), success);
    }

    fn snapshot(&self) -> MetricsSnapshot {
        self.registry.snapshot(true)
    }
}
