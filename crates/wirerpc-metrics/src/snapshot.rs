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

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Which side of a call the metrics describe
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Server,
    Client,
}

/// Answer to the `_info` built-in method
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerInfo {
    pub role: Role,
    pub version: String,
    pub uptime_ms: u64,
    /// Instance id the server advertises, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    #[serde(default)]
    pub services: Vec<String>,
}

impl ServerInfo {
    pub fn new(role: Role, uptime_ms: u64) -> Self {
        Self {
            role,
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_ms,
            instance_id: None,
            services: Vec::new(),
        }
    }
}

/// Statistics for one `service.method`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MethodMetrics {
    pub call_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub avg_latency_us: u64,
    pub p50_latency_us: u64,
    pub p95_latency_us: u64,
    pub p99_latency_us: u64,
}

/// Requests a client sent to one service instance
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceMetrics {
    pub address: String,
    pub request_count: u64,
    pub failure_count: u64,
    pub last_request_ms: u64,
}

/// Complete metrics snapshot
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub active_connections: u64,
    pub uptime_ms: u64,
    pub methods: HashMap<String, MethodMetrics>,
    /// Per-instance distribution, only tracked on the client side
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instances: Option<HashMap<String, InstanceMetrics>>,
}

impl MetricsSnapshot {
    pub fn new(uptime_ms: u64, include_instances: bool) -> Self {
        Self {
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            active_connections: 0,
            uptime_ms,
            methods: HashMap::new(),
            instances: include_instances.then(HashMap::new),
        }
    }
}
