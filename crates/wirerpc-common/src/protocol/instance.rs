use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One running, addressable copy of a service as seen by discovery.
///
/// Instances are immutable once built: fields are only reachable through
/// accessors, and the `with_*` methods consume the value before it is shared.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ServiceInstance {
    id: String,
    host: String,
    port: u16,
    service_name: String,
    metadata: BTreeMap<String, String>,
}

impl ServiceInstance {
    pub fn new(
        id: impl Into<String>,
        service_name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            port,
            service_name: service_name.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// `host:port`, suitable for `TcpStream::connect`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for ServiceInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}@{}:{}]", self.service_name, self.id, self.host, self.port)
    }
}
