use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub type CorrelationId = String;
pub type ServiceName = String;
pub type MethodName = String;
pub type RpcValue = serde_json::Value;
pub type Metadata = HashMap<String, RpcValue>;

/// A call to `method_name` on the service published as `service_name`.
///
/// `parameter_types` and `parameters` are parallel lists. The correlation id
/// is fixed at construction; the client builds the request at send time with
/// a freshly generated id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    pub correlation_id: CorrelationId,
    pub service_name: ServiceName,
    pub method_name: MethodName,
    pub parameter_types: Vec<String>,
    pub parameters: Vec<RpcValue>,
    pub metadata: Metadata,
}

impl Request {
    pub fn new(
        correlation_id: impl Into<CorrelationId>,
        service_name: impl Into<ServiceName>,
        method_name: impl Into<MethodName>,
    ) -> Self {
        Request {
            correlation_id: correlation_id.into(),
            service_name: service_name.into(),
            method_name: method_name.into(),
            parameter_types: Vec::new(),
            parameters: Vec::new(),
            metadata: Metadata::new(),
        }
    }

    /// Appends one parameter together with its type descriptor.
    pub fn with_param(mut self, type_descriptor: impl Into<String>, value: RpcValue) -> Self {
        self.parameter_types.push(type_descriptor.into());
        self.parameters.push(value);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: RpcValue) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn arity(&self) -> usize {
        self.parameters.len()
    }
}
