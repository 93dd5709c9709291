//! Service implementations exposed by a server.
//!
//! A [`Service`] receives an [`Invocation`] (the decoded request) and returns
//! either a value or a [`ServiceError`]. Most services are assembled from
//! closures with [`ServiceBuilder`], which produces a [`MethodTable`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use thiserror::Error;
use wirerpc_common::protocol::{Metadata, RemoteError, Request, RpcValue};

/// Error kind for arguments that are missing or of the wrong shape
pub const ILLEGAL_ARGUMENT: &str = "IllegalArgumentException";

/// Error kind for calls that are invalid in the service's current state
pub const ILLEGAL_STATE: &str = "IllegalStateException";

/// Error kind for a method the service does not expose
pub const NO_SUCH_METHOD: &str = "NoSuchMethodException";

/// Error kind for a handler that panicked
pub const PANIC: &str = "Panic";

pub type ServiceResult = std::result::Result<RpcValue, ServiceError>;

/// Failure raised by a service method.
///
/// Carried back to the caller inside an `ERROR` response, where it surfaces
/// as `RpcError::RemoteFailure` with the same type and message.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{error_type}: {message}")]
pub struct ServiceError {
    pub error_type: String,
    pub message: String,
}

impl ServiceError {
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            message: message.into(),
        }
    }

    pub fn illegal_argument(message: impl Into<String>) -> Self {
        Self::new(ILLEGAL_ARGUMENT, message)
    }

    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::new(ILLEGAL_STATE, message)
    }

    pub fn no_such_method(service: &str, method: &str) -> Self {
        Self::new(NO_SUCH_METHOD, format!("{}.{}", service, method))
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        Self::illegal_argument(err.to_string())
    }
}

impl From<ServiceError> for RemoteError {
    fn from(err: ServiceError) -> Self {
        RemoteError::new(err.error_type, err.message)
    }
}

/// One decoded call as seen by a service.
#[derive(Debug, Clone)]
pub struct Invocation {
    request: Request,
}

impl Invocation {
    pub fn new(request: Request) -> Self {
        Self { request }
    }

    pub fn correlation_id(&self) -> &str {
        &self.request.correlation_id
    }

    pub fn service_name(&self) -> &str {
        &self.request.service_name
    }

    pub fn method_name(&self) -> &str {
        &self.request.method_name
    }

    pub fn parameter_types(&self) -> &[String] {
        &self.request.parameter_types
    }

    pub fn parameters(&self) -> &[RpcValue] {
        &self.request.parameters
    }

    pub fn metadata(&self) -> &Metadata {
        &self.request.metadata
    }

    pub fn arity(&self) -> usize {
        self.request.arity()
    }

    /// Deserializes the argument at `index`.
    ///
    /// A missing argument or one that does not fit `T` is an
    /// [`ILLEGAL_ARGUMENT`] error.
    pub fn arg<T: DeserializeOwned>(&self, index: usize) -> Result<T, ServiceError> {
        let value = self.request.parameters.get(index).ok_or_else(|| {
            ServiceError::illegal_argument(format!(
                "{}.{} expects an argument at position {}, got {}",
                self.service_name(),
                self.method_name(),
                index,
                self.arity()
            ))
        })?;
        serde_json::from_value(value.clone()).map_err(|e| {
            ServiceError::illegal_argument(format!("Argument {}: {}", index, e))
        })
    }

    pub fn into_request(self) -> Request {
        self.request
    }
}

/// A locally registered service implementation.
///
/// `invoke` runs on a blocking worker thread, so it may do blocking work
/// without stalling other connections.
pub trait Service: Send + Sync {
    fn invoke(&self, invocation: &Invocation) -> ServiceResult;

    /// Methods this service exposes, if it can enumerate them.
    fn method_names(&self) -> Vec<String> {
        Vec::new()
    }
}

impl<F> Service for F
where
    F: Fn(&Invocation) -> ServiceResult + Send + Sync,
{
    fn invoke(&self, invocation: &Invocation) -> ServiceResult {
        self(invocation)
    }
}

type Handler = Arc<dyn Fn(&Invocation) -> ServiceResult + Send + Sync>;

/// Builds a [`MethodTable`] from one closure per method.
///
/// # Example
///
/// ```rust
/// use wirerpc_server::{ServiceBuilder, ServiceError};
/// use serde_json::json;
///
/// let echo = ServiceBuilder::new("EchoService")
///     .method("echo", |inv| Ok(json!(inv.arg::<String>(0)?)))
///     .method("fail", |_| Err(ServiceError::illegal_state("boom")))
///     .build();
///
/// assert_eq!(echo.method_names(), vec!["echo", "fail"]);
/// ```
pub struct ServiceBuilder {
    name: String,
    handlers: HashMap<String, Handler>,
}

impl ServiceBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            handlers: HashMap::new(),
        }
    }

    /// Adds a method; registering the same name again replaces the handler.
    pub fn method<F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&Invocation) -> ServiceResult + Send + Sync + 'static,
    {
        self.handlers.insert(name.into(), Arc::new(handler));
        self
    }

    pub fn build(self) -> MethodTable {
        MethodTable {
            name: self.name,
            handlers: self.handlers,
        }
    }
}

/// Name-to-handler table produced by [`ServiceBuilder`].
pub struct MethodTable {
    name: String,
    handlers: HashMap<String, Handler>,
}

impl MethodTable {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn method_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Service for MethodTable {
    fn invoke(&self, invocation: &Invocation) -> ServiceResult {
        match self.handlers.get(invocation.method_name()) {
            Some(handler) => handler(invocation),
            None => Err(ServiceError::no_such_method(
                &self.name,
                invocation.method_name(),
            )),
        }
    }

    fn method_names(&self) -> Vec<String> {
        MethodTable::method_names(self)
    }
}

impl fmt::Debug for MethodTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodTable")
            .field("name", &self.name)
            .field("methods", &self.method_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn invocation(method: &str, params: Vec<RpcValue>) -> Invocation {
        let mut request = Request::new("c-1", "EchoService", method);
        for value in params {
            request = request.with_param("string", value);
        }
        Invocation::new(request.with_metadata("trace", json!("t-1")))
    }

    #[test]
    fn test_method_table_dispatches_by_name() {
        let table = ServiceBuilder::new("EchoService")
            .method("echo", |inv| Ok(json!(inv.arg::<String>(0)?)))
            .method("upper", |inv| Ok(json!(inv.arg::<String>(0)?.to_uppercase())))
            .build();

        assert_eq!(
            table.invoke(&invocation("echo", vec![json!("hello")])).unwrap(),
            json!("hello")
        );
        assert_eq!(
            table.invoke(&invocation("upper", vec![json!("hello")])).unwrap(),
            json!("HELLO")
        );
    }

    #[test]
    fn test_unknown_method_is_no_such_method() {
        let table = ServiceBuilder::new("EchoService").build();
        let err = table.invoke(&invocation("missing", vec![])).unwrap_err();
        assert_eq!(err.error_type, NO_SUCH_METHOD);
        assert_eq!(err.message, "EchoService.missing");
    }

    #[test]
    fn test_arg_errors_are_illegal_argument() {
        let inv = invocation("echo", vec![json!("text")]);

        let missing = inv.arg::<String>(1).unwrap_err();
        assert_eq!(missing.error_type, ILLEGAL_ARGUMENT);

        let wrong_type = inv.arg::<i64>(0).unwrap_err();
        assert_eq!(wrong_type.error_type, ILLEGAL_ARGUMENT);
        assert!(wrong_type.message.starts_with("Argument 0"));
    }

    #[test]
    fn test_invocation_exposes_request() {
        let inv = invocation("echo", vec![json!("a"), json!("b")]);
        assert_eq!(inv.correlation_id(), "c-1");
        assert_eq!(inv.service_name(), "EchoService");
        assert_eq!(inv.arity(), 2);
        assert_eq!(inv.parameter_types(), ["string", "string"]);
        assert_eq!(inv.metadata().get("trace"), Some(&json!("t-1")));
    }

    #[test]
    fn test_closure_is_a_service() {
        let service = |inv: &Invocation| -> ServiceResult { Ok(json!(inv.arity())) };
        let result = service.invoke(&invocation("count", vec![json!(1), json!(2)]));
        assert_eq!(result.unwrap(), json!(2));
        assert!(Service::method_names(&service).is_empty());
    }

    #[test]
    fn test_service_error_converts_to_remote_error() {
        let remote: RemoteError = ServiceError::illegal_state("boom").into();
        assert_eq!(remote, RemoteError::new(ILLEGAL_STATE, "boom"));
    }
}
