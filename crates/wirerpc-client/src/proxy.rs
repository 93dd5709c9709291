//! Typed client-side view of a remote service.
//!
//! A [`ServiceInterface`] is the dispatch table for one service: method
//! names mapped to their parameter type descriptors, built once and shared.
//! A [`ServiceProxy`] pairs it with a client. Calls are checked against the
//! table before anything is sent, and the identity methods every object
//! answers (`to_string`, `hash_code`, `equals`) never leave the process.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::json;
use wirerpc_common::protocol::{Result, RpcError, RpcValue};

use crate::client::{CallOptions, RpcClient};

/// Identity methods answered locally by every proxy
pub const LOCAL_METHODS: [&str; 3] = ["to_string", "hash_code", "equals"];

static NEXT_PROXY_ID: AtomicU64 = AtomicU64::new(1);

/// One remotely callable method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    name: String,
    parameter_types: Vec<String>,
}

impl MethodDescriptor {
    pub fn new(name: impl Into<String>, parameter_types: &[&str]) -> Self {
        Self {
            name: name.into(),
            parameter_types: parameter_types.iter().map(|t| t.to_string()).collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameter_types(&self) -> &[String] {
        &self.parameter_types
    }

    pub fn arity(&self) -> usize {
        self.parameter_types.len()
    }
}

/// Dispatch table for one service.
///
/// # Example
///
/// ```rust
/// use wirerpc_client::ServiceInterface;
///
/// let echo = ServiceInterface::builder("EchoService")
///     .method("echo", &["string"])
///     .method("add", &["i64", "i64"])
///     .build()
///     .unwrap();
///
/// assert_eq!(echo.method("add").unwrap().arity(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInterface {
    service_name: String,
    methods: HashMap<String, MethodDescriptor>,
}

impl ServiceInterface {
    pub fn builder(service_name: impl Into<String>) -> ServiceInterfaceBuilder {
        ServiceInterfaceBuilder {
            service_name: service_name.into(),
            methods: Vec::new(),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn method(&self, name: &str) -> Option<&MethodDescriptor> {
        self.methods.get(name)
    }

    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }
}

pub struct ServiceInterfaceBuilder {
    service_name: String,
    methods: Vec<MethodDescriptor>,
}

impl ServiceInterfaceBuilder {
    pub fn method(mut self, name: impl Into<String>, parameter_types: &[&str]) -> Self {
        self.methods.push(MethodDescriptor::new(name, parameter_types));
        self
    }

    /// Validates and freezes the table.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::InvalidRequest`] for an empty service name, a
    /// method declared twice, or a method shadowing one of [`LOCAL_METHODS`].
    pub fn build(self) -> Result<ServiceInterface> {
        if self.service_name.is_empty() {
            return Err(RpcError::InvalidRequest(
                "Service name must not be empty".to_string(),
            ));
        }

        let mut methods = HashMap::with_capacity(self.methods.len());
        for descriptor in self.methods {
            if LOCAL_METHODS.contains(&descriptor.name.as_str()) {
                return Err(RpcError::InvalidRequest(format!(
                    "{}.{} is answered locally and cannot be remote",
                    self.service_name, descriptor.name
                )));
            }
            if methods.contains_key(&descriptor.name) {
                return Err(RpcError::InvalidRequest(format!(
                    "{}.{} declared twice",
                    self.service_name, descriptor.name
                )));
            }
            methods.insert(descriptor.name.clone(), descriptor);
        }

        Ok(ServiceInterface {
            service_name: self.service_name,
            methods,
        })
    }
}

/// Client-side stand-in for a remote service.
///
/// Clones share identity: they compare equal and hash alike, while two
/// proxies created separately for the same service do not.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use wirerpc_client::{ClientConfig, RpcClient, ServiceInterface, ServiceProxy};
/// use wirerpc_registry::{FirstSelector, InMemoryRegistry};
/// use serde_json::json;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let client = Arc::new(RpcClient::new(
///     Arc::new(InMemoryRegistry::new()),
///     Arc::new(FirstSelector),
///     ClientConfig::default(),
/// ));
/// let interface = ServiceInterface::builder("EchoService")
///     .method("echo", &["string"])
///     .build()?;
///
/// let echo = ServiceProxy::new(client, interface);
/// let reply: String = echo.call("echo", vec![json!("hello")]).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ServiceProxy {
    id: u64,
    client: Arc<RpcClient>,
    interface: Arc<ServiceInterface>,
    options: CallOptions,
}

impl ServiceProxy {
    pub fn new(client: Arc<RpcClient>, interface: ServiceInterface) -> Self {
        Self {
            id: NEXT_PROXY_ID.fetch_add(1, Ordering::Relaxed),
            client,
            interface: Arc::new(interface),
            options: CallOptions::default(),
        }
    }

    /// Applies `options` (timeout, metadata) to every call made through
    /// the returned proxy, which keeps this proxy's identity.
    pub fn with_options(&self, options: CallOptions) -> Self {
        Self {
            options,
            ..self.clone()
        }
    }

    pub fn interface(&self) -> &ServiceInterface {
        &self.interface
    }

    /// Invokes `method` with positional arguments.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::UnknownMethod`] or [`RpcError::InvalidRequest`]
    /// before any I/O if the call does not match the interface, otherwise
    /// whatever [`RpcClient::invoke`] returns.
    pub async fn invoke(&self, method: &str, args: Vec<RpcValue>) -> Result<RpcValue> {
        if let Some(value) = self.local_call(method, &args)? {
            return Ok(value);
        }

        let descriptor = self.descriptor(method, args.len())?;
        self.client
            .invoke(
                &self.interface.service_name,
                method,
                descriptor.parameter_types(),
                args,
                &self.options,
            )
            .await
    }

    /// Invokes `method` and deserializes the result.
    pub async fn call<R: DeserializeOwned>(&self, method: &str, args: Vec<RpcValue>) -> Result<R> {
        let value = self.invoke(method, args).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub(crate) fn descriptor(&self, method: &str, arity: usize) -> Result<&MethodDescriptor> {
        let descriptor = self
            .interface
            .method(method)
            .ok_or_else(|| RpcError::UnknownMethod {
                service: self.interface.service_name.clone(),
                method: method.to_string(),
            })?;
        if descriptor.arity() != arity {
            return Err(RpcError::InvalidRequest(format!(
                "{}.{} takes {} arguments, got {}",
                self.interface.service_name,
                method,
                descriptor.arity(),
                arity
            )));
        }
        Ok(descriptor)
    }

    /// Answers the identity methods without going over the wire.
    ///
    /// `equals` takes one argument and is true when it is this proxy's
    /// string form.
    pub(crate) fn local_call(&self, method: &str, args: &[RpcValue]) -> Result<Option<RpcValue>> {
        let expected = match method {
            "to_string" | "hash_code" => 0,
            "equals" => 1,
            _ => return Ok(None),
        };
        if args.len() != expected {
            return Err(RpcError::InvalidRequest(format!(
                "{} takes {} arguments, got {}",
                method,
                expected,
                args.len()
            )));
        }

        let value = match method {
            "to_string" => json!(self.to_string()),
            "hash_code" => {
                let mut hasher = DefaultHasher::new();
                self.hash(&mut hasher);
                json!(hasher.finish())
            }
            _ => json!(args[0] == json!(self.to_string())),
        };
        Ok(Some(value))
    }
}

impl fmt::Display for ServiceProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}Proxy@{:x}", self.interface.service_name, self.id)
    }
}

impl fmt::Debug for ServiceProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceProxy")
            .field("id", &self.id)
            .field("service", &self.interface.service_name)
            .finish()
    }
}

impl PartialEq for ServiceProxy {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ServiceProxy {}

impl Hash for ServiceProxy {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}
