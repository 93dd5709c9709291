//! Blocking facade for callers running on ordinary threads.
//!
//! Network I/O runs on a small private runtime; the calling thread parks
//! until its own exchange finishes. Do not use these types from inside an
//! async context: blocking on a runtime from within another one panics.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio::runtime::{Builder, Runtime};
use wirerpc_common::discovery::{InstanceSelector, ServiceRegistry};
use wirerpc_common::protocol::{Result, RpcValue};
use wirerpc_metrics::MetricsSnapshot;

use crate::client::{CallOptions, ClientConfig, RpcClient};
use crate::proxy::{ServiceInterface, ServiceProxy};

/// Default number of I/O threads for a blocking client
pub const DEFAULT_IO_THREADS: usize = 2;

/// [`RpcClient`] for synchronous code.
///
/// Cheap to clone; clones share the runtime and the connections.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use wirerpc_client::{BlockingClient, ClientConfig};
/// use wirerpc_registry::{FirstSelector, InMemoryRegistry};
/// use serde_json::json;
///
/// let client = BlockingClient::new(
///     Arc::new(InMemoryRegistry::new()),
///     Arc::new(FirstSelector),
///     ClientConfig::default(),
/// )
/// .unwrap();
///
/// let echoed = client.call("EchoService", "echo", vec![json!("hello")]).unwrap();
/// ```
#[derive(Clone)]
pub struct BlockingClient {
    runtime: Arc<Runtime>,
    inner: Arc<RpcClient>,
}

impl BlockingClient {
    pub fn new(
        registry: Arc<dyn ServiceRegistry>,
        selector: Arc<dyn InstanceSelector>,
        config: ClientConfig,
    ) -> Result<Self> {
        Self::with_io_threads(registry, selector, config, DEFAULT_IO_THREADS)
    }

    /// Builds a client whose I/O runs on `io_threads` worker threads.
    pub fn with_io_threads(
        registry: Arc<dyn ServiceRegistry>,
        selector: Arc<dyn InstanceSelector>,
        config: ClientConfig,
        io_threads: usize,
    ) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(io_threads.max(1))
            .thread_name("wirerpc-io")
            .enable_all()
            .build()?;

        Ok(Self {
            runtime: Arc::new(runtime),
            inner: Arc::new(RpcClient::new(registry, selector, config)),
        })
    }

    /// Calls `service.method` with untyped parameters, blocking the thread.
    pub fn call(&self, service: &str, method: &str, parameters: Vec<RpcValue>) -> Result<RpcValue> {
        self.runtime
            .block_on(self.inner.call(service, method, parameters))
    }

    pub fn invoke(
        &self,
        service: &str,
        method: &str,
        parameter_types: &[String],
        parameters: Vec<RpcValue>,
        options: &CallOptions,
    ) -> Result<RpcValue> {
        self.runtime.block_on(
            self.inner
                .invoke(service, method, parameter_types, parameters, options),
        )
    }

    pub fn proxy(&self, interface: ServiceInterface) -> BlockingServiceProxy {
        BlockingServiceProxy {
            runtime: Arc::clone(&self.runtime),
            inner: ServiceProxy::new(Arc::clone(&self.inner), interface),
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics()
    }

    pub fn pending(&self) -> usize {
        self.inner.pending()
    }

    /// The async client behind this facade.
    pub fn inner(&self) -> &Arc<RpcClient> {
        &self.inner
    }

    pub fn shutdown(&self) {
        self.inner.shutdown();
    }
}

/// [`ServiceProxy`] for synchronous code.
#[derive(Clone)]
pub struct BlockingServiceProxy {
    runtime: Arc<Runtime>,
    inner: ServiceProxy,
}

impl BlockingServiceProxy {
    pub fn with_options(&self, options: CallOptions) -> Self {
        Self {
            runtime: Arc::clone(&self.runtime),
            inner: self.inner.with_options(options),
        }
    }

    pub fn invoke(&self, method: &str, args: Vec<RpcValue>) -> Result<RpcValue> {
        // Identity methods and table checks never need the runtime
        if let Some(value) = self.inner.local_call(method, &args)? {
            return Ok(value);
        }
        self.inner.descriptor(method, args.len())?;
        self.runtime.block_on(self.inner.invoke(method, args))
    }

    pub fn call<R: DeserializeOwned>(&self, method: &str, args: Vec<RpcValue>) -> Result<R> {
        let value = self.invoke(method, args)?;
        Ok(serde_json::from_value(value)?)
    }

    pub fn interface(&self) -> &ServiceInterface {
        self.inner.interface()
    }
}

impl PartialEq for BlockingServiceProxy {
    fn eq(&self, other: &Self) -> bool {
        self.inner == other.inner
    }
}

impl Eq for BlockingServiceProxy {}

impl Hash for BlockingServiceProxy {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.hash(state);
    }
}

impl fmt::Display for BlockingServiceProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

impl fmt::Debug for BlockingServiceProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.inner, f)
    }
}
