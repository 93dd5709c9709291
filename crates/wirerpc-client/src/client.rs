use std::sync::Arc;
use std::time::{Duration, Instant};

use wirerpc_common::discovery::{InstanceSelector, ServiceRegistry};
use wirerpc_common::protocol::{
    CorrelationIdGenerator, Metadata, Request, Result, RpcError, RpcValue,
};
use wirerpc_common::transport::{encode_request, CodecConfig, DEFAULT_CONNECT_TIMEOUT};
use wirerpc_metrics::{ClientMetricsCollector, MetricsCollector, MetricsSnapshot};

use crate::connection::{Connection, ConnectionConfig, ConnectionManager};
use crate::exchange::ExchangeRegistry;

/// Default time a caller waits for a response (5 seconds)
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Client configuration.
///
/// # Default Configuration
///
/// - `request_timeout`: 5 seconds
/// - `connect_timeout`: 3 seconds
/// - `send_queue_capacity`: 1024 frames per connection
/// - `codec`: 16 MB frame limit
///
/// # Example
///
/// ```rust
/// use wirerpc_client::ClientConfig;
/// use std::time::Duration;
///
/// let config = ClientConfig::default()
///     .with_request_timeout(Duration::from_millis(500))
///     .with_connect_timeout(Duration::from_secs(1));
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub send_queue_capacity: usize,
    pub codec: CodecConfig,
}

impl ClientConfig {
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_send_queue_capacity(mut self, capacity: usize) -> Self {
        self.send_queue_capacity = capacity;
        self
    }

    pub fn with_codec(mut self, codec: CodecConfig) -> Self {
        self.codec = codec;
        self
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            connect_timeout: self.connect_timeout,
            send_queue_capacity: self.send_queue_capacity,
            codec: self.codec,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            send_queue_capacity: 1024,
            codec: CodecConfig::default(),
        }
    }
}

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Overrides [`ClientConfig::request_timeout`] for this call
    pub timeout: Option<Duration>,
    pub metadata: Metadata,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: RpcValue) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Type descriptor for a parameter whose declared type is unknown.
///
/// Used by the untyped [`RpcClient::call`] entry point.
pub fn type_descriptor_of(value: &RpcValue) -> &'static str {
    match value {
        RpcValue::Null => "null",
        RpcValue::Bool(_) => "bool",
        RpcValue::Number(n) if n.is_f64() => "f64",
        RpcValue::Number(_) => "i64",
        RpcValue::String(_) => "string",
        RpcValue::Array(_) => "list",
        RpcValue::Object(_) => "map",
    }
}

/// Removes a call from its connection's in-flight set when the call ends,
/// including when the caller drops the future.
struct TrackedCall<'a> {
    conn: &'a Connection,
    correlation_id: &'a str,
}

impl Drop for TrackedCall<'_> {
    fn drop(&mut self) {
        self.conn.untrack(self.correlation_id);
    }
}

/// WireRPC client.
///
/// Turns a method call into a request: looks the service up in the
/// registry, lets the selector pick one instance, sends the request over a
/// multiplexed connection and waits for the matching response. Nothing is
/// retried; every failure reaches the caller as a typed [`RpcError`].
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use wirerpc_client::{ClientConfig, RpcClient};
/// use wirerpc_registry::{FirstSelector, InMemoryRegistry};
/// use serde_json::json;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let registry = Arc::new(InMemoryRegistry::new());
/// let client = RpcClient::new(registry, Arc::new(FirstSelector), ClientConfig::default());
///
/// let echoed = client.call("EchoService", "echo", vec![json!("hello")]).await?;
/// assert_eq!(echoed, json!("hello"));
/// # Ok(())
/// # }
/// ```
pub struct RpcClient {
    registry: Arc<dyn ServiceRegistry>,
    selector: Arc<dyn InstanceSelector>,
    connections: ConnectionManager,
    exchanges: ExchangeRegistry,
    ids: CorrelationIdGenerator,
    metrics: ClientMetricsCollector,
    config: ClientConfig,
}

impl RpcClient {
    pub fn new(
        registry: Arc<dyn ServiceRegistry>,
        selector: Arc<dyn InstanceSelector>,
        config: ClientConfig,
    ) -> Self {
        let exchanges = ExchangeRegistry::new();
        Self {
            registry,
            selector,
            connections: ConnectionManager::new(exchanges.clone(), config.connection_config()),
            exchanges,
            ids: CorrelationIdGenerator::new(),
            metrics: ClientMetricsCollector::new(),
            config,
        }
    }

    /// Calls `service.method` with untyped parameters.
    ///
    /// Type descriptors are derived from the JSON kind of each value.
    pub async fn call(
        &self,
        service: &str,
        method: &str,
        parameters: Vec<RpcValue>,
    ) -> Result<RpcValue> {
        let types: Vec<String> = parameters
            .iter()
            .map(|value| type_descriptor_of(value).to_string())
            .collect();
        self.invoke(service, method, &types, parameters, &CallOptions::default())
            .await
    }

    /// Calls `service.method` and waits for its result.
    ///
    /// # Errors
    ///
    /// - [`RpcError::NoInstanceAvailable`] if the registry knows no instance;
    ///   nothing is sent
    /// - [`RpcError::ConnectFailure`] if the chosen instance is unreachable
    /// - [`RpcError::RemoteFailure`] if the remote method raised an error
    /// - [`RpcError::Timeout`] if no response arrived in time; the remote
    ///   side may still run the call
    /// - [`RpcError::ConnectionClosed`] if the connection died mid-call
    pub async fn invoke(
        &self,
        service: &str,
        method: &str,
        parameter_types: &[String],
        parameters: Vec<RpcValue>,
        options: &CallOptions,
    ) -> Result<RpcValue> {
        if parameter_types.len() != parameters.len() {
            return Err(RpcError::InvalidRequest(format!(
                "{}.{} given {} type descriptors for {} parameters",
                service,
                method,
                parameter_types.len(),
                parameters.len()
            )));
        }

        let start = Instant::now();
        let metric_key = format!("{}.{}", service, method);

        let instances = self.registry.get_instances(service)?;
        if instances.is_empty() {
            tracing::debug!(service, "No instances registered");
            return Err(RpcError::NoInstanceAvailable(service.to_string()));
        }
        let instance = self
            .selector
            .select(&instances)
            .ok_or_else(|| RpcError::NoInstanceAvailable(service.to_string()))?;

        let address = instance.address();
        let result = async {
            let conn = self.connections.connect(&instance).await?;

            let request = Request {
                correlation_id: self.ids.next_id(),
                service_name: service.to_string(),
                method_name: method.to_string(),
                parameter_types: parameter_types.to_vec(),
                parameters,
                metadata: options.metadata.clone(),
            };
            let frame = encode_request(&request, &self.config.codec)?;
            let correlation_id = request.correlation_id.clone();

            let exchange = self.exchanges.register(request)?;
            conn.track(&correlation_id)?;
            let _tracked = TrackedCall {
                conn: &conn,
                correlation_id: &correlation_id,
            };
            tracing::debug!(
                correlation_id = %correlation_id,
                instance = %instance,
                method = %metric_key,
                "Sending request"
            );

            let timeout = options.timeout.unwrap_or(self.config.request_timeout);
            let outcome = match self.connections.send(&conn, frame).await {
                // Dropping the exchange cancels it
                Err(e) => Err(e),
                Ok(()) => self.exchanges.wait(exchange, timeout).await,
            };
            outcome
        }
        .await;

        let success = result.is_ok();
        self.metrics.record_call(&metric_key, start, success);
        // A remote error still means the instance answered
        let reached = success || matches!(result, Err(RpcError::RemoteFailure { .. }));
        self.metrics.record_instance_request(&address, reached);

        if let Err(e) = &result {
            tracing::debug!(method = %metric_key, instance = %address, error = %e, "Call failed");
        }
        result
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Number of calls currently waiting for a response.
    pub fn pending(&self) -> usize {
        self.exchanges.len()
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    /// Closes all connections, failing any call still in flight.
    pub fn shutdown(&self) {
        tracing::info!("Client shutting down");
        self.connections.shutdown();
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("pending", &self.pending())
            .field("connections", &self.connections)
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::net::TcpListener;
    use wirerpc_common::protocol::{Response, ServiceInstance};
    use wirerpc_common::transport::{FrameDecoder, Message, TcpTransportAsync};

    /// Registry stub counting lookups.
    #[derive(Default)]
    struct StaticRegistry {
        instances: Mutex<Vec<ServiceInstance>>,
        lookups: AtomicUsize,
    }

    impl ServiceRegistry for StaticRegistry {
        fn register(&self, instance: ServiceInstance) -> Result<()> {
            self.instances.lock().unwrap().push(instance);
            Ok(())
        }

        fn deregister(&self, instance: &ServiceInstance) -> Result<()> {
            self.instances.lock().unwrap().retain(|i| i.id() != instance.id());
            Ok(())
        }

        fn get_instances(&self, service_name: &str) -> Result<Vec<ServiceInstance>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .instances
                .lock()
                .unwrap()
                .iter()
                .filter(|i| i.service_name() == service_name)
                .cloned()
                .collect())
        }
    }

    struct First;

    impl InstanceSelector for First {
        fn select(&self, instances: &[ServiceInstance]) -> Option<ServiceInstance> {
            instances.first().cloned()
        }
    }

    /// Server answering each request with `[method, params...]`, or never
    /// answering `hang`.
    async fn spawn_server() -> ServiceInstance {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let mut decoder = FrameDecoder::new(CodecConfig::default());
                    let transport = TcpTransportAsync::default();
                    while let Ok(Some(Message::Request(request))) =
                        TcpTransportAsync::read_message(&mut stream, &mut decoder).await
                    {
                        let reply = match request.method_name.as_str() {
                            "hang" => continue,
                            "fail" => Response::error(
                                request.correlation_id,
                                "IllegalStateException",
                                "boom",
                            ),
                            _ => {
                                let mut out = vec![json!(request.method_name)];
                                out.extend(request.parameters);
                                out.push(json!(request.metadata));
                                Response::success(request.correlation_id, json!(out))
                            }
                        };
                        if transport.write_message(&mut stream, &reply.into()).await.is_err() {
                            return;
                        }
                    }
                });
            }
        });
        ServiceInstance::new("test-1", "TestService", "127.0.0.1", port)
    }

    fn client_with(registry: Arc<StaticRegistry>) -> RpcClient {
        RpcClient::new(
            registry,
            Arc::new(First),
            ClientConfig::default().with_request_timeout(Duration::from_secs(5)),
        )
    }

    #[test]
    fn test_config_default() {
        let config = ClientConfig::default();
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.send_queue_capacity, 1024);
    }

    #[test]
    fn test_type_descriptor_of() {
        assert_eq!(type_descriptor_of(&json!(1)), "i64");
        assert_eq!(type_descriptor_of(&json!(1.5)), "f64");
        assert_eq!(type_descriptor_of(&json!("x")), "string");
        assert_eq!(type_descriptor_of(&json!([1])), "list");
        assert_eq!(type_descriptor_of(&json!({"a": 1})), "map");
        assert_eq!(type_descriptor_of(&json!(null)), "null");
    }

    #[tokio::test]
    async fn test_no_instance_fails_immediately() {
        let registry = Arc::new(StaticRegistry::default());
        let client = client_with(Arc::clone(&registry));

        let result = client.call("Missing", "echo", vec![json!("x")]).await;
        match result {
            Err(RpcError::NoInstanceAvailable(service)) => assert_eq!(service, "Missing"),
            other => panic!("Expected NoInstanceAvailable, got {:?}", other),
        }
        assert_eq!(registry.lookups.load(Ordering::SeqCst), 1);
        assert_eq!(client.connections().connection_count(), 0);
        assert_eq!(client.pending(), 0);
    }

    #[tokio::test]
    async fn test_call_round_trip_with_metadata() {
        let registry = Arc::new(StaticRegistry::default());
        registry.register(spawn_server().await).unwrap();
        let client = client_with(registry);

        let options = CallOptions::new().with_metadata("trace", json!("t-1"));
        let value = client
            .invoke(
                "TestService",
                "echo",
                &["string".to_string()],
                vec![json!("hello")],
                &options,
            )
            .await
            .unwrap();
        assert_eq!(value, json!(["echo", "hello", {"trace": "t-1"}]));
        assert_eq!(client.pending(), 0);

        let snapshot = client.metrics();
        assert_eq!(snapshot.methods["TestService.echo"].success_count, 1);
    }

    #[tokio::test]
    async fn test_remote_failure_is_rethrown() {
        let registry = Arc::new(StaticRegistry::default());
        registry.register(spawn_server().await).unwrap();
        let client = client_with(registry);

        match client.call("TestService", "fail", vec![]).await {
            Err(RpcError::RemoteFailure { error_type, message }) => {
                assert_eq!(error_type, "IllegalStateException");
                assert_eq!(message, "boom");
            }
            other => panic!("Expected RemoteFailure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout_override_leaves_no_exchange() {
        let registry = Arc::new(StaticRegistry::default());
        registry.register(spawn_server().await).unwrap();
        let client = client_with(registry);

        let options = CallOptions::new().with_timeout(Duration::from_millis(50));
        let result = client
            .invoke("TestService", "hang", &[], vec![], &options)
            .await;
        assert!(matches!(result, Err(RpcError::Timeout { timeout_ms: 50, .. })));
        assert_eq!(client.pending(), 0);

        // The connection survives a timed-out exchange
        assert_eq!(client.connections().connection_count(), 1);
        let value = client.call("TestService", "ping", vec![]).await.unwrap();
        assert_eq!(value, json!(["ping", {}]));
    }

    #[tokio::test]
    async fn test_dropped_calls_leave_connection_clean() {
        let instance = spawn_server().await;
        let registry = Arc::new(StaticRegistry::default());
        registry.register(instance.clone()).unwrap();
        let client = client_with(registry);

        // Establish the connection first so every call reaches the wire
        client.call("TestService", "ping", vec![]).await.unwrap();

        for _ in 0..100 {
            let options = CallOptions::default();
            let call = client.invoke("TestService", "hang", &[], vec![], &options);
            assert!(tokio::time::timeout(Duration::from_millis(5), call).await.is_err());
        }

        let conn = client.connections().connect(&instance).await.unwrap();
        assert_eq!(conn.in_flight(), 0);
        assert_eq!(client.pending(), 0);
        assert_eq!(client.connections().connection_count(), 1);
    }

    #[tokio::test]
    async fn test_connect_failure_surfaces() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let registry = Arc::new(StaticRegistry::default());
        registry
            .register(ServiceInstance::new("gone", "TestService", "127.0.0.1", port))
            .unwrap();
        let client = client_with(registry);

        let result = client.call("TestService", "echo", vec![]).await;
        assert!(matches!(result, Err(RpcError::ConnectFailure { .. })));
        assert_eq!(client.pending(), 0);
    }

    #[tokio::test]
    async fn test_mismatched_descriptors_rejected() {
        let registry = Arc::new(StaticRegistry::default());
        let client = client_with(registry);
        let result = client
            .invoke("TestService", "echo", &[], vec![json!(1)], &CallOptions::default())
            .await;
        assert!(matches!(result, Err(RpcError::InvalidRequest(_))));
    }
}
