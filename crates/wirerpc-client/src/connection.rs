use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use wirerpc_common::protocol::{CorrelationId, Result, RpcError, ServiceInstance};
use wirerpc_common::transport::{
    map_io_error, CodecConfig, FrameDecoder, Message, TcpTransportAsync, DEFAULT_CONNECT_TIMEOUT,
};

use crate::exchange::ExchangeRegistry;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Connection manager configuration.
///
/// # Default Configuration
///
/// - `connect_timeout`: 3 seconds
/// - `send_queue_capacity`: 1024 frames per connection
/// - `codec`: 16 MB frame limit
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Upper bound on establishing one TCP connection
    pub connect_timeout: Duration,
    /// Frames buffered per connection before `send` waits
    pub send_queue_capacity: usize,
    pub codec: CodecConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            send_queue_capacity: 1024,
            codec: CodecConfig::default(),
        }
    }
}

/// Correlation ids in flight on one connection.
///
/// `closed` lives under the same lock so an id can never be tracked on a
/// connection whose in-flight set was already drained.
#[derive(Default)]
struct InFlight {
    closed: bool,
    ids: HashSet<CorrelationId>,
}

/// State shared between a connection handle and its I/O tasks.
struct Shared {
    id: u64,
    addr: String,
    in_flight: Mutex<InFlight>,
    exchanges: ExchangeRegistry,
    /// Set once the connection is shut; both I/O tasks exit on it
    stop: watch::Sender<bool>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, InFlight> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks the connection dead, stops both I/O tasks and fails everything
    /// still in flight.
    ///
    /// Only the first call has any effect.
    fn shut(&self, reason: &str, make_error: impl Fn(String) -> RpcError) {
        let ids = {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            std::mem::take(&mut state.ids)
        };
        self.stop.send_replace(true);

        if !ids.is_empty() {
            tracing::debug!(
                connection = self.id,
                addr = %self.addr,
                in_flight = ids.len(),
                "Failing in-flight exchanges"
            );
        }
        for id in ids {
            self.exchanges
                .fail(&id, make_error(format!("{} ({})", reason, self.addr)));
        }
    }
}

/// A multiplexed connection to one service instance.
///
/// Many exchanges share one connection. Outgoing frames go through a bounded
/// queue drained by a writer task; a reader task decodes responses and
/// completes the matching exchanges.
pub struct Connection {
    instance: ServiceInstance,
    shared: Arc<Shared>,
    tx: mpsc::Sender<Bytes>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Connection {
    fn spawn(
        instance: ServiceInstance,
        stream: tokio::net::TcpStream,
        exchanges: ExchangeRegistry,
        config: &ConnectionConfig,
    ) -> Arc<Self> {
        let shared = Arc::new(Shared {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            addr: instance.address(),
            in_flight: Mutex::new(InFlight::default()),
            exchanges,
            stop: watch::channel(false).0,
        });

        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::channel(config.send_queue_capacity.max(1));

        let writer = tokio::spawn(write_loop(Arc::clone(&shared), write_half, rx));
        let reader = tokio::spawn(read_loop(Arc::clone(&shared), read_half, config.codec));

        Arc::new(Self {
            instance,
            shared,
            tx,
            tasks: Mutex::new(vec![writer, reader]),
        })
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn instance(&self) -> &ServiceInstance {
        &self.instance
    }

    pub fn addr(&self) -> &str {
        &self.shared.addr
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Number of exchanges waiting for a response on this connection.
    pub fn in_flight(&self) -> usize {
        self.shared.lock().ids.len()
    }

    /// Associates an exchange with this connection so it fails fast if the
    /// connection dies.
    pub fn track(&self, correlation_id: &str) -> Result<()> {
        let mut state = self.shared.lock();
        if state.closed {
            return Err(RpcError::ConnectionClosed(self.shared.addr.clone()));
        }
        state.ids.insert(correlation_id.to_string());
        Ok(())
    }

    pub fn untrack(&self, correlation_id: &str) {
        self.shared.lock().ids.remove(correlation_id);
    }

    fn shut(&self, reason: &str) {
        self.shared.shut(reason, RpcError::ConnectionClosed);
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            task.abort();
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.shared.id)
            .field("instance", &self.instance.to_string())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shut("Connection dropped");
    }
}

async fn write_loop(shared: Arc<Shared>, mut writer: OwnedWriteHalf, mut rx: mpsc::Receiver<Bytes>) {
    let mut stopped = shared.stop.subscribe();
    loop {
        let frame = tokio::select! {
            frame = rx.recv() => frame,
            _ = stopped.wait_for(|stopped| *stopped) => None,
        };
        let Some(frame) = frame else {
            break;
        };
        if let Err(e) = writer.write_all(&frame).await {
            let err = map_io_error(e, "writing frame");
            tracing::warn!(connection = shared.id, addr = %shared.addr, error = %err, "Write failed");
            shared.shut("Write failed", RpcError::ConnectionClosed);
            return;
        }
    }
    let _ = writer.shutdown().await;
}

async fn read_loop(shared: Arc<Shared>, mut reader: OwnedReadHalf, codec: CodecConfig) {
    let mut decoder = FrameDecoder::new(codec);
    let mut stopped = shared.stop.subscribe();
    loop {
        let message = tokio::select! {
            message = TcpTransportAsync::read_message(&mut reader, &mut decoder) => message,
            _ = stopped.wait_for(|stopped| *stopped) => return,
        };
        match message {
            Ok(Some(Message::Response(response))) => {
                shared.lock().ids.remove(&response.correlation_id);
                tracing::debug!(
                    connection = shared.id,
                    correlation_id = %response.correlation_id,
                    success = response.is_success(),
                    "Response received"
                );
                shared.exchanges.complete(response);
            }
            Ok(Some(Message::Request(request))) => {
                tracing::warn!(
                    connection = shared.id,
                    addr = %shared.addr,
                    correlation_id = %request.correlation_id,
                    "Server sent a request frame; closing connection"
                );
                shared.shut("Unexpected request frame", RpcError::DecodeFailure);
                return;
            }
            Ok(None) => {
                tracing::debug!(connection = shared.id, addr = %shared.addr, "Connection closed by peer");
                shared.shut("Connection closed by peer", RpcError::ConnectionClosed);
                return;
            }
            Err(RpcError::DecodeFailure(msg)) => {
                tracing::warn!(
                    connection = shared.id,
                    addr = %shared.addr,
                    error = %msg,
                    "Malformed frame; closing connection"
                );
                shared.shut(&msg, RpcError::DecodeFailure);
                return;
            }
            Err(e) => {
                tracing::debug!(connection = shared.id, addr = %shared.addr, error = %e, "Read failed");
                shared.shut(&e.to_string(), RpcError::ConnectionClosed);
                return;
            }
        }
    }
}

/// Owns one multiplexed connection per instance address.
///
/// Each connection has its own send queue and I/O tasks, so a slow or
/// stalled instance never holds up sends to another one. Dead connections
/// are replaced on the next [`connect`](Self::connect); failures to connect
/// are returned to the caller and never retried here.
///
/// # Example
///
/// ```rust,no_run
/// use wirerpc_client::{ConnectionConfig, ConnectionManager, ExchangeRegistry};
/// use wirerpc_common::ServiceInstance;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let manager = ConnectionManager::new(ExchangeRegistry::new(), ConnectionConfig::default());
/// let instance = ServiceInstance::new("echo-1", "EchoService", "127.0.0.1", 9000);
///
/// let conn = manager.connect(&instance).await?;
/// // ... encode a request, register its exchange, then:
/// // manager.send(&conn, frame).await?;
/// manager.close(&conn);
/// # Ok(())
/// # }
/// ```
pub struct ConnectionManager {
    transport: TcpTransportAsync,
    connections: Mutex<HashMap<String, Arc<Connection>>>,
    exchanges: ExchangeRegistry,
    config: ConnectionConfig,
}

impl ConnectionManager {
    pub fn new(exchanges: ExchangeRegistry, config: ConnectionConfig) -> Self {
        Self {
            transport: TcpTransportAsync::new(config.codec, config.connect_timeout),
            connections: Mutex::new(HashMap::new()),
            exchanges,
            config,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<Connection>>> {
        self.connections.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the live connection to `instance`, dialing a new one if needed.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::ConnectFailure`] if the connection cannot be
    /// established within the connect timeout.
    pub async fn connect(&self, instance: &ServiceInstance) -> Result<Arc<Connection>> {
        let addr = instance.address();
        let live = self.lock().get(&addr).filter(|conn| !conn.is_closed()).cloned();
        if let Some(conn) = live {
            return Ok(conn);
        }

        // Dial without holding the map lock so other instances are not held up
        let stream = self.transport.connect(&addr).await?;
        let fresh = Connection::spawn(
            instance.clone(),
            stream,
            self.exchanges.clone(),
            &self.config,
        );

        let mut connections = self.lock();
        // Connections that died since their last use go as well
        connections.retain(|_, conn| !conn.is_closed());
        match connections.get(&addr) {
            // Lost a race with a concurrent dial; keep the first connection
            Some(existing) if !existing.is_closed() => Ok(Arc::clone(existing)),
            _ => {
                tracing::info!(
                    connection = fresh.id(),
                    instance = %instance,
                    "Connection established"
                );
                connections.insert(addr, Arc::clone(&fresh));
                Ok(fresh)
            }
        }
    }

    /// Queues one encoded frame on `conn`.
    ///
    /// Waits only when this connection's own queue is full.
    pub async fn send(&self, conn: &Connection, frame: Bytes) -> Result<()> {
        if conn.is_closed() {
            return Err(RpcError::ConnectionClosed(conn.addr().to_string()));
        }
        conn.tx
            .send(frame)
            .await
            .map_err(|_| RpcError::ConnectionClosed(conn.addr().to_string()))
    }

    /// Closes `conn` and fails the exchanges still in flight on it.
    pub fn close(&self, conn: &Connection) {
        {
            let mut connections = self.lock();
            if let Some(current) = connections.get(conn.addr()) {
                if current.id() == conn.id() {
                    connections.remove(conn.addr());
                }
            }
        }
        tracing::info!(connection = conn.id(), addr = %conn.addr(), "Connection closed");
        conn.shut("Connection closed locally");
    }

    /// Closes every connection.
    pub fn shutdown(&self) {
        let connections: Vec<_> = self.lock().drain().map(|(_, conn)| conn).collect();
        for conn in connections {
            conn.shut("Connection manager shut down");
        }
    }

    /// Number of open connections.
    pub fn connection_count(&self) -> usize {
        self.lock().values().filter(|conn| !conn.is_closed()).count()
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("connections", &self.connection_count())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::net::TcpListener;
    use wirerpc_common::protocol::{Request, Response};
    use wirerpc_common::transport::encode;

    async fn instance_for(listener: &TcpListener) -> ServiceInstance {
        let addr = listener.local_addr().unwrap();
        ServiceInstance::new("test-1", "EchoService", "127.0.0.1", addr.port())
    }

    /// Accepts one connection and echoes each request's first parameter.
    fn spawn_echo(listener: TcpListener) -> JoinHandle<()> {
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut decoder = FrameDecoder::new(CodecConfig::default());
            let transport = TcpTransportAsync::default();
            while let Ok(Some(Message::Request(request))) =
                TcpTransportAsync::read_message(&mut stream, &mut decoder).await
            {
                let value = request.parameters.first().cloned().unwrap_or(json!(null));
                let reply = Response::success(request.correlation_id, value);
                if transport.write_message(&mut stream, &reply.into()).await.is_err() {
                    break;
                }
            }
        })
    }

    #[test]
    fn test_config_default() {
        let config = ConnectionConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.send_queue_capacity, 1024);
        assert_eq!(config.codec, CodecConfig::default());
    }

    #[tokio::test]
    async fn test_connect_failure_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let instance = instance_for(&listener).await;
        drop(listener);

        let manager = ConnectionManager::new(ExchangeRegistry::new(), ConnectionConfig::default());
        let result = manager.connect(&instance).await;
        assert!(matches!(result, Err(RpcError::ConnectFailure { .. })));
        assert_eq!(manager.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_connection_is_reused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let instance = instance_for(&listener).await;
        let _server = spawn_echo(listener);

        let manager = ConnectionManager::new(ExchangeRegistry::new(), ConnectionConfig::default());
        let first = manager.connect(&instance).await.unwrap();
        let second = manager.connect(&instance).await.unwrap();
        assert_eq!(first.id(), second.id());
        assert_eq!(manager.connection_count(), 1);
    }

    #[tokio::test]
    async fn test_send_completes_exchange() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let instance = instance_for(&listener).await;
        let _server = spawn_echo(listener);

        let exchanges = ExchangeRegistry::new();
        let manager = ConnectionManager::new(exchanges.clone(), ConnectionConfig::default());
        let conn = manager.connect(&instance).await.unwrap();

        let request = Request::new("c-1", "EchoService", "echo").with_param("string", json!("hi"));
        let frame = encode(&Message::Request(request.clone()), &CodecConfig::default()).unwrap();
        let exchange = exchanges.register(request).unwrap();
        conn.track("c-1").unwrap();
        manager.send(&conn, frame).await.unwrap();

        let value = exchanges.wait(exchange, Duration::from_secs(5)).await.unwrap();
        assert_eq!(value, json!("hi"));
        assert_eq!(conn.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_peer_close_fails_in_flight_exchanges() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let instance = instance_for(&listener).await;

        // Accepts, then hangs up without answering
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
            drop(stream);
        });

        let exchanges = ExchangeRegistry::new();
        let manager = ConnectionManager::new(exchanges.clone(), ConnectionConfig::default());
        let conn = manager.connect(&instance).await.unwrap();

        let request = Request::new("c-1", "EchoService", "echo");
        let frame = encode(&Message::Request(request.clone()), &CodecConfig::default()).unwrap();
        let exchange = exchanges.register(request).unwrap();
        conn.track("c-1").unwrap();
        manager.send(&conn, frame).await.unwrap();

        let result = exchanges.wait(exchange, Duration::from_secs(5)).await;
        assert!(matches!(result, Err(RpcError::ConnectionClosed(_))));
        assert!(conn.is_closed());
        assert!(exchanges.is_empty());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_close_rejects_further_sends() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let instance = instance_for(&listener).await;
        let _server = spawn_echo(listener);

        let manager = ConnectionManager::new(ExchangeRegistry::new(), ConnectionConfig::default());
        let conn = manager.connect(&instance).await.unwrap();
        manager.close(&conn);

        assert!(conn.is_closed());
        assert!(matches!(conn.track("c-1"), Err(RpcError::ConnectionClosed(_))));
        assert!(matches!(
            manager.send(&conn, Bytes::from_static(b"x")).await,
            Err(RpcError::ConnectionClosed(_))
        ));
        assert_eq!(manager.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_malformed_response_closes_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let instance = instance_for(&listener).await;

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
            // Unknown message kind
            stream.write_all(&[0, 0, 0, 1, 0x7F]).await.unwrap();
            tokio::time::sleep(Duration::from_secs(1)).await;
        });

        let exchanges = ExchangeRegistry::new();
        let manager = ConnectionManager::new(exchanges.clone(), ConnectionConfig::default());
        let conn = manager.connect(&instance).await.unwrap();
        let exchange = exchanges.register(Request::new("c-1", "EchoService", "echo")).unwrap();
        conn.track("c-1").unwrap();

        let result = exchanges.wait(exchange, Duration::from_secs(5)).await;
        assert!(matches!(result, Err(RpcError::DecodeFailure(_))));
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn test_malformed_response_closes_socket() {
        use tokio::io::AsyncReadExt;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let instance = instance_for(&listener).await;

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(&[0, 0, 0, 1, 0x7F]).await.unwrap();
            let mut buf = [0u8; 16];
            tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf)).await
        });

        let manager = ConnectionManager::new(ExchangeRegistry::new(), ConnectionConfig::default());
        let conn = manager.connect(&instance).await.unwrap();

        // The client hangs up even though the handle is still alive
        let read = server.await.unwrap();
        assert!(matches!(read, Ok(Ok(0))), "got {:?}", read);
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn test_dead_connection_replaced_and_pruned() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let instance = instance_for(&listener).await;

        let server = tokio::spawn(async move {
            // First connection is hung up at once, the second one is served
            let (first, _) = listener.accept().await.unwrap();
            drop(first);
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut decoder = FrameDecoder::new(CodecConfig::default());
            let _ = TcpTransportAsync::read_message(&mut stream, &mut decoder).await;
        });

        let manager = ConnectionManager::new(ExchangeRegistry::new(), ConnectionConfig::default());
        let first = manager.connect(&instance).await.unwrap();
        for _ in 0..100 {
            if first.is_closed() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(first.is_closed());

        let second = manager.connect(&instance).await.unwrap();
        assert_ne!(first.id(), second.id());
        assert_eq!(manager.connection_count(), 1);
        server.abort();
    }
}
