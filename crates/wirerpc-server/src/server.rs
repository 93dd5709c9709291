//! TCP front end of the dispatcher.
//!
//! Each accepted connection becomes a session with one reader and one writer
//! task. The reader decodes requests and spawns one dispatch per request, so
//! a slow call never holds up the next frame; responses are written in
//! completion order and matched by correlation id on the client.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use wirerpc_common::discovery::ServiceRegistry;
use wirerpc_common::protocol::{Response, Result, RpcError, ServiceInstance};
use wirerpc_common::transport::{encode_response, CodecConfig, FrameDecoder, Message, TcpTransportAsync};
use wirerpc_metrics::{MetricsCollector, MetricsSnapshot, ServerMetricsCollector};

use crate::directory::ServiceDirectory;
use crate::dispatcher::{Dispatcher, INTERNAL_ERROR};

/// Default listen address (loopback, ephemeral port)
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:0";

/// Outbound frames a session buffers before dispatch tasks wait
const SESSION_QUEUE_CAPACITY: usize = 1024;

/// Server configuration.
///
/// # Example
///
/// ```
/// use wirerpc_server::ServerConfig;
///
/// let config = ServerConfig::new("0.0.0.0:7000")
///     .with_advertise_host("10.0.0.5")
///     .with_instance_id("echo-1");
/// assert_eq!(config.bind_addr, "0.0.0.0:7000");
/// ```
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on
    pub bind_addr: String,
    /// Host published to the registry; defaults to the bound IP, or
    /// `127.0.0.1` when bound to an unspecified address
    pub advertise_host: Option<String>,
    /// Instance id published to the registry; defaults to `host:port`
    pub instance_id: Option<String>,
    pub codec: CodecConfig,
}

impl ServerConfig {
    pub fn new(bind_addr: impl Into<String>) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            ..Self::default()
        }
    }

    pub fn with_advertise_host(mut self, host: impl Into<String>) -> Self {
        self.advertise_host = Some(host.into());
        self
    }

    pub fn with_instance_id(mut self, id: impl Into<String>) -> Self {
        self.instance_id = Some(id.into());
        self
    }

    pub fn with_codec(mut self, codec: CodecConfig) -> Self {
        self.codec = codec;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            advertise_host: None,
            instance_id: None,
            codec: CodecConfig::default(),
        }
    }
}

/// A bound, not yet serving, RPC server.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use wirerpc_server::{RpcServer, ServerConfig, ServiceBuilder, ServiceDirectory};
/// use serde_json::json;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let directory = Arc::new(ServiceDirectory::new());
/// directory.register(
///     "EchoService",
///     ServiceBuilder::new("EchoService")
///         .method("echo", |inv| Ok(json!(inv.arg::<String>(0)?)))
///         .build(),
/// );
///
/// let server = RpcServer::bind(ServerConfig::new("127.0.0.1:7000"), directory).await?;
/// let handle = server.serve(None).await?;
/// // ...
/// handle.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct RpcServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: ServerConfig,
    dispatcher: Arc<Dispatcher>,
}

impl RpcServer {
    pub async fn bind(config: ServerConfig, directory: Arc<ServiceDirectory>) -> Result<Self> {
        let listener = TcpListener::bind(&config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(addr = %local_addr, "Server listening");

        Ok(Self {
            listener,
            local_addr,
            config,
            dispatcher: Arc::new(Dispatcher::new(directory)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn advertise_host(&self) -> String {
        match &self.config.advertise_host {
            Some(host) => host.clone(),
            None if self.local_addr.ip().is_unspecified() => "127.0.0.1".to_string(),
            None => self.local_addr.ip().to_string(),
        }
    }

    pub fn instance_id(&self) -> String {
        self.config
            .instance_id
            .clone()
            .unwrap_or_else(|| format!("{}:{}", self.advertise_host(), self.local_addr.port()))
    }

    /// One instance per service currently in the directory.
    pub fn instances(&self) -> Vec<ServiceInstance> {
        let host = self.advertise_host();
        let id = self.instance_id();
        self.dispatcher
            .directory()
            .service_names()
            .into_iter()
            .map(|name| ServiceInstance::new(id.clone(), name, host.clone(), self.local_addr.port()))
            .collect()
    }

    /// Publishes the instances to `registry` and starts accepting.
    ///
    /// If any registration fails, the ones already made are undone and the
    /// error is returned; the server does not start.
    pub async fn serve(self, registry: Option<Arc<dyn ServiceRegistry>>) -> Result<ServerHandle> {
        let instances = self.instances();

        if let Some(registry) = &registry {
            publish(registry.as_ref(), &instances)?;
        }

        let services = instances
            .iter()
            .map(|instance| instance.service_name().to_string())
            .collect();
        self.dispatcher
            .metrics()
            .set_identity(self.instance_id(), services);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let accept_task = tokio::spawn(accept_loop(
            self.listener,
            Arc::clone(&self.dispatcher),
            self.config.codec,
            shutdown_rx,
        ));

        Ok(ServerHandle {
            local_addr: self.local_addr,
            instances,
            registry,
            dispatcher: self.dispatcher,
            shutdown_tx,
            accept_task,
        })
    }
}

fn publish(registry: &dyn ServiceRegistry, instances: &[ServiceInstance]) -> Result<()> {
    for (published, instance) in instances.iter().enumerate() {
        if let Err(e) = registry.register(instance.clone()) {
            tracing::warn!(instance = %instance, error = %e, "Registration failed, rolling back");
            for done in &instances[..published] {
                if let Err(e) = registry.deregister(done) {
                    tracing::warn!(instance = %done, error = %e, "Rollback deregistration failed");
                }
            }
            return Err(e);
        }
        tracing::info!(instance = %instance, "Published");
    }
    Ok(())
}

/// Running server.
///
/// Dropping the handle also stops accepting, but only
/// [`shutdown`](Self::shutdown) deregisters the published instances.
pub struct ServerHandle {
    local_addr: SocketAddr,
    instances: Vec<ServiceInstance>,
    registry: Option<Arc<dyn ServiceRegistry>>,
    dispatcher: Arc<Dispatcher>,
    shutdown_tx: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn instances(&self) -> &[ServiceInstance] {
        &self.instances
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.dispatcher.metrics().snapshot()
    }

    /// Deregisters (best effort), stops accepting and closes live sessions.
    pub async fn shutdown(self) {
        if let Some(registry) = &self.registry {
            for instance in &self.instances {
                match registry.deregister(instance) {
                    Ok(()) => tracing::info!(instance = %instance, "Deregistered"),
                    Err(e) => tracing::warn!(instance = %instance, error = %e, "Deregistration failed"),
                }
            }
        }

        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.accept_task.await {
            tracing::warn!(error = %e, "Accept loop ended abnormally");
        }
        tracing::info!(addr = %self.local_addr, "Server stopped");
    }
}

impl std::fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandle")
            .field("local_addr", &self.local_addr)
            .field("instances", &self.instances)
            .finish()
    }
}

async fn accept_loop(
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
    codec: CodecConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut sessions = JoinSet::new();

    loop {
        let session_shutdown = shutdown.clone();
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    sessions.spawn(session(
                        stream,
                        peer,
                        Arc::clone(&dispatcher),
                        codec,
                        session_shutdown,
                    ));
                }
                Err(e) => tracing::warn!(error = %e, "Accept failed"),
            },
            _ = shutdown.wait_for(|stopped| *stopped) => break,
            Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
        }
    }

    drop(listener);
    while sessions.join_next().await.is_some() {}
}

async fn session(
    stream: TcpStream,
    peer: SocketAddr,
    dispatcher: Arc<Dispatcher>,
    codec: CodecConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
    }
    dispatcher.metrics().connection_opened();
    tracing::debug!(peer = %peer, "Session opened");

    let (mut reader, mut writer) = stream.into_split();
    let (tx, mut rx) = mpsc::channel::<Bytes>(SESSION_QUEUE_CAPACITY);

    let mut writer_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = TcpTransportAsync::write_frame(&mut writer, &frame).await {
                tracing::debug!(peer = %peer, error = %e, "Write failed");
                return;
            }
        }
        let _ = writer.shutdown().await;
    });

    let mut decoder = FrameDecoder::new(codec);
    loop {
        let message = tokio::select! {
            message = TcpTransportAsync::read_message(&mut reader, &mut decoder) => message,
            _ = shutdown.wait_for(|stopped| *stopped) => break,
        };

        match message {
            Ok(Some(Message::Request(request))) => {
                let dispatcher = Arc::clone(&dispatcher);
                let tx = tx.clone();
                tokio::spawn(async move {
                    let correlation_id = request.correlation_id.clone();
                    let response = dispatcher.dispatch(request).await;
                    if let Some(frame) = encode_or_report(&response, correlation_id, &codec) {
                        // A closed session drops the reply
                        let _ = tx.send(frame).await;
                    }
                });
            }
            Ok(Some(Message::Response(response))) => {
                tracing::warn!(
                    peer = %peer,
                    correlation_id = %response.correlation_id,
                    "Unexpected response frame, closing session"
                );
                break;
            }
            Ok(None) => {
                tracing::debug!(peer = %peer, "Peer closed the session");
                break;
            }
            Err(e @ RpcError::DecodeFailure(_)) => {
                tracing::warn!(peer = %peer, error = %e, "Malformed frame, closing session");
                break;
            }
            Err(e) => {
                tracing::debug!(peer = %peer, error = %e, "Session read failed");
                break;
            }
        }
    }

    // Replies still being dispatched are flushed unless the server is stopping
    drop(tx);
    tokio::select! {
        _ = &mut writer_task => {}
        _ = shutdown.wait_for(|stopped| *stopped) => writer_task.abort(),
    }

    dispatcher.metrics().connection_closed();
    tracing::debug!(peer = %peer, "Session closed");
}

/// Encodes `response`, substituting an error response if it does not fit.
fn encode_or_report(response: &Response, correlation_id: String, codec: &CodecConfig) -> Option<Bytes> {
    match encode_response(response, codec) {
        Ok(frame) => Some(frame),
        Err(e) => {
            tracing::warn!(correlation_id = %correlation_id, error = %e, "Failed to encode response");
            let fallback = Response::error(correlation_id, INTERNAL_ERROR, e.to_string());
            encode_response(&fallback, codec).ok()
        }
    }
}
