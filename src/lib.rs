//! # WireRPC
//!
//! Correlated request/response RPC over framed TCP with pluggable discovery.
//!
//! A client calls a method on a logical service; the call is resolved
//! through a [`ServiceRegistry`], sent to one instance picked by an
//! [`InstanceSelector`], and its result is handed back to the caller when
//! the response with the matching correlation id arrives.
//!
//! This crate re-exports the workspace crates:
//!
//! - [`common`]: protocol types, wire codec, transport, discovery traits
//! - [`client`]: exchanges, connections, [`RpcClient`], proxies, blocking facade
//! - [`server`]: service directory, dispatcher, [`RpcServer`]
//! - [`registry`]: in-memory registry, selectors, health checking
//! - [`metrics`]: call statistics and the `_info` / `_metrics` endpoints
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use serde_json::json;
//! use wirerpc::{
//!     ClientConfig, FirstSelector, InMemoryRegistry, RpcClient, RpcServer, ServerConfig,
//!     ServiceBuilder, ServiceDirectory,
//! };
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Arc::new(InMemoryRegistry::new());
//!
//! let directory = Arc::new(ServiceDirectory::new());
//! directory.register(
//!     "EchoService",
//!     ServiceBuilder::new("EchoService")
//!         .method("echo", |inv| Ok(json!(inv.arg::<String>(0)?)))
//!         .build(),
//! );
//! let server = RpcServer::bind(ServerConfig::default(), directory)
//!     .await?
//!     .serve(Some(registry.clone()))
//!     .await?;
//!
//! let client = RpcClient::new(registry, Arc::new(FirstSelector), ClientConfig::default());
//! let reply = client.call("EchoService", "echo", vec![json!("hello")]).await?;
//! assert_eq!(reply, json!("hello"));
//!
//! server.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub use wirerpc_client as client;
pub use wirerpc_common as common;
pub use wirerpc_metrics as metrics;
pub use wirerpc_registry as registry;
pub use wirerpc_server as server;

pub use wirerpc_client::{
    BlockingClient, BlockingServiceProxy, CallOptions, ClientConfig, RpcClient, ServiceInterface,
    ServiceProxy,
};
pub use wirerpc_common::transport::CodecConfig;
pub use wirerpc_common::{
    InstanceSelector, Request, Response, Result, RpcError, RpcValue, ServiceInstance,
    ServiceRegistry,
};
pub use wirerpc_registry::{
    FirstSelector, HealthCheckConfig, HealthChecker, InMemoryRegistry, RoundRobinSelector,
};
pub use wirerpc_server::{
    Invocation, RpcServer, ServerConfig, ServerHandle, Service, ServiceBuilder, ServiceDirectory,
    ServiceError,
};
