//! Shared fixtures for the end-to-end tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wirerpc::{
    ClientConfig, FirstSelector, InMemoryRegistry, InstanceSelector, Invocation, RpcClient,
    RpcServer, ServerConfig, ServerHandle, ServiceBuilder, ServiceDirectory, ServiceError,
};

pub const ECHO: &str = "EchoService";

/// A directory with one `EchoService` whose `whoami` answers `id`.
pub fn echo_directory(id: &str) -> Arc<ServiceDirectory> {
    let id = id.to_string();
    let directory = Arc::new(ServiceDirectory::new());
    directory.register(
        ECHO,
        ServiceBuilder::new(ECHO)
            .method("echo", |inv| Ok(inv.arg::<serde_json::Value>(0)?))
            .method("upper", |inv| Ok(json!(inv.arg::<String>(0)?.to_uppercase())))
            .method("sleep", |inv| {
                let ms = inv.arg::<u64>(0)?;
                std::thread::sleep(Duration::from_millis(ms));
                Ok(json!(ms))
            })
            .method("fail", |_| Err(ServiceError::illegal_state("boom")))
            .method("trace", |inv: &Invocation| {
                Ok(inv.metadata().get("trace").cloned().unwrap_or(json!(null)))
            })
            .method("whoami", move |_| Ok(json!(id)))
            .build(),
    );
    directory
}

/// Starts an `EchoService` server on loopback, published to `registry`.
pub async fn start_echo(registry: &Arc<InMemoryRegistry>, id: &str) -> ServerHandle {
    RpcServer::bind(ServerConfig::default().with_instance_id(id), echo_directory(id))
        .await
        .unwrap()
        .serve(Some(registry.clone()))
        .await
        .unwrap()
}

pub fn client(registry: &Arc<InMemoryRegistry>) -> RpcClient {
    client_with(registry, Arc::new(FirstSelector), ClientConfig::default())
}

pub fn client_with(
    registry: &Arc<InMemoryRegistry>,
    selector: Arc<dyn InstanceSelector>,
    config: ClientConfig,
) -> RpcClient {
    RpcClient::new(registry.clone(), selector, config)
}
