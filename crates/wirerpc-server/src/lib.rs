//! WireRPC Server
//!
//! This crate exposes local service implementations over the WireRPC wire
//! protocol: a [`ServiceDirectory`] of named [`Service`]s, a [`Dispatcher`]
//! that turns each request into exactly one response, and an [`RpcServer`]
//! that accepts connections and publishes its instances to a registry.

pub mod directory;
pub mod dispatcher;
pub mod server;
pub mod service;

pub use directory::ServiceDirectory;
pub use dispatcher::{Dispatcher, INTERNAL_ERROR};
pub use server::{RpcServer, ServerConfig, ServerHandle, DEFAULT_BIND_ADDR};
pub use service::{
    Invocation, MethodTable, Service, ServiceBuilder, ServiceError, ServiceResult,
    ILLEGAL_ARGUMENT, ILLEGAL_STATE, NO_SUCH_METHOD, PANIC,
};
