//! WireRPC client.
//!
//! [`RpcClient`] resolves a service through a [`ServiceRegistry`], picks an
//! instance with an [`InstanceSelector`], and multiplexes concurrent calls
//! over one connection per instance. Replies are matched to callers by
//! correlation id in the [`ExchangeRegistry`].
//!
//! [`ServiceProxy`] wraps a declared [`ServiceInterface`] so remote methods
//! can be called by name with arity and type checks done up front.
//! [`BlockingClient`] offers the same surface to ordinary threads.
//!
//! [`ServiceRegistry`]: wirerpc_common::ServiceRegistry
//! [`InstanceSelector`]: wirerpc_common::InstanceSelector

pub mod blocking;
pub mod client;
pub mod connection;
pub mod exchange;
pub mod proxy;

pub use blocking::{BlockingClient, BlockingServiceProxy, DEFAULT_IO_THREADS};
pub use client::{type_descriptor_of, CallOptions, ClientConfig, RpcClient, DEFAULT_REQUEST_TIMEOUT};
pub use connection::{Connection, ConnectionConfig, ConnectionManager};
pub use exchange::{Exchange, ExchangeRegistry, ExchangeState};
pub use proxy::{
    MethodDescriptor, ServiceInterface, ServiceInterfaceBuilder, ServiceProxy, LOCAL_METHODS,
};
