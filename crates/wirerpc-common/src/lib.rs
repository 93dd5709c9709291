//! WireRPC Common Types and Transport
//!
//! This crate provides the protocol definitions, the wire codec and the
//! discovery traits shared by every WireRPC component.
//!
//! # Overview
//!
//! - **Protocol Layer**: `Request`/`Response`, `ServiceInstance`, `RpcError`
//!   and the correlation id generator
//! - **Transport Layer**: length-prefixed binary frames over TCP
//! - **Discovery**: the `ServiceRegistry` and `InstanceSelector` seams
//!
//! # Wire Format
//!
//! - **Frame**: `[u32 BE length][u8 kind][body]`
//! - **Values**: JSON, each carried as a length-prefixed blob
//! - **Max Frame Size**: 16 MB by default, configurable per codec
//!
//! # Example
//!
//! ```
//! use wirerpc_common::{CorrelationIdGenerator, Request, Response};
//! use serde_json::json;
//!
//! let ids = CorrelationIdGenerator::new();
//! let request = Request::new(ids.next_id(), "EchoService", "echo")
//!     .with_param("string", json!("hello"));
//!
//! let response = Response::success(request.correlation_id.clone(), json!("hello"));
//! assert!(response.is_success());
//! ```

pub mod discovery;
pub mod protocol;
pub mod transport;

pub use discovery::{InstanceSelector, ServiceRegistry};
pub use protocol::*;
