pub mod correlation;
pub mod error;
pub mod instance;
pub mod requests;
pub mod responses;


pub use correlation::CorrelationIdGenerator;
pub use error::{Result, RpcError};
pub use instance::ServiceInstance;
pub use requests::{CorrelationId, Metadata, MethodName, Request, RpcValue, ServiceName};
pub use responses::{Outcome, RemoteError, Response, SERVICE_NOT_FOUND};
