//! WireRPC Response Types
//!
//! This module defines the RPC response structure.

use super::{CorrelationId, RpcError, RpcValue};
use serde::{Deserialize, Serialize};

/// Error type reported when the dispatcher has no service under the requested name.
pub const SERVICE_NOT_FOUND: &str = "ServiceNotFound";

/// Description of an error raised by the remote method.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteError {
    /// Error kind, e.g. `IllegalStateException`
    pub error_type: String,
    /// Human-readable message
    pub message: String,
}

impl RemoteError {
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            message: message.into(),
        }
    }
}

/// Outcome of one remote invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Outcome {
    Success(RpcValue),
    Failure(RemoteError),
}

/// An RPC response returned from a server to the client.
///
/// # Response Flow
///
/// 1. Server decodes a `Request` and invokes the target service
/// 2. Server builds a `Response` carrying either the return value or the raised error
/// 3. Response is framed and written back on the same connection
/// 4. A client I/O task decodes it and completes the exchange with the same correlation id
///
/// # Example
///
/// ```
/// use wirerpc_common::protocol::Response;
/// use serde_json::json;
///
/// let ok = Response::success("c-1", json!("hello"));
/// assert!(ok.is_success());
///
/// let failed = Response::error("c-2", "IllegalStateException", "boom");
/// assert!(!failed.is_success());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Response {
    /// Correlation id of the request this response answers
    pub correlation_id: CorrelationId,
    /// Either the return value or the remote error
    pub outcome: Outcome,
}

impl Response {
    /// Creates a successful response.
    pub fn success(correlation_id: impl Into<CorrelationId>, result: RpcValue) -> Self {
        Response {
            correlation_id: correlation_id.into(),
            outcome: Outcome::Success(result),
        }
    }

    /// Creates an error response.
    pub fn error(
        correlation_id: impl Into<CorrelationId>,
        error_type: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Response {
            correlation_id: correlation_id.into(),
            outcome: Outcome::Failure(RemoteError::new(error_type, message)),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success(_))
    }

    /// Converts the response into the value the caller sees.
    ///
    /// A failure outcome becomes [`RpcError::RemoteFailure`].
    pub fn into_result(self) -> Result<RpcValue, RpcError> {
        match self.outcome {
            Outcome::Success(value) => Ok(value),
            Outcome::Failure(err) => Err(RpcError::RemoteFailure {
                error_type: err.error_type,
                message: err.message,
            }),
        }
    }
}
