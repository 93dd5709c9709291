use thiserror::Error;

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("Failed to connect to {addr}: {reason}")]
    ConnectFailure { addr: String, reason: String },

    #[error("Encode failure: {0}")]
    EncodeFailure(String),

    #[error("Decode failure: {0}")]
    DecodeFailure(String),

    #[error("No instance available for service '{0}'")]
    NoInstanceAvailable(String),

    #[error("Remote failure: {error_type}: {message}")]
    RemoteFailure { error_type: String, message: String },

    #[error("Request {correlation_id} timed out after {timeout_ms}ms")]
    Timeout {
        correlation_id: String,
        timeout_ms: u64,
    },

    #[error("Duplicate correlation id: {0}")]
    DuplicateCorrelationId(String),

    #[error("Exchange {0} was cancelled")]
    Cancelled(String),

    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    #[error("Unknown method '{method}' on service '{service}'")]
    UnknownMethod { service: String, method: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),
}

impl RpcError {
    /// Whether the failure happened below the application layer.
    ///
    /// A retry policy living above the core may treat these as transient.
    /// The core itself never retries.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            RpcError::ConnectFailure { .. }
                | RpcError::ConnectionClosed(_)
                | RpcError::Timeout { .. }
                | RpcError::Io(_)
        )
    }

    /// Whether the remote method itself raised the error.
    pub fn is_remote(&self) -> bool {
        matches!(self, RpcError::RemoteFailure { .. })
    }
}

pub type Result<T> = std::result::Result<T, RpcError>;
