//! Error types for fleetlb

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Fleet Errors ===
    #[error("Node not registered: {0}")]
    NotRegistered(String),

    #[error("Client not found: {0}")]
    NotFound(String),

    #[error("No node available")]
    NoneAvailable,

    #[error("Node unreachable: {node}: {reason}")]
    NodeUnreachable { node: String, reason: String },

    #[error("Lock acquisition timed out: {0}")]
    LockTimeout(&'static str),

    // === Worker Lifecycle Errors ===
    #[error("Failed to spawn worker on {endpoint}: {reason}")]
    SpawnFailure { endpoint: String, reason: String },

    #[error("Failed to terminate worker on {endpoint}: {reason}")]
    TerminationFailure { endpoint: String, reason: String },

    // === Replication Errors ===
    #[error("Replication to {peer} failed: {reason}")]
    ReplicationFailure { peer: String, reason: String },

    // === Network Errors ===
    #[error("HTTP error: {0}")]
    Http(String),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Operation timeout: {0}")]
    Timeout(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Is this a retryable error?
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_)
                | Error::NodeUnreachable { .. }
                | Error::LockTimeout(_)
                | Error::NoneAvailable
        )
    }

    /// Convert to HTTP status code
    pub fn to_http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Error::NotFound(_) | Error::NotRegistered(_) => StatusCode::NOT_FOUND,
            Error::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            Error::Timeout(_) | Error::LockTimeout(_) => StatusCode::REQUEST_TIMEOUT,
            Error::NoneAvailable => StatusCode::SERVICE_UNAVAILABLE,
            Error::NodeUnreachable { .. }
            | Error::SpawnFailure { .. }
            | Error::TerminationFailure { .. }
            | Error::ReplicationFailure { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable kind, used in JSON error bodies
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Io(_) => "io",
            Error::NotRegistered(_) => "not_registered",
            Error::NotFound(_) => "not_found",
            Error::NoneAvailable => "none_available",
            Error::NodeUnreachable { .. } => "node_unreachable",
            Error::LockTimeout(_) => "lock_timeout",
            Error::SpawnFailure { .. } => "spawn_failure",
            Error::TerminationFailure { .. } => "termination_failure",
            Error::ReplicationFailure { .. } => "replication_failure",
            Error::Http(_) => "http",
            Error::InvalidConfig(_) => "invalid_config",
            Error::Internal(_) => "internal",
            Error::Timeout(_) => "timeout",
            Error::Other(_) => "other",
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout(e.to_string())
        } else {
            Error::Http(e.to_string())
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}

// Implement From for common error types
impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Other(e.to_string())
    }
}

/// JSON body of every error response
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub kind: String,
}

impl axum::response::IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let status = self.to_http_status();
        let body = ErrorBody {
            error: self.to_string(),
            kind: self.kind().to_string(),
        };
        (status, axum::Json(body)).into_response()
    }
}
