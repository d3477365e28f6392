//! Error types for maroon

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Coordination Store Errors ===
    #[error("Coordination store error: {0}")]
    Store(String),

    #[error("Lease {0} expired or unknown")]
    LeaseLost(i64),

    // === Election Errors ===
    #[error("Not leader: current leader is {0}")]
    NotLeader(String),

    // === Network Errors ===
    #[error("gRPC error: {0}")]
    Grpc(#[from] tonic::Status),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Unknown peer: {0}")]
    UnknownPeer(String),

    // === Serialization Errors ===
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Is this a retryable error?
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Store(_)
                | Error::LeaseLost(_)
                | Error::NotLeader(_)
                | Error::Transport(_)
                | Error::Grpc(_)
        )
    }

    /// Convert to HTTP status code
    pub fn to_http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Error::NotLeader(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::InvalidConfig(_) | Error::Serialization(_) | Error::UnknownPeer(_) => {
                StatusCode::BAD_REQUEST
            }
            Error::Store(_) | Error::Transport(_) | Error::Grpc(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<etcd_client::Error> for Error {
    fn from(err: etcd_client::Error) -> Self {
        Error::Store(err.to_string())
    }
}

impl From<tonic::transport::Error> for Error {
    fn from(err: tonic::transport::Error) -> Self {
        Error::Transport(err.to_string())
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::InvalidConfig(err.to_string())
    }
}
