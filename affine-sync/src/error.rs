//! Transport and service error types.

use affine_core::CoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Timed out connecting to {url} after {after_ms}ms")]
    ConnectTimeout { url: String, after_ms: u64 },

    #[error("Authentication rejected: {0}")]
    Auth(String),

    #[error("Server rejected client version {version}: {message}")]
    VersionMismatch { version: String, message: String },

    #[error("Timed out joining workspace {workspace} after {after_ms}ms")]
    JoinTimeout { workspace: String, after_ms: u64 },

    #[error("No reply to {event} after {after_ms}ms")]
    RequestTimeout { event: String, after_ms: u64 },

    #[error("Timed out pushing update for {doc_id} after {after_ms}ms")]
    PushTimeout { doc_id: String, after_ms: u64 },

    #[error("Server rejected update for {doc_id}: {message}")]
    PushRejected { doc_id: String, message: String },

    #[error("Server error {name}: {message}")]
    Remote { name: String, message: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Connection closed")]
    Closed,

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Document {0} not found")]
    DocNotFound(String),
}

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;
