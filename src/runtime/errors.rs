//! Error types for the runtime system

use crossbeam_channel::{RecvError, SendError};
use std::any::TypeId;

/// Error type for connection operations
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Type mismatch: {from_node}.{from_port} ({from_type:?}) -> {to_node}.{to_port} ({to_type:?})")]
    TypeMismatch {
        from_node: String,
        from_port: String,
        from_type: TypeId,
        to_node: String,
        to_port: String,
        to_type: TypeId,
    },

    #[error("Node '{0}' not found")]
    NodeNotFound(String),

    #[error("Port '{port}' not found on node '{node}'")]
    PortNotFound { node: String, port: String },

    #[error("Input port '{port}' on node '{node}' is already connected")]
    DuplicateConnection { node: String, port: String },
}

/// Error type for pipeline construction
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Node with name '{0}' already exists")]
    DuplicateNode(String),

    #[error("Type {0:?} not registered. Call register_type::<T>() before building pipeline.")]
    UnregisteredType(TypeId),

    #[error("Sender type mismatch for {0:?}")]
    SenderMismatch(TypeId),
}

/// Error type for work function operations
#[derive(Debug, thiserror::Error)]
pub enum WorkError {
    #[error("Failed to receive from input channel: {0}")]
    RecvError(#[from] RecvError),

    #[error("Failed to send to output channel: {0}")]
    SendError(String),

    #[error("Node-specific error: {0}")]
    NodeError(String),

    #[error("Shutdown signal received")]
    Shutdown,
}

impl<T> From<SendError<T>> for WorkError {
    fn from(e: SendError<T>) -> Self {
        WorkError::SendError(format!("{}", e))
    }
}

/// Result type for work functions
pub type WorkResult<T = ()> = Result<T, WorkError>;
