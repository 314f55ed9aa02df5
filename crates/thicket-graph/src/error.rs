use thiserror::Error;

/// Convenience type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sled(#[from] sled::Error),
    #[error("Serialization error: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("Export format error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Node not found: {0}")]
    NodeNotFound(String),
    #[error("Edge {edge} references missing node {node}")]
    MissingEndpoint { edge: String, node: String },
    #[error("Corrupted data: {0}")]
    Corrupted(String),
}
