//! Error types for layerstore
//!
//! Provides a unified error type for all repository operations.

use thiserror::Error;

/// Result type alias using StoreError
pub type Result<T> = std::result::Result<T, StoreError>;

/// Unified error type for layerstore operations
#[derive(Debug, Error)]
pub enum StoreError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Storage {storage_id} cannot hold more units")]
    UnitCapacityExceeded { storage_id: i32 },

    #[error("Unknown storage: {0}")]
    UnknownStorage(i32),

    #[error("Unknown unit: {0}")]
    UnknownUnit(i32),

    #[error("No layer descriptors for unit '{0}'")]
    NoLayers(String),

    #[error("Repository is shut down")]
    ShutDown,

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Unexpected end of record data")]
    UnexpectedEof,

    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<bincode::Error> for StoreError {
    fn from(err: bincode::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}
