//! Error types for the mesh control plane.

use thiserror::Error;

/// Control-plane error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MeshError {
    /// Operation on a registry that has not been initialized
    #[error("node registry not initialized")]
    NotInitialized,

    /// Sub-node insertion attempted with no root on record
    #[error("registry has no root entry")]
    NoRoot,

    /// Empty or otherwise unusable input, rejected before any mutation
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Envelope or option bytes that do not decode
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// Request rejected by the mesh transport collaborator
    #[error("transport error: {0}")]
    Transport(String),

    /// Provisioning collaborator fault
    #[error("provisioning error: {0}")]
    Provision(String),
}

/// Result type alias for control-plane operations
pub type Result<T> = std::result::Result<T, MeshError>;
