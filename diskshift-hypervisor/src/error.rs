//! Error types for the hypervisor abstraction layer.

use thiserror::Error;

/// Errors that can occur during hypervisor operations.
#[derive(Error, Debug)]
pub enum HypervisorError {
    /// Failed to connect to the hypervisor.
    #[error("Failed to connect to hypervisor: {0}")]
    ConnectionFailed(String),

    /// Domain was not found.
    #[error("Domain not found: {0}")]
    DomainNotFound(String),

    /// Failed to start a block-copy job.
    #[error("Block copy failed: {0}")]
    BlockCopyFailed(String),

    /// Failed to pivot a block job to its new destination.
    #[error("Pivot failed: {0}")]
    PivotFailed(String),

    /// Failed to undefine a domain.
    #[error("Undefine failed: {0}")]
    UndefineFailed(String),

    /// Failed to define a domain from XML.
    #[error("Define failed: {0}")]
    DefineFailed(String),

    /// Failed to query domain or job state.
    #[error("Failed to query: {0}")]
    QueryFailed(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for hypervisor operations.
pub type Result<T> = std::result::Result<T, HypervisorError>;
