//! Error types for the migration orchestrator.

use std::path::PathBuf;

use diskshift_hypervisor::HypervisorError;
use thiserror::Error;

/// Errors that terminate a migration session.
///
/// Every variant propagates to the top level and exits non-zero; nothing is
/// silently swallowed. Recovery from an interrupted run is structural (the
/// resume detector), not retry-based.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// The destination specification violates the pool-or-filepath
    /// mutual-exclusion contract. Reported before any hypervisor contact.
    #[error("Invalid destination: {0}")]
    InvalidDestination(String),

    /// The domain's device description cannot be parsed into volume
    /// descriptors. Fatal, aborts before any mutation.
    #[error("Malformed domain description: {0}")]
    MalformedDescriptor(String),

    /// Cannot reach or authenticate to the hypervisor.
    #[error("Hypervisor connection failed: {0}")]
    Connection(String),

    /// A hypervisor control call failed. Fatal for the whole session: a
    /// partially-migrated domain must be surfaced to the operator, not
    /// patched up by guessing hypervisor state.
    #[error("Hypervisor operation failed: {0}")]
    Hypervisor(HypervisorError),

    /// Writing the pre-migration backup failed. Fatal; nothing destructive
    /// has happened yet.
    #[error("Failed to write backup file {path}: {source}")]
    Backup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The operator did not confirm the destructive steps.
    #[error("Aborted by operator")]
    OperatorDeclined,

    /// Session invariant breach.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<HypervisorError> for MigrateError {
    fn from(err: HypervisorError) -> Self {
        match err {
            HypervisorError::ConnectionFailed(msg) => MigrateError::Connection(msg),
            other => MigrateError::Hypervisor(other),
        }
    }
}

/// Result type alias for orchestrator operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
