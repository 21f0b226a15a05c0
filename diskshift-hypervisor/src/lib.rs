//! # diskshift Hypervisor
//!
//! Hypervisor abstraction layer for the live storage migration orchestrator.
//!
//! This crate provides the narrow control surface the orchestrator needs:
//! reading domain device descriptions, driving per-disk block-copy jobs
//! (start, poll, pivot) and swapping the persistent domain definition.
//!
//! Backends:
//! - **Libvirt/QEMU** (primary) - behind the `libvirt` feature, requires
//!   system libvirt
//! - **Mock** - in-memory simulation for tests and `--dev` mode

pub mod error;
pub mod traits;
pub mod types;
pub mod mock;
pub mod libvirt;

pub use error::HypervisorError;
pub use traits::Hypervisor;
pub use types::{BlockCopyTarget, BlockJobStatus};
pub use mock::{MockConnection, MockDisk, MockDiskSource, MutationCall};

// Re-export libvirt backend when available
#[cfg(feature = "libvirt")]
pub use libvirt::LibvirtConnection;
