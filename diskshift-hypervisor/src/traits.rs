//! Core hypervisor abstraction trait.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::*;

/// Control surface the storage migration orchestrator needs from a
/// hypervisor.
///
/// The hypervisor owns the actual byte-for-byte disk mirroring; this trait
/// only issues control requests and reads state. All calls are synchronous
/// request/response from the orchestrator's point of view — the copy itself
/// runs asynchronously inside the hypervisor, which is why job progress is
/// polled rather than awaited.
#[async_trait]
pub trait Hypervisor: Send + Sync {
    // =========================================================================
    // Connection & Domain State
    // =========================================================================

    /// Check if the hypervisor connection is healthy.
    async fn health_check(&self) -> Result<bool>;

    /// Check if a domain with the given name exists.
    async fn domain_exists(&self, domain: &str) -> Result<bool>;

    /// Get the domain's device description XML.
    ///
    /// With `inactive` set, returns the persistent (next-boot) definition
    /// rather than the live one.
    async fn domain_xml(&self, domain: &str, inactive: bool) -> Result<String>;

    // =========================================================================
    // Block-Copy Jobs
    // =========================================================================

    /// Start mirroring one disk device to a new location.
    ///
    /// Non-blocking: the hypervisor begins an asynchronous background copy
    /// and this call returns immediately.
    async fn start_block_copy(
        &self,
        domain: &str,
        device: &str,
        target: &BlockCopyTarget,
    ) -> Result<()>;

    /// Query the progress of a device's block-copy job.
    ///
    /// Returns `None` when no job is running for the device.
    async fn block_job_status(
        &self,
        domain: &str,
        device: &str,
    ) -> Result<Option<BlockJobStatus>>;

    /// Finalize a completed block-copy job: cut the domain over to the new
    /// location and discard the old source. Irreversible.
    async fn pivot_block_job(&self, domain: &str, device: &str) -> Result<()>;

    // =========================================================================
    // Domain Definition
    // =========================================================================

    /// Remove the domain's persistent configuration while keeping its
    /// NVRAM (firmware variable store) association.
    ///
    /// Block-copy requires the domain to be transient on libvirt, so this
    /// runs before any copy is launched; the domain keeps running.
    async fn undefine_keep_nvram(&self, domain: &str) -> Result<()>;

    /// Define (or replace) a persistent domain configuration from XML.
    async fn define_domain(&self, xml: &str) -> Result<()>;
}
