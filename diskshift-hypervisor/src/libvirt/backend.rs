//! Libvirt backend implementation.

use async_trait::async_trait;
use tracing::{debug, info, instrument};
use virt::connect::Connect;
use virt::domain::Domain;
use virt::sys;

use crate::error::{HypervisorError, Result};
use crate::traits::Hypervisor;
use crate::types::*;

/// Libvirt/QEMU hypervisor backend.
///
/// Provides the block-copy, pivot and domain-definition control calls the
/// migration orchestrator needs, over a single shared connection used
/// sequentially.
pub struct LibvirtConnection {
    connection: Connect,
}

impl LibvirtConnection {
    /// Create a new libvirt backend connected to the specified URI.
    ///
    /// Common URIs:
    /// - `qemu:///system` - System-wide QEMU/KVM
    /// - `qemu:///session` - User session QEMU
    /// - `qemu+ssh://user@host/system` - Remote via SSH
    pub async fn new(uri: &str) -> Result<Self> {
        info!(uri = %uri, "Connecting to libvirt");

        let connection = Connect::open(Some(uri))
            .map_err(|e| HypervisorError::ConnectionFailed(e.to_string()))?;

        info!("Connected to libvirt");

        Ok(Self { connection })
    }

    /// Get a domain by name.
    fn get_domain(&self, domain: &str) -> Result<Domain> {
        Domain::lookup_by_name(&self.connection, domain)
            .map_err(|e| HypervisorError::DomainNotFound(
                format!("{}: {}", domain, e)
            ))
    }

    /// Build the destination `<disk>` XML for a block-copy request.
    fn target_xml(target: &BlockCopyTarget) -> String {
        match target {
            BlockCopyTarget::File { path } => format!(
                "<disk type='file' device='disk'>\
                 <driver name='qemu' type='qcow2'/>\
                 <source file='{}'/>\
                 </disk>",
                path
            ),
            BlockCopyTarget::Volume { pool, volume } => format!(
                "<disk type='volume' device='disk'>\
                 <driver name='qemu' type='qcow2'/>\
                 <source pool='{}' volume='{}'/>\
                 </disk>",
                pool, volume
            ),
        }
    }
}

#[async_trait]
impl Hypervisor for LibvirtConnection {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<bool> {
        match self.connection.is_alive() {
            Ok(alive) => Ok(alive),
            Err(_) => Ok(false),
        }
    }

    #[instrument(skip(self), fields(domain = %domain))]
    async fn domain_exists(&self, domain: &str) -> Result<bool> {
        match Domain::lookup_by_name(&self.connection, domain) {
            Ok(_) => Ok(true),
            Err(_) => Ok(false),
        }
    }

    #[instrument(skip(self), fields(domain = %domain))]
    async fn domain_xml(&self, domain: &str, inactive: bool) -> Result<String> {
        let dom = self.get_domain(domain)?;

        let flags = if inactive { sys::VIR_DOMAIN_XML_INACTIVE } else { 0 };
        dom.get_xml_desc(flags)
            .map_err(|e| HypervisorError::QueryFailed(e.to_string()))
    }

    #[instrument(skip(self, target), fields(domain = %domain, device = %device))]
    async fn start_block_copy(
        &self,
        domain: &str,
        device: &str,
        target: &BlockCopyTarget,
    ) -> Result<()> {
        let dom = self.get_domain(domain)?;

        let dest_xml = Self::target_xml(target);
        debug!(xml = %dest_xml, "Generated destination XML");

        dom.block_copy(device, &dest_xml, 0)
            .map_err(|e| HypervisorError::BlockCopyFailed(e.to_string()))?;

        info!("Block copy started");
        Ok(())
    }

    #[instrument(skip(self), fields(domain = %domain, device = %device))]
    async fn block_job_status(
        &self,
        domain: &str,
        device: &str,
    ) -> Result<Option<BlockJobStatus>> {
        let dom = self.get_domain(domain)?;

        // libvirt reports a zeroed info struct when no job is active for
        // the device; the virt crate surfaces that as end == 0.
        match dom.get_block_job_info(device, 0) {
            Ok(info) if info.end > 0 => Ok(Some(BlockJobStatus {
                cur: info.cur,
                end: info.end,
            })),
            Ok(_) => Ok(None),
            Err(e) => Err(HypervisorError::QueryFailed(e.to_string())),
        }
    }

    #[instrument(skip(self), fields(domain = %domain, device = %device))]
    async fn pivot_block_job(&self, domain: &str, device: &str) -> Result<()> {
        info!("Pivoting block job");

        let dom = self.get_domain(domain)?;

        dom.block_job_abort(device, sys::VIR_DOMAIN_BLOCK_JOB_ABORT_PIVOT)
            .map_err(|e| HypervisorError::PivotFailed(e.to_string()))?;

        info!("Block job pivoted");
        Ok(())
    }

    #[instrument(skip(self), fields(domain = %domain))]
    async fn undefine_keep_nvram(&self, domain: &str) -> Result<()> {
        info!("Undefining domain (keeping NVRAM)");

        let dom = self.get_domain(domain)?;

        dom.undefine_flags(sys::VIR_DOMAIN_UNDEFINE_KEEP_NVRAM)
            .map_err(|e| HypervisorError::UndefineFailed(e.to_string()))?;

        info!("Domain undefined");
        Ok(())
    }

    #[instrument(skip(self, xml))]
    async fn define_domain(&self, xml: &str) -> Result<()> {
        info!("Defining domain");

        Domain::define_xml(&self.connection, xml)
            .map_err(|e| HypervisorError::DefineFailed(e.to_string()))?;

        info!("Domain defined");
        Ok(())
    }
}
