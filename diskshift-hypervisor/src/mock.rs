//! Mock hypervisor backend for testing and development.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::error::{HypervisorError, Result};
use crate::traits::Hypervisor;
use crate::types::*;

/// Mock hypervisor backend.
///
/// Simulates domains, block-copy jobs and persistent definitions in memory
/// without requiring libvirt. Useful for:
/// - Unit and integration testing (scripted job progress, failure injection)
/// - Development without libvirt installed (`--dev` mode)
pub struct MockConnection {
    domains: RwLock<HashMap<String, MockDomain>>,
    /// Log of every mutating call, in issue order.
    mutations: Mutex<Vec<MutationCall>>,
    /// `(domain, device)` pairs whose next `start_block_copy` fails.
    fail_block_copy: RwLock<HashSet<(String, String)>>,
}

/// One simulated disk device attached to a mock domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockDisk {
    /// Target device id (e.g. `vda`).
    pub device: String,
    /// Current backing location.
    pub source: MockDiskSource,
}

/// Backing location of a mock disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockDiskSource {
    /// Flat file backing.
    File { path: String },
    /// Storage-pool volume backing.
    Volume { pool: String, volume: String },
}

/// A mutating hypervisor call, recorded so tests can assert on exactly
/// which destructive operations a session issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationCall {
    BlockCopy { domain: String, device: String },
    Pivot { domain: String, device: String },
    Undefine { domain: String },
    Define { domain: String },
}

struct MockDomain {
    disks: Vec<MockDisk>,
    persistent: bool,
    /// Active block-copy jobs keyed by device.
    jobs: HashMap<String, MockJob>,
    /// Progress scripts handed to jobs launched later, keyed by device.
    launch_scripts: HashMap<String, Vec<BlockJobStatus>>,
}

struct MockJob {
    /// Remaining scripted statuses; the last one is reported forever.
    statuses: VecDeque<BlockJobStatus>,
    target: BlockCopyTarget,
}

impl MockJob {
    fn new(statuses: Vec<BlockJobStatus>, target: BlockCopyTarget) -> Self {
        let mut statuses: VecDeque<_> = statuses.into();
        if statuses.is_empty() {
            // A job with no script completes on the first poll.
            statuses.push_back(BlockJobStatus { cur: 1, end: 1 });
        }
        Self { statuses, target }
    }

    /// Report the next scripted status, holding on the final one.
    fn poll(&mut self) -> BlockJobStatus {
        if self.statuses.len() > 1 {
            self.statuses.pop_front().unwrap_or(BlockJobStatus { cur: 1, end: 1 })
        } else {
            *self.statuses.front().unwrap_or(&BlockJobStatus { cur: 1, end: 1 })
        }
    }

    fn is_complete(&self) -> bool {
        self.statuses.len() == 1
            && self.statuses.front().map(|s| s.is_complete()).unwrap_or(true)
    }
}

impl MockConnection {
    /// Create a new empty mock backend.
    pub fn new() -> Self {
        info!("Creating mock hypervisor backend");
        Self {
            domains: RwLock::new(HashMap::new()),
            mutations: Mutex::new(Vec::new()),
            fail_block_copy: RwLock::new(HashSet::new()),
        }
    }

    /// Add a running, persistently defined domain with the given disks.
    pub fn add_domain(&self, name: &str, disks: Vec<MockDisk>) {
        let mut domains = self.domains.write().expect("lock poisoned");
        domains.insert(
            name.to_string(),
            MockDomain {
                disks,
                persistent: true,
                jobs: HashMap::new(),
                launch_scripts: HashMap::new(),
            },
        );
    }

    /// Script the progress sequence a device's job reports after it is
    /// launched with `start_block_copy`.
    pub fn script_launch_progress(&self, domain: &str, device: &str, statuses: Vec<BlockJobStatus>) {
        let mut domains = self.domains.write().expect("lock poisoned");
        if let Some(dom) = domains.get_mut(domain) {
            dom.launch_scripts.insert(device.to_string(), statuses);
        }
    }

    /// Install an already-running job, as if a previous orchestrator run
    /// launched it and was interrupted. Marks the domain transient, which
    /// is the state an interrupted run leaves behind.
    pub fn inject_running_job(
        &self,
        domain: &str,
        device: &str,
        target: BlockCopyTarget,
        statuses: Vec<BlockJobStatus>,
    ) {
        let mut domains = self.domains.write().expect("lock poisoned");
        if let Some(dom) = domains.get_mut(domain) {
            dom.persistent = false;
            dom.jobs.insert(device.to_string(), MockJob::new(statuses, target));
        }
    }

    /// Make the next `start_block_copy` for this device fail.
    pub fn fail_next_block_copy(&self, domain: &str, device: &str) {
        let mut failures = self.fail_block_copy.write().expect("lock poisoned");
        failures.insert((domain.to_string(), device.to_string()));
    }

    /// Snapshot of every mutating call issued so far.
    pub fn mutations(&self) -> Vec<MutationCall> {
        self.mutations.lock().expect("lock poisoned").clone()
    }

    /// Current disk set of a domain.
    pub fn disks(&self, domain: &str) -> Vec<MockDisk> {
        let domains = self.domains.read().expect("lock poisoned");
        domains.get(domain).map(|d| d.disks.clone()).unwrap_or_default()
    }

    /// Whether the domain currently has a persistent definition.
    pub fn is_persistent(&self, domain: &str) -> bool {
        let domains = self.domains.read().expect("lock poisoned");
        domains.get(domain).map(|d| d.persistent).unwrap_or(false)
    }

    fn record(&self, call: MutationCall) {
        self.mutations.lock().expect("lock poisoned").push(call);
    }

    fn render_xml(name: &str, disks: &[MockDisk]) -> String {
        let mut xml = format!("<domain type='kvm'>\n  <name>{}</name>\n  <devices>\n", name);
        for disk in disks {
            match &disk.source {
                MockDiskSource::File { path } => {
                    xml.push_str(&format!(
                        "    <disk type='file' device='disk'>\n      <driver name='qemu' type='qcow2'/>\n      <source file='{}'/>\n      <target dev='{}' bus='virtio'/>\n    </disk>\n",
                        path, disk.device
                    ));
                }
                MockDiskSource::Volume { pool, volume } => {
                    xml.push_str(&format!(
                        "    <disk type='volume' device='disk'>\n      <driver name='qemu' type='qcow2'/>\n      <source pool='{}' volume='{}'/>\n      <target dev='{}' bus='virtio'/>\n    </disk>\n",
                        pool, volume, disk.device
                    ));
                }
            }
        }
        xml.push_str("  </devices>\n</domain>\n");
        xml
    }

    /// Extract the `<name>` element from a domain XML document.
    fn name_from_xml(xml: &str) -> Option<String> {
        let start = xml.find("<name>")? + "<name>".len();
        let end = xml[start..].find("</name>")? + start;
        Some(xml[start..end].to_string())
    }
}

impl Default for MockConnection {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Hypervisor for MockConnection {
    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    async fn domain_exists(&self, domain: &str) -> Result<bool> {
        let domains = self.domains.read().map_err(|_| {
            HypervisorError::Internal("Lock poisoned".to_string())
        })?;
        Ok(domains.contains_key(domain))
    }

    async fn domain_xml(&self, domain: &str, _inactive: bool) -> Result<String> {
        let domains = self.domains.read().map_err(|_| {
            HypervisorError::Internal("Lock poisoned".to_string())
        })?;
        let dom = domains.get(domain)
            .ok_or_else(|| HypervisorError::DomainNotFound(domain.to_string()))?;
        Ok(Self::render_xml(domain, &dom.disks))
    }

    async fn start_block_copy(
        &self,
        domain: &str,
        device: &str,
        target: &BlockCopyTarget,
    ) -> Result<()> {
        self.record(MutationCall::BlockCopy {
            domain: domain.to_string(),
            device: device.to_string(),
        });

        {
            let mut failures = self.fail_block_copy.write().map_err(|_| {
                HypervisorError::Internal("Lock poisoned".to_string())
            })?;
            if failures.remove(&(domain.to_string(), device.to_string())) {
                return Err(HypervisorError::BlockCopyFailed(
                    format!("injected failure for {}", device)
                ));
            }
        }

        let mut domains = self.domains.write().map_err(|_| {
            HypervisorError::Internal("Lock poisoned".to_string())
        })?;
        let dom = domains.get_mut(domain)
            .ok_or_else(|| HypervisorError::DomainNotFound(domain.to_string()))?;

        if !dom.disks.iter().any(|d| d.device == device) {
            return Err(HypervisorError::BlockCopyFailed(
                format!("no such device: {}", device)
            ));
        }
        if dom.jobs.contains_key(device) {
            return Err(HypervisorError::BlockCopyFailed(
                format!("job already active for {}", device)
            ));
        }

        let script = dom.launch_scripts.remove(device).unwrap_or_default();
        dom.jobs.insert(device.to_string(), MockJob::new(script, target.clone()));

        debug!(domain = %domain, device = %device, "Mock block copy started");
        Ok(())
    }

    async fn block_job_status(
        &self,
        domain: &str,
        device: &str,
    ) -> Result<Option<BlockJobStatus>> {
        let mut domains = self.domains.write().map_err(|_| {
            HypervisorError::Internal("Lock poisoned".to_string())
        })?;
        let dom = domains.get_mut(domain)
            .ok_or_else(|| HypervisorError::DomainNotFound(domain.to_string()))?;

        Ok(dom.jobs.get_mut(device).map(|job| job.poll()))
    }

    async fn pivot_block_job(&self, domain: &str, device: &str) -> Result<()> {
        self.record(MutationCall::Pivot {
            domain: domain.to_string(),
            device: device.to_string(),
        });

        let mut domains = self.domains.write().map_err(|_| {
            HypervisorError::Internal("Lock poisoned".to_string())
        })?;
        let dom = domains.get_mut(domain)
            .ok_or_else(|| HypervisorError::DomainNotFound(domain.to_string()))?;

        let job = dom.jobs.get(device)
            .ok_or_else(|| HypervisorError::PivotFailed(
                format!("no active job for {}", device)
            ))?;
        if !job.is_complete() {
            return Err(HypervisorError::PivotFailed(
                format!("job for {} still copying", device)
            ));
        }

        let target = job.target.clone();
        let disk = dom.disks.iter_mut()
            .find(|d| d.device == device)
            .ok_or_else(|| HypervisorError::PivotFailed(
                format!("no such device: {}", device)
            ))?;

        disk.source = match target {
            BlockCopyTarget::File { path } => MockDiskSource::File { path },
            BlockCopyTarget::Volume { pool, volume } => MockDiskSource::Volume { pool, volume },
        };
        dom.jobs.remove(device);

        debug!(domain = %domain, device = %device, "Mock block job pivoted");
        Ok(())
    }

    async fn undefine_keep_nvram(&self, domain: &str) -> Result<()> {
        self.record(MutationCall::Undefine { domain: domain.to_string() });

        let mut domains = self.domains.write().map_err(|_| {
            HypervisorError::Internal("Lock poisoned".to_string())
        })?;
        let dom = domains.get_mut(domain)
            .ok_or_else(|| HypervisorError::DomainNotFound(domain.to_string()))?;

        if !dom.persistent {
            return Err(HypervisorError::UndefineFailed(
                format!("{} is already transient", domain)
            ));
        }
        dom.persistent = false;

        debug!(domain = %domain, "Mock domain undefined (NVRAM kept)");
        Ok(())
    }

    async fn define_domain(&self, xml: &str) -> Result<()> {
        let name = Self::name_from_xml(xml)
            .ok_or_else(|| HypervisorError::DefineFailed(
                "domain XML has no <name> element".to_string()
            ))?;

        self.record(MutationCall::Define { domain: name.clone() });

        let mut domains = self.domains.write().map_err(|_| {
            HypervisorError::Internal("Lock poisoned".to_string())
        })?;
        let dom = domains.get_mut(&name)
            .ok_or_else(|| HypervisorError::DomainNotFound(name.clone()))?;
        dom.persistent = true;

        debug!(domain = %name, "Mock domain defined");
        Ok(())
    }
}
