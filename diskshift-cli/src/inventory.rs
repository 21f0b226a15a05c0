//! Volume inventory: parse a domain's device description into a structured
//! map of disks.
//!
//! Pure transformation, no hypervisor contact. The domain description is the
//! source of truth; the map is rebuilt fresh on every invocation and never
//! persisted.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{MigrateError, Result};

/// One disk device attached to the domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeDescriptor {
    /// Stable device identifier as known to the hypervisor (e.g. `vda`).
    /// Unique within a domain.
    pub target_device: String,
    /// Current backing location.
    pub source: VolumeSource,
}

/// Backing location of a volume. The two payloads are mutually exclusive
/// by construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeSource {
    /// Backed by a flat file.
    FileBacked {
        /// Directory containing the backing file.
        directory: PathBuf,
        /// Leaf name of the backing file.
        file_name: String,
    },
    /// Backed by a managed storage-pool volume.
    PoolBacked {
        /// Storage pool name.
        pool: String,
        /// Volume name within the pool.
        volume: String,
    },
}

impl VolumeSource {
    /// Leaf name the volume keeps across a migration.
    pub fn volume_name(&self) -> &str {
        match self {
            VolumeSource::FileBacked { file_name, .. } => file_name,
            VolumeSource::PoolBacked { volume, .. } => volume,
        }
    }

    /// Human-readable current location.
    pub fn describe(&self) -> String {
        match self {
            VolumeSource::FileBacked { directory, file_name } => {
                directory.join(file_name).display().to_string()
            }
            VolumeSource::PoolBacked { pool, volume } => {
                format!("pool '{}' volume '{}'", pool, volume)
            }
        }
    }
}

/// Ordered mapping from target device to volume descriptor, one per domain.
///
/// Preserves device-description document order.
#[derive(Debug, Clone, Default)]
pub struct VolumeMap {
    volumes: Vec<VolumeDescriptor>,
}

impl VolumeMap {
    /// Iterate descriptors in document order.
    pub fn iter(&self) -> impl Iterator<Item = &VolumeDescriptor> {
        self.volumes.iter()
    }

    /// Number of disks.
    pub fn len(&self) -> usize {
        self.volumes.len()
    }

    /// Whether the domain has no migratable disks.
    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }

    /// Look up a descriptor by target device.
    pub fn get(&self, device: &str) -> Option<&VolumeDescriptor> {
        self.volumes.iter().find(|v| v.target_device == device)
    }
}

// Minimal view of the domain XML: only the fields the orchestrator reads.
#[derive(Debug, Deserialize)]
struct DomainDoc {
    devices: Option<DevicesDoc>,
}

#[derive(Debug, Deserialize)]
struct DevicesDoc {
    #[serde(default, rename = "disk")]
    disks: Vec<DiskDoc>,
}

#[derive(Debug, Deserialize)]
struct DiskDoc {
    /// `disk`, `cdrom`, `floppy`, `lun`; libvirt defaults to `disk`.
    #[serde(rename = "@device")]
    device: Option<String>,
    target: Option<TargetDoc>,
    source: Option<SourceDoc>,
}

#[derive(Debug, Deserialize)]
struct TargetDoc {
    #[serde(rename = "@dev")]
    dev: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SourceDoc {
    #[serde(rename = "@file")]
    file: Option<String>,
    #[serde(rename = "@pool")]
    pool: Option<String>,
    #[serde(rename = "@volume")]
    volume: Option<String>,
}

/// Parse a domain device description into a [`VolumeMap`].
///
/// Only `device='disk'` entries are migratable volumes; cdrom and floppy
/// entries are skipped. A disk entry lacking a target device id, or with
/// neither a file nor a pool source, fails with
/// [`MigrateError::MalformedDescriptor`].
pub fn parse_volumes(xml: &str) -> Result<VolumeMap> {
    let doc: DomainDoc = quick_xml::de::from_str(xml)
        .map_err(|e| MigrateError::MalformedDescriptor(e.to_string()))?;

    let devices = doc.devices.ok_or_else(|| {
        MigrateError::MalformedDescriptor("domain has no <devices> element".to_string())
    })?;

    let mut volumes = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for disk in devices.disks {
        if let Some(kind) = &disk.device {
            if kind != "disk" {
                continue;
            }
        }

        let target_device = disk
            .target
            .and_then(|t| t.dev)
            .ok_or_else(|| {
                MigrateError::MalformedDescriptor(
                    "disk entry without a target device id".to_string(),
                )
            })?;

        if !seen.insert(target_device.clone()) {
            return Err(MigrateError::MalformedDescriptor(format!(
                "duplicate target device '{}'",
                target_device
            )));
        }

        let source = disk.source.ok_or_else(|| {
            MigrateError::MalformedDescriptor(format!(
                "disk '{}' has no source element",
                target_device
            ))
        })?;

        let source = match (source.file, source.pool) {
            (Some(file), _) => split_file_source(&target_device, &file)?,
            (None, Some(pool)) => {
                let volume = source.volume.ok_or_else(|| {
                    MigrateError::MalformedDescriptor(format!(
                        "disk '{}' names pool '{}' but no volume",
                        target_device, pool
                    ))
                })?;
                VolumeSource::PoolBacked { pool, volume }
            }
            (None, None) => {
                return Err(MigrateError::MalformedDescriptor(format!(
                    "disk '{}' has neither a file nor a pool source",
                    target_device
                )));
            }
        };

        volumes.push(VolumeDescriptor { target_device, source });
    }

    Ok(VolumeMap { volumes })
}

/// Split a file-backed source path into directory + leaf name.
fn split_file_source(device: &str, file: &str) -> Result<VolumeSource> {
    let path = Path::new(file);

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| {
            MigrateError::MalformedDescriptor(format!(
                "disk '{}' has a file source without a file name: {}",
                device, file
            ))
        })?;

    let directory = path.parent().unwrap_or_else(|| Path::new("")).to_path_buf();

    Ok(VolumeSource::FileBacked { directory, file_name })
}
