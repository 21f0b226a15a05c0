//! Migration partitioner: split a volume map into disks that still need to
//! move and disks already at the requested destination.
//!
//! The partition is what makes re-invocation safe: a re-run against a fully
//! migrated domain produces an empty pending set and the session becomes a
//! no-op.

use std::path::{Component, Path, PathBuf};

use diskshift_hypervisor::BlockCopyTarget;

use crate::error::{MigrateError, Result};
use crate::inventory::{VolumeDescriptor, VolumeMap, VolumeSource};

/// Requested migration destination: a storage pool or a filesystem
/// directory, never both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// Migrate into the named storage pool.
    Pool(String),
    /// Migrate backing files into this directory.
    Path(PathBuf),
}

impl Destination {
    /// Build a destination from the two mutually exclusive CLI options.
    pub fn from_options(pool: Option<String>, filepath: Option<PathBuf>) -> Result<Self> {
        match (pool, filepath) {
            (Some(pool), None) => Ok(Destination::Pool(pool)),
            (None, Some(path)) => Ok(Destination::Path(path)),
            (Some(_), Some(_)) => Err(MigrateError::InvalidDestination(
                "either a pool or a filepath must be specified, not both".to_string(),
            )),
            (None, None) => Err(MigrateError::InvalidDestination(
                "either a pool or a filepath must be specified".to_string(),
            )),
        }
    }

    /// The block-copy target a descriptor migrates to. The volume keeps its
    /// leaf name across the move.
    pub fn copy_target(&self, descriptor: &VolumeDescriptor) -> BlockCopyTarget {
        let name = descriptor.source.volume_name();
        match self {
            Destination::Path(dir) => BlockCopyTarget::File {
                path: dir.join(name).to_string_lossy().into_owned(),
            },
            Destination::Pool(pool) => BlockCopyTarget::Volume {
                pool: pool.clone(),
                volume: name.to_string(),
            },
        }
    }

    /// Human-readable destination for a descriptor.
    pub fn describe_for(&self, descriptor: &VolumeDescriptor) -> String {
        match self.copy_target(descriptor) {
            BlockCopyTarget::File { path } => path,
            BlockCopyTarget::Volume { pool, volume } => {
                format!("pool '{}' volume '{}'", pool, volume)
            }
        }
    }
}

/// Partition of a volume map against a destination.
///
/// `pending` and `already_migrated` are disjoint and together cover the
/// whole input map.
#[derive(Debug, Clone, Default)]
pub struct MigrationPlan {
    /// Disks whose current location differs from the destination.
    pub pending: Vec<VolumeDescriptor>,
    /// Disks already at the destination.
    pub already_migrated: Vec<VolumeDescriptor>,
}

impl MigrationPlan {
    /// Target device ids of the pending set, in document order.
    pub fn pending_devices(&self) -> Vec<String> {
        self.pending.iter().map(|d| d.target_device.clone()).collect()
    }
}

/// Partition every disk of `volumes` into pending vs already-migrated.
///
/// A file-backed disk is already migrated iff its directory equals the
/// destination path after lexical normalization; a pool-backed disk iff its
/// pool name equals the destination pool. A disk whose kind does not match
/// the destination kind is always pending: cross-kind moves are exactly the
/// case being automated.
///
/// Note: volume leaf names are not compared, matching the original
/// behavior. A same-named foreign file already sitting in the destination
/// directory is classified as migrated.
pub fn partition(volumes: &VolumeMap, destination: &Destination) -> MigrationPlan {
    let mut plan = MigrationPlan::default();

    for descriptor in volumes.iter() {
        let migrated = match (&descriptor.source, destination) {
            (VolumeSource::FileBacked { directory, .. }, Destination::Path(dest)) => {
                normalize_path(directory) == normalize_path(dest)
            }
            (VolumeSource::PoolBacked { pool, .. }, Destination::Pool(dest)) => pool == dest,
            // Cross-kind: always pending.
            _ => false,
        };

        if migrated {
            plan.already_migrated.push(descriptor.clone());
        } else {
            plan.pending.push(descriptor.clone());
        }
    }

    plan
}

/// Lexical path normalization: drops `.` segments and trailing separators,
/// resolves `..` against the path itself. No filesystem access.
fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push("..");
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }

    if normalized.as_os_str().is_empty() {
        normalized.push(".");
    }
    normalized
}
