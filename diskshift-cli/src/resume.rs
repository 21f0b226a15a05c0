//! Resume detector: distinguish a fresh migration from recovery after an
//! interrupted run.
//!
//! A previous run that was killed mid-flight leaves its block-copy jobs
//! running inside the hypervisor. Finding any such job for a pending device
//! means this run must monitor and pivot instead of launching again.

use std::collections::BTreeSet;

use diskshift_hypervisor::Hypervisor;
use tracing::debug;

use crate::error::Result;
use crate::inventory::VolumeDescriptor;

/// Read-only probe: which of the candidate devices have an active
/// block-copy job right now, regardless of its progress.
pub async fn find_ongoing(
    hypervisor: &dyn Hypervisor,
    domain: &str,
    candidates: &[VolumeDescriptor],
) -> Result<BTreeSet<String>> {
    let mut ongoing = BTreeSet::new();

    for descriptor in candidates {
        let device = &descriptor.target_device;
        if hypervisor.block_job_status(domain, device).await?.is_some() {
            debug!(device = %device, "Found ongoing block-copy job");
            ongoing.insert(device.clone());
        }
    }

    Ok(ongoing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use diskshift_hypervisor::{BlockCopyTarget, BlockJobStatus, MockConnection, MockDisk, MockDiskSource};

    fn web01(conn: &MockConnection) {
        conn.add_domain("web01", vec![
            MockDisk {
                device: "vda".to_string(),
                source: MockDiskSource::File { path: "/data/pool-a/web01.qcow2".to_string() },
            },
            MockDisk {
                device: "vdb".to_string(),
                source: MockDiskSource::Volume {
                    pool: "fast-ssd".to_string(),
                    volume: "web01-data".to_string(),
                },
            },
        ]);
    }

    fn candidates() -> Vec<VolumeDescriptor> {
        use crate::inventory::VolumeSource;
        vec![
            VolumeDescriptor {
                target_device: "vda".to_string(),
                source: VolumeSource::FileBacked {
                    directory: "/data/pool-a".into(),
                    file_name: "web01.qcow2".to_string(),
                },
            },
            VolumeDescriptor {
                target_device: "vdb".to_string(),
                source: VolumeSource::PoolBacked {
                    pool: "fast-ssd".to_string(),
                    volume: "web01-data".to_string(),
                },
            },
        ]
    }

    #[tokio::test]
    async fn fresh_domain_has_no_ongoing_jobs() {
        let conn = MockConnection::new();
        web01(&conn);

        let ongoing = find_ongoing(&conn, "web01", &candidates()).await.unwrap();
        assert!(ongoing.is_empty());
    }

    #[tokio::test]
    async fn running_job_is_detected_regardless_of_progress() {
        let conn = MockConnection::new();
        web01(&conn);
        conn.inject_running_job(
            "web01",
            "vda",
            BlockCopyTarget::File { path: "/data/pool-b/web01.qcow2".to_string() },
            vec![BlockJobStatus { cur: 5, end: 100 }],
        );

        let ongoing = find_ongoing(&conn, "web01", &candidates()).await.unwrap();
        assert_eq!(ongoing.into_iter().collect::<Vec<_>>(), vec!["vda".to_string()]);
    }
}
