//! Job coordinator: drive per-device block-copy jobs from launch (or
//! resume) through completion to the pivoted state.
//!
//! Single-threaded and cooperative: one status query per device per tick,
//! aggregated into one progress report. The hypervisor performs the actual
//! copy in its own execution context; the only suspension point here is the
//! fixed-interval sleep between polls.

use std::time::Duration;

use diskshift_hypervisor::Hypervisor;
use tracing::{info, warn};

use crate::error::Result;
use crate::inventory::VolumeDescriptor;
use crate::plan::Destination;

/// Consolidated result of polling every monitored device once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSnapshot {
    /// Per-device completion percentage, in monitoring order.
    pub percents: Vec<(String, u8)>,
    /// Termination predicate: every device reports complete.
    pub complete: bool,
}

/// Drives block-copy jobs for one domain over a shared hypervisor handle.
pub struct JobCoordinator<'a> {
    hypervisor: &'a dyn Hypervisor,
    domain: &'a str,
    poll_interval: Duration,
}

impl<'a> JobCoordinator<'a> {
    pub fn new(hypervisor: &'a dyn Hypervisor, domain: &'a str, poll_interval: Duration) -> Self {
        Self { hypervisor, domain, poll_interval }
    }

    /// Launch a block-copy job for every pending descriptor.
    ///
    /// All-or-nothing: the first failure aborts without attempting the
    /// remaining devices, leaving already-launched jobs running for the
    /// resume detector to pick up.
    pub async fn launch_all(
        &self,
        pending: &[VolumeDescriptor],
        destination: &Destination,
    ) -> Result<()> {
        for descriptor in pending {
            let target = destination.copy_target(descriptor);
            info!(
                device = %descriptor.target_device,
                from = %descriptor.source.describe(),
                to = %destination.describe_for(descriptor),
                "Launching block copy"
            );
            self.hypervisor
                .start_block_copy(self.domain, &descriptor.target_device, &target)
                .await?;
        }
        Ok(())
    }

    /// Poll every device's job status once.
    ///
    /// An absent job counts as 100%: either it was never needed or the
    /// hypervisor already finished and dropped it.
    pub async fn poll_once(&self, devices: &[String]) -> Result<PollSnapshot> {
        let mut percents = Vec::with_capacity(devices.len());
        let mut complete = true;

        for device in devices {
            let percent = match self.hypervisor.block_job_status(self.domain, device).await? {
                Some(status) => {
                    if !status.is_complete() {
                        complete = false;
                    }
                    status.percent()
                }
                None => 100,
            };
            percents.push((device.clone(), percent));
        }

        Ok(PollSnapshot { percents, complete })
    }

    /// Block until every device's copy job reports complete, polling on the
    /// configured cadence and reporting consolidated progress each tick.
    pub async fn monitor_all(&self, devices: &[String]) -> Result<()> {
        loop {
            let snapshot = self.poll_once(devices).await?;

            let report: Vec<String> = snapshot
                .percents
                .iter()
                .map(|(device, percent)| format!("{} {}%", device, percent))
                .collect();
            info!(progress = %report.join(", "), "Migrating");

            if snapshot.complete {
                return Ok(());
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Pivot every device to its new location. Only called after
    /// [`monitor_all`](Self::monitor_all) observed all devices complete;
    /// irreversible per device, all-or-nothing across devices.
    pub async fn pivot_all(&self, devices: &[String]) -> Result<()> {
        for device in devices {
            info!(device = %device, "Pivoting to new location");
            if let Err(e) = self.hypervisor.pivot_block_job(self.domain, device).await {
                warn!(device = %device, "Pivot failed; aborting session");
                return Err(e.into());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use diskshift_hypervisor::{
        BlockJobStatus, MockConnection, MockDisk, MockDiskSource, MutationCall,
    };

    use crate::inventory::VolumeSource;

    fn file_disk(device: &str, path: &str) -> MockDisk {
        MockDisk {
            device: device.to_string(),
            source: MockDiskSource::File { path: path.to_string() },
        }
    }

    fn file_descriptor(device: &str, directory: &str, file_name: &str) -> VolumeDescriptor {
        VolumeDescriptor {
            target_device: device.to_string(),
            source: VolumeSource::FileBacked {
                directory: PathBuf::from(directory),
                file_name: file_name.to_string(),
            },
        }
    }

    fn status(cur: u64, end: u64) -> BlockJobStatus {
        BlockJobStatus { cur, end }
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_waits_for_all_devices() {
        let conn = MockConnection::new();
        conn.add_domain("web01", vec![
            file_disk("vda", "/data/pool-a/web01.qcow2"),
            file_disk("vdb", "/data/pool-a/web01-data.qcow2"),
        ]);
        conn.script_launch_progress("web01", "vda", vec![
            status(25, 100), status(75, 100), status(100, 100),
        ]);
        conn.script_launch_progress("web01", "vdb", vec![
            status(100, 100),
        ]);

        let destination = Destination::Path(PathBuf::from("/data/pool-b"));
        let pending = vec![
            file_descriptor("vda", "/data/pool-a", "web01.qcow2"),
            file_descriptor("vdb", "/data/pool-a", "web01-data.qcow2"),
        ];

        let coordinator = JobCoordinator::new(&conn, "web01", Duration::from_secs(1));
        coordinator.launch_all(&pending, &destination).await.unwrap();
        coordinator
            .monitor_all(&["vda".to_string(), "vdb".to_string()])
            .await
            .unwrap();
        coordinator
            .pivot_all(&["vda".to_string(), "vdb".to_string()])
            .await
            .unwrap();

        assert_eq!(conn.disks("web01"), vec![
            file_disk("vda", "/data/pool-b/web01.qcow2"),
            file_disk("vdb", "/data/pool-b/web01-data.qcow2"),
        ]);
    }

    #[tokio::test(start_paused = true)]
    async fn progress_is_monotonic_and_reaches_100_at_completion() {
        let conn = MockConnection::new();
        conn.add_domain("web01", vec![file_disk("vda", "/data/pool-a/web01.qcow2")]);
        conn.script_launch_progress("web01", "vda", vec![
            status(10, 100), status(40, 100), status(40, 100), status(99, 100), status(100, 100),
        ]);

        let destination = Destination::Path(PathBuf::from("/data/pool-b"));
        let pending = vec![file_descriptor("vda", "/data/pool-a", "web01.qcow2")];
        let devices = vec!["vda".to_string()];

        let coordinator = JobCoordinator::new(&conn, "web01", Duration::from_secs(1));
        coordinator.launch_all(&pending, &destination).await.unwrap();

        let mut last = 0u8;
        loop {
            let snapshot = coordinator.poll_once(&devices).await.unwrap();
            let (_, percent) = snapshot.percents[0];
            assert!(percent >= last, "progress went backwards: {} -> {}", last, percent);
            last = percent;
            if snapshot.complete {
                assert_eq!(percent, 100);
                break;
            }
            assert!(percent < 100);
        }
    }

    #[tokio::test]
    async fn launch_failure_is_all_or_nothing() {
        let conn = MockConnection::new();
        conn.add_domain("web01", vec![
            file_disk("vda", "/data/pool-a/web01.qcow2"),
            file_disk("vdb", "/data/pool-a/web01-data.qcow2"),
        ]);
        conn.fail_next_block_copy("web01", "vdb");

        let destination = Destination::Path(PathBuf::from("/data/pool-b"));
        let pending = vec![
            file_descriptor("vda", "/data/pool-a", "web01.qcow2"),
            file_descriptor("vdb", "/data/pool-a", "web01-data.qcow2"),
        ];

        let coordinator = JobCoordinator::new(&conn, "web01", Duration::from_secs(1));
        let err = coordinator.launch_all(&pending, &destination).await.unwrap_err();
        assert!(matches!(err, crate::error::MigrateError::Hypervisor(_)));

        // vda launched, vdb failed; no pivot was ever issued.
        let mutations = conn.mutations();
        assert!(mutations.iter().all(|m| !matches!(m, MutationCall::Pivot { .. })));
        assert_eq!(
            mutations.iter().filter(|m| matches!(m, MutationCall::BlockCopy { .. })).count(),
            2,
        );
    }

    #[tokio::test]
    async fn absent_job_counts_as_complete() {
        let conn = MockConnection::new();
        conn.add_domain("web01", vec![file_disk("vda", "/data/pool-a/web01.qcow2")]);

        let coordinator = JobCoordinator::new(&conn, "web01", Duration::from_secs(1));
        let snapshot = coordinator.poll_once(&["vda".to_string()]).await.unwrap();
        assert!(snapshot.complete);
        assert_eq!(snapshot.percents, vec![("vda".to_string(), 100)]);
    }
}
