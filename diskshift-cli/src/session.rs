//! Migration session: the top-level state machine.
//!
//! Composes the volume inventory, migration partitioner, resume detector
//! and job coordinator, and owns the one-time destructive steps: the XML
//! backup, the domain undefine and the final redefine.
//!
//! The session is ephemeral. It holds no durable state beyond the backup
//! file it writes and the domain definition it replaces; an interrupted run
//! is recovered structurally by re-running the tool, not by retrying here.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use diskshift_hypervisor::Hypervisor;
use tracing::{debug, info, warn};

use crate::coordinator::JobCoordinator;
use crate::error::{MigrateError, Result};
use crate::inventory::{parse_volumes, VolumeMap};
use crate::plan::{partition, Destination, MigrationPlan};
use crate::resume::find_ongoing;

/// Explicit configuration for one session; no ambient global state.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Name of the domain to migrate.
    pub domain: String,
    /// Requested destination (pool or filepath, mutually exclusive).
    pub destination: Destination,
    /// Directory for the pre-migration XML backup.
    pub backup_dir: PathBuf,
    /// Cadence of job-status polling.
    pub poll_interval: Duration,
}

impl SessionConfig {
    /// Fixed, predictable backup location, keyed by domain name. The sole
    /// recovery artifact if later steps fail catastrophically.
    pub fn backup_path(&self) -> PathBuf {
        self.backup_dir.join(format!("{}_backup.xml", self.domain))
    }
}

/// Operator confirmation seam, so the session is testable with fabricated
/// collaborators.
pub trait Prompt: Send + Sync {
    /// Show the plan summary and ask the operator to proceed.
    fn confirm(&self, summary: &str) -> bool;
}

/// Non-interactive prompt: always answers the same way. Backs `--yes` and
/// scripted tests.
pub struct AutoConfirm(pub bool);

impl Prompt for AutoConfirm {
    fn confirm(&self, _summary: &str) -> bool {
        if self.0 {
            info!("Confirmation skipped (--yes)");
        }
        self.0
    }
}

/// Session phases; see the transition table on [`MigrationSession::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Inspect,
    Plan,
    ResumeMonitor,
    ConfirmDestructive,
    Backup,
    Undefine,
    LaunchAll,
    MonitorAll,
    PivotAll,
    Redefine,
    Done,
    Aborted,
}

/// Terminal result of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Success, including "nothing to do" and "resumed a previous run".
    Done,
    /// The operator declined the destructive steps.
    Aborted,
}

/// Live storage migration session for one domain.
pub struct MigrationSession {
    config: SessionConfig,
    hypervisor: Arc<dyn Hypervisor>,
    prompt: Box<dyn Prompt>,
    phase: Phase,
    volumes: Option<VolumeMap>,
    plan: Option<MigrationPlan>,
    /// Pre-migration description, captured before any destructive step.
    pre_migration_xml: Option<String>,
    /// Devices being monitored and pivoted in this run.
    active_devices: Vec<String>,
}

impl MigrationSession {
    pub fn new(
        config: SessionConfig,
        hypervisor: Arc<dyn Hypervisor>,
        prompt: Box<dyn Prompt>,
    ) -> Self {
        Self {
            config,
            hypervisor,
            prompt,
            phase: Phase::Inspect,
            volumes: None,
            plan: None,
            pre_migration_xml: None,
            active_devices: Vec::new(),
        }
    }

    /// Drive the session to a terminal state.
    ///
    /// ```text
    /// Inspect -> Plan
    /// Plan -> Done                 [pending set is empty]
    /// Plan -> ResumeMonitor        [pending non-empty AND ongoing jobs found]
    /// Plan -> ConfirmDestructive   [pending non-empty AND no ongoing jobs]
    /// ResumeMonitor -> PivotAll
    /// ConfirmDestructive -> Aborted    [operator declines]
    /// ConfirmDestructive -> Backup
    /// Backup -> Undefine -> LaunchAll -> MonitorAll -> PivotAll
    /// PivotAll -> Redefine -> Done
    /// ```
    ///
    /// Both success paths finalize through `Redefine`, persisting the live
    /// (post-pivot) description as the new permanent configuration.
    pub async fn run(&mut self) -> Result<Outcome> {
        loop {
            debug!(phase = ?self.phase, "Session phase");
            self.phase = match self.phase {
                Phase::Inspect => self.inspect().await?,
                Phase::Plan => self.plan_migration().await?,
                Phase::ResumeMonitor => self.resume_monitor().await?,
                Phase::ConfirmDestructive => self.confirm_destructive()?,
                Phase::Backup => self.backup()?,
                Phase::Undefine => self.undefine().await?,
                Phase::LaunchAll => self.launch_all().await?,
                Phase::MonitorAll => self.monitor_all().await?,
                Phase::PivotAll => self.pivot_all().await?,
                Phase::Redefine => self.redefine().await?,
                Phase::Done => return Ok(Outcome::Done),
                Phase::Aborted => return Ok(Outcome::Aborted),
            };
        }
    }

    fn coordinator(&self) -> JobCoordinator<'_> {
        JobCoordinator::new(
            self.hypervisor.as_ref(),
            &self.config.domain,
            self.config.poll_interval,
        )
    }

    fn plan_ref(&self) -> Result<&MigrationPlan> {
        self.plan
            .as_ref()
            .ok_or_else(|| MigrateError::Internal("plan not computed yet".to_string()))
    }

    async fn inspect(&mut self) -> Result<Phase> {
        info!(domain = %self.config.domain, "Reading domain device description");

        let xml = self.hypervisor.domain_xml(&self.config.domain, true).await?;
        let volumes = parse_volumes(&xml)?;

        info!(disks = volumes.len(), "Inventoried domain volumes");

        self.pre_migration_xml = Some(xml);
        self.volumes = Some(volumes);
        Ok(Phase::Plan)
    }

    async fn plan_migration(&mut self) -> Result<Phase> {
        let volumes = self
            .volumes
            .as_ref()
            .ok_or_else(|| MigrateError::Internal("volumes not inventoried yet".to_string()))?;

        let plan = partition(volumes, &self.config.destination);
        info!(
            pending = plan.pending.len(),
            already_migrated = plan.already_migrated.len(),
            "Computed migration plan"
        );

        if plan.pending.is_empty() {
            info!("All volumes are already at the destination; nothing to do");
            self.plan = Some(plan);
            return Ok(Phase::Done);
        }

        let ongoing = find_ongoing(
            self.hypervisor.as_ref(),
            &self.config.domain,
            &plan.pending,
        )
        .await?;

        self.plan = Some(plan);

        if ongoing.is_empty() {
            Ok(Phase::ConfirmDestructive)
        } else {
            info!(
                devices = %join_set(&ongoing),
                "Found block-copy jobs left by a previous run; resuming"
            );
            self.active_devices = ongoing.into_iter().collect();
            Ok(Phase::ResumeMonitor)
        }
    }

    async fn resume_monitor(&mut self) -> Result<Phase> {
        let plan = self.plan_ref()?;

        // Pending devices with no job were never launched (or were already
        // pivoted); they are left untouched and show up as pending again on
        // the next run.
        let unlaunched: Vec<_> = plan
            .pending
            .iter()
            .map(|d| d.target_device.clone())
            .filter(|d| !self.active_devices.contains(d))
            .collect();
        if !unlaunched.is_empty() {
            warn!(
                devices = %unlaunched.join(", "),
                "Pending devices with no ongoing job; re-run after this resume completes"
            );
        }

        let devices = self.active_devices.clone();
        self.coordinator().monitor_all(&devices).await?;
        Ok(Phase::PivotAll)
    }

    fn confirm_destructive(&mut self) -> Result<Phase> {
        let summary = self.describe_plan()?;

        if self.prompt.confirm(&summary) {
            Ok(Phase::Backup)
        } else {
            info!("Operator declined; aborting");
            Ok(Phase::Aborted)
        }
    }

    fn backup(&mut self) -> Result<Phase> {
        let xml = self
            .pre_migration_xml
            .as_ref()
            .ok_or_else(|| MigrateError::Internal("no description captured".to_string()))?;

        let path = self.config.backup_path();
        info!(path = %path.display(), "Backing up domain description");

        std::fs::write(&path, xml).map_err(|source| MigrateError::Backup {
            path: path.clone(),
            source,
        })?;

        Ok(Phase::Undefine)
    }

    async fn undefine(&mut self) -> Result<Phase> {
        // Block copy requires a transient domain; the NVRAM association is
        // preserved so firmware variables survive the round-trip.
        self.hypervisor
            .undefine_keep_nvram(&self.config.domain)
            .await?;
        Ok(Phase::LaunchAll)
    }

    async fn launch_all(&mut self) -> Result<Phase> {
        let plan = self.plan_ref()?;
        let pending = plan.pending.clone();
        let devices = plan.pending_devices();

        self.coordinator()
            .launch_all(&pending, &self.config.destination)
            .await?;

        self.active_devices = devices;
        Ok(Phase::MonitorAll)
    }

    async fn monitor_all(&mut self) -> Result<Phase> {
        let devices = self.active_devices.clone();
        self.coordinator().monitor_all(&devices).await?;
        Ok(Phase::PivotAll)
    }

    async fn pivot_all(&mut self) -> Result<Phase> {
        let devices = self.active_devices.clone();
        self.coordinator().pivot_all(&devices).await?;
        Ok(Phase::Redefine)
    }

    async fn redefine(&mut self) -> Result<Phase> {
        info!("Persisting post-migration domain definition");

        let xml = self.hypervisor.domain_xml(&self.config.domain, true).await?;
        self.hypervisor.define_domain(&xml).await?;

        info!(domain = %self.config.domain, "Migration complete");
        Ok(Phase::Done)
    }

    /// Operator-facing "what will happen" report.
    fn describe_plan(&self) -> Result<String> {
        let plan = self.plan_ref()?;

        let mut summary = format!("Domain: {}\n", self.config.domain);
        summary.push_str("Volumes to migrate:\n");
        for descriptor in &plan.pending {
            summary.push_str(&format!(
                "  {}: {} -> {}\n",
                descriptor.target_device,
                descriptor.source.describe(),
                self.config.destination.describe_for(descriptor),
            ));
        }
        if !plan.already_migrated.is_empty() {
            summary.push_str("Already at destination:\n");
            for descriptor in &plan.already_migrated {
                summary.push_str(&format!(
                    "  {}: {}\n",
                    descriptor.target_device,
                    descriptor.source.describe(),
                ));
            }
        }
        summary.push_str(&format!(
            "Backup will be written to {}\n",
            self.config.backup_path().display(),
        ));
        Ok(summary)
    }
}

fn join_set(set: &BTreeSet<String>) -> String {
    set.iter().cloned().collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    use diskshift_hypervisor::{
        BlockCopyTarget, BlockJobStatus, MockConnection, MockDisk, MockDiskSource, MutationCall,
    };

    fn web01_disks() -> Vec<MockDisk> {
        vec![
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
        ]
    }

    fn config(backup_dir: &std::path::Path) -> SessionConfig {
        SessionConfig {
            domain: "web01".to_string(),
            destination: Destination::Path(PathBuf::from("/data/pool-b")),
            backup_dir: backup_dir.to_path_buf(),
            poll_interval: Duration::from_secs(1),
        }
    }

    fn session(
        conn: &Arc<MockConnection>,
        config: SessionConfig,
        confirm: bool,
    ) -> MigrationSession {
        MigrationSession::new(config, conn.clone(), Box::new(AutoConfirm(confirm)))
    }

    #[tokio::test(start_paused = true)]
    async fn full_run_migrates_both_disks() {
        let conn = Arc::new(MockConnection::new());
        conn.add_domain("web01", web01_disks());
        conn.script_launch_progress("web01", "vda", vec![
            BlockJobStatus { cur: 50, end: 100 },
            BlockJobStatus { cur: 100, end: 100 },
        ]);

        let backup_dir = tempfile::tempdir().unwrap();
        let mut session = session(&conn, config(backup_dir.path()), true);

        let outcome = session.run().await.unwrap();
        assert_eq!(outcome, Outcome::Done);

        // Both devices moved: vda by directory, vdb by kind.
        assert_eq!(conn.disks("web01"), vec![
            MockDisk {
                device: "vda".to_string(),
                source: MockDiskSource::File { path: "/data/pool-b/web01.qcow2".to_string() },
            },
            MockDisk {
                device: "vdb".to_string(),
                source: MockDiskSource::File { path: "/data/pool-b/web01-data".to_string() },
            },
        ]);
        assert!(conn.is_persistent("web01"));

        // Backup holds the original two-disk description.
        let backup = std::fs::read_to_string(backup_dir.path().join("web01_backup.xml")).unwrap();
        assert!(backup.contains("/data/pool-a/web01.qcow2"));
        assert!(backup.contains("fast-ssd"));
    }

    #[tokio::test(start_paused = true)]
    async fn second_run_is_a_no_op() {
        let conn = Arc::new(MockConnection::new());
        conn.add_domain("web01", web01_disks());

        let backup_dir = tempfile::tempdir().unwrap();

        let mut first = session(&conn, config(backup_dir.path()), true);
        assert_eq!(first.run().await.unwrap(), Outcome::Done);

        let mutations_after_first = conn.mutations().len();

        let mut second = session(&conn, config(backup_dir.path()), true);
        assert_eq!(second.run().await.unwrap(), Outcome::Done);

        // The second run made no mutating hypervisor call at all.
        assert_eq!(conn.mutations().len(), mutations_after_first);
    }

    #[tokio::test(start_paused = true)]
    async fn declined_confirmation_aborts_without_mutation() {
        let conn = Arc::new(MockConnection::new());
        conn.add_domain("web01", web01_disks());

        let backup_dir = tempfile::tempdir().unwrap();
        let mut session = session(&conn, config(backup_dir.path()), false);

        assert_eq!(session.run().await.unwrap(), Outcome::Aborted);
        assert!(conn.mutations().is_empty());
        assert!(!backup_dir.path().join("web01_backup.xml").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn resume_monitors_without_relaunching() {
        let conn = Arc::new(MockConnection::new());
        conn.add_domain("web01", web01_disks());

        // A previous run launched both copies and died before pivoting.
        conn.inject_running_job(
            "web01",
            "vda",
            BlockCopyTarget::File { path: "/data/pool-b/web01.qcow2".to_string() },
            vec![
                BlockJobStatus { cur: 60, end: 100 },
                BlockJobStatus { cur: 100, end: 100 },
            ],
        );
        conn.inject_running_job(
            "web01",
            "vdb",
            BlockCopyTarget::File { path: "/data/pool-b/web01-data".to_string() },
            vec![BlockJobStatus { cur: 100, end: 100 }],
        );

        let backup_dir = tempfile::tempdir().unwrap();
        let mut session = session(&conn, config(backup_dir.path()), false);

        // Outcome is Done even though the prompt would decline: the resume
        // path never asks for confirmation.
        assert_eq!(session.run().await.unwrap(), Outcome::Done);

        let mutations = conn.mutations();
        assert!(
            mutations.iter().all(|m| !matches!(m, MutationCall::BlockCopy { .. })),
            "resume must never re-issue a launch",
        );
        assert!(mutations.contains(&MutationCall::Pivot {
            domain: "web01".to_string(),
            device: "vda".to_string(),
        }));

        // Finalized: disks moved and the definition persisted again.
        assert_eq!(conn.disks("web01")[0].source, MockDiskSource::File {
            path: "/data/pool-b/web01.qcow2".to_string(),
        });
        assert!(conn.is_persistent("web01"));
    }

    #[tokio::test(start_paused = true)]
    async fn launch_failure_aborts_before_any_pivot() {
        let conn = Arc::new(MockConnection::new());
        conn.add_domain("web01", web01_disks());
        conn.fail_next_block_copy("web01", "vdb");

        let backup_dir = tempfile::tempdir().unwrap();
        let mut session = session(&conn, config(backup_dir.path()), true);

        let err = session.run().await.unwrap_err();
        assert!(matches!(err, MigrateError::Hypervisor(_)));

        let mutations = conn.mutations();
        assert!(mutations.iter().all(|m| !matches!(m, MutationCall::Pivot { .. })));
        assert!(mutations.iter().all(|m| !matches!(m, MutationCall::Define { .. })));

        // vda's job is still running inside the hypervisor; the next run's
        // resume detector will find it.
        assert!(conn.block_job_status("web01", "vda").await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn domain_with_no_disks_is_a_no_op() {
        let conn = Arc::new(MockConnection::new());
        // Domain exists but has no disks at all: inventory succeeds with an
        // empty map, which partitions to an empty pending set.
        conn.add_domain("web01", vec![]);

        let backup_dir = tempfile::tempdir().unwrap();
        let mut session = session(&conn, config(backup_dir.path()), true);

        assert_eq!(session.run().await.unwrap(), Outcome::Done);
        assert!(conn.mutations().is_empty());
    }

    #[test]
    fn backup_path_is_keyed_by_domain_name() {
        let config = SessionConfig {
            domain: "web01".to_string(),
            destination: Destination::Pool("fast-ssd".to_string()),
            backup_dir: PathBuf::from("/tmp"),
            poll_interval: Duration::from_secs(1),
        };
        assert_eq!(config.backup_path(), PathBuf::from("/tmp/web01_backup.xml"));
    }
}
