//! diskshift - live storage migration orchestrator for libvirt/QEMU
//! domains.
//!
//! Relocates every disk backing a running domain to a new storage pool or
//! directory while the domain keeps running, using libvirt's block-copy
//! primitive, and can be safely re-run after an interruption.

mod cli;
mod coordinator;
mod error;
mod inventory;
mod plan;
mod resume;
mod session;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use diskshift_hypervisor::{BlockJobStatus, Hypervisor, MockConnection, MockDisk, MockDiskSource};

use crate::cli::{Args, StdinPrompt};
use crate::plan::Destination;
use crate::session::{AutoConfirm, MigrationSession, Outcome, Prompt, SessionConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    diskshift_common::init_logging(&args.log_level)?;

    // Destination mutual exclusion is checked before any hypervisor contact.
    let destination = Destination::from_options(args.pool.clone(), args.filepath.clone())?;

    let hypervisor = connect(&args).await?;

    if !hypervisor.domain_exists(&args.domain).await? {
        anyhow::bail!("domain '{}' not found", args.domain);
    }

    let config = SessionConfig {
        domain: args.domain.clone(),
        destination,
        backup_dir: args.backup_dir.clone(),
        poll_interval: Duration::from_secs(1),
    };

    let prompt: Box<dyn Prompt> = if args.yes {
        Box::new(AutoConfirm(true))
    } else {
        Box::new(StdinPrompt)
    };

    let mut session = MigrationSession::new(config, hypervisor, prompt);

    match session.run().await? {
        Outcome::Done => {
            info!("Complete");
            Ok(())
        }
        Outcome::Aborted => {
            // Declined confirmation exits non-zero without an error trace.
            eprintln!("{}", crate::error::MigrateError::OperatorDeclined);
            std::process::exit(1);
        }
    }
}

async fn connect(args: &Args) -> anyhow::Result<Arc<dyn Hypervisor>> {
    let hypervisor: Arc<dyn Hypervisor> = if args.dev {
        info!("Development mode: using mock hypervisor backend");
        let mock = MockConnection::new();
        seed_dev_domain(&mock, &args.domain);
        Arc::new(mock)
    } else {
        connect_libvirt(args).await?
    };

    if !hypervisor.health_check().await? {
        anyhow::bail!("hypervisor connection is not alive");
    }
    Ok(hypervisor)
}

/// Populate the mock backend with a domain matching the requested name so a
/// `--dev` invocation exercises the whole session against simulated disks.
fn seed_dev_domain(mock: &MockConnection, domain: &str) {
    mock.add_domain(
        domain,
        vec![
            MockDisk {
                device: "vda".to_string(),
                source: MockDiskSource::File {
                    path: format!("/var/lib/libvirt/images/{}.qcow2", domain),
                },
            },
            MockDisk {
                device: "vdb".to_string(),
                source: MockDiskSource::Volume {
                    pool: "default".to_string(),
                    volume: format!("{}-data", domain),
                },
            },
        ],
    );
    // A couple of intermediate statuses so the monitor loop has something
    // to report before completion.
    mock.script_launch_progress(
        domain,
        "vda",
        vec![
            BlockJobStatus { cur: 25, end: 100 },
            BlockJobStatus { cur: 100, end: 100 },
        ],
    );
    info!(domain = %domain, "Seeded mock domain with two disks");
}

#[cfg(feature = "libvirt")]
async fn connect_libvirt(args: &Args) -> anyhow::Result<Arc<dyn Hypervisor>> {
    use anyhow::Context;

    let uri = args.connection_uri();
    let connection = diskshift_hypervisor::LibvirtConnection::new(&uri)
        .await
        .with_context(|| format!("opening connection for URI \"{}\"", uri))?;
    Ok(Arc::new(connection))
}

#[cfg(not(feature = "libvirt"))]
async fn connect_libvirt(_args: &Args) -> anyhow::Result<Arc<dyn Hypervisor>> {
    anyhow::bail!(
        "this build has no libvirt support; rebuild with `--features libvirt` or run with --dev"
    )
}
