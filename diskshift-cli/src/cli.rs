//! Command-line argument parsing.

use std::io::Write;
use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use crate::session::Prompt;

/// diskshift - Live storage migration for libvirt/QEMU domains
#[derive(Parser, Debug)]
#[command(name = "diskshift")]
#[command(about = "Relocate a running domain's disks to a new storage location")]
#[command(version)]
pub struct Args {
    /// Name of the domain (VM) to migrate
    pub domain: String,

    /// Destination storage pool name (mutually exclusive with --filepath)
    #[arg(long)]
    pub pool: Option<String>,

    /// Destination directory for the backing files (mutually exclusive with --pool)
    #[arg(long)]
    pub filepath: Option<PathBuf>,

    /// Hypervisor host (empty for local)
    #[arg(long, default_value = "")]
    pub host: String,

    /// User for remote connections
    #[arg(long)]
    pub user: Option<String>,

    /// Tunnel the libvirt connection over SSH
    #[arg(long)]
    pub ssh: bool,

    /// Libvirt instance to connect to (system or session)
    #[arg(long, default_value = "system")]
    pub session: String,

    /// Directory for the pre-migration XML backup
    #[arg(long, default_value = "/tmp")]
    pub backup_dir: PathBuf,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Use the mock hypervisor backend (development mode)
    #[arg(long)]
    pub dev: bool,
}

impl Args {
    /// Libvirt connection URI assembled from the host/user/ssh/session
    /// flags: `qemu[+ssh]://[user@]host/<session>`.
    #[cfg_attr(not(feature = "libvirt"), allow(dead_code))]
    pub fn connection_uri(&self) -> String {
        let mut uri = String::from("qemu");
        if self.ssh {
            uri.push_str("+ssh");
        }
        uri.push_str("://");
        if let Some(user) = &self.user {
            uri.push_str(user);
            uri.push('@');
        }
        uri.push_str(&self.host);
        uri.push('/');
        uri.push_str(&self.session);
        uri
    }
}

/// Interactive confirmation on stdin.
pub struct StdinPrompt;

impl Prompt for StdinPrompt {
    fn confirm(&self, summary: &str) -> bool {
        println!("\nWhat will happen:\n");
        println!("{}", summary);
        print!("Proceed? (y/N): ");
        if std::io::stdout().flush().is_err() {
            return false;
        }

        let mut answer = String::new();
        if std::io::stdin().read_line(&mut answer).is_err() {
            info!("Could not read confirmation; treating as declined");
            return false;
        }
        answer.trim() == "y"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["diskshift", "web01"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn local_system_uri_by_default() {
        assert_eq!(args(&[]).connection_uri(), "qemu:///system");
    }

    #[test]
    fn remote_ssh_uri_with_user() {
        let args = args(&["--host", "host1", "--user", "admin", "--ssh"]);
        assert_eq!(args.connection_uri(), "qemu+ssh://admin@host1/system");
    }

    #[test]
    fn session_instance() {
        let args = args(&["--session", "session"]);
        assert_eq!(args.connection_uri(), "qemu:///session");
    }
}
