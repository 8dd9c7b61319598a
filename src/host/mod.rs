//! Hosts that commands run on.
//!
//! The harness always drives the device side from the local host; the peer
//! side runs on a remote host reached through a network namespace or ssh,
//! or locally for dry runs.

mod netns;
mod ssh;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::info;

use crate::command::CommandSpec;
use crate::error::{HarnessError, Result};

pub use netns::NetnsHost;
pub use ssh::SshHost;

/// A place commands can be executed and binaries deployed to.
#[async_trait]
pub trait Host: Send + Sync + fmt::Debug {
    /// Human-readable name for logging.
    fn name(&self) -> &str;

    /// True if commands share the harness's own network namespace.
    fn is_local(&self) -> bool {
        false
    }

    /// Build the OS command that runs `spec` on this host.
    ///
    /// Stdio is left to the caller.
    fn command(&self, spec: &CommandSpec) -> Result<Command>;

    /// Make `local` executable on this host and return its path there.
    async fn deploy(&self, local: &Path) -> Result<PathBuf>;

    /// Remove anything `deploy` left behind.
    async fn cleanup(&self) -> Result<()> {
        Ok(())
    }
}

/// The machine the harness runs on.
#[derive(Debug, Clone, Default)]
pub struct LocalHost;

impl LocalHost {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Host for LocalHost {
    fn name(&self) -> &str {
        "local"
    }

    fn is_local(&self) -> bool {
        true
    }

    fn command(&self, spec: &CommandSpec) -> Result<Command> {
        let mut cmd = Command::new(spec.get_program());
        cmd.args(spec.get_args());
        Ok(cmd)
    }

    async fn deploy(&self, local: &Path) -> Result<PathBuf> {
        Ok(local.to_path_buf())
    }
}

/// How the remote peer is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteKind {
    /// Peer commands run on the local host (dry runs).
    Local,
    /// Peer commands run inside a network namespace.
    Netns,
    /// Peer commands run over ssh.
    Ssh,
}

impl FromStr for RemoteKind {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(RemoteKind::Local),
            "netns" => Ok(RemoteKind::Netns),
            "ssh" => Ok(RemoteKind::Ssh),
            other => Err(HarnessError::InvalidConfig(format!(
                "unknown remote type '{}' (expected local, netns or ssh)",
                other
            ))),
        }
    }
}

/// Build the remote host described by `kind` and its argument
/// (namespace name or ssh destination).
pub fn connect_remote(kind: RemoteKind, args: Option<&str>) -> Result<Arc<dyn Host>> {
    let require_args = || {
        args.map(str::trim)
            .filter(|a| !a.is_empty())
            .ok_or_else(|| {
                HarnessError::InvalidConfig(format!("remote type {:?} requires REMOTE_ARGS", kind))
            })
    };

    let host: Arc<dyn Host> = match kind {
        RemoteKind::Local => Arc::new(LocalHost::new()),
        RemoteKind::Netns => Arc::new(NetnsHost::new(require_args()?)),
        RemoteKind::Ssh => Arc::new(SshHost::new(require_args()?)),
    };

    info!(kind = ?kind, host = %host.name(), "Remote host configured");
    Ok(host)
}
