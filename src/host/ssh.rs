//! Peer reached over ssh.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{Host, LocalHost};
use crate::command::CommandSpec;
use crate::error::{HarnessError, Result};
use crate::process;

/// Bound on each ssh/scp round trip made while deploying.
const DEPLOY_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs commands with `ssh -q <target> <quoted argv>`.
///
/// Deployed binaries go to a fresh `mktemp -d` directory on the remote,
/// removed again by [`Host::cleanup`].
#[derive(Debug)]
pub struct SshHost {
    target: String,
    tmpdirs: Mutex<Vec<String>>,
}

impl SshHost {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            tmpdirs: Mutex::new(Vec::new()),
        }
    }

    fn deploy_error(&self, local: &Path, reason: impl ToString) -> HarnessError {
        HarnessError::Deploy {
            path: local.display().to_string(),
            host: self.target.clone(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl Host for SshHost {
    fn name(&self) -> &str {
        &self.target
    }

    fn command(&self, spec: &CommandSpec) -> Result<Command> {
        let mut cmd = Command::new("ssh");
        cmd.arg("-q").arg(&self.target).arg(spec.to_shell_string()?);
        Ok(cmd)
    }

    async fn deploy(&self, local: &Path) -> Result<PathBuf> {
        let file_name = local
            .file_name()
            .ok_or_else(|| self.deploy_error(local, "path has no file name"))?;

        let mktemp = CommandSpec::new("mktemp").arg("-d");
        let dir = process::run(self, &mktemp, DEPLOY_TIMEOUT)
            .await
            .map_err(|e| self.deploy_error(local, e))?
            .stdout_trimmed()
            .to_string();
        if dir.is_empty() {
            return Err(self.deploy_error(local, "mktemp returned no directory"));
        }
        self.tmpdirs.lock().await.push(dir.clone());

        let scp = CommandSpec::new("scp").args([
            "-q".to_string(),
            local.display().to_string(),
            format!("{}:{}/", self.target, dir),
        ]);
        process::run(&LocalHost::new(), &scp, DEPLOY_TIMEOUT)
            .await
            .map_err(|e| self.deploy_error(local, e))?;

        let remote = Path::new(&dir).join(file_name);
        info!(host = %self.target, path = %remote.display(), "Deployed binary");
        Ok(remote)
    }

    async fn cleanup(&self) -> Result<()> {
        let dirs = std::mem::take(&mut *self.tmpdirs.lock().await);
        for dir in dirs {
            debug!(host = %self.target, dir = %dir, "Removing deploy directory");
            let rm = CommandSpec::new("rm").args(["-rf", dir.as_str()]);
            if let Err(e) = process::run(self, &rm, DEPLOY_TIMEOUT).await {
                warn!(host = %self.target, dir = %dir, error = %e, "Failed to remove deploy directory");
            }
        }
        Ok(())
    }
}
