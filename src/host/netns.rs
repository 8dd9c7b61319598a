//! Peer reached through a network namespace on the same machine.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;

use super::Host;
use crate::command::CommandSpec;
use crate::error::Result;

/// Runs commands with `ip netns exec <name>`.
#[derive(Debug, Clone)]
pub struct NetnsHost {
    name: String,
}

impl NetnsHost {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Host for NetnsHost {
    fn name(&self) -> &str {
        &self.name
    }

    fn command(&self, spec: &CommandSpec) -> Result<Command> {
        let mut cmd = Command::new("ip");
        cmd.args(["netns", "exec", self.name.as_str()]);
        cmd.args(spec.argv());
        Ok(cmd)
    }

    // Same filesystem, nothing to copy.
    async fn deploy(&self, local: &Path) -> Result<PathBuf> {
        Ok(local.to_path_buf())
    }
}
