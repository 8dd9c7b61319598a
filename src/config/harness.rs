//! Harness tuning: tool locations, chunking and timeouts.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::process::ProcessTimeouts;
use crate::tools::DEFAULT_RELAY_PROGRAM;

/// `harness:` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Devmem helper on the local host. Defaults to `ncdevmem` next to the
    /// running executable.
    pub helper_path: Option<PathBuf>,
    /// TCP relay program.
    pub relay_program: String,
    /// Number of chunks for the chunked TX scenario.
    pub chunk_count: u32,
    /// How long to wait for a listener to appear.
    pub port_wait_timeout_ms: u64,
    /// Socket table polling interval.
    pub port_poll_interval_ms: u64,
    /// Bound on foreground commands (probe, peer sender).
    pub peer_timeout_ms: u64,
    /// Bound on a listener that must exit on its own.
    pub exit_wait_timeout_ms: u64,
    /// Grace period before a terminated listener is signalled.
    pub terminate_settle_ms: u64,
    /// Time between SIGTERM and SIGKILL.
    pub terminate_reap_ms: u64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            helper_path: None,
            relay_program: DEFAULT_RELAY_PROGRAM.to_string(),
            chunk_count: 3,
            port_wait_timeout_ms: 5000,
            port_poll_interval_ms: 100,
            peer_timeout_ms: 5000,
            exit_wait_timeout_ms: 5000,
            terminate_settle_ms: 250,
            terminate_reap_ms: 2000,
        }
    }
}

impl HarnessConfig {
    pub fn port_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.port_wait_timeout_ms)
    }

    pub fn port_poll_interval(&self) -> Duration {
        Duration::from_millis(self.port_poll_interval_ms)
    }

    pub fn peer_timeout(&self) -> Duration {
        Duration::from_millis(self.peer_timeout_ms)
    }

    pub fn process_timeouts(&self) -> ProcessTimeouts {
        ProcessTimeouts {
            exit_wait: Duration::from_millis(self.exit_wait_timeout_ms),
            terminate_settle: Duration::from_millis(self.terminate_settle_ms),
            terminate_reap: Duration::from_millis(self.terminate_reap_ms),
        }
    }
}
