//! Bootstrap utilities for the devmem binaries.

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LOG_ENV_VAR;

/// Initialize tracing with the DEVMEM_LOG environment variable.
///
/// Defaults to "info" level if DEVMEM_LOG is not set. Logs go to stderr so
/// stdout carries only KTAP.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Command line of `devmem-selftest`.
#[derive(Parser, Debug, Default)]
#[command(name = "devmem-selftest")]
#[command(about = "Device-memory TCP data path checks, reported as KTAP", long_about = None)]
pub struct SelftestArgs {
    /// YAML configuration file, layered over `devmem.yaml`
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<String>,
}
