//! devmem-selftest: device-memory TCP data path checks
//!
//! Runs `check_rx`, `check_tx` and `check_tx_chunks` against the interface
//! named by `NETIF` and reports KTAP on stdout.
//!
//! ## Configuration
//! - NETIF, LOCAL_V6, REMOTE_V6: interface and addresses under test
//! - REMOTE_TYPE, REMOTE_ARGS: how the peer is reached (`netns <name>`,
//!   `ssh <destination>`, or `local`)
//! - DISRUPTIVE: set to 0 to skip tests that disturb the interface
//! - DEVMEM_CONFIG / `--config <path>`: YAML with a `harness:` section
//! - DEVMEM_LOG: log filter (default: info), logs go to stderr
//!
//! The same keys are read from `net.config` in the working directory.

use clap::Parser;
use tracing::{error, info};

use devmem_selftest::config::Config;
use devmem_selftest::context::TestContext;
use devmem_selftest::runner::Runner;
use devmem_selftest::scenario::Scenario;
use devmem_selftest::utils::bootstrap::{init_tracing, SelftestArgs};
use devmem_selftest::HarnessError;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = SelftestArgs::parse();
    init_tracing();

    let config = Config::load(args.config.as_deref()).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    let mut runner = Runner::stdout();

    let mut ctx = match TestContext::from_config(&config).await {
        Ok(ctx) => ctx,
        Err(HarnessError::Skip(reason)) => {
            info!(reason = %reason, "Nothing to test");
            let totals = runner.skip_all(&reason)?;
            std::process::exit(totals.exit_code());
        }
        Err(e) => {
            error!("Failed to set up test environment: {}", e);
            return Err(e.into());
        }
    };

    info!(
        ifname = %ctx.ifname(),
        local_v6 = ?ctx.addr_v6(),
        remote_v6 = ?ctx.remote_addr_v6(),
        remote = %ctx.remote().name(),
        "Starting devmem-selftest"
    );

    let scenarios = Scenario::all(ctx.harness().chunk_count);
    let totals = runner.run(&mut ctx, &scenarios).await;
    ctx.cleanup().await;

    std::process::exit(totals?.exit_code());
}
