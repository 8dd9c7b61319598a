//! Devmem capability probe.
//!
//! Support is established by running the helper with only `-f <ifname>`
//! once per run; the answer is cached on the context.

use tracing::{info, warn};

use crate::context::TestContext;
use crate::error::{HarnessError, Result};
use crate::process;

/// Reason reported when the interface lacks devmem support.
pub const DEVMEM_SKIP_REASON: &str = "Test requires devmem support";

/// Memoized probe result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CapabilityCache {
    probed: bool,
    supported: bool,
}

impl CapabilityCache {
    /// The cached answer, if the probe has run.
    pub fn get(&self) -> Option<bool> {
        self.probed.then_some(self.supported)
    }

    /// Store the probe result. Later calls are ignored.
    pub fn record(&mut self, supported: bool) {
        if !self.probed {
            self.probed = true;
            self.supported = supported;
        }
    }
}

/// Whether the interface supports devmem, probing at most once per context.
pub async fn probe_devmem(ctx: &mut TestContext) -> bool {
    if let Some(supported) = ctx.capability().get() {
        return supported;
    }

    let spec = ctx.helper_local().probe(ctx.ifname());
    let supported = match process::run_unchecked(ctx.local().as_ref(), &spec, ctx.harness().peer_timeout()).await {
        Ok(output) => output.success(),
        Err(e) => {
            warn!(command = %spec, error = %e, "Devmem probe could not run");
            false
        }
    };

    info!(ifname = %ctx.ifname(), supported, "Probed devmem support");
    ctx.capability_mut().record(supported);
    supported
}

/// Skip unless the interface supports devmem.
pub async fn ensure_devmem(ctx: &mut TestContext) -> Result<()> {
    if probe_devmem(ctx).await {
        Ok(())
    } else {
        Err(HarnessError::Skip(DEVMEM_SKIP_REASON.to_string()))
    }
}
