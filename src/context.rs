//! Environment context shared by all scenarios in a run.

use std::net::Ipv6Addr;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use crate::capability::CapabilityCache;
use crate::config::{Config, HarnessConfig};
use crate::error::{HarnessError, Result};
use crate::host::{connect_remote, Host, LocalHost, RemoteKind};
use crate::port::PortAllocator;
use crate::tools::{DevmemHelper, Relay};

/// File name of the devmem helper.
pub const HELPER_NAME: &str = "ncdevmem";

/// Reason reported when either end has no IPv6 address.
pub const IPV6_SKIP_REASON: &str = "Test requires IPv6 connectivity";

/// Interface, addresses, hosts and tools for one run.
///
/// Created once and handed to each scenario by `&mut`; the only state that
/// changes afterwards is the capability cache and the issued-port set.
#[derive(Debug)]
pub struct TestContext {
    ifname: String,
    addr_v6: Option<Ipv6Addr>,
    remote_addr_v6: Option<Ipv6Addr>,
    local: Arc<dyn Host>,
    remote: Arc<dyn Host>,
    helper_local: DevmemHelper,
    helper_remote: DevmemHelper,
    relay: Relay,
    harness: HarnessConfig,
    disruptive: bool,
    capability: CapabilityCache,
    ports: PortAllocator,
}

impl TestContext {
    pub fn builder(ifname: impl Into<String>) -> TestContextBuilder {
        TestContextBuilder::new(ifname)
    }

    /// Build the context described by `config`, deploying the helper to the
    /// remote host.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let ifname = config
            .netif
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| HarnessError::Skip("NETIF not configured".to_string()))?;

        let kind = match config.remote_type.as_deref() {
            Some(kind) => kind.parse::<RemoteKind>()?,
            None => RemoteKind::Local,
        };
        let remote = connect_remote(kind, config.remote_args.as_deref())?;

        Self::builder(ifname)
            .addr_v6(parse_addr("LOCAL_V6", config.local_v6.as_deref())?)
            .remote_addr_v6(parse_addr("REMOTE_V6", config.remote_v6.as_deref())?)
            .remote(remote)
            .harness(config.harness.clone())
            .disruptive(config.disruptive)
            .build()
            .await
    }

    pub fn ifname(&self) -> &str {
        &self.ifname
    }

    pub fn addr_v6(&self) -> Option<Ipv6Addr> {
        self.addr_v6
    }

    pub fn remote_addr_v6(&self) -> Option<Ipv6Addr> {
        self.remote_addr_v6
    }

    pub fn local(&self) -> &Arc<dyn Host> {
        &self.local
    }

    pub fn remote(&self) -> &Arc<dyn Host> {
        &self.remote
    }

    pub fn helper_local(&self) -> &DevmemHelper {
        &self.helper_local
    }

    pub fn helper_remote(&self) -> &DevmemHelper {
        &self.helper_remote
    }

    pub fn relay(&self) -> &Relay {
        &self.relay
    }

    pub fn harness(&self) -> &HarnessConfig {
        &self.harness
    }

    pub fn disruptive(&self) -> bool {
        self.disruptive
    }

    pub fn capability(&self) -> &CapabilityCache {
        &self.capability
    }

    pub fn capability_mut(&mut self) -> &mut CapabilityCache {
        &mut self.capability
    }

    pub fn ports(&self) -> &PortAllocator {
        &self.ports
    }

    pub fn ports_mut(&mut self) -> &mut PortAllocator {
        &mut self.ports
    }

    /// The local IPv6 address, or a skip if either end lacks one.
    pub fn require_ipv6(&self) -> Result<Ipv6Addr> {
        match (self.addr_v6, self.remote_addr_v6) {
            (Some(local), Some(_)) => Ok(local),
            _ => Err(HarnessError::Skip(IPV6_SKIP_REASON.to_string())),
        }
    }

    /// Remove deployed files from both hosts.
    pub async fn cleanup(&self) {
        for host in [&self.remote, &self.local] {
            if let Err(e) = host.cleanup().await {
                warn!(host = %host.name(), error = %e, "Host cleanup failed");
            }
        }
    }
}

fn parse_addr(key: &str, value: Option<&str>) -> Result<Option<Ipv6Addr>> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<Ipv6Addr>()
                .map_err(|e| HarnessError::InvalidConfig(format!("{} '{}': {}", key, s, e)))
        })
        .transpose()
}

/// `ncdevmem` in the directory of the running executable.
pub fn default_helper_path() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(HELPER_NAME)))
        .unwrap_or_else(|| PathBuf::from(HELPER_NAME))
}

/// Builder for [`TestContext`].
#[derive(Debug)]
pub struct TestContextBuilder {
    ifname: String,
    addr_v6: Option<Ipv6Addr>,
    remote_addr_v6: Option<Ipv6Addr>,
    remote: Option<Arc<dyn Host>>,
    helper: Option<PathBuf>,
    relay: Option<Relay>,
    harness: HarnessConfig,
    disruptive: bool,
}

impl TestContextBuilder {
    fn new(ifname: impl Into<String>) -> Self {
        Self {
            ifname: ifname.into(),
            addr_v6: None,
            remote_addr_v6: None,
            remote: None,
            helper: None,
            relay: None,
            harness: HarnessConfig::default(),
            disruptive: true,
        }
    }

    pub fn addr_v6(mut self, addr: impl Into<Option<Ipv6Addr>>) -> Self {
        self.addr_v6 = addr.into();
        self
    }

    pub fn remote_addr_v6(mut self, addr: impl Into<Option<Ipv6Addr>>) -> Self {
        self.remote_addr_v6 = addr.into();
        self
    }

    /// Peer host. Defaults to the local host.
    pub fn remote(mut self, host: Arc<dyn Host>) -> Self {
        self.remote = Some(host);
        self
    }

    /// Local helper path, overriding `harness.helper_path`.
    pub fn helper(mut self, path: impl Into<PathBuf>) -> Self {
        self.helper = Some(path.into());
        self
    }

    /// Relay tool, overriding `harness.relay_program`.
    pub fn relay(mut self, relay: Relay) -> Self {
        self.relay = Some(relay);
        self
    }

    pub fn harness(mut self, harness: HarnessConfig) -> Self {
        self.harness = harness;
        self
    }

    pub fn disruptive(mut self, disruptive: bool) -> Self {
        self.disruptive = disruptive;
        self
    }

    pub async fn build(self) -> Result<TestContext> {
        let local: Arc<dyn Host> = Arc::new(LocalHost::new());
        let remote = self.remote.unwrap_or_else(|| Arc::new(LocalHost::new()));

        let helper_path = self
            .helper
            .or_else(|| self.harness.helper_path.clone())
            .unwrap_or_else(default_helper_path);
        let remote_path = remote.deploy(&helper_path).await?;

        let relay = self
            .relay
            .unwrap_or_else(|| Relay::new(self.harness.relay_program.clone()));

        info!(
            ifname = %self.ifname,
            addr_v6 = ?self.addr_v6,
            remote_addr_v6 = ?self.remote_addr_v6,
            remote = %remote.name(),
            helper = %helper_path.display(),
            "Test context ready"
        );

        Ok(TestContext {
            ifname: self.ifname,
            addr_v6: self.addr_v6,
            remote_addr_v6: self.remote_addr_v6,
            local,
            remote,
            helper_local: DevmemHelper::new(helper_path),
            helper_remote: DevmemHelper::new(remote_path),
            relay,
            harness: self.harness,
            disruptive: self.disruptive,
            capability: CapabilityCache::default(),
            ports: PortAllocator::new(),
        })
    }
}
