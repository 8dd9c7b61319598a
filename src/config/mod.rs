//! Configuration for the devmem selftest.
//!
//! Network settings come from the same places the kernel selftest
//! environment puts them: a `net.config` file of `KEY=VALUE` lines and the
//! plain environment variables `NETIF`, `LOCAL_V6`, `REMOTE_V6`,
//! `REMOTE_TYPE`, `REMOTE_ARGS` and `DISRUPTIVE`. Harness tuning lives in
//! YAML under `harness:` and can be overridden with `DEVMEM__*` variables.

mod harness;

pub use harness::HarnessConfig;

use std::collections::HashMap;
use std::io::Read;

use serde::Deserialize;
use tracing::debug;

use crate::error::{HarnessError, Result};

/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "DEVMEM_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "DEVMEM";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "DEVMEM_LOG";
/// YAML file picked up from the working directory if present.
pub const DEFAULT_CONFIG_FILE: &str = "devmem.yaml";
/// Network test environment file picked up from the working directory.
pub const NET_CONFIG_FILE: &str = "net.config";

/// Network test environment variables, in config key order.
const LEGACY_KEYS: [(&str, &str); 6] = [
    ("NETIF", "netif"),
    ("LOCAL_V6", "local_v6"),
    ("REMOTE_V6", "remote_v6"),
    ("REMOTE_TYPE", "remote_type"),
    ("REMOTE_ARGS", "remote_args"),
    ("DISRUPTIVE", "disruptive"),
];

/// Main configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Interface under test.
    pub netif: Option<String>,
    /// IPv6 address of the local end.
    pub local_v6: Option<String>,
    /// IPv6 address of the remote end.
    pub remote_v6: Option<String>,
    /// `local`, `netns` or `ssh`.
    pub remote_type: Option<String>,
    /// Namespace name or ssh destination.
    pub remote_args: Option<String>,
    /// Whether tests that disturb the interface may run.
    pub disruptive: bool,
    /// Harness timeouts and tool locations.
    pub harness: HarnessConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            netif: None,
            local_v6: None,
            remote_v6: None,
            remote_type: None,
            remote_args: None,
            disruptive: true,
            harness: HarnessConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from files and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `net.config` in current directory (if exists)
    /// 2. `devmem.yaml` in current directory (if exists)
    /// 3. File specified by `path` argument (if provided)
    /// 4. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 5. Environment variables with `CONFIG_ENV_PREFIX` prefix
    /// 6. Network test environment variables (`NETIF`, `REMOTE_TYPE`, ...)
    pub fn load(path: Option<&str>) -> Result<Self> {
        let net_config = match dotenvy::from_filename_iter(NET_CONFIG_FILE) {
            Ok(vars) => collect_env(vars)?,
            Err(e) if e.not_found() => HashMap::new(),
            Err(e) => return Err(net_config_error(e)),
        };

        let mut config = Self::load_layers(path, &net_config)?;
        config.apply_legacy(|key| std::env::var(key).ok());
        debug!(?config, "Configuration loaded");
        Ok(config)
    }

    fn load_layers(path: Option<&str>, net_config: &HashMap<String, String>) -> Result<Self> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder();

        // net.config values are the lowest layer
        for (env_key, key) in LEGACY_KEYS {
            if let Some(value) = net_config.get(env_key) {
                builder = if key == "disruptive" {
                    builder.set_default(key, parse_flag(value))?
                } else {
                    builder.set_default(key, value.as_str())?
                };
            }
        }

        builder = builder.add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Override network settings from `lookup` (normally the process
    /// environment). Empty values are ignored.
    pub fn apply_legacy<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("NETIF") {
            self.netif = Some(v);
        }
        if let Some(v) = get("LOCAL_V6") {
            self.local_v6 = Some(v);
        }
        if let Some(v) = get("REMOTE_V6") {
            self.remote_v6 = Some(v);
        }
        if let Some(v) = get("REMOTE_TYPE") {
            self.remote_type = Some(v);
        }
        if let Some(v) = get("REMOTE_ARGS") {
            self.remote_args = Some(v);
        }
        if let Some(v) = get("DISRUPTIVE") {
            self.disruptive = parse_flag(&v);
        }
    }
}

/// Read `KEY=VALUE` lines as found in `net.config`.
///
/// Dotenv syntax: `#` comments (also after an unquoted value), quoting and
/// an optional `export ` prefix.
pub fn read_env_file<R: Read>(reader: R) -> Result<HashMap<String, String>> {
    collect_env(dotenvy::from_read_iter(reader))
}

fn collect_env<I>(vars: I) -> Result<HashMap<String, String>>
where
    I: Iterator<Item = dotenvy::Result<(String, String)>>,
{
    vars.map(|item| item.map_err(net_config_error)).collect()
}

fn net_config_error(e: dotenvy::Error) -> HarnessError {
    HarnessError::InvalidConfig(format!("{}: {}", NET_CONFIG_FILE, e))
}

/// Shell-style boolean: anything but `0`, `false`, `no`, `off` or empty.
pub fn parse_flag(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "" | "0" | "false" | "no" | "off"
    )
}
