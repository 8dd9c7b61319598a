//! Port allocation and socket-table inspection.
//!
//! Each scenario gets a fresh random port that is outside the kernel's
//! ephemeral range (so an outgoing connection cannot steal it between
//! allocation and bind), bindable at the time it is issued, and never handed
//! out twice in the same run. When the ephemeral range swallows every port
//! above [`PORT_FLOOR`], the bind check alone has to do.
//!
//! Readiness is read from `/proc/net/tcp` and `/proc/net/tcp6` instead of by
//! connecting: both listeners accept exactly one connection, so a probing
//! connect would consume it.

use std::collections::HashSet;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, TcpListener};
use std::ops::RangeInclusive;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::command::CommandSpec;
use crate::error::{HarnessError, Result};
use crate::host::Host;
use crate::process;

/// Lowest port handed out.
pub const PORT_FLOOR: u16 = 10000;

/// Random draws before giving up.
pub const MAX_ATTEMPTS: u32 = 1000;

/// Kernel default for `net.ipv4.ip_local_port_range`.
pub const DEFAULT_EPHEMERAL_RANGE: RangeInclusive<u16> = 32768..=60999;

const EPHEMERAL_RANGE_PATH: &str = "/proc/sys/net/ipv4/ip_local_port_range";
const TCP_TABLES: [&str; 2] = ["/proc/net/tcp", "/proc/net/tcp6"];

/// `st` column value for a listening socket.
const TCP_LISTEN: &str = "0A";

/// Bound on reading a remote host's socket tables.
const TABLE_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Parse the two-number contents of `ip_local_port_range`.
pub fn parse_port_range(contents: &str) -> Option<RangeInclusive<u16>> {
    let mut parts = contents.split_whitespace().map(str::parse::<u16>);
    let lo = parts.next()?.ok()?;
    let hi = parts.next()?.ok()?;
    (lo <= hi).then_some(lo..=hi)
}

/// Hands out distinct, currently-free TCP ports.
#[derive(Debug, Clone)]
pub struct PortAllocator {
    ephemeral: RangeInclusive<u16>,
    avoid_ephemeral: bool,
    issued: HashSet<u16>,
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl PortAllocator {
    /// Allocator avoiding the local kernel's ephemeral range.
    pub fn new() -> Self {
        let ephemeral = std::fs::read_to_string(EPHEMERAL_RANGE_PATH)
            .ok()
            .and_then(|s| parse_port_range(&s))
            .unwrap_or(DEFAULT_EPHEMERAL_RANGE);
        Self::with_ephemeral_range(ephemeral)
    }

    pub fn with_ephemeral_range(ephemeral: RangeInclusive<u16>) -> Self {
        let avoid_ephemeral = *ephemeral.start() > PORT_FLOOR || *ephemeral.end() < u16::MAX;
        if !avoid_ephemeral {
            warn!(
                range = ?ephemeral,
                "net.ipv4.ip_local_port_range covers every port from {}, allocating inside it",
                PORT_FLOOR
            );
        }
        Self {
            ephemeral,
            avoid_ephemeral,
            issued: HashSet::new(),
        }
    }

    /// Pick a port and record it as issued.
    pub fn allocate(&mut self) -> Result<u16> {
        let mut rng = rand::rng();
        for _ in 0..MAX_ATTEMPTS {
            let port = rng.random_range(PORT_FLOOR..=u16::MAX);
            if (self.avoid_ephemeral && self.ephemeral.contains(&port)) || self.issued.contains(&port) {
                continue;
            }
            if !is_bindable(port) {
                debug!(port, "Port in use, drawing again");
                continue;
            }
            self.issued.insert(port);
            debug!(port, "Allocated port");
            return Ok(port);
        }
        warn!(attempts = MAX_ATTEMPTS, "Port allocation exhausted");
        Err(HarnessError::PortExhausted(MAX_ATTEMPTS))
    }

    /// Ports issued so far in this run.
    pub fn issued(&self) -> &HashSet<u16> {
        &self.issued
    }
}

fn is_bindable(port: u16) -> bool {
    match TcpListener::bind((Ipv6Addr::UNSPECIFIED, port)) {
        Ok(_) => true,
        Err(e) if e.kind() == io::ErrorKind::AddrInUse => false,
        // No IPv6 stack: fall back to the v4 wildcard.
        Err(_) => TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).is_ok(),
    }
}

/// Ports in LISTEN state in a `/proc/net/tcp`-format table.
pub fn listening_ports(table: &str) -> HashSet<u16> {
    table
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let (local, state) = (fields.get(1)?, fields.get(3)?);
            if *state != TCP_LISTEN {
                return None;
            }
            let (_, port) = local.rsplit_once(':')?;
            u16::from_str_radix(port, 16).ok()
        })
        .collect()
}

/// Whether anything on `host` is listening on TCP `port`.
pub async fn is_listening(host: &dyn Host, port: u16) -> Result<bool> {
    let tables = if host.is_local() {
        let mut combined = String::new();
        for path in TCP_TABLES {
            match tokio::fs::read_to_string(path).await {
                Ok(contents) => combined.push_str(&contents),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        combined
    } else {
        let read = CommandSpec::shell(format!("cat {} 2>/dev/null; true", TCP_TABLES.join(" ")));
        process::run(host, &read, TABLE_READ_TIMEOUT).await?.stdout
    };
    Ok(listening_ports(&tables).contains(&port))
}

#[cfg(test)]
mod tests;
