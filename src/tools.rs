//! Argument vectors for the external tools.
//!
//! `ncdevmem` is the devmem helper: it probes support, listens with a
//! device-memory RX queue, or sends from device memory. `socat` is the
//! plain TCP relay used as the non-devmem peer.

use std::net::Ipv6Addr;
use std::path::{Path, PathBuf};

use crate::command::CommandSpec;

/// Default relay program.
pub const DEFAULT_RELAY_PROGRAM: &str = "socat";

/// Devmem helper binary at a host-specific path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevmemHelper {
    path: PathBuf,
}

impl DevmemHelper {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn base(&self) -> CommandSpec {
        CommandSpec::new(self.path.to_string_lossy())
    }

    /// `<helper> -f <ifname>`: exits 0 if the interface supports devmem.
    pub fn probe(&self, ifname: &str) -> CommandSpec {
        self.base().args(["-f", ifname])
    }

    /// `<helper> -l -f <ifname> -s <addr> -p <port>`: receive into device
    /// memory and print what arrived.
    pub fn listen(&self, ifname: &str, addr: Ipv6Addr, port: u16) -> CommandSpec {
        self.base().args([
            "-l".to_string(),
            "-f".to_string(),
            ifname.to_string(),
            "-s".to_string(),
            addr.to_string(),
            "-p".to_string(),
            port.to_string(),
        ])
    }

    /// `<helper> -f <ifname> -s <addr> -p <port> [-z <chunks>]`: send stdin
    /// from device memory, optionally split into `chunks` writes.
    pub fn send(&self, ifname: &str, addr: Ipv6Addr, port: u16, chunks: Option<u32>) -> CommandSpec {
        let spec = self.base().args([
            "-f".to_string(),
            ifname.to_string(),
            "-s".to_string(),
            addr.to_string(),
            "-p".to_string(),
            port.to_string(),
        ]);
        match chunks {
            Some(n) => spec.args(["-z".to_string(), n.to_string()]),
            None => spec,
        }
    }
}

/// Generic TCP relay (`socat`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relay {
    program: String,
}

impl Default for Relay {
    fn default() -> Self {
        Self::new(DEFAULT_RELAY_PROGRAM)
    }
}

impl Relay {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// `socat -U - TCP6-LISTEN:<port>`: accept one connection, copy it to
    /// stdout, exit when the peer disconnects.
    pub fn listen(&self, port: u16) -> CommandSpec {
        CommandSpec::new(&self.program).args(["-U".to_string(), "-".to_string(), format!("TCP6-LISTEN:{}", port)])
    }

    /// `socat -u - TCP6:[<addr>]:<port>`: copy stdin to the connection.
    pub fn send(&self, addr: Ipv6Addr, port: u16) -> CommandSpec {
        CommandSpec::new(&self.program).args([
            "-u".to_string(),
            "-".to_string(),
            format!("TCP6:[{}]:{}", addr, port),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> Ipv6Addr {
        "2001:db8::1".parse().unwrap()
    }

    fn argv(spec: &CommandSpec) -> Vec<&str> {
        spec.argv().collect()
    }

    #[test]
    fn test_helper_probe() {
        let helper = DevmemHelper::new("/opt/ksft/ncdevmem");
        assert_eq!(
            argv(&helper.probe("eth0")),
            vec!["/opt/ksft/ncdevmem", "-f", "eth0"]
        );
    }

    #[test]
    fn test_helper_listen() {
        let helper = DevmemHelper::new("ncdevmem");
        assert_eq!(
            argv(&helper.listen("eth0", addr(), 55123)),
            vec!["ncdevmem", "-l", "-f", "eth0", "-s", "2001:db8::1", "-p", "55123"]
        );
    }

    #[test]
    fn test_helper_send_with_and_without_chunks() {
        let helper = DevmemHelper::new("ncdevmem");
        assert_eq!(
            argv(&helper.send("eth0", addr(), 55123, None)),
            vec!["ncdevmem", "-f", "eth0", "-s", "2001:db8::1", "-p", "55123"]
        );
        assert_eq!(
            argv(&helper.send("eth0", addr(), 55123, Some(3))),
            vec!["ncdevmem", "-f", "eth0", "-s", "2001:db8::1", "-p", "55123", "-z", "3"]
        );
    }

    #[test]
    fn test_relay_commands() {
        let relay = Relay::default();
        assert_eq!(
            argv(&relay.listen(55123)),
            vec!["socat", "-U", "-", "TCP6-LISTEN:55123"]
        );
        assert_eq!(
            argv(&relay.send(addr(), 55123)),
            vec!["socat", "-u", "-", "TCP6:[2001:db8::1]:55123"]
        );
    }
}
