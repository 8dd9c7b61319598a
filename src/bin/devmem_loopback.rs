//! devmem-loopback: plain-socket stand-in for `ncdevmem` and `socat`
//!
//! Accepts the argument shapes the harness uses for both tools so the
//! scenarios can be dry-run on a machine without devmem hardware:
//!
//! - `-f <if>`: probe, always supported
//! - `-l -f <if> -s <addr> -p <port>`: accept one connection, print it
//! - `-f <if> -s <addr> -p <port> [-z <n>]`: send stdin, in `n` writes
//! - `-U - TCP6-LISTEN:<port>`: accept one connection, print it
//! - `-u - TCP6:[<addr>]:<port>`: send stdin
//!
//! Data is moved with ordinary TCP sockets; no device memory is involved.

use std::net::{Ipv6Addr, SocketAddr};
use std::time::Duration;

use clap::{ArgGroup, Parser};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

use devmem_selftest::utils::bootstrap::init_tracing;

type BoxError = Box<dyn std::error::Error>;

const RELAY_FLAGS: [&str; 2] = ["relay_listen", "relay_send"];

#[derive(Parser, Debug)]
#[command(name = "devmem-loopback")]
#[command(about = "Plain-socket stand-in for ncdevmem and socat", long_about = None)]
#[command(group(ArgGroup::new("relay").args(RELAY_FLAGS)))]
struct Args {
    /// Receive one connection and print it
    #[arg(short = 'l', requires = "addr")]
    listen: bool,

    /// Interface name
    #[arg(short = 'f', value_name = "IFNAME", required_unless_present_any = RELAY_FLAGS)]
    ifname: Option<String>,

    /// IPv6 address to listen on or connect to
    #[arg(short = 's', value_name = "ADDR", requires = "port")]
    addr: Option<Ipv6Addr>,

    /// TCP port
    #[arg(short = 'p', value_name = "PORT", requires = "addr")]
    port: Option<u16>,

    /// Send the payload in this many writes
    #[arg(
        short = 'z',
        value_name = "N",
        requires = "addr",
        conflicts_with = "listen",
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    chunks: Option<u32>,

    /// socat-style listener: `-U - TCP6-LISTEN:<port>`
    #[arg(short = 'U', conflicts_with_all = ["listen", "ifname", "addr", "relay_send"])]
    relay_listen: bool,

    /// socat-style sender: `-u - TCP6:[<addr>]:<port>`
    #[arg(short = 'u', conflicts_with_all = ["listen", "ifname", "addr"])]
    relay_send: bool,

    /// socat addresses, `-` for stdio followed by the TCP6 address
    #[arg(value_name = "ADDRESS", requires = "relay")]
    relay_addresses: Vec<String>,
}

#[derive(Debug, PartialEq, Eq)]
enum Mode {
    Probe,
    Listen(SocketAddr),
    Send { to: SocketAddr, chunks: usize },
}

impl Args {
    fn into_mode(self) -> Result<Mode, BoxError> {
        if self.relay_listen {
            let port = relay_target(&self.relay_addresses)?
                .strip_prefix("TCP6-LISTEN:")
                .ok_or("expected TCP6-LISTEN:<port>")?
                .parse::<u16>()?;
            return Ok(Mode::Listen(SocketAddr::from((Ipv6Addr::UNSPECIFIED, port))));
        }
        if self.relay_send {
            let target = relay_target(&self.relay_addresses)?
                .strip_prefix("TCP6:")
                .ok_or("expected TCP6:[<addr>]:<port>")?;
            return Ok(Mode::Send {
                to: target.parse::<SocketAddr>()?,
                chunks: 1,
            });
        }

        if let Some(ifname) = &self.ifname {
            debug!(ifname = %ifname, "Helper invoked");
        }
        match (self.addr, self.port) {
            (Some(addr), Some(port)) if self.listen => Ok(Mode::Listen(SocketAddr::from((addr, port)))),
            (Some(addr), Some(port)) => Ok(Mode::Send {
                to: SocketAddr::from((addr, port)),
                chunks: self.chunks.unwrap_or(1) as usize,
            }),
            _ => Ok(Mode::Probe),
        }
    }
}

fn relay_target(addresses: &[String]) -> Result<&str, BoxError> {
    match addresses {
        [stdio, address] if stdio == "-" => Ok(address.as_str()),
        _ => Err(format!("expected `- <address>`, got {:?}", addresses).into()),
    }
}

async fn receive(addr: SocketAddr) -> Result<(), BoxError> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "Listening");

    let (mut stream, peer) = listener.accept().await?;
    drop(listener);
    debug!(peer = %peer, "Accepted connection");

    let mut stdout = tokio::io::stdout();
    tokio::io::copy(&mut stream, &mut stdout).await?;
    stdout.flush().await?;
    Ok(())
}

async fn send(to: SocketAddr, chunks: usize) -> Result<(), BoxError> {
    let mut payload = Vec::new();
    tokio::io::stdin().read_to_end(&mut payload).await?;

    let mut stream = TcpStream::connect(to).await?;
    stream.set_nodelay(true)?;

    let size = payload.len().div_ceil(chunks).max(1);
    for chunk in payload.chunks(size) {
        stream.write_all(chunk).await?;
        stream.flush().await?;
        if chunks > 1 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
    stream.shutdown().await?;
    debug!(to = %to, bytes = payload.len(), chunks, "Sent payload");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    init_tracing();

    match Args::parse().into_mode()? {
        Mode::Probe => Ok(()),
        Mode::Listen(addr) => receive(addr).await,
        Mode::Send { to, chunks } => send(to, chunks).await,
    }
}
