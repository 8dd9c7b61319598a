//! End-to-end scenario tests using Cucumber.
//!
//! Drives the RX, TX and chunked TX checks through the real coordinator,
//! with the `devmem-loopback` binary standing in for both `ncdevmem` and
//! `socat` and IPv6 loopback as the link:
//!
//! ```bash
//! cargo test --test scenarios
//! ```
//!
//! Skipped when the host has no IPv6 loopback.

mod steps;

use cucumber::World;
use steps::DevmemWorld;

fn ipv6_loopback_available() -> bool {
    std::net::TcpListener::bind((std::net::Ipv6Addr::LOCALHOST, 0)).is_ok()
}

#[tokio::main]
async fn main() {
    if !ipv6_loopback_available() {
        println!("IPv6 loopback unavailable, skipping devmem scenarios");
        return;
    }

    println!("\n=== Running devmem scenarios ===\n");
    DevmemWorld::cucumber()
        .fail_on_skipped()
        .run_and_exit("tests/scenarios/features/devmem.feature")
        .await;
}
