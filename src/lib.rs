//! devmem-selftest - device-memory TCP data path checks
//!
//! Drives the `ncdevmem` helper and a `socat` relay between a local
//! interface and a remote peer, and verifies that a payload crosses the
//! devmem RX and TX paths byte for byte.

pub mod capability;
pub mod command;
pub mod config;
pub mod context;
pub mod error;
pub mod host;
pub mod port;
pub mod process;
pub mod runner;
pub mod scenario;
pub mod tools;
pub mod utils;

pub use error::{HarnessError, Result};
