//! RX, TX and chunked-TX scenarios.
//!
//! All three follow one template: pass the gates, take a port, start a
//! listener on the local host, wait for it to appear in the socket table,
//! push the payload from the remote host, then compare what the listener
//! printed with what was sent. Only the listener/sender pair differs:
//!
//! | Scenario          | Listener (local)         | Sender (remote)          |
//! |-------------------|--------------------------|--------------------------|
//! | `check_rx`        | `ncdevmem -l`            | `socat`                  |
//! | `check_tx`        | `socat TCP6-LISTEN`      | `ncdevmem`               |
//! | `check_tx_chunks` | `socat TCP6-LISTEN`      | `ncdevmem -z <chunks>`   |

use std::fmt;

use tracing::{debug, error, info, instrument};

use crate::capability::ensure_devmem;
use crate::command::CommandSpec;
use crate::context::TestContext;
use crate::error::{HarnessError, Result};
use crate::host::Host;
use crate::process::{self, ExitPolicy};

/// Reason reported for disruptive scenarios when they are disallowed.
pub const DISRUPTIVE_SKIP_REASON: &str = "marked as disruptive";

/// Lines pushed through the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    lines: Vec<String>,
}

impl Default for Payload {
    fn default() -> Self {
        Self::new(["hello", "world"])
    }
}

impl Payload {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
        }
    }

    /// Bytes written to the sender's stdin, newline-terminated.
    pub fn wire(&self) -> String {
        let mut wire = self.lines.join("\n");
        wire.push('\n');
        wire
    }

    /// What the listener should print once trimmed.
    pub fn expected(&self) -> String {
        self.lines.join("\n")
    }
}

/// Which side of the connection uses device memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Devmem receive: the helper listens.
    Rx,
    /// Devmem transmit: the helper sends, optionally in `chunks` writes.
    Tx { chunks: Option<u32> },
}

/// Where a scenario was when it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Gate,
    PortAlloc,
    SpawnListener,
    AwaitPortOpen,
    RunPeer,
    CollectOutput,
    Assert,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Gate => "gate",
            Stage::PortAlloc => "port allocation",
            Stage::SpawnListener => "listener spawn",
            Stage::AwaitPortOpen => "waiting for listener",
            Stage::RunPeer => "peer run",
            Stage::CollectOutput => "output collection",
            Stage::Assert => "payload check",
        };
        f.write_str(name)
    }
}

/// Result of one scenario.
#[derive(Debug)]
pub enum Outcome {
    Passed,
    Skipped(String),
    Failed { stage: Stage, error: HarnessError },
}

impl Outcome {
    pub fn is_passed(&self) -> bool {
        matches!(self, Outcome::Passed)
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Outcome::Skipped(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed { .. })
    }
}

/// One devmem data-path check.
#[derive(Debug, Clone)]
pub struct Scenario {
    name: String,
    direction: Direction,
    sent: Payload,
    expected: Payload,
    disruptive: bool,
}

impl Scenario {
    fn new(name: &str, direction: Direction) -> Self {
        Self {
            name: name.to_string(),
            direction,
            sent: Payload::default(),
            expected: Payload::default(),
            disruptive: true,
        }
    }

    /// Devmem receive.
    pub fn rx() -> Self {
        Self::new("check_rx", Direction::Rx)
    }

    /// Devmem transmit in one write.
    pub fn tx() -> Self {
        Self::new("check_tx", Direction::Tx { chunks: None })
    }

    /// Devmem transmit split into `chunks` writes.
    pub fn tx_chunks(chunks: u32) -> Self {
        Self::new("check_tx_chunks", Direction::Tx { chunks: Some(chunks) })
    }

    /// The three checks, in run order.
    pub fn all(chunks: u32) -> Vec<Self> {
        vec![Self::rx(), Self::tx(), Self::tx_chunks(chunks)]
    }

    /// Send `payload` while still expecting the default one.
    pub fn with_sent_payload(mut self, payload: Payload) -> Self {
        self.sent = payload;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    #[instrument(name = "scenario", skip_all, fields(name = %self.name))]
    pub async fn run(&self, ctx: &mut TestContext) -> Outcome {
        let mut stage = Stage::Gate;
        match self.execute(ctx, &mut stage).await {
            Ok(()) => {
                info!("Scenario passed");
                Outcome::Passed
            }
            Err(HarnessError::Skip(reason)) => {
                info!(reason = %reason, "Scenario skipped");
                Outcome::Skipped(reason)
            }
            Err(error) => {
                error!(stage = %stage, error = %error, "Scenario failed");
                Outcome::Failed { stage, error }
            }
        }
    }

    async fn execute(&self, ctx: &mut TestContext, stage: &mut Stage) -> Result<()> {
        if self.disruptive && !ctx.disruptive() {
            return Err(HarnessError::Skip(DISRUPTIVE_SKIP_REASON.to_string()));
        }
        let addr = ctx.require_ipv6()?;
        ensure_devmem(ctx).await?;

        *stage = Stage::PortAlloc;
        let port = ctx.ports_mut().allocate()?;
        info!(port, "Using port");

        *stage = Stage::SpawnListener;
        let (listener, policy, sender) = self.commands(ctx, addr, port);
        let sender = sender.stdin(self.sent.wire());

        let local: &dyn Host = ctx.local().as_ref();
        let remote: &dyn Host = ctx.remote().as_ref();
        let harness = ctx.harness();
        let progress = &mut *stage;

        let ((), output) = process::with_background(
            local,
            &listener,
            policy,
            &harness.process_timeouts(),
            move |listener| async move {
                debug!(pid = ?listener.pid, command = %listener.command, "Listener started");
                *progress = Stage::AwaitPortOpen;
                process::wait_port_listen(
                    local,
                    port,
                    harness.port_wait_timeout(),
                    harness.port_poll_interval(),
                )
                .await?;

                *progress = Stage::RunPeer;
                process::run(remote, &sender, harness.peer_timeout()).await?;

                *progress = Stage::CollectOutput;
                Ok::<(), HarnessError>(())
            },
        )
        .await?;

        *stage = Stage::Assert;
        let expected = self.expected.expected();
        let actual = output.stdout_trimmed();
        if actual != expected {
            return Err(HarnessError::Mismatch {
                expected,
                actual: actual.to_string(),
            });
        }
        Ok(())
    }

    /// Listener, its exit policy, and the sender for this direction.
    fn commands(
        &self,
        ctx: &TestContext,
        addr: std::net::Ipv6Addr,
        port: u16,
    ) -> (CommandSpec, ExitPolicy, CommandSpec) {
        match self.direction {
            Direction::Rx => (
                ctx.helper_local().listen(ctx.ifname(), addr, port),
                ExitPolicy::Terminate,
                ctx.relay().send(addr, port),
            ),
            Direction::Tx { chunks } => (
                ctx.relay().listen(port),
                ExitPolicy::AwaitExit,
                ctx.helper_remote().send(ctx.ifname(), addr, port, chunks),
            ),
        }
    }
}
