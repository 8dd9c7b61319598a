//! Sequential scenario runner with KTAP output.

use std::io::{self, Write};

use tracing::info;

use crate::context::TestContext;
use crate::scenario::{Outcome, Scenario};

/// kselftest exit codes.
pub const KSFT_PASS: i32 = 0;
pub const KSFT_FAIL: i32 = 1;
pub const KSFT_SKIP: i32 = 4;

/// Prefix of every reported test name.
pub const SUITE: &str = "devmem";

/// Counts of reported outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Totals {
    pub pass: usize,
    pub fail: usize,
    pub skip: usize,
}

impl Totals {
    fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Passed => self.pass += 1,
            Outcome::Skipped(_) => self.skip += 1,
            Outcome::Failed { .. } => self.fail += 1,
        }
    }

    /// Process exit code for these totals.
    pub fn exit_code(&self) -> i32 {
        if self.fail > 0 {
            KSFT_FAIL
        } else if self.pass == 0 && self.skip > 0 {
            KSFT_SKIP
        } else {
            KSFT_PASS
        }
    }
}

/// KTAP result line for test number `n`.
pub fn ktap_line(n: usize, name: &str, outcome: &Outcome) -> String {
    match outcome {
        Outcome::Passed => format!("ok {} {}.{}", n, SUITE, name),
        Outcome::Skipped(reason) => format!("ok {} {}.{} # SKIP {}", n, SUITE, name, reason),
        Outcome::Failed { .. } => format!("not ok {} {}.{}", n, SUITE, name),
    }
}

/// Runs scenarios in order and writes KTAP to `out`.
pub struct Runner<W: Write> {
    out: W,
}

impl Runner<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> Runner<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Write a plan with no tests, for runs that cannot start at all.
    pub fn skip_all(&mut self, reason: &str) -> io::Result<Totals> {
        writeln!(self.out, "TAP version 13")?;
        writeln!(self.out, "1..0 # SKIP {}", reason)?;
        self.out.flush()?;
        Ok(Totals {
            skip: 1,
            ..Totals::default()
        })
    }

    /// Run every scenario against `ctx`, reporting as each one finishes.
    pub async fn run(&mut self, ctx: &mut TestContext, scenarios: &[Scenario]) -> io::Result<Totals> {
        writeln!(self.out, "TAP version 13")?;
        writeln!(self.out, "1..{}", scenarios.len())?;
        self.out.flush()?;

        let mut totals = Totals::default();
        for (i, scenario) in scenarios.iter().enumerate() {
            let outcome = scenario.run(ctx).await;
            if let Outcome::Failed { stage, error } = &outcome {
                writeln!(self.out, "# {} failed during {}", scenario.name(), stage)?;
                for line in error.to_string().lines() {
                    writeln!(self.out, "# {}", line)?;
                }
            }
            writeln!(self.out, "{}", ktap_line(i + 1, scenario.name(), &outcome))?;
            self.out.flush()?;
            totals.record(&outcome);
        }

        writeln!(
            self.out,
            "# Totals: pass:{} fail:{} xfail:0 xpass:0 skip:{} error:0",
            totals.pass, totals.fail, totals.skip
        )?;
        self.out.flush()?;

        info!(pass = totals.pass, fail = totals.fail, skip = totals.skip, "Run complete");
        Ok(totals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HarnessError;
    use crate::scenario::Stage;
    use std::net::Ipv6Addr;

    #[test]
    fn test_ktap_lines() {
        assert_eq!(ktap_line(1, "check_rx", &Outcome::Passed), "ok 1 devmem.check_rx");
        assert_eq!(
            ktap_line(2, "check_tx", &Outcome::Skipped("Test requires devmem support".into())),
            "ok 2 devmem.check_tx # SKIP Test requires devmem support"
        );
        let failed = Outcome::Failed {
            stage: Stage::Assert,
            error: HarnessError::Skip("x".into()),
        };
        assert_eq!(ktap_line(3, "check_tx_chunks", &failed), "not ok 3 devmem.check_tx_chunks");
    }

    #[test]
    fn test_exit_codes() {
        let t = |pass, fail, skip| Totals { pass, fail, skip }.exit_code();
        assert_eq!(t(3, 0, 0), KSFT_PASS);
        assert_eq!(t(2, 0, 1), KSFT_PASS);
        assert_eq!(t(0, 0, 3), KSFT_SKIP);
        assert_eq!(t(2, 1, 0), KSFT_FAIL);
        assert_eq!(t(0, 0, 0), KSFT_PASS);
    }

    #[test]
    fn test_skip_all_plan() {
        let mut runner = Runner::new(Vec::new());
        let totals = runner.skip_all("NETIF not configured").unwrap();
        assert_eq!(totals.exit_code(), KSFT_SKIP);
        let out = String::from_utf8(runner.into_inner()).unwrap();
        assert_eq!(out, "TAP version 13\n1..0 # SKIP NETIF not configured\n");
    }

    #[tokio::test]
    async fn test_run_reports_every_scenario() {
        // No remote address: every scenario skips at the IPv6 gate.
        let mut ctx = TestContext::builder("eth0")
            .addr_v6(Ipv6Addr::LOCALHOST)
            .helper("true")
            .build()
            .await
            .unwrap();

        let mut runner = Runner::new(Vec::new());
        let totals = runner.run(&mut ctx, &Scenario::all(3)).await.unwrap();
        assert_eq!(totals, Totals { pass: 0, fail: 0, skip: 3 });

        let out = String::from_utf8(runner.into_inner()).unwrap();
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(lines[0], "TAP version 13");
        assert_eq!(lines[1], "1..3");
        assert_eq!(lines[2], "ok 1 devmem.check_rx # SKIP Test requires IPv6 connectivity");
        assert_eq!(lines[4], "ok 3 devmem.check_tx_chunks # SKIP Test requires IPv6 connectivity");
        assert_eq!(lines[5], "# Totals: pass:0 fail:0 xfail:0 xpass:0 skip:3 error:0");
    }
}
