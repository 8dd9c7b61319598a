//! Step definitions for the devmem scenarios.

use std::net::Ipv6Addr;
use std::path::PathBuf;

use cucumber::{given, then, when, World};

use devmem_selftest::config::HarnessConfig;
use devmem_selftest::context::TestContext;
use devmem_selftest::scenario::{Outcome, Payload, Scenario};
use devmem_selftest::tools::Relay;

const LOOPBACK: &str = env!("CARGO_BIN_EXE_devmem-loopback");

/// Test context for devmem scenarios.
#[derive(Debug, World)]
#[world(init = Self::new)]
pub struct DevmemWorld {
    helper: PathBuf,
    disruptive: bool,
    sent: Payload,
    ctx: Option<TestContext>,
    outcomes: Vec<(String, Outcome)>,
}

impl DevmemWorld {
    fn new() -> Self {
        Self {
            helper: PathBuf::from(LOOPBACK),
            disruptive: true,
            sent: Payload::default(),
            ctx: None,
            outcomes: Vec::new(),
        }
    }

    async fn context(&mut self) -> &mut TestContext {
        if self.ctx.is_none() {
            let harness = HarnessConfig {
                port_poll_interval_ms: 20,
                ..HarnessConfig::default()
            };
            let ctx = TestContext::builder("lo")
                .addr_v6(Ipv6Addr::LOCALHOST)
                .remote_addr_v6(Ipv6Addr::LOCALHOST)
                .helper(&self.helper)
                .relay(Relay::new(LOOPBACK))
                .harness(harness)
                .disruptive(self.disruptive)
                .build()
                .await
                .expect("Failed to build test context");
            self.ctx = Some(ctx);
        }
        self.ctx.as_mut().expect("context just built")
    }

    async fn run(&mut self, scenario: Scenario) {
        let scenario = scenario.with_sent_payload(self.sent.clone());
        let outcome = scenario.run(self.context().await).await;
        self.outcomes.push((scenario.name().to_string(), outcome));
    }

    fn last_outcome(&self) -> &Outcome {
        &self.outcomes.last().expect("No scenario has run").1
    }
}

// ==========================================================================
// Given Steps
// ==========================================================================

#[given("a loopback environment")]
async fn given_loopback_environment(world: &mut DevmemWorld) {
    world.helper = PathBuf::from(LOOPBACK);
}

#[given("the interface does not support devmem")]
async fn given_no_devmem_support(world: &mut DevmemWorld) {
    world.helper = PathBuf::from("false");
}

#[given("disruptive tests are disallowed")]
async fn given_not_disruptive(world: &mut DevmemWorld) {
    world.disruptive = false;
}

#[given(expr = "the sender transmits the lines {string}")]
async fn given_sent_lines(world: &mut DevmemWorld, lines: String) {
    world.sent = Payload::new(lines.split(','));
}

// ==========================================================================
// When Steps
// ==========================================================================

#[when("all scenarios run")]
async fn when_all_run(world: &mut DevmemWorld) {
    for scenario in Scenario::all(3) {
        world.run(scenario).await;
    }
}

#[when(expr = "the {string} scenario runs")]
async fn when_scenario_runs(world: &mut DevmemWorld, name: String) {
    let scenario = Scenario::all(3)
        .into_iter()
        .find(|s| s.name() == name)
        .unwrap_or_else(|| panic!("Unknown scenario {}", name));
    world.run(scenario).await;
}

// ==========================================================================
// Then Steps
// ==========================================================================

#[then("every scenario passes")]
async fn then_all_pass(world: &mut DevmemWorld) {
    assert!(!world.outcomes.is_empty());
    for (name, outcome) in &world.outcomes {
        assert!(outcome.is_passed(), "{} did not pass: {:?}", name, outcome);
    }
}

#[then(expr = "every scenario is skipped with {string}")]
async fn then_all_skipped(world: &mut DevmemWorld, reason: String) {
    assert_eq!(world.outcomes.len(), 3);
    for (name, outcome) in &world.outcomes {
        assert!(!outcome.is_failed(), "{} failed: {:?}", name, outcome);
        match outcome {
            Outcome::Skipped(r) => assert_eq!(r, &reason, "{} skipped for another reason", name),
            other => panic!("{} was not skipped: {:?}", name, other),
        }
    }
}

#[then("each scenario used a different port")]
async fn then_distinct_ports(world: &mut DevmemWorld) {
    let ctx = world.ctx.as_ref().expect("Context not built");
    assert_eq!(ctx.ports().issued().len(), world.outcomes.len());
}

#[then("no port was issued")]
async fn then_no_port(world: &mut DevmemWorld) {
    let ctx = world.ctx.as_ref().expect("Context not built");
    assert!(ctx.ports().issued().is_empty());
}

#[then(expr = "the scenario fails during {string}")]
async fn then_fails_during(world: &mut DevmemWorld, stage_name: String) {
    assert!(!world.last_outcome().is_skipped());
    match world.last_outcome() {
        Outcome::Failed { stage, .. } => assert_eq!(stage.to_string(), stage_name),
        other => panic!("Expected failure, got {:?}", other),
    }
}

#[then(expr = "the failure mentions {string} and {string}")]
async fn then_failure_mentions(world: &mut DevmemWorld, first: String, second: String) {
    match world.last_outcome() {
        Outcome::Failed { error, .. } => {
            let message = error.to_string();
            assert!(message.contains(&first), "{} missing from {}", first, message);
            assert!(message.contains(&second), "{} missing from {}", second, message);
        }
        other => panic!("Expected failure, got {:?}", other),
    }
}
