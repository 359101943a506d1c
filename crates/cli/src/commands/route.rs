use std::collections::BTreeMap;
use std::sync::Arc;

use autoquote_core::assignment_log::TracingAssignmentSink;
use autoquote_core::domain::params::CarrierCode;
use autoquote_core::factory::{
    AgentFactory, ExecutionOptions, SeededSampler, SplitSampler, ThreadRngSampler,
};
use serde_json::json;

use crate::commands::{load_config, CommandResult, Failure};

pub fn run(carrier: &str, samples: u32, seed: Option<u64>) -> CommandResult {
    match tally(carrier, samples, seed) {
        Ok(result) => result,
        Err(failure) => failure.into_result("route"),
    }
}

fn tally(carrier: &str, samples: u32, seed: Option<u64>) -> Result<CommandResult, Failure> {
    let config = load_config()?;
    let builders = autoquote_agent::builders_from_config(&config)
        .map_err(|error| Failure::new("agent_init", error.to_string(), 3))?;
    let sampler: Arc<dyn SplitSampler> = match seed {
        Some(seed) => Arc::new(SeededSampler::new(seed)),
        None => Arc::new(ThreadRngSampler),
    };
    let factory = AgentFactory::new(
        config.routing_table(),
        builders,
        sampler,
        Arc::new(TracingAssignmentSink),
        config.factory_settings(),
    );

    let carrier = CarrierCode::new(carrier);
    let policy = factory.routing().resolve(&carrier);
    let options = ExecutionOptions::default();
    let samples = samples.max(1);

    let mut agents: BTreeMap<&'static str, u32> = BTreeMap::new();
    let mut groups: BTreeMap<&'static str, u32> = BTreeMap::new();
    for _ in 0..samples {
        let decision = factory.route(&carrier, &options);
        *agents.entry(decision.agent_type.as_str()).or_default() += 1;
        let group = decision.ab_test_group.map(|group| group.as_str()).unwrap_or("none");
        *groups.entry(group).or_default() += 1;
    }

    let fallback = policy.fallback_agent.map(|agent| agent.as_str()).unwrap_or("none");
    let message = format!(
        "{carrier}: primary {} (fallback {fallback}, ab split {}%) over {samples} draw(s)",
        policy.primary_agent,
        policy.ab_test_split.percent()
    );
    let data = json!({
        "carrier": carrier.as_str(),
        "carrier_override": factory.routing().has_override(&carrier),
        "primary_agent": policy.primary_agent.as_str(),
        "fallback_agent": fallback,
        "ab_test_split": policy.ab_test_split.percent(),
        "samples": samples,
        "seed": seed,
        "agents": agents,
        "groups": groups,
    });

    Ok(CommandResult::success_with_data("route", message, Some(data)))
}
