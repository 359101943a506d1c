//! Agent Factory: per-job routing, A/B assignment and single-level fallback.
//!
//! Each call to [`AgentFactory::execute_with_fallback`] runs this machine on
//! its own:
//!
//! ```text
//! SELECT_PRIMARY -> EXECUTE_PRIMARY -> success ----------------------------> DONE
//!                                   -> recoverable + distinct fallback ----> EXECUTE_FALLBACK -> DONE
//!                                   -> non-recoverable or no fallback -----> DONE (failure)
//! ```
//!
//! The factory keeps no mutable state across jobs. Routing configuration is
//! read-only, the random source is injected, and the assignment sink is
//! fire-and-forget.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use rand::{rngs::StdRng, Rng, SeedableRng};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::agent::{AgentBuilder, QuoteAgent};
use crate::assignment_log::AssignmentSink;
use crate::domain::assignment::{AssignmentOutcome, AssignmentRecord};
use crate::domain::params::{CarrierCode, ProgressUpdate, QuoteExecutionParams};
use crate::domain::result::{QuoteError, QuoteErrorKind, QuoteResult};
use crate::domain::routing::{AbTestGroup, AgentType, RoutingTable};
use crate::errors::FactoryError;

pub const DEFAULT_EXECUTION_TIMEOUT: Duration = Duration::from_secs(300);
pub const FALLBACK_PROGRESS_STEP: &str = "Retrying with alternate automation engine";

/// Uniform random source over `[0, 100)` used for A/B routing.
pub trait SplitSampler: Send + Sync {
    fn sample_percent(&self) -> f64;
}

/// Reproducible sampler for tests and dry runs.
pub struct SeededSampler {
    rng: Mutex<StdRng>,
}

impl SeededSampler {
    pub fn new(seed: u64) -> Self {
        Self { rng: Mutex::new(StdRng::seed_from_u64(seed)) }
    }
}

impl SplitSampler for SeededSampler {
    fn sample_percent(&self) -> f64 {
        let mut rng = match self.rng.lock() {
            Ok(rng) => rng,
            Err(poisoned) => poisoned.into_inner(),
        };
        rng.gen_range(0.0..100.0)
    }
}

#[derive(Clone, Debug, Default)]
pub struct ThreadRngSampler;

impl SplitSampler for ThreadRngSampler {
    fn sample_percent(&self) -> f64 {
        rand::thread_rng().gen_range(0.0..100.0)
    }
}

/// One builder per backend. The factory never branches on which backend it
/// holds beyond picking the builder.
#[derive(Clone)]
pub struct AgentBuilders {
    browser_use: Arc<dyn AgentBuilder>,
    skyvern: Arc<dyn AgentBuilder>,
}

impl AgentBuilders {
    pub fn new(browser_use: Arc<dyn AgentBuilder>, skyvern: Arc<dyn AgentBuilder>) -> Self {
        Self { browser_use, skyvern }
    }

    pub fn for_type(&self, agent_type: AgentType) -> &dyn AgentBuilder {
        match agent_type {
            AgentType::BrowserUse => self.browser_use.as_ref(),
            AgentType::Skyvern => self.skyvern.as_ref(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FactorySettings {
    /// Hard ceiling applied to every individual `execute_quote` call.
    pub execution_timeout: Duration,
}

impl Default for FactorySettings {
    fn default() -> Self {
        Self { execution_timeout: DEFAULT_EXECUTION_TIMEOUT }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ExecutionOptions {
    pub cancellation: CancellationToken,
    /// Skips the experiment and routes straight to this agent.
    pub force_agent: Option<AgentType>,
}

impl ExecutionOptions {
    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn with_forced_agent(mut self, agent_type: AgentType) -> Self {
        self.force_agent = Some(agent_type);
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RouteDecision {
    pub agent_type: AgentType,
    pub ab_test_group: Option<AbTestGroup>,
}

pub struct AgentAssignment {
    pub agent: Arc<dyn QuoteAgent>,
    pub agent_type: AgentType,
    pub ab_test_group: Option<AbTestGroup>,
}

impl fmt::Debug for AgentAssignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentAssignment")
            .field("agent_type", &self.agent_type)
            .field("ab_test_group", &self.ab_test_group)
            .finish_non_exhaustive()
    }
}

enum Attempt {
    Finished(QuoteResult),
    Cancelled,
}

struct JobTrace {
    primary_agent: AgentType,
    ab_test_group: Option<AbTestGroup>,
    started: Instant,
}

pub struct AgentFactory {
    routing: RoutingTable,
    builders: AgentBuilders,
    sampler: Arc<dyn SplitSampler>,
    sink: Arc<dyn AssignmentSink>,
    settings: FactorySettings,
}

impl AgentFactory {
    pub fn new(
        routing: RoutingTable,
        builders: AgentBuilders,
        sampler: Arc<dyn SplitSampler>,
        sink: Arc<dyn AssignmentSink>,
        settings: FactorySettings,
    ) -> Self {
        Self { routing, builders, sampler, sink, settings }
    }

    pub fn routing(&self) -> &RoutingTable {
        &self.routing
    }

    pub fn settings(&self) -> &FactorySettings {
        &self.settings
    }

    /// Routing decision only; draws at most one sample and builds nothing.
    pub fn route(&self, carrier: &CarrierCode, options: &ExecutionOptions) -> RouteDecision {
        if let Some(agent_type) = options.force_agent {
            return RouteDecision { agent_type, ab_test_group: None };
        }

        let config = self.routing.resolve(carrier);
        let split = config.ab_test_split.percent();
        if split == 0 {
            return RouteDecision { agent_type: config.primary_agent, ab_test_group: None };
        }

        if self.sampler.sample_percent() < f64::from(split) {
            RouteDecision {
                agent_type: config.primary_agent.other(),
                ab_test_group: Some(AbTestGroup::Treatment),
            }
        } else {
            RouteDecision { agent_type: config.primary_agent, ab_test_group: Some(AbTestGroup::Control) }
        }
    }

    pub fn agent_for_carrier(&self, carrier: &CarrierCode, options: &ExecutionOptions) -> AgentAssignment {
        let decision = self.route(carrier, options);
        AgentAssignment {
            agent: self.builders.for_type(decision.agent_type).build(),
            agent_type: decision.agent_type,
            ab_test_group: decision.ab_test_group,
        }
    }

    /// Top-level entry point for one quote job.
    ///
    /// Returns the effective result: the primary's on success, on
    /// non-recoverable failure or when no distinct fallback is configured,
    /// otherwise the fallback's, whatever it is. Exactly one assignment
    /// record is written per call, cancelled jobs included.
    pub async fn execute_with_fallback(
        &self,
        params: &QuoteExecutionParams,
        options: ExecutionOptions,
    ) -> Result<QuoteResult, FactoryError> {
        let carrier = &params.carrier_code;
        let config = self.routing.resolve(carrier);
        let assignment = self.agent_for_carrier(carrier, &options);
        let trace = JobTrace {
            primary_agent: assignment.agent_type,
            ab_test_group: assignment.ab_test_group,
            started: Instant::now(),
        };

        info!(
            event_name = "quote.assignment.intent",
            job_id = %params.job_id,
            carrier_code = %carrier,
            agent_type = %assignment.agent_type,
            ab_test_group = group_label(assignment.ab_test_group),
            fallback_agent = config.fallback_agent.map(AgentType::as_str).unwrap_or("none"),
            "routing quote job"
        );

        let first = match self
            .run_attempt(assignment.agent.as_ref(), assignment.agent_type, params, &options.cancellation)
            .await
        {
            Attempt::Finished(result) => result,
            Attempt::Cancelled => {
                return Err(self.cancelled(params, trace, assignment.agent_type, false, None));
            }
        };

        let fallback_agent = match first.error() {
            Some(error) if error.recoverable() => {
                config.fallback_agent.filter(|fallback| *fallback != assignment.agent_type)
            }
            _ => None,
        };

        let Some(fallback_type) = fallback_agent else {
            if let Some(error) = first.error() {
                info!(
                    event_name = "quote.fallback.skipped",
                    job_id = %params.job_id,
                    carrier_code = %carrier,
                    agent_type = %first.agent_type,
                    error_kind = %error.kind(),
                    recoverable = error.recoverable(),
                    "primary attempt failed; returning it as final"
                );
            }
            self.sink.record(trace.into_record(params, &first, false, None));
            return Ok(first);
        };

        let primary_error = first.error().map(QuoteError::kind);
        warn!(
            event_name = "quote.fallback.start",
            job_id = %params.job_id,
            carrier_code = %carrier,
            failed_agent = %assignment.agent_type,
            fallback_agent = %fallback_type,
            error_kind = primary_error.map(QuoteErrorKind::as_str).unwrap_or("none"),
            "recoverable failure; retrying with fallback agent"
        );
        params.progress.report(ProgressUpdate::new(FALLBACK_PROGRESS_STEP, 0));

        let fallback = self.builders.for_type(fallback_type).build();
        match self.run_attempt(fallback.as_ref(), fallback_type, params, &options.cancellation).await {
            Attempt::Finished(result) => {
                self.sink.record(trace.into_record(params, &result, true, primary_error));
                Ok(result)
            }
            Attempt::Cancelled => Err(self.cancelled(params, trace, fallback_type, true, primary_error)),
        }
    }

    async fn run_attempt(
        &self,
        agent: &dyn QuoteAgent,
        agent_type: AgentType,
        params: &QuoteExecutionParams,
        cancellation: &CancellationToken,
    ) -> Attempt {
        let started = Instant::now();
        let ceiling = self.settings.execution_timeout;

        tokio::select! {
            biased;
            _ = cancellation.cancelled() => {
                agent.cancel();
                Attempt::Cancelled
            }
            finished = tokio::time::timeout(ceiling, agent.execute_quote(params)) => match finished {
                Ok(result) => Attempt::Finished(result),
                Err(_) => {
                    agent.cancel();
                    warn!(
                        event_name = "quote.attempt.timeout",
                        job_id = %params.job_id,
                        agent_type = %agent_type,
                        timeout_secs = ceiling.as_secs(),
                        "agent exceeded execution ceiling; cancelled"
                    );
                    let error = QuoteError::from_kind(
                        QuoteErrorKind::Timeout,
                        format!("{agent_type} did not finish within {}s", ceiling.as_secs()),
                    );
                    Attempt::Finished(QuoteResult::failure(agent_type, error, started.elapsed()))
                }
            }
        }
    }

    fn cancelled(
        &self,
        params: &QuoteExecutionParams,
        trace: JobTrace,
        active_agent: AgentType,
        fallback_used: bool,
        primary_error: Option<QuoteErrorKind>,
    ) -> FactoryError {
        info!(
            event_name = "quote.job.cancelled",
            job_id = %params.job_id,
            carrier_code = %params.carrier_code,
            agent_type = %active_agent,
            "quote job cancelled by caller"
        );
        self.sink.record(AssignmentRecord {
            job_id: params.job_id.clone(),
            carrier_code: params.carrier_code.clone(),
            agent_type: active_agent,
            primary_agent: trace.primary_agent,
            fallback_used,
            ab_test_group: trace.ab_test_group,
            outcome: AssignmentOutcome::Cancelled,
            primary_error,
            elapsed_ms: elapsed_ms(trace.started),
            recorded_at: Utc::now(),
        });
        FactoryError::Cancelled { job_id: params.job_id.clone(), active_agent }
    }
}

impl JobTrace {
    fn into_record(
        self,
        params: &QuoteExecutionParams,
        result: &QuoteResult,
        fallback_used: bool,
        primary_error: Option<QuoteErrorKind>,
    ) -> AssignmentRecord {
        AssignmentRecord {
            job_id: params.job_id.clone(),
            carrier_code: params.carrier_code.clone(),
            agent_type: result.agent_type,
            primary_agent: self.primary_agent,
            fallback_used,
            ab_test_group: self.ab_test_group,
            outcome: AssignmentOutcome::from_result(result),
            primary_error,
            elapsed_ms: elapsed_ms(self.started),
            recorded_at: Utc::now(),
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn group_label(group: Option<AbTestGroup>) -> &'static str {
    group.map(AbTestGroup::as_str).unwrap_or("none")
}
