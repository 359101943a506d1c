pub mod agent;
pub mod assignment_log;
pub mod carriers;
pub mod classifier;
pub mod config;
pub mod domain;
pub mod errors;
pub mod factory;

pub use agent::{AgentBuilder, QuoteAgent};
pub use assignment_log::{AssignmentSink, InMemoryAssignmentSink, TracingAssignmentSink};
pub use carriers::{CarrierDirectory, CarrierProfile};
pub use classifier::{classify, classify_kind};
pub use domain::assignment::{AssignmentOutcome, AssignmentRecord};
pub use domain::params::{
    CarrierCode, Challenge, ChallengeResolver, DeclineChallenges, JobId, PortalCredentials,
    ProgressSink, ProgressUpdate, QuoteExecutionParams, TracingProgressSink,
};
pub use domain::result::{QuoteData, QuoteError, QuoteErrorKind, QuoteOutcome, QuoteResult};
pub use domain::routing::{AbTestGroup, AbTestSplit, AgentConfig, AgentType, RoutingTable};
pub use errors::{DomainError, FactoryError};
pub use factory::{
    AgentAssignment, AgentBuilders, AgentFactory, ExecutionOptions, FactorySettings,
    RouteDecision, SeededSampler, SplitSampler, ThreadRngSampler,
};
